//! Sticky-session helper: reads affinity cookies from the request and
//! decides whether to set/refresh the proxy's own affinity cookie on a
//! successful response.

use std::collections::HashSet;

use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::{HttpRequest, HttpResponse};

pub const VCAP_COOKIE_ID: &str = "__VCAP_ID__";

/// If the request carries any cookie named in `sticky_session_cookie_names`
/// *and* a `__VCAP_ID__` cookie, returns the latter's value. Otherwise
/// empty — there is no sticky preference to honor.
pub fn get_sticky_session(req: &HttpRequest, sticky_session_cookie_names: &HashSet<String>) -> String {
    let has_sticky_cookie = sticky_session_cookie_names
        .iter()
        .any(|name| req.cookie(name).is_some());
    if !has_sticky_cookie {
        return String::new();
    }
    req.cookie(VCAP_COOKIE_ID)
        .map(|c| c.value().to_string())
        .unwrap_or_default()
}

/// Cookie attributes captured off a backend's own sticky cookie, to be
/// propagated onto the `__VCAP_ID__` cookie we set.
#[derive(Default)]
struct CapturedAttrs {
    max_age: Option<CookieDuration>,
    secure: bool,
    same_site: Option<SameSite>,
}

/// Inspects the upstream response's `Set-Cookie` headers and, if affinity
/// should be established or refreshed, appends a `Set-Cookie` for
/// `__VCAP_ID__` bound to `endpoint_instance_id`.
///
/// `sticky` starts true iff the request already carried an affinity id
/// (`original_instance_id` non-empty); it is forced true if the backend set
/// any cookie named in `sticky_session_cookie_names`, and forced false if
/// the backend already manages `__VCAP_ID__` itself.
pub fn setup_sticky_session(
    response: &mut HttpResponse,
    endpoint_instance_id: &str,
    original_instance_id: &str,
    secure_cookies: bool,
    context_path: &str,
    sticky_session_cookie_names: &HashSet<String>,
) {
    let mut sticky = !original_instance_id.is_empty();
    let mut attrs = CapturedAttrs::default();

    let response_cookies: Vec<Cookie<'static>> = response
        .cookies()
        .map(|c| c.into_owned())
        .collect();

    for cookie in &response_cookies {
        if sticky_session_cookie_names.contains(cookie.name()) {
            sticky = true;
            if let Some(max_age) = cookie.max_age() {
                if max_age.is_negative() {
                    attrs.max_age = Some(max_age);
                }
            }
            attrs.secure = cookie.secure().unwrap_or(false);
            attrs.same_site = cookie.same_site();
            break;
        }
    }

    for cookie in &response_cookies {
        if cookie.name() == VCAP_COOKIE_ID {
            sticky = false;
            break;
        }
    }

    if !sticky {
        return;
    }

    let secure = secure_cookies || attrs.secure;

    let mut builder = Cookie::build(VCAP_COOKIE_ID, endpoint_instance_id.to_string())
        .path(context_path.to_string())
        .http_only(true)
        .secure(secure);

    if let Some(max_age) = attrs.max_age {
        builder = builder.max_age(max_age);
    }
    if let Some(same_site) = attrs.same_site {
        builder = builder.same_site(same_site);
    }

    let _ = response.add_cookie(&builder.finish());
}
