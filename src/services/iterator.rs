//! Endpoint iterator: a stateful, request-scoped cursor over a route pool's
//! endpoints.
//!
//! `next` is deterministic given strategy and sticky hint; `endpoint_failed`
//! may be called between `next` calls to influence subsequent choices;
//! `pre_request`/`post_request` must be balanced per attempt. Implementations
//! are not shared across requests, but the endpoints they cursor over are
//! shared and must tolerate concurrent iterators touching the same pool
//! (connection counters are monotone, not serialized across iterators).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::models::endpoint::Endpoint;
use crate::models::error::TransportError;

/// Request-scoped cursor over a route pool's live endpoints.
pub trait EndpointIterator: Send {
    /// Returns the next endpoint to attempt, or `None` if the pool is
    /// exhausted.
    fn next(&mut self) -> Option<Arc<Endpoint>>;

    /// Feedback hook: called when an attempt against the most recently
    /// yielded endpoint failed, so the strategy can avoid or deprioritize it
    /// on a later `next` within the same request.
    fn endpoint_failed(&mut self, err: &TransportError);

    /// Called immediately before executing a request against `endpoint`.
    fn pre_request(&mut self, endpoint: &Arc<Endpoint>) {
        endpoint.increment_connections();
    }

    /// Called immediately after a request against `endpoint` completes,
    /// successfully or not. Always paired with a prior `pre_request`.
    fn post_request(&mut self, endpoint: &Arc<Endpoint>) {
        endpoint.decrement_connections();
    }
}

/// Round-robin iterator: visits each live endpoint once per `next` call in
/// circular order, starting from the sticky endpoint if one was requested
/// and is still present.
pub struct RoundRobinIterator {
    endpoints: Vec<Arc<Endpoint>>,
    cursor: usize,
    failed: std::collections::HashSet<usize>,
}

impl RoundRobinIterator {
    fn new(endpoints: Vec<Arc<Endpoint>>, sticky_instance_id: Option<&str>) -> Self {
        let cursor = sticky_instance_id
            .and_then(|id| endpoints.iter().position(|e| e.private_instance_id == id))
            .unwrap_or(0);
        Self {
            endpoints,
            cursor,
            failed: std::collections::HashSet::new(),
        }
    }
}

impl EndpointIterator for RoundRobinIterator {
    fn next(&mut self) -> Option<Arc<Endpoint>> {
        if self.endpoints.is_empty() || self.failed.len() >= self.endpoints.len() {
            return None;
        }
        loop {
            let idx = self.cursor % self.endpoints.len();
            self.cursor += 1;
            if !self.failed.contains(&idx) {
                return Some(self.endpoints[idx].clone());
            }
        }
    }

    fn endpoint_failed(&mut self, _err: &TransportError) {
        let idx = (self.cursor + self.endpoints.len() - 1) % self.endpoints.len();
        self.failed.insert(idx);
    }
}

/// Least-connections iterator: always offers the live endpoint with the
/// fewest currently active connections.
pub struct LeastConnectionsIterator {
    endpoints: Vec<Arc<Endpoint>>,
    failed: std::collections::HashSet<usize>,
    last_yielded: Option<usize>,
}

impl LeastConnectionsIterator {
    fn new(endpoints: Vec<Arc<Endpoint>>) -> Self {
        Self {
            endpoints,
            failed: std::collections::HashSet::new(),
            last_yielded: None,
        }
    }
}

impl EndpointIterator for LeastConnectionsIterator {
    fn next(&mut self) -> Option<Arc<Endpoint>> {
        let picked = self
            .endpoints
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.failed.contains(idx))
            .min_by_key(|(_, e)| e.active_connections())
            .map(|(idx, e)| (idx, e.clone()))?;
        self.last_yielded = Some(picked.0);
        Some(picked.1)
    }

    fn endpoint_failed(&mut self, _err: &TransportError) {
        // Exclude whichever endpoint `next()` actually handed out, not
        // whatever recomputing the minimum over every endpoint happens to
        // find now — on a tie those can disagree, and re-deriving the
        // minimum here could keep pointing at an index already excluded.
        if let Some(idx) = self.last_yielded.take() {
            self.failed.insert(idx);
        }
    }
}

/// Random iterator: each `next` call draws a uniformly random live endpoint.
pub struct RandomIterator {
    endpoints: Vec<Arc<Endpoint>>,
    failed: std::collections::HashSet<usize>,
}

impl RandomIterator {
    fn new(endpoints: Vec<Arc<Endpoint>>) -> Self {
        Self {
            endpoints,
            failed: std::collections::HashSet::new(),
        }
    }
}

impl EndpointIterator for RandomIterator {
    fn next(&mut self) -> Option<Arc<Endpoint>> {
        let live: Vec<usize> = (0..self.endpoints.len())
            .filter(|idx| !self.failed.contains(idx))
            .collect();
        if live.is_empty() {
            return None;
        }
        use rand::Rng;
        let pick = live[rand::thread_rng().gen_range(0..live.len())];
        Some(self.endpoints[pick].clone())
    }

    fn endpoint_failed(&mut self, _err: &TransportError) {
        // The caller always retries `next()` after this, which re-samples;
        // nothing to mark since we don't track "last yielded" identity here.
    }
}

/// Weighted iterator: expands each endpoint into `weight` slots (weight
/// taken from the `"weight"` tag, default 1) and cycles through the
/// resulting list.
pub struct WeightedIterator {
    weighted: Vec<Arc<Endpoint>>,
    cursor: AtomicUsize,
    failed_addrs: std::collections::HashSet<String>,
}

impl WeightedIterator {
    fn new(endpoints: Vec<Arc<Endpoint>>) -> Self {
        let mut weighted = Vec::new();
        for e in &endpoints {
            let weight: usize = e
                .tags
                .get("weight")
                .and_then(|w| w.parse().ok())
                .unwrap_or(1)
                .max(1);
            for _ in 0..weight {
                weighted.push(e.clone());
            }
        }
        Self {
            weighted,
            cursor: AtomicUsize::new(0),
            failed_addrs: std::collections::HashSet::new(),
        }
    }
}

impl EndpointIterator for WeightedIterator {
    fn next(&mut self) -> Option<Arc<Endpoint>> {
        if self.weighted.is_empty() {
            return None;
        }
        for _ in 0..self.weighted.len() {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.weighted.len();
            let candidate = &self.weighted[idx];
            if !self.failed_addrs.contains(&candidate.address) {
                return Some(candidate.clone());
            }
        }
        None
    }

    fn endpoint_failed(&mut self, _err: &TransportError) {
        // Mark the most recently considered address as failed for the rest
        // of this request by scanning forward from the last cursor value.
        let idx = self.cursor.load(Ordering::Relaxed);
        if !self.weighted.is_empty() {
            let last = (idx + self.weighted.len() - 1) % self.weighted.len();
            self.failed_addrs
                .insert(self.weighted[last].address.clone());
        }
    }
}

/// Client-IP-hash iterator: deterministically maps a client IP to one
/// endpoint for session persistence. Falls back to the first live endpoint
/// when no client IP is available.
pub struct IpHashIterator {
    endpoints: Vec<Arc<Endpoint>>,
    client_ip: Option<String>,
    failed: std::collections::HashSet<usize>,
    exhausted: bool,
    last_yielded: Option<usize>,
}

impl IpHashIterator {
    fn new(endpoints: Vec<Arc<Endpoint>>, client_ip: Option<String>) -> Self {
        Self {
            endpoints,
            client_ip,
            failed: std::collections::HashSet::new(),
            exhausted: false,
            last_yielded: None,
        }
    }

    fn hash_ip(ip: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        ip.hash(&mut hasher);
        hasher.finish()
    }
}

impl EndpointIterator for IpHashIterator {
    fn next(&mut self) -> Option<Arc<Endpoint>> {
        if self.endpoints.is_empty() || self.exhausted {
            return None;
        }
        let idx = match &self.client_ip {
            Some(ip) => (Self::hash_ip(ip) as usize) % self.endpoints.len(),
            None => 0,
        };
        self.exhausted = true;
        if self.failed.contains(&idx) {
            return None;
        }
        self.last_yielded = Some(idx);
        Some(self.endpoints[idx].clone())
    }

    fn endpoint_failed(&mut self, _err: &TransportError) {
        if let Some(idx) = self.last_yielded.take() {
            self.failed.insert(idx);
        }
        self.exhausted = false;
    }
}

/// Builds the iterator named by a route pool's configured `load_balance`
/// strategy. Unknown strategy names fall back to round robin, matching the
/// pool's "strategy name passed verbatim" contract without failing the
/// request over a typo in configuration.
pub struct IteratorFactory;

impl IteratorFactory {
    pub fn create(
        strategy: &str,
        endpoints: Vec<Arc<Endpoint>>,
        sticky_instance_id: Option<&str>,
    ) -> Box<dyn EndpointIterator> {
        match strategy {
            "least_connections" => Box::new(LeastConnectionsIterator::new(endpoints)),
            "random" => Box::new(RandomIterator::new(endpoints)),
            "weighted" => Box::new(WeightedIterator::new(endpoints)),
            "ip_hash" => Box::new(IpHashIterator::new(
                endpoints,
                sticky_instance_id.map(str::to_owned),
            )),
            _ => Box::new(RoundRobinIterator::new(endpoints, sticky_instance_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::endpoint::Scheme;

    fn endpoint(id: &str) -> Arc<Endpoint> {
        Arc::new(Endpoint::new(format!("{id}:8080"), Scheme::Http, "app-1", id, "0"))
    }

    fn weighted_endpoint(id: &str, weight: &str) -> Arc<Endpoint> {
        let mut e = Endpoint::new(format!("{id}:8080"), Scheme::Http, "app-1", id, "0");
        e.tags.insert("weight".to_string(), weight.to_string());
        Arc::new(e)
    }

    fn ids<I: EndpointIterator + ?Sized>(iter: &mut I, n: usize) -> Vec<String> {
        (0..n)
            .map(|_| iter.next().map(|e| e.private_instance_id.clone()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let endpoints = vec![endpoint("a"), endpoint("b"), endpoint("c")];
        let mut iter = RoundRobinIterator::new(endpoints, None);
        assert_eq!(ids(&mut iter, 4), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn round_robin_starts_from_sticky_endpoint() {
        let endpoints = vec![endpoint("a"), endpoint("b"), endpoint("c")];
        let mut iter = RoundRobinIterator::new(endpoints, Some("b"));
        assert_eq!(ids(&mut iter, 2), vec!["b", "c"]);
    }

    #[test]
    fn round_robin_excludes_failed_endpoint_on_next_call() {
        let endpoints = vec![endpoint("a"), endpoint("b")];
        let mut iter = RoundRobinIterator::new(endpoints, None);
        let first = iter.next().unwrap();
        assert_eq!(first.private_instance_id, "a");
        iter.endpoint_failed(&TransportError::ConnectRefused("x".into()));
        let second = iter.next().unwrap();
        assert_eq!(second.private_instance_id, "b");
        // Both endpoints failed now: no more candidates.
        iter.endpoint_failed(&TransportError::ConnectRefused("x".into()));
        assert!(iter.next().is_none());
    }

    #[test]
    fn least_connections_prefers_the_idlest_endpoint() {
        let busy = endpoint("busy");
        busy.increment_connections();
        busy.increment_connections();
        let idle = endpoint("idle");
        let mut iter = LeastConnectionsIterator::new(vec![busy, idle]);
        assert_eq!(iter.next().unwrap().private_instance_id, "idle");
    }

    #[test]
    fn least_connections_endpoint_failed_excludes_it_from_later_selection() {
        let a = endpoint("a");
        let b = endpoint("b");
        // Both idle: "a" comes first in iteration order, so it is offered
        // first and is the one `endpoint_failed` should exclude.
        let mut iter = LeastConnectionsIterator::new(vec![a, b]);
        let first = iter.next().unwrap();
        assert_eq!(first.private_instance_id, "a");
        iter.endpoint_failed(&TransportError::ConnectRefused("x".into()));
        let second = iter.next().unwrap();
        assert_eq!(second.private_instance_id, "b");
        iter.endpoint_failed(&TransportError::ConnectRefused("x".into()));
        assert!(iter.next().is_none());
    }

    #[test]
    fn random_never_yields_more_than_the_live_set() {
        let endpoints = vec![endpoint("a"), endpoint("b")];
        let mut iter = RandomIterator::new(endpoints);
        for _ in 0..10 {
            let picked = iter.next().unwrap();
            assert!(picked.private_instance_id == "a" || picked.private_instance_id == "b");
        }
    }

    #[test]
    fn weighted_visits_an_endpoint_proportionally_to_its_weight_tag() {
        let endpoints = vec![weighted_endpoint("a", "1"), weighted_endpoint("b", "3")];
        let mut iter = WeightedIterator::new(endpoints);
        let picks = ids(&mut iter, 4);
        let b_count = picks.iter().filter(|id| id.as_str() == "b").count();
        let a_count = picks.iter().filter(|id| id.as_str() == "a").count();
        assert_eq!(a_count, 1);
        assert_eq!(b_count, 3);
    }

    #[test]
    fn weighted_endpoint_failed_excludes_its_address_from_later_picks() {
        let endpoints = vec![weighted_endpoint("a", "1"), weighted_endpoint("b", "1")];
        let mut iter = WeightedIterator::new(endpoints);
        let first = iter.next().unwrap();
        iter.endpoint_failed(&TransportError::ConnectRefused("x".into()));
        for _ in 0..4 {
            let picked = iter.next().unwrap();
            assert_ne!(picked.private_instance_id, first.private_instance_id);
        }
    }

    #[test]
    fn ip_hash_is_deterministic_for_the_same_key() {
        let endpoints = vec![endpoint("a"), endpoint("b"), endpoint("c")];
        let mut iter1 = IpHashIterator::new(endpoints.clone(), Some("client-1".to_string()));
        let mut iter2 = IpHashIterator::new(endpoints, Some("client-1".to_string()));
        assert_eq!(
            iter1.next().unwrap().private_instance_id,
            iter2.next().unwrap().private_instance_id
        );
    }

    #[test]
    fn ip_hash_endpoint_failed_excludes_the_only_candidate_it_names() {
        let endpoints = vec![endpoint("a"), endpoint("b"), endpoint("c")];
        let mut iter = IpHashIterator::new(endpoints, Some("client-1".to_string()));
        let first = iter.next().expect("deterministic pick");
        iter.endpoint_failed(&TransportError::ConnectRefused("x".into()));
        // The hash always recomputes the same index; once it has failed,
        // there is no alternate candidate for this strategy to offer.
        assert!(iter.next().is_none(), "failed endpoint {} must not be re-offered", first.private_instance_id);
    }

    #[test]
    fn ip_hash_falls_back_to_first_endpoint_with_no_client_ip() {
        let endpoints = vec![endpoint("a"), endpoint("b")];
        let mut iter = IpHashIterator::new(endpoints, None);
        assert_eq!(iter.next().unwrap().private_instance_id, "a");
    }
}
