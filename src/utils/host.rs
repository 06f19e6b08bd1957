//! Extracts the virtual host a request is addressed to, stripping any port
//! suffix so it matches the registry's configured host keys.

pub fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_port() {
        assert_eq!(strip_port("app.example.com:8080"), "app.example.com");
    }

    #[test]
    fn leaves_bare_host_unchanged() {
        assert_eq!(strip_port("app.example.com"), "app.example.com");
    }

    #[test]
    fn empty_host_yields_empty_str() {
        assert_eq!(strip_port(""), "");
    }
}
