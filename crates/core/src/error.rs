use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Transport-level error substrings. A fetch error matching any of these means
/// the domain itself is down, not just the URL: the caller fails every
/// pending URL for the domain instead of retrying siblings.
const CONNECTION_FAILURE_PATTERNS: &[&str] = &[
    "econnrefused",
    "enotfound",
    "etimedout",
    "econnreset",
    "ehostunreach",
    "enetunreach",
    "socket hang up",
    "socks5 proxy rejected",
    "general socks server failure",
    "host unreachable",
    "network is unreachable",
];

/// Case-insensitive substring match against the connection-failure set.
pub fn is_connection_failure(error: &str) -> bool {
    let lower = error.to_lowercase();
    CONNECTION_FAILURE_PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failures_match() {
        assert!(is_connection_failure("connect ECONNREFUSED 127.0.0.1:80"));
        assert!(is_connection_failure("getaddrinfo ENOTFOUND abc.onion"));
        assert!(is_connection_failure("General SOCKS server failure"));
        assert!(is_connection_failure("Socks5 proxy rejected the connection"));
        assert!(is_connection_failure("Host unreachable (TTL expired)"));
        assert!(is_connection_failure("read ECONNRESET"));
        assert!(is_connection_failure("socket hang up"));
    }

    #[test]
    fn test_http_errors_do_not_match() {
        assert!(!is_connection_failure("HTTP status 404"));
        assert!(!is_connection_failure("unexpected end of input"));
        assert!(!is_connection_failure("certificate verify failed"));
    }
}
