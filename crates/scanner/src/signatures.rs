use once_cell::sync::Lazy;
use regex::Regex;

use darkmap_core::ServiceMatch;

struct Signature {
    service: &'static str,
    pattern: Lazy<Regex>,
    /// Capture group 1 is the version when present.
    confidence: f32,
}

macro_rules! sig {
    ($service:expr, $re:expr, $confidence:expr) => {
        Signature {
            service: $service,
            pattern: Lazy::new(|| Regex::new($re).unwrap()),
            confidence: $confidence,
        }
    };
}

/// Ordered: specific version-bearing patterns before generic fallbacks; the
/// first match wins.
static SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| vec![
    sig!("ssh", r"SSH-2\.0-OpenSSH[_-]([0-9][\w.]*)", 0.95),
    sig!("ssh", r"SSH-[12]\.[0-9]+-", 0.8),
    sig!("nginx", r"(?i)server:\s*nginx/([0-9.]+)", 0.9),
    sig!("nginx", r"(?i)server:\s*nginx", 0.7),
    sig!("apache", r"(?i)server:\s*apache/([0-9.]+)", 0.9),
    sig!("apache", r"(?i)server:\s*apache", 0.7),
    sig!("lighttpd", r"(?i)server:\s*lighttpd/([0-9.]+)", 0.9),
    sig!("ftp", r"(?i)220[ -].*vsftpd ([0-9.]+)", 0.9),
    sig!("ftp", r"(?i)^220[ -].*ftp", 0.6),
    sig!("smtp", r"(?i)220[ -].*postfix", 0.85),
    sig!("smtp", r"(?i)220[ -].*exim ([0-9.]+)", 0.85),
    sig!("smtp", r"(?i)220[ -].*e?smtp", 0.6),
    sig!("pop3", r"(?i)^\+OK", 0.6),
    sig!("imap", r"(?i)^\* OK.*imap", 0.7),
    sig!("mysql", r"([0-9]+\.[0-9]+\.[0-9]+[\w-]*).*mysql_native_password", 0.75),
    sig!("postgres", r"(?i)FATAL.*no pg_hba\.conf", 0.7),
    sig!("irc", r"(?i)NOTICE (AUTH|\*)", 0.7),
    sig!("xmpp", r"(?i)<\?xml.*jabber", 0.7),
    sig!("redis", r"-ERR unknown command|-NOAUTH", 0.8),
    sig!("http", r"HTTP/1\.[01] \d{3}", 0.5),
]);

/// Match a banner against the signature table. Binary-heavy banners are
/// lossily decoded first; service handshakes that embed text survive that.
pub fn match_banner(banner: &[u8]) -> Option<ServiceMatch> {
    if banner.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(banner);

    for sig in SIGNATURES.iter() {
        if let Some(caps) = sig.pattern.captures(&text) {
            let version = caps.get(1).map(|m| m.as_str().to_string());
            return Some(ServiceMatch {
                service: sig.service.to_string(),
                version,
                confidence: sig.confidence,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openssh_with_version() {
        let m = match_banner(b"SSH-2.0-OpenSSH_9.6p1 Debian-3\r\n").unwrap();
        assert_eq!(m.service, "ssh");
        assert_eq!(m.version.as_deref(), Some("9.6p1"));
        assert!(m.confidence > 0.9);
    }

    #[test]
    fn test_generic_ssh_without_version() {
        let m = match_banner(b"SSH-2.0-dropbear\r\n").unwrap();
        assert_eq!(m.service, "ssh");
        assert_eq!(m.version, None);
    }

    #[test]
    fn test_nginx_from_http_response() {
        let m = match_banner(b"HTTP/1.1 200 OK\r\nServer: nginx/1.24.0\r\n\r\n").unwrap();
        assert_eq!(m.service, "nginx");
        assert_eq!(m.version.as_deref(), Some("1.24.0"));
    }

    #[test]
    fn test_mysql_handshake_with_noise() {
        let mut banner = vec![0x4a, 0x00, 0x00, 0x00, 0x0a];
        banner.extend_from_slice(b"10.11.6-MariaDB-0");
        banner.extend_from_slice(&[0x00, 0x15, 0x02]);
        banner.extend_from_slice(b"mysql_native_password");
        let m = match_banner(&banner).unwrap();
        assert_eq!(m.service, "mysql");
        assert_eq!(m.version.as_deref(), Some("10.11.6-MariaDB-0"));
    }

    #[test]
    fn test_unknown_banner_yields_none() {
        assert_eq!(match_banner(b""), None);
        assert_eq!(match_banner(b"\x00\x01\x02\x03"), None);
    }
}
