use std::time::Duration;

use tokio::io::AsyncReadExt;
use tracing::debug;

use darkmap_core::ScanProfile;
use darkmap_proxy::{tcp_connect, SocksError};

/// Cap on banner bytes read from an open port.
pub const MAX_BANNER_BYTES: usize = 4096;

const QUICK_PORTS: &[u16] = &[22, 80, 443, 8080, 8333];

const STANDARD_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 143, 443, 465, 587, 993, 995, 3306, 5222, 5432, 6667, 8080, 8333,
    9050,
];

const FULL_EXTRA_PORTS: &[u16] = &[
    111, 135, 139, 389, 445, 512, 873, 1080, 1433, 2049, 3000, 3128, 4444, 5000, 5900, 6379, 8000,
    8443, 8888, 9000, 9090, 11211, 27017, 50050,
];

/// Port list for a profile. `full` is `standard` plus the extended set.
pub fn ports_for_profile(profile: ScanProfile) -> Vec<u16> {
    match profile {
        ScanProfile::Quick => QUICK_PORTS.to_vec(),
        ScanProfile::Standard => STANDARD_PORTS.to_vec(),
        ScanProfile::Full => {
            let mut ports = STANDARD_PORTS.to_vec();
            ports.extend_from_slice(FULL_EXTRA_PORTS);
            ports.sort_unstable();
            ports
        }
    }
}

/// What a single TCP probe observed.
#[derive(Debug)]
pub enum PortProbeOutcome {
    /// Connected; carries whatever the service volunteered.
    Open { banner: Vec<u8> },
    /// Destination refused.
    Closed,
    /// Dropped somewhere along the way.
    Filtered,
    /// No answer inside the connect timeout.
    TimedOut,
    /// Proxy-side failure; don't record, move on.
    Retry(String),
}

/// Open `domain:port` through the SOCKS5 proxy and grab a banner. Reads until
/// the cap, the timeout, or the peer closing, whichever comes first. Services
/// that wait for the client (HTTP) simply yield an empty banner.
pub async fn probe_port(
    proxy_addr: &str,
    domain: &str,
    port: u16,
    connect_timeout: Duration,
    banner_timeout: Duration,
) -> PortProbeOutcome {
    let mut stream = match tcp_connect(proxy_addr, domain, port, connect_timeout).await {
        Ok(s) => s,
        Err(SocksError::ConnectionRefused) => return PortProbeOutcome::Closed,
        Err(e @ SocksError::Timeout { .. }) => {
            debug!(domain, port, error = %e, "connect timed out");
            return PortProbeOutcome::TimedOut;
        }
        Err(
            e @ (SocksError::HostUnreachable
            | SocksError::NetworkUnreachable
            | SocksError::TtlExpired
            | SocksError::NotAllowed
            | SocksError::Rejected(_)),
        ) => {
            debug!(domain, port, error = %e, "probe filtered");
            return PortProbeOutcome::Filtered;
        }
        Err(e) => return PortProbeOutcome::Retry(e.to_string()),
    };

    let mut banner = Vec::new();
    let mut chunk = [0u8; 1024];
    let deadline = tokio::time::Instant::now() + banner_timeout;
    while banner.len() < MAX_BANNER_BYTES {
        let read = tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await;
        match read {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                let room = MAX_BANNER_BYTES - banner.len();
                banner.extend_from_slice(&chunk[..n.min(room)]);
            }
            Ok(Err(_)) | Err(_) => break,
        }
    }

    PortProbeOutcome::Open { banner }
}

/// Printable snippet of a banner for storage.
pub fn banner_snippet(banner: &[u8]) -> Option<String> {
    if banner.is_empty() {
        return None;
    }
    let text: String = String::from_utf8_lossy(banner)
        .chars()
        .map(|c| if c.is_control() && c != '\n' { '.' } else { c })
        .take(1024)
        .collect();
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_grow_and_stay_sorted() {
        let quick = ports_for_profile(ScanProfile::Quick);
        let standard = ports_for_profile(ScanProfile::Standard);
        let full = ports_for_profile(ScanProfile::Full);

        assert!(quick.len() < standard.len());
        assert!(standard.len() < full.len());
        for p in &standard {
            assert!(full.contains(p));
        }
        let mut sorted = full.clone();
        sorted.sort_unstable();
        assert_eq!(full, sorted);
    }

    #[test]
    fn test_banner_snippet_sanitizes() {
        assert_eq!(banner_snippet(b""), None);
        let s = banner_snippet(b"SSH-2.0-OpenSSH_9.6\r\n").unwrap();
        assert!(s.starts_with("SSH-2.0-OpenSSH_9.6"));
        assert!(!s.contains('\r'));
    }
}
