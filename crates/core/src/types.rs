use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

/// v3 onion addresses: 56 base32 chars + ".onion".
pub fn is_onion_address(host: &str) -> bool {
    let Some(name) = host.strip_suffix(".onion") else {
        return false;
    };
    name.len() == 56
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c))
}

/// Pull the onion host out of a URL, or None for clearnet/invalid hosts.
pub fn extract_onion_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let host = host.to_ascii_lowercase();
    if is_onion_address(&host) {
        Some(host)
    } else {
        None
    }
}

/// Which worker pool a domain lock belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Crawl,
    DirScan,
    PortScan,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Crawl => "crawl",
            Subsystem::DirScan => "dirscan",
            Subsystem::PortScan => "portscan",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStatus {
    Pending,
    Crawling,
    Completed,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Pending => "pending",
            CrawlStatus::Crawling => "crawling",
            CrawlStatus::Completed => "completed",
            CrawlStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }
}

/// Named port/path list for the scan workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProfile {
    Quick,
    Standard,
    Full,
}

impl ScanProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanProfile::Quick => "quick",
            ScanProfile::Standard => "standard",
            ScanProfile::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Some(ScanProfile::Quick),
            "standard" => Some(ScanProfile::Standard),
            "full" => Some(ScanProfile::Full),
            _ => None,
        }
    }
}

/// One crawl_queue row handed to a worker. The row is already `processing`
/// in the store by the time a worker sees it.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: i64,
    pub url: String,
    pub domain: String,
    pub priority: i32,
    pub attempts: i32,
}

/// One per-domain job from scan_queue / dir_scan_queue.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub id: i64,
    pub domain: String,
    pub profile: ScanProfile,
    pub priority: i32,
    pub attempts: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    OnionInternal,
    OnionExternal,
    Clearnet,
    Other,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::OnionInternal => "onion_internal",
            LinkType::OnionExternal => "onion_external",
            LinkType::Clearnet => "clearnet",
            LinkType::Other => "other",
        }
    }
}

/// Whether the link came from an HTML element or bare text in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSource {
    Element,
    RawText,
}

impl LinkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkSource::Element => "element",
            LinkSource::RawText => "raw_text",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedLink {
    pub url: String,
    pub anchor_text: Option<String>,
    pub link_type: LinkType,
    pub source: LinkSource,
    pub position: i32,
    /// Resolved when the target is an onion host.
    pub target_domain: Option<String>,
}

/// What the crawler persists for one URL.
#[derive(Debug, Clone, Default)]
pub struct PageData {
    pub url: String,
    pub path: String,
    pub title: Option<String>,
    pub content_text: String,
    /// Only kept when the body is under the storage cap.
    pub content_html: Option<String>,
    pub status_code: u16,
    pub content_length: i64,
    pub content_type: Option<String>,
    pub language: Option<String>,
    pub meta_description: Option<String>,
    pub h1: Vec<String>,
    pub accessible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Timeout,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Filtered => "filtered",
            PortState::Timeout => "timeout",
        }
    }
}

/// Output of the banner signature matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMatch {
    pub service: String,
    pub version: Option<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct PortScanRecord {
    pub domain: String,
    pub port: u16,
    pub state: PortState,
    pub banner: Option<String>,
    pub service: Option<ServiceMatch>,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DirScanRecord {
    pub domain: String,
    pub path: String,
    pub status_code: Option<u16>,
    pub content_length: Option<i64>,
    pub content_type: Option<String>,
    pub response_time_ms: i64,
    pub server_header: Option<String>,
    pub redirect_url: Option<String>,
    /// First 4 KB of the GET body, when one was fetched.
    pub body_snippet: Option<String>,
    pub is_interesting: bool,
    pub interest_reason: Option<String>,
    pub interest_category: Option<String>,
}

/// One crawl attempt, appended to crawl_logs through the write buffer.
#[derive(Debug, Clone)]
pub struct CrawlLogEntry {
    pub url: String,
    pub domain: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub worker_id: String,
}

/// A domain seeded into the scan queues, coalesced by the write buffer.
#[derive(Debug, Clone)]
pub struct ScanSeed {
    pub domain: String,
    pub priority: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_onion_address_validation() {
        let valid = format!("{}.onion", "a".repeat(56));
        assert!(is_onion_address(&valid));
        let mixed = format!("{}2b7.onion", "z".repeat(53));
        assert!(is_onion_address(&mixed));

        // v2 length, bad charset, wrong suffix
        assert!(!is_onion_address("expyuzz4wqqyqhjn.onion"));
        assert!(!is_onion_address(&format!("{}1.onion", "a".repeat(55))));
        assert!(!is_onion_address(&format!("{}.com", "a".repeat(56))));
        assert!(!is_onion_address(&format!("{}.ONION", "a".repeat(56))));
    }

    #[test]
    fn test_extract_onion_domain() {
        let addr = format!("{}.onion", "b".repeat(56));
        let url = Url::parse(&format!("http://{}/some/page", addr)).unwrap();
        assert_eq!(extract_onion_domain(&url).as_deref(), Some(addr.as_str()));

        let clearnet = Url::parse("http://example.com/").unwrap();
        assert_eq!(extract_onion_domain(&clearnet), None);
    }
}
