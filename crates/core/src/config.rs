use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub proxy: ProxyConfig,
    pub database: DatabaseConfig,
    pub crawler: CrawlerConfig,
    pub portscan: PortScanConfig,
    pub dirscan: DirScanConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_host")]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    /// Per-request retry attempts inside the proxy client.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ProxyConfig {
    pub fn socks_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_crawler_workers")]
    pub workers: usize,
    #[serde(default = "default_crawl_delay")]
    pub crawl_delay_secs: u64,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    /// Bodies at or above this size are not stored as HTML.
    #[serde(default = "default_html_store_cap")]
    pub html_store_cap: usize,
    #[serde(default = "default_lock_lease")]
    pub lock_lease_secs: u64,
    #[serde(default = "default_prefetch_batch")]
    pub prefetch_batch: usize,
    #[serde(default = "default_prefetch_low_water")]
    pub prefetch_low_water: usize,
    #[serde(default = "default_prefetch_period")]
    pub prefetch_period_secs: u64,
    #[serde(default = "default_flush_period")]
    pub flush_period_secs: u64,
    #[serde(default = "default_write_buffer_cap")]
    pub write_buffer_cap: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortScanConfig {
    #[serde(default = "default_scan_workers")]
    pub workers: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_banner_timeout")]
    pub banner_timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_probe_delay_ms")]
    pub probe_delay_ms: u64,
    #[serde(default = "default_lock_lease")]
    pub lock_lease_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirScanConfig {
    #[serde(default = "default_scan_workers")]
    pub workers: usize,
    #[serde(default = "default_path_delay_ms")]
    pub path_delay_ms: u64,
    #[serde(default = "default_dirscan_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_lock_lease")]
    pub lock_lease_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl AppConfig {
    /// Apply environment overrides on top of the loaded file. Unparseable
    /// values are ignored and the file value stays.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TOR_HOST") {
            if !v.is_empty() {
                self.proxy.host = v;
            }
        }
        if let Some(n) = parse_env::<u16>("TOR_PORT") {
            self.proxy.port = n;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            if !v.is_empty() {
                self.database.url = v;
            }
        }
        if let Some(n) = parse_env::<usize>("CRAWLER_WORKERS") {
            self.crawler.workers = n;
        }
        if let Some(n) = parse_env::<usize>("SCANNER_WORKERS") {
            self.portscan.workers = n;
        }
        if let Some(n) = parse_env::<u64>("SCANNER_TIMEOUT") {
            self.portscan.connect_timeout_secs = n;
        }
        if let Some(n) = parse_env::<usize>("SCANNER_MAX_CONCURRENT") {
            self.portscan.max_concurrent = n;
        }
        if let Some(n) = parse_env::<u64>("SCANNER_PROBE_DELAY") {
            self.portscan.probe_delay_ms = n;
        }
        if let Some(n) = parse_env::<usize>("DIRSCAN_WORKERS") {
            self.dirscan.workers = n;
        }
        if let Some(n) = parse_env::<u64>("DIRSCAN_PATH_DELAY") {
            self.dirscan.path_delay_ms = n;
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

fn default_proxy_host() -> String {
    "127.0.0.1".to_string()
}
fn default_proxy_port() -> u16 {
    9050
}
fn default_retries() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    45
}
fn default_max_connections() -> u32 {
    10
}
fn default_crawler_workers() -> usize {
    3
}
fn default_crawl_delay() -> u64 {
    2
}
fn default_max_content_length() -> usize {
    1024 * 1024
}
fn default_html_store_cap() -> usize {
    100 * 1024
}
fn default_lock_lease() -> u64 {
    600
}
fn default_prefetch_batch() -> usize {
    50
}
fn default_prefetch_low_water() -> usize {
    10
}
fn default_prefetch_period() -> u64 {
    5
}
fn default_flush_period() -> u64 {
    2
}
fn default_write_buffer_cap() -> usize {
    50
}
fn default_scan_workers() -> usize {
    2
}
fn default_banner_timeout() -> u64 {
    5
}
fn default_max_concurrent() -> usize {
    5
}
fn default_probe_delay_ms() -> u64 {
    200
}
fn default_path_delay_ms() -> u64 {
    1000
}
fn default_dirscan_timeout() -> u64 {
    30
}
fn default_api_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_page_size() -> i64 {
    25
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[proxy]
[database]
url = "postgres://darkmap@localhost/darkmap"
[crawler]
[portscan]
[dirscan]
[api]
"#;

    #[test]
    fn test_defaults_fill_in() {
        let cfg: AppConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.proxy.port, 9050);
        assert_eq!(cfg.crawler.workers, 3);
        assert_eq!(cfg.crawler.prefetch_batch, 50);
        assert_eq!(cfg.crawler.prefetch_low_water, 10);
        assert_eq!(cfg.portscan.max_concurrent, 5);
        assert_eq!(cfg.dirscan.path_delay_ms, 1000);
        assert_eq!(cfg.crawler.lock_lease_secs, 600);
        assert_eq!(cfg.proxy.socks_addr(), "127.0.0.1:9050");
    }
}
