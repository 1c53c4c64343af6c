use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use url::Url;

use darkmap_core::ReconError;

/// Per-request knobs. `max_content_length` truncates instead of failing so a
/// huge body still yields its headers and leading bytes.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_content_length: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            max_content_length: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub truncated: bool,
    pub final_url: Url,
    pub response_time_ms: u64,
}

impl FetchResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }

    pub fn is_html(&self) -> bool {
        self.content_type()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false)
    }
}

/// HTTP client that routes everything through the SOCKS5 proxy. `socks5h` so
/// hostname resolution happens inside the proxy and onion hosts never touch
/// local DNS.
pub struct ProxyClient {
    client: reqwest::Client,
    retries: u32,
}

impl ProxyClient {
    pub fn new(socks_addr: &str, connect_timeout: Duration, retries: u32) -> Result<Self, ReconError> {
        let proxy = reqwest::Proxy::all(format!("socks5h://{}", socks_addr))
            .map_err(|e| ReconError::Proxy(e.to_string()))?;

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ReconError::Proxy(e.to_string()))?;

        Ok(Self { client, retries })
    }

    /// GET with body capped at `max_content_length`. Transport failures after
    /// all retries come back as `ReconError::Network` carrying the error text
    /// the connection-failure classifier matches on.
    pub async fn get(&self, url: &Url, opts: &FetchOptions) -> Result<FetchResponse, ReconError> {
        let start = Instant::now();
        let resp = self
            .send_with_retries(|| self.client.get(url.as_str()).timeout(opts.timeout))
            .await?;

        let status = resp.status().as_u16();
        let final_url = Url::parse(resp.url().as_str()).unwrap_or_else(|_| url.clone());
        let headers = collect_headers(&resp);

        let mut body: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut resp = resp;
        loop {
            match resp.chunk().await {
                Ok(Some(chunk)) => {
                    let remaining = opts.max_content_length.saturating_sub(body.len());
                    if chunk.len() >= remaining {
                        body.extend_from_slice(&chunk[..remaining]);
                        truncated = true;
                        break;
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    // Headers arrived, so this is a per-URL failure, not a
                    // transport one. Keep what we have.
                    warn!(url = %url, error = %e, "body read interrupted");
                    truncated = true;
                    break;
                }
            }
        }

        debug!(url = %url, status, bytes = body.len(), truncated, "get complete");
        Ok(FetchResponse {
            status,
            headers,
            body,
            truncated,
            final_url,
            response_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// HEAD: headers only, no body.
    pub async fn head(&self, url: &Url, opts: &FetchOptions) -> Result<FetchResponse, ReconError> {
        let start = Instant::now();
        let resp = self
            .send_with_retries(|| self.client.head(url.as_str()).timeout(opts.timeout))
            .await?;

        let status = resp.status().as_u16();
        let final_url = Url::parse(resp.url().as_str()).unwrap_or_else(|_| url.clone());
        let headers = collect_headers(&resp);

        Ok(FetchResponse {
            status,
            headers,
            body: Vec::new(),
            truncated: false,
            final_url,
            response_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn send_with_retries<F>(&self, build: F) -> Result<reqwest::Response, ReconError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let attempts = self.retries.max(1);
        let mut last_err = String::new();
        for attempt in 1..=attempts {
            match build().send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    last_err = flatten_error(&e);
                    if attempt < attempts {
                        debug!(attempt, error = %last_err, "request failed, retrying");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }
        Err(ReconError::Network(last_err))
    }
}

fn collect_headers(resp: &reqwest::Response) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for (k, v) in resp.headers() {
        if let Ok(val) = v.to_str() {
            headers.insert(k.as_str().to_ascii_lowercase(), val.to_string());
        }
    }
    headers
}

/// reqwest errors wrap the io error that carries the os-level text
/// (ECONNREFUSED and friends); include the whole source chain so the
/// classifier sees it.
fn flatten_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        source = inner.source();
    }
    msg
}
