use darkmap_core::DirScanRecord;

use crate::paths::ProbePath;

/// Cap on stored/compared response bodies.
pub const MAX_SNIPPET_BYTES: usize = 4096;

/// How much of the body participates in the "distinctive content" comparison.
const BASELINE_PREFIX_BYTES: usize = 512;

/// Response captured from a random nonexistent path. Servers that answer 200
/// for everything are unmasked by comparing probes against this.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub status_code: u16,
    pub content_length: i64,
    body: Vec<u8>,
}

impl Baseline {
    pub fn new(status_code: u16, content_length: i64, mut body: Vec<u8>) -> Self {
        body.truncate(MAX_SNIPPET_BYTES);
        Self {
            status_code,
            content_length,
            body,
        }
    }

    fn prefix(&self) -> &[u8] {
        &self.body[..self.body.len().min(BASELINE_PREFIX_BYTES)]
    }
}

/// Everything one probe observed, handed to the classifier.
#[derive(Debug, Clone)]
pub struct ProbeObservation {
    pub probe: ProbePath,
    pub status_code: u16,
    pub content_length: Option<i64>,
    pub content_type: Option<String>,
    pub response_time_ms: i64,
    pub server_header: Option<String>,
    pub redirect_url: Option<String>,
    /// ≤ 4 KB, present only when the HEAD hit 200 and a GET followed.
    pub body: Option<Vec<u8>>,
}

/// Statuses that can carry a finding at all. Everything else is noise.
fn is_candidate_status(status: u16) -> bool {
    matches!(status, 200 | 301 | 302 | 401 | 403)
}

/// Decide whether a probe response is a finding. Interesting means it differs
/// from the baseline on status class, content length (>10%), or body content,
/// and the probed path carries a category. A 200 whose body is byte-identical
/// to the baseline is the server's dressed-up 404 and never interesting.
pub fn classify(domain: &str, obs: &ProbeObservation, baseline: &Baseline) -> DirScanRecord {
    let body_snippet = obs.body.as_deref().map(|b| {
        String::from_utf8_lossy(&b[..b.len().min(MAX_SNIPPET_BYTES)]).into_owned()
    });

    let (is_interesting, interest_reason) = interest(obs, baseline);

    DirScanRecord {
        domain: domain.to_string(),
        path: obs.probe.path.to_string(),
        status_code: Some(obs.status_code),
        content_length: obs.content_length,
        content_type: obs.content_type.clone(),
        response_time_ms: obs.response_time_ms,
        server_header: obs.server_header.clone(),
        redirect_url: obs.redirect_url.clone(),
        body_snippet,
        is_interesting,
        interest_category: if is_interesting {
            Some(obs.probe.category.to_string())
        } else {
            None
        },
        interest_reason,
    }
}

fn interest(obs: &ProbeObservation, baseline: &Baseline) -> (bool, Option<String>) {
    // Soft-404 suppression runs first: identical bytes beat a 200 status.
    if obs.status_code == 200 {
        if let Some(body) = obs.body.as_deref() {
            let capped = &body[..body.len().min(MAX_SNIPPET_BYTES)];
            if capped == baseline.body.as_slice() {
                return (false, Some("soft-404".to_string()));
            }
        }
    }

    if !is_candidate_status(obs.status_code) {
        return (false, None);
    }

    if obs.status_code / 100 != baseline.status_code / 100 {
        return (
            true,
            Some(format!(
                "status {} differs from baseline {}",
                obs.status_code, baseline.status_code
            )),
        );
    }

    if let Some(len) = obs.content_length {
        let differs = if baseline.content_length <= 0 {
            len > 0
        } else {
            (len - baseline.content_length).abs() * 10 > baseline.content_length
        };
        if differs {
            return (
                true,
                Some(format!(
                    "content length {} differs from baseline {} by more than 10%",
                    len, baseline.content_length
                )),
            );
        }
    }

    if let Some(body) = obs.body.as_deref() {
        let prefix = &body[..body.len().min(BASELINE_PREFIX_BYTES)];
        if prefix != baseline.prefix() {
            return (true, Some("body differs from baseline".to_string()));
        }
    }

    (false, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::paths_for_profile;
    use darkmap_core::ScanProfile;

    fn probe(path: &'static str) -> ProbePath {
        paths_for_profile(ScanProfile::Full)
            .into_iter()
            .find(|p| p.path == path)
            .unwrap()
    }

    fn obs(path: &'static str, status: u16, len: Option<i64>, body: Option<&[u8]>) -> ProbeObservation {
        ProbeObservation {
            probe: probe(path),
            status_code: status,
            content_length: len,
            content_type: Some("text/html".to_string()),
            response_time_ms: 120,
            server_header: Some("nginx".to_string()),
            redirect_url: None,
            body: body.map(|b| b.to_vec()),
        }
    }

    #[test]
    fn test_soft_404_suppressed_even_on_200() {
        let baseline = Baseline::new(200, 9, b"Not Found".to_vec());
        let record = classify(
            "example.onion",
            &obs("/admin/", 200, Some(9), Some(b"Not Found")),
            &baseline,
        );
        assert!(!record.is_interesting);
        assert_eq!(record.interest_reason.as_deref(), Some("soft-404"));
        assert_eq!(record.interest_category, None);
    }

    #[test]
    fn test_status_class_difference_is_interesting() {
        let baseline = Baseline::new(404, 12, b"404 not here".to_vec());
        let record = classify(
            "example.onion",
            &obs("/admin/", 200, Some(512), Some(b"<html>admin login</html>")),
            &baseline,
        );
        assert!(record.is_interesting);
        assert_eq!(record.interest_category.as_deref(), Some("admin-panel"));
        assert!(record.interest_reason.unwrap().contains("status"));
    }

    #[test]
    fn test_content_length_needs_more_than_ten_percent() {
        let baseline = Baseline::new(200, 1000, b"index".to_vec());

        // 10% exactly: not a difference
        let same = classify("d.onion", &obs("/.env", 200, Some(1100), None), &baseline);
        assert!(!same.is_interesting);

        let bigger = classify("d.onion", &obs("/.env", 200, Some(1101), None), &baseline);
        assert!(bigger.is_interesting);
        assert_eq!(bigger.interest_category.as_deref(), Some("credentials-file"));
    }

    #[test]
    fn test_plain_404_is_not_a_finding() {
        let baseline = Baseline::new(404, 10, b"not found!".to_vec());
        let record = classify("d.onion", &obs("/backup.sql", 404, Some(10), None), &baseline);
        assert!(!record.is_interesting);
        assert_eq!(record.interest_reason, None);
    }

    #[test]
    fn test_distinctive_body_on_matching_status() {
        let baseline = Baseline::new(200, 100, b"landing page".to_vec());
        let record = classify(
            "d.onion",
            &obs("/.git/HEAD", 200, None, Some(b"ref: refs/heads/master\n")),
            &baseline,
        );
        assert!(record.is_interesting);
        assert_eq!(record.interest_category.as_deref(), Some("source-control"));
        assert_eq!(
            record.interest_reason.as_deref(),
            Some("body differs from baseline")
        );
    }
}
