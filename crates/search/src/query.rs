use once_cell::sync::Lazy;
use regex::Regex;

static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)title:\s*"([^"]*)""#).unwrap());
static HTTP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)http:\s*"([^"]*)""#).unwrap());
static PORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)port:\s*(\d{1,5})").unwrap());

/// A parsed search expression. Every field defaults to None; combined search
/// ANDs whatever is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub title: Option<String>,
    pub header: Option<String>,
    pub header_value: Option<String>,
    pub port: Option<u16>,
}

impl SearchQuery {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.title.is_none()
            && self.header.is_none()
            && self.port.is_none()
    }
}

/// Parse the tagged grammar. Tag names are case-insensitive, whitespace after
/// the colon is tolerated, and each matched tag is cut out of the string
/// before the next pass; whatever survives is free text.
pub fn parse_query(input: &str) -> SearchQuery {
    let mut remaining = input.to_string();
    let mut query = SearchQuery::default();

    let title_match = TITLE_RE
        .captures(&remaining)
        .map(|caps| (caps.get(0).unwrap().range(), caps[1].trim().to_string()));
    if let Some((range, title)) = title_match {
        if !title.is_empty() {
            query.title = Some(title);
        }
        remaining.replace_range(range, " ");
    }

    let http_match = HTTP_RE
        .captures(&remaining)
        .map(|caps| (caps.get(0).unwrap().range(), caps[1].trim().to_string()));
    if let Some((range, inner)) = http_match {
        match inner.split_once(':') {
            Some((name, value)) => {
                let name = name.trim().to_ascii_lowercase();
                let value = value.trim().to_string();
                if !name.is_empty() {
                    query.header = Some(name);
                    if !value.is_empty() {
                        query.header_value = Some(value);
                    }
                }
            }
            None => {
                if !inner.is_empty() {
                    query.header = Some(inner.to_ascii_lowercase());
                }
            }
        }
        remaining.replace_range(range, " ");
    }

    let port_match = PORT_RE
        .captures(&remaining)
        .map(|caps| (caps.get(0).unwrap().range(), caps[1].to_string()));
    if let Some((range, digits)) = port_match {
        if let Ok(port) = digits.parse::<u32>() {
            if (1..=65535).contains(&port) {
                query.port = Some(port as u16);
                remaining.replace_range(range, " ");
            }
        }
    }

    let text = remaining.split_whitespace().collect::<Vec<_>>().join(" ");
    if !text.is_empty() {
        query.text = Some(text);
    }

    query
}

/// Render the non-null fields back into query syntax. `parse_query` of the
/// result yields the same fields.
pub fn serialize_query(query: &SearchQuery) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(title) = &query.title {
        parts.push(format!("title:\"{}\"", title));
    }
    match (&query.header, &query.header_value) {
        (Some(header), Some(value)) => parts.push(format!("http:\"{}: {}\"", header, value)),
        (Some(header), None) => parts.push(format!("http:\"{}\"", header)),
        _ => {}
    }
    if let Some(port) = query.port {
        parts.push(format!("port:{}", port));
    }
    if let Some(text) = &query.text {
        parts.push(text.clone());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_text_only() {
        let q = parse_query("bitcoin");
        assert_eq!(q.text.as_deref(), Some("bitcoin"));
        assert_eq!(q.title, None);
        assert_eq!(q.header, None);
        assert_eq!(q.port, None);
    }

    #[test]
    fn test_http_tag_with_value() {
        let q = parse_query(r#"http:"server: nginx""#);
        assert_eq!(q.header.as_deref(), Some("server"));
        assert_eq!(q.header_value.as_deref(), Some("nginx"));
        assert_eq!(q.text, None);
    }

    #[test]
    fn test_http_tag_header_only() {
        let q = parse_query(r#"http:"x-powered-by""#);
        assert_eq!(q.header.as_deref(), Some("x-powered-by"));
        assert_eq!(q.header_value, None);
    }

    #[test]
    fn test_text_and_port() {
        let q = parse_query("marketplace port:8333");
        assert_eq!(q.text.as_deref(), Some("marketplace"));
        assert_eq!(q.port, Some(8333));
    }

    #[test]
    fn test_all_tags_combined() {
        let q = parse_query(r#"marketplace http:"server: nginx" port:80 title:"Home""#);
        assert_eq!(q.text.as_deref(), Some("marketplace"));
        assert_eq!(q.header.as_deref(), Some("server"));
        assert_eq!(q.header_value.as_deref(), Some("nginx"));
        assert_eq!(q.port, Some(80));
        assert_eq!(q.title.as_deref(), Some("Home"));
    }

    #[test]
    fn test_case_insensitive_tags_and_spacing() {
        let q = parse_query(r#"TITLE: "Login"  PORT: 443"#);
        assert_eq!(q.title.as_deref(), Some("Login"));
        assert_eq!(q.port, Some(443));
        assert_eq!(q.text, None);
    }

    #[test]
    fn test_out_of_range_port_stays_text() {
        let q = parse_query("port:99999");
        assert_eq!(q.port, None);
        assert_eq!(q.text.as_deref(), Some("port:99999"));
    }

    #[test]
    fn test_empty_input_is_all_null() {
        let q = parse_query("   ");
        assert!(q.is_empty());
    }

    #[test]
    fn test_round_trip_canonical_queries() {
        let inputs = [
            "bitcoin",
            r#"http:"server: nginx""#,
            "marketplace port:8333",
            r#"marketplace http:"server: nginx" port:80 title:"Home""#,
            r#"title:"Index of /""#,
        ];
        for input in inputs {
            let parsed = parse_query(input);
            let reparsed = parse_query(&serialize_query(&parsed));
            assert_eq!(parsed, reparsed, "round trip failed for {input:?}");
        }
    }
}
