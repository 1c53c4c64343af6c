use darkmap_search::{DomainInfo, Finding, LinkEdge, OpenPort, PageSummary, SearchResult};

/// Minimal HTML escaping for text interpolated into pages.
pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title} - darkmap</title>
<style>
body {{ font-family: monospace; max-width: 72rem; margin: 2rem auto; padding: 0 1rem; }}
table {{ border-collapse: collapse; width: 100%; }}
td, th {{ border: 1px solid #999; padding: 0.25rem 0.5rem; text-align: left; }}
.error {{ color: #b00; }}
.muted {{ color: #666; }}
</style>
</head>
<body>
<h1><a href="/">darkmap</a></h1>
{body}
</body>
</html>
"#,
        title = escape(title),
        body = body
    )
}

pub fn index_page(
    q: &str,
    results: &[SearchResult],
    limit: i64,
    offset: i64,
    error: Option<&str>,
) -> String {
    let mut body = String::new();

    if let Some(error) = error {
        body.push_str(&format!("<p class=\"error\">{}</p>\n", escape(error)));
    }

    body.push_str(&format!(
        r#"<form action="/search" method="get">
<input type="text" name="q" size="60" value="{}" placeholder="free text, title:&quot;...&quot;, http:&quot;server: nginx&quot;, port:80">
<button type="submit">Search</button>
</form>
"#,
        escape(q)
    ));

    if !q.is_empty() {
        if results.is_empty() {
            body.push_str("<p class=\"muted\">No results.</p>\n");
        } else {
            body.push_str("<table>\n<tr><th>Title</th><th>URL</th><th>Domain</th><th>Snippet</th></tr>\n");
            for r in results {
                body.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td><a href=\"/domain/{}\">{}</a></td><td class=\"muted\">{}</td></tr>\n",
                    escape(r.title.as_deref().unwrap_or("-")),
                    escape(&r.url),
                    escape(&r.domain),
                    escape(&r.domain),
                    escape(r.snippet.as_deref().unwrap_or("")),
                ));
            }
            body.push_str("</table>\n");

            let encoded_q = urlencoding::encode(q);
            if offset > 0 {
                let prev = (offset - limit).max(0);
                body.push_str(&format!(
                    "<a href=\"/?q={}&limit={}&offset={}\">&laquo; prev</a> ",
                    encoded_q, limit, prev
                ));
            }
            if results.len() as i64 == limit {
                body.push_str(&format!(
                    "<a href=\"/?q={}&limit={}&offset={}\">next &raquo;</a>",
                    encoded_q,
                    limit,
                    offset + limit
                ));
            }
        }
    }

    layout("search", &body)
}

#[allow(clippy::too_many_arguments)]
pub fn domain_page(
    domain: &DomainInfo,
    pages: &[PageSummary],
    open_ports: &[OpenPort],
    findings: &[Finding],
    incoming: &[LinkEdge],
    outgoing: &[LinkEdge],
    links_page: i64,
    page_size: i64,
) -> String {
    let mut body = String::new();

    body.push_str(&format!(
        "<h2>{}</h2>\n<p>{}</p>\n<p class=\"muted\">status: {} | crawls: {} | first seen: {} | last crawled: {}</p>\n",
        escape(&domain.address),
        escape(domain.title.as_deref().unwrap_or("(no title)")),
        escape(&domain.crawl_status),
        domain.crawl_count,
        domain.first_seen.format("%Y-%m-%d %H:%M"),
        domain
            .last_crawled
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string()),
    ));

    if !open_ports.is_empty() {
        body.push_str("<h3>Open ports</h3>\n<table>\n<tr><th>Port</th><th>Service</th><th>Banner</th></tr>\n");
        for p in open_ports {
            let service = match (&p.service, &p.version) {
                (Some(s), Some(v)) => format!("{} {}", s, v),
                (Some(s), None) => s.clone(),
                _ => "-".to_string(),
            };
            body.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td class=\"muted\">{}</td></tr>\n",
                p.port,
                escape(&service),
                escape(p.banner.as_deref().unwrap_or("")),
            ));
        }
        body.push_str("</table>\n");
    }

    if !findings.is_empty() {
        body.push_str("<h3>Directory findings</h3>\n<table>\n<tr><th>Path</th><th>Status</th><th>Category</th><th>Reason</th></tr>\n");
        for f in findings {
            body.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td class=\"muted\">{}</td></tr>\n",
                escape(&f.path),
                f.status_code.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                escape(f.interest_category.as_deref().unwrap_or("-")),
                escape(f.interest_reason.as_deref().unwrap_or("")),
            ));
        }
        body.push_str("</table>\n");
    }

    body.push_str("<h3>Pages</h3>\n<table>\n<tr><th>URL</th><th>Title</th><th>Status</th></tr>\n");
    for p in pages {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&p.url),
            escape(p.title.as_deref().unwrap_or("-")),
            p.status_code.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
        ));
    }
    body.push_str("</table>\n");

    for (heading, edges) in [("Incoming links", incoming), ("Outgoing links", outgoing)] {
        body.push_str(&format!("<h3>{}</h3>\n", heading));
        if edges.is_empty() {
            body.push_str("<p class=\"muted\">none</p>\n");
            continue;
        }
        body.push_str("<table>\n<tr><th>From</th><th>To</th><th>Anchor</th></tr>\n");
        for e in edges {
            body.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td class=\"muted\">{}</td></tr>\n",
                escape(&e.source_url),
                escape(&e.target_url),
                escape(e.anchor_text.as_deref().unwrap_or("")),
            ));
        }
        body.push_str("</table>\n");
    }

    if links_page > 0 {
        body.push_str(&format!(
            "<a href=\"/domain/{}?links_page={}\">&laquo; prev links</a> ",
            escape(&domain.address),
            links_page - 1
        ));
    }
    if incoming.len() as i64 == page_size || outgoing.len() as i64 == page_size {
        body.push_str(&format!(
            "<a href=\"/domain/{}?links_page={}\">next links &raquo;</a>",
            escape(&domain.address),
            links_page + 1
        ));
    }

    layout(&domain.address, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_neutralizes_markup() {
        assert_eq!(
            escape(r#"<script>alert("x")</script>"#),
            "&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;"
        );
        assert_eq!(escape("a&b"), "a&amp;b");
    }

    #[test]
    fn test_index_page_shows_error_banner() {
        let html = index_page("", &[], 25, 0, Some("domain must end in .onion"));
        assert!(html.contains("domain must end in .onion"));
        assert!(html.contains("class=\"error\""));
    }
}
