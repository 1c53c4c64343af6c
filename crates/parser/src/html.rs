use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use darkmap_core::{extract_onion_domain, ExtractedLink, LinkSource, LinkType};

static ONION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z2-7]{56}\.onion").unwrap());

pub struct ParsedPage {
    pub title: Option<String>,
    pub content_text: String,
    pub meta_description: Option<String>,
    pub language: Option<String>,
    pub h1: Vec<String>,
    pub links: Vec<ExtractedLink>,
    /// Onion domains reachable through element links on this page.
    pub element_domains: Vec<String>,
    /// Onion domains that appear only in bare text (prose, comments), with no
    /// anchor pointing at them.
    pub text_only_domains: Vec<String>,
}

pub fn parse_html(html_str: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html_str);
    let base_domain = base_url.host_str().unwrap_or("").to_ascii_lowercase();

    let title = selector("title")
        .and_then(|s| document.select(&s).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let h1 = extract_text_by_selector(&document, "h1");

    let content_text = selector("body")
        .and_then(|s| document.select(&s).next())
        .map(|el| {
            el.text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    let meta_description = extract_meta_content(&document, "description");

    let language = selector("html")
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("lang").map(|s| s.to_string()));

    let mut links = extract_links(&document, base_url, &base_domain);

    let element_domains: BTreeSet<String> = links
        .iter()
        .filter_map(|l| l.target_domain.clone())
        .collect();

    // Onion addresses mentioned in prose but never linked. Scanned over the
    // raw markup as well so addresses inside comments and scripts count.
    let mut text_only: BTreeSet<String> = BTreeSet::new();
    for m in ONION_RE.find_iter(html_str) {
        let domain = m.as_str().to_string();
        if !element_domains.contains(&domain) && domain != base_domain {
            text_only.insert(domain);
        }
    }

    let mut position = links.len() as i32;
    for domain in &text_only {
        links.push(ExtractedLink {
            url: format!("http://{}/", domain),
            anchor_text: None,
            link_type: LinkType::OnionExternal,
            source: LinkSource::RawText,
            position,
            target_domain: Some(domain.clone()),
        });
        position += 1;
    }

    ParsedPage {
        title,
        content_text,
        meta_description,
        language,
        h1,
        links,
        element_domains: element_domains.into_iter().collect(),
        text_only_domains: text_only.into_iter().collect(),
    }
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn extract_text_by_selector(document: &Html, sel: &str) -> Vec<String> {
    selector(sel)
        .map(|s| {
            document
                .select(&s)
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn extract_meta_content(document: &Html, name: &str) -> Option<String> {
    let sel_str = format!("meta[name='{}'], meta[name='{}']", name, name.to_uppercase());
    selector(&sel_str)
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("content").map(|s| s.to_string()))
}

fn extract_links(document: &Html, base_url: &Url, base_domain: &str) -> Vec<ExtractedLink> {
    let Some(sel) = selector("a[href]") else {
        return vec![];
    };

    let mut links = Vec::new();
    for el in document.select(&sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };

        // Skip non-crawlable URL schemes
        if href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("data:")
            || href.starts_with('#')
        {
            continue;
        }

        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        let host = resolved.host_str().unwrap_or("").to_ascii_lowercase();

        let link_type = if resolved.scheme() != "http" && resolved.scheme() != "https" {
            LinkType::Other
        } else if host.ends_with(".onion") {
            if host == base_domain {
                LinkType::OnionInternal
            } else {
                LinkType::OnionExternal
            }
        } else {
            LinkType::Clearnet
        };

        let target_domain = extract_onion_domain(&resolved);

        links.push(ExtractedLink {
            url: resolved.to_string(),
            anchor_text: {
                let t = el.text().collect::<String>().trim().to_string();
                if t.is_empty() {
                    None
                } else {
                    Some(t)
                }
            },
            link_type,
            source: LinkSource::Element,
            position: links.len() as i32,
            target_domain,
        });
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn onion(c: char) -> String {
        format!("{}.onion", c.to_string().repeat(56))
    }

    #[test]
    fn test_extracts_anchor_links_with_types() {
        let base = Url::parse(&format!("http://{}/", onion('a'))).unwrap();
        let html = format!(
            r#"<html><body>
                <a href="/page2">internal</a>
                <a href="http://{}/">other onion</a>
                <a href="https://example.com/">clearnet</a>
                <a href="mailto:x@y.z">mail</a>
            </body></html>"#,
            onion('b')
        );

        let parsed = parse_html(&html, &base);
        assert_eq!(parsed.links.len(), 3);
        assert_eq!(parsed.links[0].link_type, LinkType::OnionInternal);
        assert_eq!(parsed.links[0].source, LinkSource::Element);
        assert_eq!(parsed.links[1].link_type, LinkType::OnionExternal);
        assert_eq!(parsed.links[1].target_domain.as_deref(), Some(onion('b').as_str()));
        assert_eq!(parsed.links[2].link_type, LinkType::Clearnet);
        assert_eq!(parsed.links[2].anchor_text.as_deref(), Some("clearnet"));
        // positions are the document order
        assert_eq!(
            parsed.links.iter().map(|l| l.position).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_text_only_domains_are_separate_from_element_domains() {
        let base = Url::parse(&format!("http://{}/", onion('a'))).unwrap();
        let html = format!(
            r#"<html><body>
                <a href="http://{}/">linked</a>
                <p>Visit http://{}/forum in text but no anchor</p>
            </body></html>"#,
            onion('b'),
            onion('c')
        );

        let parsed = parse_html(&html, &base);
        assert_eq!(parsed.element_domains, vec![onion('b')]);
        assert_eq!(parsed.text_only_domains, vec![onion('c')]);

        // the raw-text domain gets a synthetic base-URL link row
        let raw = parsed
            .links
            .iter()
            .find(|l| l.source == LinkSource::RawText)
            .unwrap();
        assert_eq!(raw.url, format!("http://{}/", onion('c')));
        assert_eq!(raw.anchor_text, None);
    }

    #[test]
    fn test_linked_domain_not_reported_as_text_only() {
        let base = Url::parse(&format!("http://{}/", onion('a'))).unwrap();
        // same domain appears both in an anchor and in prose
        let html = format!(
            r#"<body><a href="http://{b}/">x</a> mirror: {b}</body>"#,
            b = onion('b')
        );
        let parsed = parse_html(&html, &base);
        assert!(parsed.text_only_domains.is_empty());
    }

    #[test]
    fn test_metadata_extraction() {
        let base = Url::parse(&format!("http://{}/", onion('a'))).unwrap();
        let html = r#"<html lang="de"><head>
            <title> Hidden Wiki </title>
            <meta name="description" content="link index">
            </head><body><h1>Main</h1><h1></h1><p>hello  world</p></body></html>"#;

        let parsed = parse_html(html, &base);
        assert_eq!(parsed.title.as_deref(), Some("Hidden Wiki"));
        assert_eq!(parsed.meta_description.as_deref(), Some("link index"));
        assert_eq!(parsed.language.as_deref(), Some("de"));
        assert_eq!(parsed.h1, vec!["Main"]);
        assert!(parsed.content_text.contains("hello world"));
    }
}
