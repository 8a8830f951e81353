use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use super::RawContent;
use crate::storage::ArticleRecord;
use crate::util::{clean_title, collapse_whitespace, extract_reading_time, resolve_article_link};

/// Headlines containing any of these are sponsor slots or newsletter chrome.
const BOILERPLATE_MARKERS: &[&str] = &[
    "(sponsor)",
    "sponsored",
    "advertise with us",
    "unsubscribe",
    "sign up for",
    "subscribe to",
    "manage your subscriptions",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The page no longer has the markup the parser expects.
    #[error("Digest structure changed: {0}")]
    StructureChanged(String),
}

/// Turns a digest snapshot into ordered article records.
pub trait DigestParser: Send + Sync {
    /// Returns at most `max_articles` records, positions numbered from zero.
    fn parse(&self, raw: &RawContent, max_articles: usize) -> Result<Vec<ArticleRecord>, ParseError>;
}

/// Parser for the public TLDR web archive markup.
///
/// Each story is an `<article>` whose first link wraps the headline and whose
/// `.newsletter-html` block holds the summary.
pub struct TldrHtmlParser {
    article: Selector,
    heading: Selector,
    link: Selector,
    summary: Selector,
}

impl Default for TldrHtmlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TldrHtmlParser {
    pub fn new() -> Self {
        Self {
            article: Selector::parse("article").expect("static selector"),
            heading: Selector::parse("h3, h2, h4").expect("static selector"),
            link: Selector::parse("a[href]").expect("static selector"),
            summary: Selector::parse(".newsletter-html").expect("static selector"),
        }
    }

    fn text_of(el: ElementRef<'_>) -> String {
        collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
    }
}

fn is_boilerplate(raw_title: &str) -> bool {
    let lower = raw_title.to_lowercase();
    BOILERPLATE_MARKERS.iter().any(|m| lower.contains(m))
}

impl DigestParser for TldrHtmlParser {
    fn parse(&self, raw: &RawContent, max_articles: usize) -> Result<Vec<ArticleRecord>, ParseError> {
        let document = Html::parse_document(&raw.body);
        let entries: Vec<ElementRef<'_>> = document.select(&self.article).collect();

        if entries.is_empty() {
            return Err(ParseError::StructureChanged(format!(
                "no <article> entries at {}",
                raw.url
            )));
        }

        let mut seen_urls = HashSet::new();
        let mut seen_titles = HashSet::new();
        let mut records = Vec::new();
        let mut dropped = 0usize;

        for (index, entry) in entries.into_iter().enumerate() {
            if records.len() >= max_articles {
                break;
            }

            let link = entry.select(&self.link).next();
            let raw_title = entry
                .select(&self.heading)
                .next()
                .map(Self::text_of)
                .or_else(|| link.map(Self::text_of))
                .unwrap_or_default();

            if is_boilerplate(&raw_title) {
                dropped += 1;
                continue;
            }

            let title = clean_title(&raw_title);
            let reading_time_minutes = extract_reading_time(&raw_title);

            let source_url = match link.and_then(|a| a.value().attr("href")) {
                Some(href) => match resolve_article_link(&raw.url, href) {
                    Ok(url) => url.to_string(),
                    Err(e) => {
                        tracing::debug!(href, error = %e, "Skipping entry with unusable link");
                        dropped += 1;
                        continue;
                    }
                },
                None => format!("{}#item-{}", raw.url, index),
            };

            let summary_raw = match entry.select(&self.summary).next() {
                Some(el) => Self::text_of(el),
                None => {
                    let full = Self::text_of(entry);
                    let heading = collapse_whitespace(&raw_title);
                    full.strip_prefix(heading.as_str())
                        .map(str::trim)
                        .unwrap_or(full.as_str())
                        .to_string()
                }
            };

            if title.is_empty() && summary_raw.is_empty() {
                dropped += 1;
                continue;
            }

            if !seen_urls.insert(source_url.clone())
                || (!title.is_empty() && !seen_titles.insert(title.to_lowercase()))
            {
                dropped += 1;
                continue;
            }

            records.push(ArticleRecord {
                source_url,
                title,
                summary_raw,
                title_translated: None,
                summary_translated: None,
                audio_path: None,
                reading_time_minutes,
                position: records.len() as u32,
                newsletter_type: raw.newsletter_type.clone(),
                publish_date: raw.date,
            });
        }

        tracing::debug!(
            date = %raw.date,
            articles = records.len(),
            dropped,
            "Parsed digest"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use url::Url;

    fn raw(body: &str) -> RawContent {
        RawContent {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            newsletter_type: "tech".to_string(),
            url: Url::parse("https://tldr.tech/tech/2024-01-02").unwrap(),
            body: body.to_string(),
        }
    }

    fn story(href: &str, title: &str, summary: &str) -> String {
        format!(
            r#"<article class="mt-3"><a class="font-bold" href="{href}"><h3>{title}</h3></a>
<div class="newsletter-html">{summary}</div></article>"#
        )
    }

    fn page(stories: &[String]) -> String {
        format!("<html><body><main>{}</main></body></html>", stories.join("\n"))
    }

    #[test]
    fn test_parses_title_summary_link_and_reading_time() {
        let body = page(&[story(
            "https://example.com/rust?utm_source=tldr",
            "Rust 1.80 released (4 minute read)",
            "Lazy statics are   now in std.",
        )]);
        let records = TldrHtmlParser::new().parse(&raw(&body), 20).unwrap();

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.title, "Rust 1.80 released");
        assert_eq!(r.summary_raw, "Lazy statics are now in std.");
        assert_eq!(r.source_url, "https://example.com/rust");
        assert_eq!(r.reading_time_minutes, Some(4));
        assert_eq!(r.position, 0);
        assert_eq!(r.newsletter_type, "tech");
        assert_eq!(r.publish_date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn test_no_articles_is_structure_changed() {
        let err = TldrHtmlParser::new()
            .parse(&raw("<html><body><p>Redesigned!</p></body></html>"), 20)
            .unwrap_err();
        assert!(matches!(err, ParseError::StructureChanged(_)));
    }

    #[test]
    fn test_truncates_to_max_articles() {
        let stories: Vec<String> = (0..10)
            .map(|i| story(&format!("https://example.com/{i}"), &format!("Story {i}"), "s"))
            .collect();
        let records = TldrHtmlParser::new().parse(&raw(&page(&stories)), 3).unwrap();

        assert_eq!(records.len(), 3);
        let positions: Vec<u32> = records.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(records[2].title, "Story 2");
    }

    #[test]
    fn test_filters_sponsors_and_boilerplate() {
        let body = page(&[
            story("https://example.com/a", "Real story", "a"),
            story("https://ads.example.com/x", "Buy our thing (Sponsor)", "ad"),
            story("https://tldr.tech/signup", "Sign up for TLDR AI", "promo"),
            story("https://example.com/b", "Another story", "b"),
        ]);
        let records = TldrHtmlParser::new().parse(&raw(&body), 20).unwrap();
        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Real story", "Another story"]);
        assert_eq!(records[1].position, 1);
    }

    #[test]
    fn test_deduplicates_by_url_and_title() {
        let body = page(&[
            story("https://example.com/a", "Story A", "first"),
            story("https://example.com/a?utm_medium=email", "Story A again", "same url"),
            story("https://example.com/other", "story a", "same title"),
            story("https://example.com/b", "Story B", "b"),
        ]);
        let records = TldrHtmlParser::new().parse(&raw(&body), 20).unwrap();
        let urls: Vec<&str> = records.iter().map(|r| r.source_url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn test_relative_link_resolves_against_page() {
        let body = page(&[story("/tech/deep-dive", "Deep dive", "d")]);
        let records = TldrHtmlParser::new().parse(&raw(&body), 20).unwrap();
        assert_eq!(records[0].source_url, "https://tldr.tech/tech/deep-dive");
    }

    #[test]
    fn test_missing_link_gets_synthesized_url() {
        let body = page(&[
            story("https://example.com/a", "Linked", "a"),
            r#"<article><h3>Quick links</h3><p>No link here.</p></article>"#.to_string(),
        ]);
        let records = TldrHtmlParser::new().parse(&raw(&body), 20).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1].source_url,
            "https://tldr.tech/tech/2024-01-02#item-1"
        );
        assert_eq!(records[1].summary_raw, "No link here.");
    }

    #[test]
    fn test_private_link_is_dropped() {
        let body = page(&[
            story("http://192.168.1.10/admin", "Internal", "x"),
            story("https://example.com/ok", "Public", "y"),
        ]);
        let records = TldrHtmlParser::new().parse(&raw(&body), 20).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Public");
    }

    #[test]
    fn test_title_falls_back_to_link_text() {
        let body = page(&[r#"<article><a href="https://example.com/x">Plain link title (2 minute read)</a>
<div class="newsletter-html">Body</div></article>"#
            .to_string()]);
        let records = TldrHtmlParser::new().parse(&raw(&body), 20).unwrap();
        assert_eq!(records[0].title, "Plain link title");
        assert_eq!(records[0].reading_time_minutes, Some(2));
    }

    #[test]
    fn test_missing_summary_defaults_to_empty() {
        let body = page(&[r#"<article><a href="https://example.com/x"><h3>Only a title</h3></a></article>"#
            .to_string()]);
        let records = TldrHtmlParser::new().parse(&raw(&body), 20).unwrap();
        assert_eq!(records[0].title, "Only a title");
        assert_eq!(records[0].summary_raw, "");
    }
}
