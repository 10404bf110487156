use crate::content::AssetRef;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// The response body could not be decoded as a feed.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Bytes were neither RSS nor Atom (or were malformed XML/JSON)
    #[error("Malformed feed: {0}")]
    Malformed(#[from] feed_rs::parser::ParseFeedError),
}

/// Feed-supplied body of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryContent {
    pub body: String,
    /// `true` for `text/html` and `application/xhtml+xml`; anything else is plain text.
    pub is_html: bool,
}

impl EntryContent {
    /// Body as HTML; plain text is escaped and wrapped in `<pre>`.
    pub fn to_html(&self) -> String {
        if self.is_html {
            self.body.clone()
        } else {
            format!("<pre>{}</pre>", quick_xml::escape::escape(self.body.as_str()))
        }
    }
}

/// One item of a feed, filled in progressively as it moves through the job's stages.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    /// Stable identifier: the feed's own id/guid, or a hash of url|title|published.
    pub id: String,
    pub title: String,
    /// Canonical article URL (first link), resolved against the feed URL.
    pub url: Option<Url>,
    pub published: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
    /// Full body carried by the feed (`<content:encoded>`, Atom `<content>`).
    pub content: Option<EntryContent>,
    /// Short description (`<description>`, Atom `<summary>`).
    pub summary: Option<EntryContent>,
    /// Images referenced by the final content.
    pub assets: Vec<AssetRef>,
}

impl FeedEntry {
    /// Whether the feed itself carries a body for this entry.
    pub fn has_feed_content(&self) -> bool {
        self.content.is_some()
    }

    /// Best feed-provided body: full content, else the summary.
    pub fn feed_body(&self) -> Option<&EntryContent> {
        self.content.as_ref().or(self.summary.as_ref())
    }
}

/// Feed-level metadata plus its entries in document order.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub authors: Vec<String>,
    pub entries: Vec<FeedEntry>,
}

/// Parses RSS 0.9x/1.0/2.0, Atom, or JSON Feed bytes; the format is detected from the content.
///
/// `base` is the feed's own URL and anchors relative entry links.
pub fn parse_feed(bytes: &[u8], base: Option<&Url>) -> Result<ParsedFeed, ParseError> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let url = entry
                .links
                .first()
                .and_then(|l| crate::util::resolve_reference(&l.href, base));
            let published = entry.published.or(entry.updated);
            let content = entry
                .content
                .and_then(|c| {
                    let is_html = is_html_type(c.content_type.subty().as_str());
                    c.body.map(|body| EntryContent { body, is_html })
                })
                .filter(|c| !c.body.trim().is_empty());
            let summary = entry
                .summary
                .map(|s| EntryContent {
                    is_html: is_html_type(s.content_type.subty().as_str()),
                    body: s.content,
                })
                .filter(|s| !s.body.trim().is_empty());
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            let authors = entry
                .authors
                .into_iter()
                .map(|a| a.name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();

            let existing_id = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.as_str())
            };
            let id = generate_guid(existing_id, url.as_ref().map(Url::as_str), &title, published);

            FeedEntry {
                id,
                title,
                url,
                published,
                authors,
                content,
                summary,
                assets: Vec::new(),
            }
        })
        .collect();

    Ok(ParsedFeed {
        title: feed
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty()),
        description: feed.description.map(|d| d.content),
        language: feed.language,
        authors: feed
            .authors
            .into_iter()
            .map(|a| a.name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        entries,
    })
}

fn is_html_type(subtype: &str) -> bool {
    matches!(subtype, "html" | "xhtml")
}

fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<DateTime<Utc>>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
