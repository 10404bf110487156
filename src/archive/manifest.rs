use crate::content::AssetRef;
use crate::feed::FeedEntry;
use crate::registry::AuthorPolicy;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

/// One entry in its final, archive-ready form.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub title: String,
    pub url: Option<Url>,
    pub published: Option<DateTime<Utc>>,
    /// Entry-level authors, shown as a byline.
    pub authors: Vec<String>,
    /// Well-formed XHTML body content.
    pub body: String,
    pub assets: Vec<AssetRef>,
}

impl Chapter {
    pub fn from_entry(entry: FeedEntry, body: String) -> Self {
        Self {
            title: entry.title,
            url: entry.url,
            published: entry.published,
            authors: entry.authors,
            body,
            assets: entry.assets,
        }
    }
}

/// Everything needed to serialize one archive. Immutable once built.
#[derive(Debug, Clone)]
pub struct ArchiveManifest {
    pub title: String,
    /// `None` leaves the creator out of the package metadata.
    pub author: Option<String>,
    pub description: Option<String>,
    pub language: String,
    /// `urn:inkfeed:<sha256 of the feed URL>`; stable across runs.
    pub identifier: String,
    /// Newest entry date, or the Unix epoch when no entry is dated.
    pub modified: DateTime<Utc>,
    pub cover: Option<AssetRef>,
    pub chapters: Vec<Chapter>,
}

impl ArchiveManifest {
    pub fn new(title: impl Into<String>, feed_url: &Url) -> Self {
        Self {
            title: title.into(),
            author: None,
            description: None,
            language: "en".to_string(),
            identifier: identifier_for(feed_url),
            modified: DateTime::<Utc>::UNIX_EPOCH,
            cover: None,
            chapters: Vec::new(),
        }
    }

    /// Adds a chapter and advances `modified` to its date if newer.
    pub fn push_chapter(&mut self, chapter: Chapter) {
        if let Some(published) = chapter.published {
            self.modified = self.modified.max(published);
        }
        self.chapters.push(chapter);
    }

    /// Fetched images of all chapters, one per archive path, sorted by path.
    pub fn resources(&self) -> Vec<&AssetRef> {
        let mut by_path = BTreeMap::new();
        for asset in self.chapters.iter().flat_map(|c| c.assets.iter()) {
            if asset.is_fetched() {
                by_path.entry(asset.local_path.as_str()).or_insert(asset);
            }
        }
        by_path.into_values().collect()
    }
}

pub fn identifier_for(feed_url: &Url) -> String {
    let digest = Sha256::digest(feed_url.as_str().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("urn:inkfeed:{hex}")
}

/// Archive author according to the configured policy.
///
/// `Named` always wins and `Omit` always yields no author. Otherwise the
/// feed's own authors are used, and when it names none, its title.
pub fn resolve_author(
    policy: &AuthorPolicy,
    feed_authors: &[String],
    feed_title: &str,
) -> Option<String> {
    match policy {
        AuthorPolicy::Named(name) => Some(name.clone()),
        AuthorPolicy::Omit => None,
        AuthorPolicy::FeedTitle => {
            let authors: Vec<&str> = feed_authors
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .collect();
            if authors.is_empty() {
                let title = feed_title.trim();
                (!title.is_empty()).then(|| title.to_string())
            } else {
                Some(authors.join(", "))
            }
        }
    }
}
