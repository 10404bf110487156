use crate::feed::FeedEntry;
use crate::http::{FetchError, HttpClient};
use crate::registry::ArticlePolicy;
use thiserror::Error;
use url::Url;

/// What the resolver will do for one entry, decided before any network access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStep {
    /// Use the body the feed carries.
    FeedContent,
    /// Download the article page.
    FetchArticle,
    /// Nothing usable; the entry is left out.
    Skip,
}

/// Chooses the resolution step for an entry.
///
/// `has_content` is whether the feed carries a full body; `has_summary`
/// whether it carries at least a summary. Only `Never` treats a bare summary
/// as sufficient, since `Auto` would otherwise never fetch for feeds that
/// publish teasers.
pub fn plan(policy: ArticlePolicy, has_content: bool, has_summary: bool) -> ResolveStep {
    match policy {
        ArticlePolicy::Always => ResolveStep::FetchArticle,
        ArticlePolicy::Never if has_content || has_summary => ResolveStep::FeedContent,
        ArticlePolicy::Never => ResolveStep::Skip,
        ArticlePolicy::Auto if has_content => ResolveStep::FeedContent,
        ArticlePolicy::Auto => ResolveStep::FetchArticle,
    }
}

/// Where an entry's final HTML came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    Feed,
    Article,
}

/// The HTML chosen for an entry, before filtering.
#[derive(Debug)]
pub struct ResolvedContent {
    pub source: ContentSource,
    pub html: String,
    /// URL relative references in `html` resolve against.
    pub base: Option<Url>,
    /// Set when an article download failed and the feed body was used instead.
    pub article_error: Option<FetchError>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Feed has no content for this entry and article download is disabled")]
    NoFeedContent,

    #[error("Entry has no link to download and the feed carries no content")]
    NoArticleUrl,

    #[error("Article download failed and the feed carries no content: {0}")]
    ArticleUnavailable(#[source] FetchError),

    #[error("Cancelled")]
    Cancelled,
}

/// Resolves the HTML for one entry according to `policy`.
///
/// Download failures fall back to the feed body (content, else summary) when there is
/// one; cancellation never falls back.
pub async fn resolve_entry(
    client: &HttpClient,
    entry: &FeedEntry,
    policy: ArticlePolicy,
) -> Result<ResolvedContent, ResolveError> {
    let step = plan(policy, entry.has_feed_content(), entry.summary.is_some());

    match step {
        ResolveStep::Skip => Err(ResolveError::NoFeedContent),
        ResolveStep::FeedContent => from_feed(entry, None).ok_or(ResolveError::NoFeedContent),
        ResolveStep::FetchArticle => {
            let Some(url) = entry.url.clone() else {
                tracing::debug!(entry = %entry.title, "Entry has no link, using feed body");
                return from_feed(entry, None).ok_or(ResolveError::NoArticleUrl);
            };

            match client.get(&url).await {
                Ok(response) => Ok(ResolvedContent {
                    source: ContentSource::Article,
                    html: response.text(),
                    base: Some(response.url),
                    article_error: None,
                }),
                Err(e) if e.is_cancelled() => Err(ResolveError::Cancelled),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Article download failed");
                    match entry.feed_body() {
                        Some(_) => from_feed(entry, Some(e)).ok_or(ResolveError::NoFeedContent),
                        None => Err(ResolveError::ArticleUnavailable(e)),
                    }
                }
            }
        }
    }
}

fn from_feed(entry: &FeedEntry, article_error: Option<FetchError>) -> Option<ResolvedContent> {
    let body = entry.feed_body()?;
    Some(ResolvedContent {
        source: ContentSource::Feed,
        html: body.to_html(),
        base: entry.url.clone(),
        article_error,
    })
}
