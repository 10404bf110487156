use crate::feed::parser::{parse_feed, ParseError, ParsedFeed};
use crate::http::{FetchError, HttpClient};
use thiserror::Error;
use url::Url;

/// Errors that abandon a feed job before any entry is processed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl FeedError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FeedError::Fetch(e) if e.is_cancelled())
    }
}

/// Retrieves one feed document and parses it into entries.
///
/// The request goes through the client's fetch gate; the permit is released
/// before parsing starts. Relative entry links resolve against the final
/// (post-redirect) feed URL.
///
/// # Errors
///
/// - [`FeedError::Fetch`] - Network failure, timeout, non-2xx status, cancellation
/// - [`FeedError::Parse`] - Body is not a valid RSS/Atom/JSON feed
pub async fn fetch_feed(client: &HttpClient, url: &Url) -> Result<ParsedFeed, FeedError> {
    let response = client.get(url).await?;
    let feed = parse_feed(&response.body, Some(&response.url))?;

    tracing::debug!(
        feed = %url,
        entries = feed.entries.len(),
        title = feed.title.as_deref().unwrap_or(""),
        "Parsed feed"
    );
    Ok(feed)
}
