//! Feed retrieval and parsing.
//!
//! - [`parser`] - Converts RSS/Atom bytes into [`FeedEntry`] skeletons using `feed-rs`
//! - [`fetcher`] - Fetches one feed through the gated client and parses it
//!
//! Both failure kinds ([`FeedError::Fetch`], [`FeedError::Parse`]) abandon the
//! job they occur in and nothing else.

mod fetcher;
mod parser;

pub use fetcher::{fetch_feed, FeedError};
pub use parser::{parse_feed, EntryContent, FeedEntry, ParseError, ParsedFeed};
