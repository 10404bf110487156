//! inkfeed: RSS/Atom feeds to EPUB archives.
//!
//! A run reads `Settings.toml` ([`config`]), flattens its category tree into
//! feed jobs ([`registry`]), and for each job fetches the feed ([`feed`]),
//! resolves, filters, and illustrates every entry ([`content`]), then packages
//! the result as one EPUB per server ([`archive`]). All network traffic goes
//! through a shared, cancellable [`http::HttpClient`] bounded by
//! [`gate::FetchGate`]. [`pipeline`] ties the stages together.

pub mod archive;
pub mod config;
pub mod content;
pub mod events;
pub mod feed;
pub mod gate;
pub mod http;
pub mod pipeline;
pub mod registry;
pub mod util;
