//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL validation**: Checking configured feed URLs and resolving relative
//!   references found in article markup
//! - **Text processing**: Path-safe names and XML-safe text
//!
//! # Examples
//!
//! ```
//! use inkfeed::util::{sanitize_path_segment, validate_url};
//!
//! // Validate a feed URL
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//!
//! // Turn a category or feed title into a directory name
//! let dir = sanitize_path_segment("News / Weekly");
//! assert_eq!(dir, "News _ Weekly");
//! ```

mod text;
mod url_validator;

pub use text::{
    sanitize_path_segment, strip_control_chars, truncate_on_char_boundary, MAX_SEGMENT_BYTES,
};
pub use url_validator::{resolve_reference, validate_url, UrlValidationError};
