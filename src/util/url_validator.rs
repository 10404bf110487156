use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlValidationError {
    /// No URL was given, or it was only whitespace.
    #[error("URL is empty")]
    Empty,
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host to connect to.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a fetch target.
///
/// Accepts absolute `http`/`https` URLs with a host. Everything else
/// (`file://`, `data:`, relative paths, blank strings) is rejected, so a
/// typo in the configuration surfaces as an error instead of a request.
///
/// # Examples
///
/// ```
/// use inkfeed::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// assert!(validate_url("not a url").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let trimmed = url_str.trim();
    if trimmed.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let url = Url::parse(trimmed)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

/// Resolves a possibly-relative reference against an optional base.
///
/// Absolute `http`/`https` references are returned as-is; relative ones are
/// joined onto `base`. Returns `None` when the reference cannot be turned into
/// a fetchable URL (no base for a relative path, or a non-HTTP scheme such as
/// `data:` or `javascript:`).
pub fn resolve_reference(reference: &str, base: Option<&Url>) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }

    let url = match Url::parse(reference) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(reference).ok()?,
        Err(_) => return None,
    };

    matches!(url.scheme(), "http" | "https").then_some(url)
}
