//! Image discovery and download.
//!
//! Images are found by scanning `<img src>` in the (already filtered) content.
//! Each unique reference is downloaded through the shared [`HttpClient`], so
//! the fetch gate bounds how many images are in flight across all jobs.
//! The archive-relative name is derived from a hash of the resolved URL and
//! therefore stays the same across runs.

use crate::http::{FetchError, HttpClient};
use crate::util::resolve_reference;
use futures::future::join_all;
use mime_guess::{get_mime_extensions_str, mime, MimeGuess};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Directory inside the archive holding every image.
pub const IMAGE_DIR: &str = "images";

#[derive(Debug, Error)]
pub enum AssetError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Not an image (Content-Type: {0})")]
    NotAnImage(String),

    #[error("Unknown image type")]
    UnknownType,

    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AssetError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AssetError::Fetch(e) if e.is_cancelled())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetStatus {
    Pending,
    Fetched,
    Failed(String),
}

/// One image referenced by an entry.
#[derive(Debug, Clone)]
pub struct AssetRef {
    /// The `src` attribute exactly as written in the content.
    pub source: String,
    pub remote: Url,
    /// Archive-relative path, e.g. `images/3f2a….png`.
    pub local_path: String,
    pub media_type: Option<String>,
    pub bytes: Vec<u8>,
    pub status: AssetStatus,
}

impl AssetRef {
    pub fn pending(source: impl Into<String>, remote: Url) -> Self {
        let local_path = local_name(&remote, None);
        Self {
            source: source.into(),
            remote,
            local_path,
            media_type: None,
            bytes: Vec::new(),
            status: AssetStatus::Pending,
        }
    }

    pub fn is_fetched(&self) -> bool {
        self.status == AssetStatus::Fetched
    }
}

/// Deterministic archive path for an image URL.
///
/// The stem is the first 16 hex digits of SHA-256 over the URL; the extension
/// comes from the URL path when it names an image type, otherwise from
/// `media_type`.
pub fn local_name(url: &Url, media_type: Option<&str>) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let stem: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();

    match url_image_extension(url).or_else(|| media_type.and_then(extension_for)) {
        Some(ext) => format!("{IMAGE_DIR}/{stem}.{ext}"),
        None => format!("{IMAGE_DIR}/{stem}"),
    }
}

fn url_image_extension(url: &Url) -> Option<String> {
    let file = url.path_segments()?.last()?;
    let (_, ext) = file.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    image_type_for_extension(&ext).map(|_| ext)
}

fn image_type_for_extension(ext: &str) -> Option<String> {
    MimeGuess::from_ext(ext)
        .iter()
        .find(|mime| mime.type_() == mime::IMAGE)
        .map(|mime| canonical_image_type(mime.essence_str()).to_string())
}

/// Folds legacy and vendor aliases onto the registered image type.
fn canonical_image_type(media_type: &str) -> &str {
    match media_type {
        "image/jpg" | "image/pjpeg" => "image/jpeg",
        "image/x-png" => "image/png",
        "image/x-ms-bmp" => "image/bmp",
        "image/vnd.microsoft.icon" => "image/x-icon",
        other => other,
    }
}

/// Preferred file extension for an image media type.
///
/// Known types use the `mime_guess` table, preferring the extension that
/// matches the subtype (`png`, `svg`) and `jpg` for JPEG. Other `image/*`
/// types fall back to their subtype (`image/jxl` -> `jxl`).
pub fn extension_for(media_type: &str) -> Option<String> {
    let media_type = canonical_image_type(media_type.trim());
    let subtype = media_type.strip_prefix("image/")?;
    let preferred = match subtype.split('+').next().unwrap_or(subtype) {
        "jpeg" => "jpg",
        other => other,
    };

    if let Some(known) = get_mime_extensions_str(media_type) {
        if let Some(ext) = known.iter().find(|ext| **ext == preferred).or(known.first()) {
            return Some(ext.to_string());
        }
    }

    let fallback = preferred.strip_prefix("x-").unwrap_or(preferred);
    let plain = !fallback.is_empty() && fallback.chars().all(|c| c.is_ascii_alphanumeric());
    plain.then(|| fallback.to_string())
}

/// Finds resolvable `<img src>` references in `html`, one per distinct URL.
///
/// Relative sources resolve against `base`, and two sources naming the same
/// URL (`/a.png` and `a.png` under `/`) yield one asset. `data:` URIs and
/// sources that do not resolve to an http(s) URL are ignored.
pub fn discover_images(html: &str, base: Option<&Url>) -> Vec<AssetRef> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .filter_map(|src| {
            let remote = resolve_reference(src, base)?;
            seen.insert(remote.to_string())
                .then(|| AssetRef::pending(src, remote))
        })
        .collect()
}

/// Downloads one image, filling in its type, bytes, and final local name.
pub async fn fetch_asset(client: &HttpClient, mut asset: AssetRef) -> AssetRef {
    match download(client, &asset.remote).await {
        Ok((media_type, bytes)) => {
            asset.local_path = local_name(&asset.remote, Some(&media_type));
            asset.media_type = Some(media_type);
            asset.bytes = bytes;
            asset.status = AssetStatus::Fetched;
        }
        Err(e) => {
            tracing::warn!(url = %asset.remote, error = %e, "Image omitted");
            asset.status = AssetStatus::Failed(e.to_string());
        }
    }
    asset
}

/// Downloads every asset concurrently; the fetch gate bounds actual parallelism.
///
/// Order of the result matches the input. Failures are recorded on the
/// individual [`AssetRef`] and never abort the others.
pub async fn fetch_assets(client: &HttpClient, assets: Vec<AssetRef>) -> Vec<AssetRef> {
    join_all(assets.into_iter().map(|asset| fetch_asset(client, asset))).await
}

async fn download(client: &HttpClient, url: &Url) -> Result<(String, Vec<u8>), AssetError> {
    let response = client.get(url).await?;
    let declared = response.media_type();

    let media_type = match declared.as_deref() {
        Some(mt) if mt.starts_with("image/") => canonical_image_type(mt).to_string(),
        // Servers often send generic types for images; trust the URL instead.
        Some("application/octet-stream") | Some("binary/octet-stream") | None => {
            guess_image_type(url.path()).ok_or(AssetError::UnknownType)?
        }
        Some(other) => return Err(AssetError::NotAnImage(other.to_string())),
    };

    Ok((media_type, response.body))
}

fn guess_image_type(path: &str) -> Option<String> {
    mime_guess::from_path(path)
        .iter()
        .find(|mime| mime.type_() == mime::IMAGE)
        .map(|mime| canonical_image_type(mime.essence_str()).to_string())
}

// ============================================================================
// Title image
// ============================================================================

/// Loads the configured title-page image once per server.
///
/// `location` is either an http(s) URL or a path to a local file. The archive
/// stores it as `images/cover.<ext>`.
pub async fn fetch_title_image(client: &HttpClient, location: &str) -> Result<AssetRef, AssetError> {
    let location = location.trim();

    let (remote, media_type, bytes) = match Url::parse(location) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            let (media_type, bytes) = download(client, &url).await?;
            (url, media_type, bytes)
        }
        _ => {
            let path = Path::new(location);
            let bytes = tokio::fs::read(path).await.map_err(|source| AssetError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let media_type = guess_image_type(location).ok_or(AssetError::UnknownType)?;
            let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
            let url = Url::from_file_path(&absolute).map_err(|_| AssetError::UnknownType)?;
            (url, media_type, bytes)
        }
    };

    let ext = extension_for(&media_type).ok_or(AssetError::UnknownType)?;
    Ok(AssetRef {
        source: location.to_string(),
        remote,
        local_path: format!("{IMAGE_DIR}/cover.{ext}"),
        media_type: Some(media_type),
        bytes,
        status: AssetStatus::Fetched,
    })
}
