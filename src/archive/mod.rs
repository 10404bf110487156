//! Archive assembly, packaging, and placement on disk.

mod epub;
mod manifest;
mod path;

pub use epub::build_epub;
pub use manifest::{identifier_for, resolve_author, ArchiveManifest, Chapter};
pub use path::{output_dir, FileNameAllocator, ARCHIVE_EXTENSION};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Archive has no chapters")]
    Empty,

    #[error("Failed to package archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error while packaging archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes `bytes` to `dst` through a temporary file and a rename.
///
/// `dst` either keeps its previous content or holds the complete new archive;
/// a failure at any point removes the temporary file and leaves no partial
/// output behind. Missing parent directories are created.
pub async fn write_atomic(dst: &Path, bytes: &[u8]) -> Result<(), BuildError> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| BuildError::Write { path, source }
    };

    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(write_err(parent))?;
    }

    // Unpredictable temp name plus create_new, so an existing file or symlink
    // at the temp path is never followed.
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("{ARCHIVE_EXTENSION}.tmp.{suffix:016x}"));

    let result = async {
        let mut temp_file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        temp_file.write_all(bytes).await?;
        temp_file.flush().await?;
        temp_file.sync_all().await?;
        drop(temp_file);

        // On Windows, rename fails if destination exists.
        #[cfg(windows)]
        {
            if fs::try_exists(dst).await? {
                fs::remove_file(dst).await?;
            }
        }

        fs::rename(&temp_path, dst).await
    }
    .await;

    if let Err(source) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(BuildError::Write {
            path: dst.to_path_buf(),
            source,
        });
    }
    Ok(())
}
