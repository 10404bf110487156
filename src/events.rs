//! JSON-lines notifications for an e-reader host process.
//!
//! With `--emit-events`, stdout carries one JSON object per line: an
//! `addDocument` event for every archive written and a final `notify` event
//! with the run summary. Logging goes to stderr so the two never mix.

use crate::pipeline::{ArchiveInfo, RunSummary};
use chrono::{DateTime, Datelike, Local};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    AddDocument { info: DocumentInfo },
    Notify { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub title: String,
    pub author: String,
    pub year: String,
    pub publisher: String,
    pub identifier: String,
    pub added: String,
    pub file: FileInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    /// Path relative to the host's library directory.
    pub path: PathBuf,
    pub kind: String,
    pub size: u64,
}

impl HostEvent {
    /// `addDocument` for one written archive. `library` is the directory the
    /// host indexes; the archive path is reported relative to it when possible.
    pub fn add_document(archive: &ArchiveInfo, library: &Path, added: DateTime<Local>) -> Self {
        let path = archive
            .path
            .strip_prefix(library)
            .unwrap_or(&archive.path)
            .to_path_buf();

        HostEvent::AddDocument {
            info: DocumentInfo {
                title: archive.title.clone(),
                author: archive.author.clone().unwrap_or_default(),
                year: archive
                    .published
                    .map(|date| date.year().to_string())
                    .unwrap_or_default(),
                publisher: archive.publisher.clone(),
                identifier: archive.identifier.clone(),
                added: added.naive_local().format("%Y-%m-%d %H:%M:%S").to_string(),
                file: FileInfo {
                    path,
                    kind: crate::archive::ARCHIVE_EXTENSION.to_string(),
                    size: archive.size,
                },
            },
        }
    }

    pub fn notify(message: impl Into<String>) -> Self {
        HostEvent::Notify {
            message: message.into(),
        }
    }

    /// Fails only for archive paths that are not valid UTF-8.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn write_line(&self, out: &mut impl Write) -> std::io::Result<()> {
        match self.to_json() {
            Ok(line) => writeln!(out, "{line}"),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping host event");
                Ok(())
            }
        }
    }
}

/// Writes the events for a finished run, one JSON object per line.
pub fn emit_run_events(
    out: &mut impl Write,
    summary: &RunSummary,
    library: &Path,
) -> std::io::Result<()> {
    let added = Local::now();
    for archive in summary.archives() {
        HostEvent::add_document(archive, library, added).write_line(out)?;
    }
    HostEvent::notify(summary.headline()).write_line(out)?;
    out.flush()
}
