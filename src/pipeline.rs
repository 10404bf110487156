//! Run orchestration: feed jobs through every stage, archives onto disk.
//!
//! Jobs run concurrently on a pool of `worker_count` slots; within a job the
//! stages run in order (feed → entries → archive), and the entries of one feed
//! are processed concurrently but reassembled in feed order. The fetch gate
//! inside [`HttpClient`] caps actual network concurrency across everything.
//!
//! Results are consumed in job order, and archives are written one at a time
//! from that ordered stream. File names come from the plan rather than from
//! which jobs succeeded, so every run writes a server's archive to the same
//! path whatever happened to its neighbours.

use crate::archive::{
    build_epub, resolve_author, write_atomic, ArchiveManifest, BuildError, Chapter,
    FileNameAllocator,
};
use crate::config::{Config, ConfigError};
use crate::content::{
    discover_images, fetch_assets, fetch_title_image, resolve_entry, to_xhtml, AssetRef,
    AssetStatus, ContentSource, ResolveError, SelectorChain,
};
use crate::feed::{fetch_feed, FeedEntry, FeedError};
use crate::gate::{Cancellation, FetchGate};
use crate::http::{FetchError, HttpClient};
use crate::registry::{EffectiveSettings, FeedJob, JobPlan, Registry, Rejection};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

// ============================================================================
// Outcomes
// ============================================================================

/// Something that went wrong without failing the server's archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// No selector matched; the whole article page was kept.
    FilterFallback { entry: String },
    /// The configured `filter-element` does not parse as CSS.
    InvalidSelector { selector: String },
    ImageOmitted { entry: String, url: String, reason: String },
    EntrySkipped { entry: String, reason: String },
    /// The article download failed and the feed's own content was used.
    ArticleFetchFailed { entry: String, reason: String },
    TitleImageFailed { source: String, reason: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::FilterFallback { entry } => {
                write!(f, "'{entry}': no content element matched, kept full page")
            }
            Degradation::InvalidSelector { selector } => {
                write!(f, "invalid filter selector '{selector}'")
            }
            Degradation::ImageOmitted { entry, url, reason } => {
                write!(f, "'{entry}': image {url} omitted ({reason})")
            }
            Degradation::EntrySkipped { entry, reason } => {
                write!(f, "'{entry}' skipped ({reason})")
            }
            Degradation::ArticleFetchFailed { entry, reason } => {
                write!(f, "'{entry}': article unavailable, used feed content ({reason})")
            }
            Degradation::TitleImageFailed { source, reason } => {
                write!(f, "title image {source} unavailable ({reason})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOutcome {
    Succeeded,
    Partial { degradations: Vec<Degradation> },
    Failed { error: String },
    Skipped { reason: String },
}

/// Metadata of one written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub title: String,
    pub author: Option<String>,
    pub publisher: String,
    pub identifier: String,
    /// Newest entry date.
    pub published: Option<DateTime<Utc>>,
    pub size: u64,
    pub chapters: usize,
}

#[derive(Debug, Clone)]
pub struct ServerReport {
    pub server: String,
    pub category_path: Vec<String>,
    pub outcome: ServerOutcome,
    pub archive: Option<ArchiveInfo>,
}

impl ServerReport {
    fn new(job: &FeedJob, outcome: ServerOutcome) -> Self {
        Self {
            server: job.server.name.clone(),
            category_path: job.server.category_path.clone(),
            outcome,
            archive: None,
        }
    }

    fn rejected(rejection: Rejection) -> Self {
        Self {
            server: rejection.name,
            category_path: rejection.category_path,
            outcome: ServerOutcome::Skipped {
                reason: rejection.error.to_string(),
            },
            archive: None,
        }
    }

    /// `Category/Sub/Server`
    pub fn display_name(&self) -> String {
        let mut parts = self.category_path.clone();
        parts.push(self.server.clone());
        parts.join("/")
    }
}

/// Structured result of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<ServerReport>,
    /// Highest number of simultaneous requests observed.
    pub peak_in_flight: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn archives(&self) -> impl Iterator<Item = &ArchiveInfo> {
        self.reports.iter().filter_map(|r| r.archive.as_ref())
    }

    fn count(&self, pred: impl Fn(&ServerOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ServerOutcome::Succeeded))
    }

    pub fn partial(&self) -> usize {
        self.count(|o| matches!(o, ServerOutcome::Partial { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ServerOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ServerOutcome::Skipped { .. }))
    }

    /// No server failed or was skipped.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }

    /// One-line human summary.
    pub fn headline(&self) -> String {
        if self.cancelled {
            return format!(
                "Feed download cancelled: {} archives written",
                self.archives().count()
            );
        }
        if self.is_success() && self.partial() == 0 {
            return format!("Feed download successful: {} archives written", self.succeeded());
        }
        format!(
            "Feed download finished: {} succeeded, {} partial, {} failed, {} skipped",
            self.succeeded(),
            self.partial(),
            self.failed(),
            self.skipped()
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a job produced no archive.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Feed has no usable entries")]
    NoEntries,

    #[error("Run cancelled")]
    Cancelled,
}

/// The run could not start.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] FetchError),
}

// ============================================================================
// Pipeline
// ============================================================================

/// An archive built in memory, not yet on disk.
#[derive(Debug)]
pub struct BuiltArchive {
    pub manifest: ArchiveManifest,
    pub bytes: Vec<u8>,
    pub degradations: Vec<Degradation>,
}

struct EntryReport {
    chapter: Option<Chapter>,
    degradations: Vec<Degradation>,
}

impl EntryReport {
    fn skipped(entry: &FeedEntry, reason: impl ToString) -> Self {
        Self {
            chapter: None,
            degradations: vec![Degradation::EntrySkipped {
                entry: entry.title.clone(),
                reason: reason.to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    client: HttpClient,
    worker_count: usize,
}

impl Pipeline {
    pub fn new(client: HttpClient, worker_count: usize) -> Self {
        Self {
            client,
            worker_count: worker_count.max(1),
        }
    }

    /// Processes every planned job and writes the resulting archives.
    ///
    /// Never fails as a whole: each server's result, including the planning
    /// rejections, ends up as one [`ServerReport`].
    pub async fn run(&self, plan: JobPlan) -> RunSummary {
        let cancel = self.client.cancellation().clone();
        let mut reports: Vec<ServerReport> =
            plan.rejected.into_iter().map(ServerReport::rejected).collect();
        let mut names = FileNameAllocator::for_plan(
            plan.jobs
                .iter()
                .map(|job| (job.output_dir.as_path(), job.server.name.as_str())),
        );

        tracing::info!(jobs = plan.jobs.len(), workers = self.worker_count, "Starting run");

        let mut results = stream::iter(plan.jobs.iter())
            .map(|job| async move { (job, self.build_job(job).await) })
            .buffered(self.worker_count);

        while let Some((job, result)) = results.next().await {
            let report = match result {
                _ if cancel.is_cancelled() => ServerReport::new(
                    job,
                    ServerOutcome::Skipped {
                        reason: JobError::Cancelled.to_string(),
                    },
                ),
                Ok(built) => self.write_archive(job, built, &mut names).await,
                Err(JobError::NoEntries) => {
                    tracing::warn!(server = %job.server.name, "Feed has no usable entries");
                    ServerReport::new(
                        job,
                        ServerOutcome::Skipped {
                            reason: JobError::NoEntries.to_string(),
                        },
                    )
                }
                Err(e) => {
                    tracing::warn!(server = %job.server.name, error = %e, "Server failed");
                    ServerReport::new(job, ServerOutcome::Failed { error: e.to_string() })
                }
            };
            reports.push(report);
        }

        let summary = RunSummary {
            reports,
            peak_in_flight: self.client.gate().peak_in_flight(),
            cancelled: cancel.is_cancelled(),
        };
        tracing::info!(
            succeeded = summary.succeeded(),
            partial = summary.partial(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            peak_in_flight = summary.peak_in_flight,
            "Run finished"
        );
        summary
    }

    async fn write_archive(
        &self,
        job: &FeedJob,
        built: BuiltArchive,
        names: &mut FileNameAllocator,
    ) -> ServerReport {
        let path = names.allocate(&job.output_dir, &job.server.name, &built.manifest.title);

        if let Err(e) = write_atomic(&path, &built.bytes).await {
            tracing::warn!(server = %job.server.name, error = %e, "Failed to write archive");
            return ServerReport::new(job, ServerOutcome::Failed { error: e.to_string() });
        }

        let manifest = &built.manifest;
        tracing::info!(
            server = %job.server.name,
            path = %path.display(),
            chapters = manifest.chapters.len(),
            "Archive written"
        );

        let outcome = if built.degradations.is_empty() {
            ServerOutcome::Succeeded
        } else {
            ServerOutcome::Partial {
                degradations: built.degradations.clone(),
            }
        };

        let mut report = ServerReport::new(job, outcome);
        report.archive = Some(ArchiveInfo {
            path,
            title: manifest.title.clone(),
            author: manifest.author.clone(),
            publisher: job.server.name.clone(),
            identifier: manifest.identifier.clone(),
            published: manifest.chapters.iter().filter_map(|c| c.published).max(),
            size: built.bytes.len() as u64,
            chapters: manifest.chapters.len(),
        });
        report
    }

    /// Runs every stage for one server and packages the result in memory.
    pub async fn build_job(&self, job: &FeedJob) -> Result<BuiltArchive, JobError> {
        let server = &job.server;
        let settings = &server.settings;
        let mut degradations = Vec::new();

        tracing::debug!(server = %server.name, url = %server.url, "Fetching feed");
        let feed = fetch_feed(&self.client, &server.url).await.map_err(|e| {
            if e.is_cancelled() {
                JobError::Cancelled
            } else {
                JobError::Feed(e)
            }
        })?;

        let cover = match settings.title_img.as_deref() {
            Some(location) => match fetch_title_image(&self.client, location).await {
                Ok(cover) => Some(cover),
                Err(e) if e.is_cancelled() => return Err(JobError::Cancelled),
                Err(e) => {
                    tracing::warn!(server = %server.name, source = %location, error = %e, "Title image unavailable");
                    degradations.push(Degradation::TitleImageFailed {
                        source: location.to_string(),
                        reason: e.to_string(),
                    });
                    None
                }
            },
            None => None,
        };

        let chain = settings
            .enable_filter
            .then(|| SelectorChain::new(settings.filter_element.as_deref()));
        if let Some(chain) = &chain {
            degradations.extend(chain.invalid().iter().map(|selector| {
                Degradation::InvalidSelector {
                    selector: selector.clone(),
                }
            }));
        }

        let title = feed
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(server.name.as_str())
            .to_string();
        let mut manifest = ArchiveManifest::new(title, &server.url);
        manifest.author = resolve_author(&settings.default_author, &feed.authors, &manifest.title);
        manifest.description = feed.description.clone().filter(|d| !d.trim().is_empty());
        if let Some(language) = feed.language.clone().filter(|l| !l.trim().is_empty()) {
            manifest.language = language;
        }
        manifest.cover = cover;

        let width = self.client.gate().limit();
        let mut chapters = stream::iter(feed.entries)
            .map(|entry| self.build_chapter(settings, chain.as_ref(), &server.url, entry))
            .buffered(width);

        while let Some(result) = chapters.next().await {
            let report = result?;
            degradations.extend(report.degradations);
            if let Some(chapter) = report.chapter {
                manifest.push_chapter(chapter);
            }
        }

        if manifest.chapters.is_empty() {
            return Err(JobError::NoEntries);
        }

        let bytes = build_epub(&manifest)?;
        Ok(BuiltArchive {
            manifest,
            bytes,
            degradations,
        })
    }

    /// Resolve → filter → collect images → serialize, for one entry.
    async fn build_chapter(
        &self,
        settings: &EffectiveSettings,
        chain: Option<&SelectorChain>,
        feed_url: &Url,
        mut entry: FeedEntry,
    ) -> Result<EntryReport, JobError> {
        let resolved =
            match resolve_entry(&self.client, &entry, settings.download_full_article).await {
                Ok(resolved) => resolved,
                Err(ResolveError::Cancelled) => return Err(JobError::Cancelled),
                Err(e) => {
                    tracing::warn!(entry = %entry.title, error = %e, "Entry skipped");
                    return Ok(EntryReport::skipped(&entry, e));
                }
            };

        let mut degradations = Vec::new();
        if let Some(e) = &resolved.article_error {
            degradations.push(Degradation::ArticleFetchFailed {
                entry: entry.title.clone(),
                reason: e.to_string(),
            });
        }

        let mut html = resolved.html;
        if let (ContentSource::Article, Some(chain)) = (resolved.source, chain) {
            let filtered = chain.apply(&html);
            if filtered.matched.is_none() {
                tracing::warn!(entry = %entry.title, "No content element matched, keeping full page");
                degradations.push(Degradation::FilterFallback {
                    entry: entry.title.clone(),
                });
            }
            html = filtered.html;
        }

        let base = resolved.base.unwrap_or_else(|| feed_url.clone());
        let mut images = HashMap::new();

        if settings.include_images {
            let assets = fetch_assets(&self.client, discover_images(&html, Some(&base))).await;
            if self.client.cancellation().is_cancelled() {
                return Err(JobError::Cancelled);
            }

            for asset in &assets {
                match &asset.status {
                    AssetStatus::Fetched => {
                        images.insert(asset.remote.to_string(), asset.local_path.clone());
                    }
                    AssetStatus::Failed(reason) => degradations.push(Degradation::ImageOmitted {
                        entry: entry.title.clone(),
                        url: asset.remote.to_string(),
                        reason: reason.clone(),
                    }),
                    AssetStatus::Pending => {}
                }
            }
            entry.assets = assets.into_iter().filter(AssetRef::is_fetched).collect();
        }

        let body = to_xhtml(&html, Some(&base), &images);
        Ok(EntryReport {
            chapter: Some(Chapter::from_entry(entry, body)),
            degradations,
        })
    }
}

/// Builds the registry, gate, and client from `config` and runs every job
/// under `output_root`.
pub async fn run(
    config: &Config,
    output_root: &Path,
    cancel: Cancellation,
) -> Result<RunSummary, RunError> {
    let (registry, rejected) = Registry::from_config(config)?;
    let gate = FetchGate::new(config.concurrent_requests);
    let client = HttpClient::new(&config.http_options(), gate, cancel)?;

    let mut plan = registry.jobs(output_root);
    plan.rejected.splice(0..0, rejected);

    let pipeline = Pipeline::new(client, config.worker_count);
    Ok(pipeline.run(plan).await)
}
