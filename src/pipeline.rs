use std::fs;
use std::thread;

use serde::Serialize;
use tempfile::Builder;
use tracing::{error, info, warn};

use crate::config::{CursorMode, FilterConfig, RunConfig};
use crate::dedup::filter_existing;
use crate::domain::{BeatmapSetItem, Category, WorkingSet};
use crate::error::HarvestError;
use crate::extract::{ExtractReport, ExtractTarget, extract_media};
use crate::library::Library;
use crate::paginator::{SearchQuery, scrape};
use crate::session::BeatmapSite;
use crate::upload::{ObjectStore, UploadReport, UploadSync};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Extracted {
        report: ExtractReport,
        upload: Option<UploadReport>,
    },
    /// Downloaded, but extraction failed and the item was discarded.
    Dropped { reason: String },
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub attempts: usize,
    pub extracted: usize,
    pub dropped: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// Too many downloads failed in a row; the site is likely rate limiting.
    DownloadLimitReached {
        consecutive_failures: u32,
        last_error: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { summary: RunSummary },
    Aborted { reason: AbortReason, summary: RunSummary },
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Completed { summary } | RunOutcome::Aborted { summary, .. } => summary,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RunOutcome::Aborted { .. })
    }
}

/// One scrape-download-extract job.
#[derive(Debug, Clone)]
pub struct HarvestJob {
    pub category: Category,
    pub query: SearchQuery,
    pub limit: usize,
}

pub struct Harvester<S: BeatmapSite, O: ObjectStore> {
    site: S,
    library: Library,
    filter: FilterConfig,
    run: RunConfig,
    cursor_mode: CursorMode,
    uploader: Option<UploadSync<O>>,
}

impl<S: BeatmapSite, O: ObjectStore> Harvester<S, O> {
    pub fn new(
        site: S,
        library: Library,
        filter: FilterConfig,
        run: RunConfig,
        cursor_mode: CursorMode,
    ) -> Self {
        Self {
            site,
            library,
            filter,
            run,
            cursor_mode,
            uploader: None,
        }
    }

    pub fn with_uploader(mut self, uploader: UploadSync<O>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn site(&self) -> &S {
        &self.site
    }

    pub fn uploader(&self) -> Option<&UploadSync<O>> {
        self.uploader.as_ref()
    }

    /// Scrape, drop local duplicates, then run the download loop.
    pub fn harvest(&self, job: &HarvestJob) -> Result<RunOutcome, HarvestError> {
        info!(category = %job.category, limit = job.limit, "harvest started");
        let scraped = scrape(&self.site, &job.query, job.limit, self.cursor_mode)?;
        let pending = filter_existing(&scraped, &self.library, &job.category);
        Ok(self.run(pending, &job.category))
    }

    /// Downloads one item's archive, extracts its media and syncs it upstream.
    ///
    /// `Err` means the item was not processed. Only
    /// [`HarvestError::is_retryable`] errors are worth another attempt.
    /// Extraction problems are reported as [`ItemOutcome::Dropped`].
    pub fn fetch_and_extract(
        &self,
        item: &BeatmapSetItem,
        category: &Category,
    ) -> Result<ItemOutcome, HarvestError> {
        let name = item.canonical_name();
        info!(item = %item, "downloading beatmap set");
        self.library.ensure_category(category)?;

        let category_dir = self.library.category_dir(category);
        let partial = Builder::new()
            .prefix(".partial-")
            .suffix(".zip")
            .tempfile_in(category_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        self.site.download(item, self.run.no_video, partial.path())?;

        let archive = self.library.archive_path(category, &name);
        partial
            .persist(archive.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        info!(path = %archive, "archive written");

        let item_dir = self.library.item_dir(category, &name);
        let pool_dir = self.library.pool_dir(category);
        let target = ExtractTarget {
            item_dir: item_dir.as_std_path(),
            pool_dir: pool_dir.as_std_path(),
            name: &name,
        };
        let extracted = extract_media(archive.as_std_path(), target, &self.filter);

        if let Err(err) = fs::remove_file(archive.as_std_path()) {
            error!(path = %archive, %err, "failed to delete archive");
        }

        let report = match extracted {
            Ok(report) => report,
            Err(err) => {
                error!(item = %item, %err, "extraction failed, item dropped");
                return Ok(ItemOutcome::Dropped {
                    reason: err.to_string(),
                });
            }
        };

        let upload = self.uploader.as_ref().and_then(|uploader| {
            match uploader.sync(category, item_dir.as_std_path(), &name) {
                Ok(report) => Some(report),
                Err(err) => {
                    error!(item = %item, %err, "upload sync failed");
                    None
                }
            }
        });

        Ok(ItemOutcome::Extracted { report, upload })
    }

    /// Works through `working_set` one item at a time.
    ///
    /// An item whose download failed goes back into the set. After
    /// `max_consecutive_failures` such failures in a row the run stops with
    /// [`RunOutcome::Aborted`]. Local errors drop the item and leave the
    /// failure count untouched.
    pub fn run(&self, working_set: WorkingSet, category: &Category) -> RunOutcome {
        let mut pending = working_set;
        let mut summary = RunSummary::default();
        let mut consecutive_failures = 0u32;
        let limit = self.run.max_consecutive_failures.max(1);

        info!(pending = pending.len(), category = %category, "download loop started");
        while let Some(item) = pending.iter().next().cloned() {
            pending.remove(&item);
            summary.attempts += 1;

            match self.fetch_and_extract(&item, category) {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    match outcome {
                        ItemOutcome::Extracted { .. } => summary.extracted += 1,
                        ItemOutcome::Dropped { .. } => summary.dropped += 1,
                    }
                    if !pending.is_empty() && !self.run.pacing().is_zero() {
                        thread::sleep(self.run.pacing());
                    }
                }
                Err(err) if !err.is_retryable() => {
                    error!(item = %item, %err, "local failure, item dropped");
                    summary.dropped += 1;
                }
                Err(err) => {
                    warn!(item = %item, %err, "download failed");
                    pending.insert(item);
                    consecutive_failures += 1;
                    if consecutive_failures >= limit {
                        summary.remaining = pending.len();
                        error!(consecutive_failures, "download limit reached, try again later");
                        return RunOutcome::Aborted {
                            reason: AbortReason::DownloadLimitReached {
                                consecutive_failures,
                                last_error: err.to_string(),
                            },
                            summary,
                        };
                    }
                }
            }
        }

        info!(
            extracted = summary.extracted,
            dropped = summary.dropped,
            "download loop finished"
        );
        RunOutcome::Completed { summary }
    }
}
