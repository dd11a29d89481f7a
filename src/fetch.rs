//! Bounded-parallel fetch/pull over every repository under the root.
//!
//! Each repository is its own task. A task that errors or panics becomes an
//! `Error` row; nothing it does reaches sibling tasks or the caller.

use crate::indexer::CancelToken;
use crate::indexer::scan::{DiscoveredDir, discover_projects};
use crate::util::panic_message;
use crate::vcs::{BranchState, PullOutcome, VersionControl};
use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub concurrency: usize,
    pub allowed_branches: Vec<String>,
    /// Run an incremental scan afterwards when any repository was updated.
    pub rescan: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchStatus {
    /// Checked out on a branch outside the allow-list; nothing fetched.
    Skipped { branch: String },
    UpToDate,
    Updated,
    Error { message: String },
    NotStarted,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub repository: String,
    #[serde(flatten)]
    pub status: FetchStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchSummary {
    /// Sorted by repository name.
    pub results: Vec<FetchResult>,
    pub updated: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub errors: usize,
    pub not_started: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl FetchSummary {
    pub fn any_updated(&self) -> bool {
        self.updated > 0
    }
}

pub fn fetch_all(
    root: &Path,
    vcs: &dyn VersionControl,
    options: &FetchOptions,
    cancel: &CancelToken,
) -> Result<FetchSummary> {
    let started = Instant::now();
    let repos: Vec<DiscoveredDir> = discover_projects(root)?
        .into_iter()
        .filter(|dir| dir.is_repo)
        .collect();
    info!(
        "fetching {} repositories ({} at a time)",
        repos.len(),
        options.concurrency.max(1)
    );

    let work = |dir: &DiscoveredDir| FetchResult {
        repository: dir.name.clone(),
        status: fetch_one(dir, vcs, &options.allowed_branches, cancel),
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.concurrency.max(1))
        .build();
    let mut results: Vec<FetchResult> = match pool {
        Ok(pool) => pool.install(|| repos.par_iter().map(work).collect()),
        Err(err) => {
            warn!("fetch pool unavailable, fetching sequentially: {err}");
            repos.iter().map(work).collect()
        }
    };
    results.sort_by(|a, b| a.repository.cmp(&b.repository));

    let mut summary = FetchSummary {
        cancelled: cancel.is_cancelled(),
        ..FetchSummary::default()
    };
    for result in &results {
        match result.status {
            FetchStatus::Skipped { .. } => summary.skipped += 1,
            FetchStatus::UpToDate => summary.up_to_date += 1,
            FetchStatus::Updated => summary.updated += 1,
            FetchStatus::Error { .. } => summary.errors += 1,
            FetchStatus::NotStarted => summary.not_started += 1,
        }
    }
    summary.results = results;
    summary.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        "fetch finished: {} updated, {} up to date, {} skipped, {} errors",
        summary.updated, summary.up_to_date, summary.skipped, summary.errors
    );
    Ok(summary)
}

fn fetch_one(
    dir: &DiscoveredDir,
    vcs: &dyn VersionControl,
    allowed_branches: &[String],
    cancel: &CancelToken,
) -> FetchStatus {
    if cancel.is_cancelled() {
        return FetchStatus::NotStarted;
    }
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| -> Result<FetchStatus> {
        let branch = vcs.current_branch(&dir.path)?;
        if !branch_allowed(&branch, allowed_branches) {
            let branch = match branch {
                BranchState::Named(name) => name,
                BranchState::Detached => "(detached)".to_string(),
                BranchState::Unknown => "(unknown)".to_string(),
            };
            debug!("{}: on {branch}, not fetching", dir.name);
            return Ok(FetchStatus::Skipped { branch });
        }
        Ok(match vcs.fetch_and_pull(&dir.path)? {
            PullOutcome::UpToDate => FetchStatus::UpToDate,
            PullOutcome::Updated => {
                info!("{}: updated", dir.name);
                FetchStatus::Updated
            }
            PullOutcome::Failed(message) => FetchStatus::Error { message },
        })
    }));
    let status = match attempt {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => FetchStatus::Error {
            message: format!("{err:#}"),
        },
        Err(payload) => FetchStatus::Error {
            message: format!("fetch task panicked: {}", panic_message(payload.as_ref())),
        },
    };
    if let FetchStatus::Error { message } = &status {
        warn!("{}: fetch failed: {message}", dir.name);
    }
    status
}

fn branch_allowed(branch: &BranchState, allowed: &[String]) -> bool {
    branch
        .name()
        .is_some_and(|name| allowed.iter().any(|candidate| candidate == name))
}
