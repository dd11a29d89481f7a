//! Scan orchestration: discovery, change detection, extraction and the
//! per-project atomic commit.

use crate::db::{Db, ProjectRecord, ProjectSnapshot};
use crate::error::IndexError;
use crate::indexer::extract::{AssemblyInput, SourceExtractor, TypeInput};
use crate::indexer::fingerprint::{ScanDecision, ScanReason, decide, fingerprint_files};
use crate::indexer::scan::{DiscoveredDir, FileKind, discover_projects, scan_project_files};
use crate::util::{normalize_path, now_secs, panic_message};
use crate::vcs::VersionControl;
use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

pub mod config_keys;
pub mod csharp;
pub mod extract;
pub mod fingerprint;
pub mod msbuild;
pub mod scan;

pub const LAST_SCAN_META_KEY: &str = "last_scan";

/// Shared stop flag for scans and fetches. Work already running finishes;
/// nothing new starts once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Every repository is extracted again.
    Full,
    /// Repositories whose fingerprint is unchanged are skipped.
    Incremental,
    /// Like `Full`, on a store that was discarded first.
    Rebuild,
}

impl ScanMode {
    pub fn is_incremental(self) -> bool {
        self == ScanMode::Incremental
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Discovered,
    SkippedNotRepo,
    SkippedUnchanged,
    Scanning,
    Scanned,
    Failed,
    /// Cancelled before its turn came.
    NotStarted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectOutcome {
    pub project: String,
    pub state: ProjectState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ScanReason>,
    pub types: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanFailure {
    pub project: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub success: bool,
    pub mode: ScanMode,
    pub discovered: usize,
    pub scanned: usize,
    pub skipped_unchanged: usize,
    pub skipped_not_repo: usize,
    pub failed: usize,
    pub not_started: usize,
    pub cancelled: bool,
    pub types_indexed: usize,
    pub internal_references: usize,
    /// In scan order.
    pub failures: Vec<ScanFailure>,
    /// Indexed projects whose directory no longer exists. Never removed
    /// automatically.
    pub stale_projects: Vec<String>,
    pub outcomes: Vec<ProjectOutcome>,
    pub duration_ms: u64,
}

/// Result of running one project through change detection and extraction.
enum ProjectRun {
    NotRepo,
    NotStarted,
    Unchanged,
    Scanned {
        reason: ScanReason,
        snapshot: Box<ProjectSnapshot>,
        warnings: Vec<String>,
    },
    Failed(String),
}

pub struct Indexer {
    root: PathBuf,
    extractor: Arc<dyn SourceExtractor>,
    vcs: Arc<dyn VersionControl>,
    workers: usize,
}

impl Indexer {
    pub fn new(
        root: PathBuf,
        extractor: Arc<dyn SourceExtractor>,
        vcs: Arc<dyn VersionControl>,
        workers: usize,
    ) -> Self {
        Self {
            root,
            extractor,
            vcs,
            workers: workers.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs one scan over every directory under the root. Per-project
    /// failures are collected; store failures abort the run.
    pub fn run(&self, db: &Db, mode: ScanMode, cancel: &CancelToken) -> Result<ScanSummary> {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled.into());
        }
        let dirs = discover_projects(&self.root)?;
        let previous = if mode.is_incremental() {
            db.read_fingerprints()?
        } else {
            HashMap::new()
        };
        info!(
            "scan ({:?}) of {} directories under {}",
            mode,
            dirs.len(),
            self.root.display()
        );

        let mut runs = self.run_projects(&dirs, mode, &previous, cancel);
        self.mark_internal_packages(db, &mut runs)?;

        let mut summary = ScanSummary {
            success: true,
            mode,
            discovered: dirs.len(),
            scanned: 0,
            skipped_unchanged: 0,
            skipped_not_repo: 0,
            failed: 0,
            not_started: 0,
            cancelled: cancel.is_cancelled(),
            types_indexed: 0,
            internal_references: 0,
            failures: Vec::new(),
            stale_projects: Vec::new(),
            outcomes: Vec::with_capacity(dirs.len()),
            duration_ms: 0,
        };

        for (dir, run) in dirs.iter().zip(runs) {
            let mut outcome = ProjectOutcome {
                project: dir.name.clone(),
                state: ProjectState::Discovered,
                reason: None,
                types: 0,
                warnings: Vec::new(),
            };
            match run {
                ProjectRun::NotRepo => {
                    summary.skipped_not_repo += 1;
                    outcome.state = ProjectState::SkippedNotRepo;
                }
                ProjectRun::NotStarted => {
                    summary.not_started += 1;
                    outcome.state = ProjectState::NotStarted;
                }
                ProjectRun::Unchanged => {
                    summary.skipped_unchanged += 1;
                    outcome.state = ProjectState::SkippedUnchanged;
                }
                ProjectRun::Failed(message) => {
                    summary.failed += 1;
                    outcome.state = ProjectState::Failed;
                    summary.failures.push(ScanFailure {
                        project: dir.name.clone(),
                        message,
                    });
                }
                ProjectRun::Scanned {
                    reason,
                    snapshot,
                    warnings,
                } => {
                    let types = db.replace_project(&snapshot)?;
                    info!("{}: committed {} types", dir.name, types);
                    summary.scanned += 1;
                    summary.types_indexed += types;
                    outcome.state = ProjectState::Scanned;
                    outcome.reason = Some(reason);
                    outcome.types = types;
                    outcome.warnings = warnings;
                }
            }
            summary.outcomes.push(outcome);
        }

        summary.internal_references = db.resolve_internal_packages()?;
        db.set_meta_i64(LAST_SCAN_META_KEY, now_secs())?;

        let present: HashSet<&str> = dirs
            .iter()
            .filter(|dir| dir.is_repo)
            .map(|dir| dir.name.as_str())
            .collect();
        summary.stale_projects = db
            .read(|reader| reader.project_names())?
            .into_iter()
            .filter(|name| !present.contains(name.as_str()))
            .collect();
        for name in &summary.stale_projects {
            warn!("{name}: indexed but no longer present under the root");
        }

        summary.success = !summary.cancelled;
        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "scan finished: {} scanned, {} unchanged, {} failed, {} types in {}ms",
            summary.scanned,
            summary.skipped_unchanged,
            summary.failed,
            summary.types_indexed,
            summary.duration_ms
        );
        Ok(summary)
    }

    /// Runs every directory through detection and extraction on the worker
    /// pool. Results come back in directory order.
    fn run_projects(
        &self,
        dirs: &[DiscoveredDir],
        mode: ScanMode,
        previous: &HashMap<String, crate::model::Fingerprint>,
        cancel: &CancelToken,
    ) -> Vec<ProjectRun> {
        let work = |dir: &DiscoveredDir| {
            let previous_hash = previous.get(&dir.name).map(|fp| fp.hash.as_str());
            self.run_project(dir, mode, previous_hash, cancel)
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build();
        match pool {
            Ok(pool) => pool.install(|| dirs.par_iter().map(work).collect()),
            Err(err) => {
                warn!("scan pool unavailable, scanning sequentially: {err}");
                dirs.iter().map(work).collect()
            }
        }
    }

    fn run_project(
        &self,
        dir: &DiscoveredDir,
        mode: ScanMode,
        previous_hash: Option<&str>,
        cancel: &CancelToken,
    ) -> ProjectRun {
        if !dir.is_repo {
            debug!("{}: not a repository, skipped", dir.name);
            return ProjectRun::NotRepo;
        }
        if cancel.is_cancelled() {
            return ProjectRun::NotStarted;
        }
        let files = match scan_project_files(&dir.path) {
            Ok(files) => files,
            Err(err) => return self.fail(dir, format!("{err:#}")),
        };
        let hash = fingerprint_files(&files);
        let reason = match decide(mode.is_incremental(), previous_hash, &hash) {
            ScanDecision::SkipUnchanged => {
                info!("{}: unchanged, skipped", dir.name);
                return ProjectRun::Unchanged;
            }
            ScanDecision::Scan(reason) => reason,
        };
        info!("{}: scanning ({:?})", dir.name, reason);

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.extractor.extract(&dir.path)));
        let extract = match attempt {
            Ok(Ok(extract)) => extract,
            Ok(Err(err)) => return self.fail(dir, format!("{err:#}")),
            Err(payload) => {
                let message = format!("extraction panicked: {}", panic_message(payload.as_ref()));
                return self.fail(dir, message);
            }
        };

        let mut project = ProjectRecord::new(&dir.name, &normalize_path(&dir.path));
        project.solution = files
            .iter()
            .find(|file| file.kind == FileKind::Solution)
            .map(|file| file.rel_path.clone());
        project.remote_url = self.vcs.remote_url(&dir.path).unwrap_or_else(|err| {
            warn!("{}: remote lookup failed: {err:#}", dir.name);
            None
        });
        project.default_branch = self.vcs.default_branch(&dir.path).unwrap_or_else(|err| {
            warn!("{}: default branch lookup failed: {err:#}", dir.name);
            None
        });

        let mut snapshot = ProjectSnapshot::new(project);
        for (assembly, types) in group_by_assembly(&dir.name, extract.assemblies, extract.types) {
            snapshot = snapshot.with_unit(assembly, types);
        }
        snapshot.config_entries = extract.config_entries;
        snapshot.fingerprint = Some(hash);
        debug!(
            "{}: buffered {} units with {} types",
            dir.name,
            snapshot.units.len(),
            snapshot.type_count()
        );
        ProjectRun::Scanned {
            reason,
            snapshot: Box::new(snapshot),
            warnings: extract.warnings,
        }
    }

    fn fail(&self, dir: &DiscoveredDir, message: String) -> ProjectRun {
        warn!("{}: scan failed: {message}", dir.name);
        ProjectRun::Failed(message)
    }

    /// Flags internal package references in every buffered snapshot before
    /// anything is committed. Assemblies come from the buffered snapshots and
    /// from stored projects that this run does not replace.
    fn mark_internal_packages(&self, db: &Db, runs: &mut [ProjectRun]) -> Result<()> {
        let mut replaced = HashSet::new();
        let mut assemblies = HashSet::new();
        for run in runs.iter() {
            if let ProjectRun::Scanned { snapshot, .. } = run {
                replaced.insert(snapshot.project.name.clone());
                for unit in &snapshot.units {
                    assemblies.insert(unit.assembly.name.to_lowercase());
                }
            }
        }
        if replaced.is_empty() {
            return Ok(());
        }
        for (project, assembly) in db.read(|reader| reader.assembly_names())? {
            if !replaced.contains(&project) {
                assemblies.insert(assembly.to_lowercase());
            }
        }
        for run in runs.iter_mut() {
            if let ProjectRun::Scanned { snapshot, .. } = run {
                let flagged = snapshot.mark_internal_packages(&assemblies);
                debug!("{}: {flagged} internal package references", snapshot.project.name);
            }
        }
        Ok(())
    }
}

/// Attaches every type to the unit whose descriptor directory most closely
/// contains its file. Types outside all descriptors land in a synthetic unit
/// named after the project.
pub fn group_by_assembly(
    project_name: &str,
    assemblies: Vec<AssemblyInput>,
    types: Vec<TypeInput>,
) -> Vec<(AssemblyInput, Vec<TypeInput>)> {
    let mut buckets: Vec<Vec<TypeInput>> = vec![Vec::new(); assemblies.len()];
    let mut orphans = Vec::new();
    for record in types {
        match csharp::owning_assembly(&assemblies, &record.file_path) {
            Some(idx) => buckets[idx].push(record),
            None => orphans.push(record),
        }
    }
    let mut grouped: Vec<(AssemblyInput, Vec<TypeInput>)> =
        assemblies.into_iter().zip(buckets).collect();
    if !orphans.is_empty() {
        grouped.push((AssemblyInput::synthetic(project_name), orphans));
    }
    grouped
}
