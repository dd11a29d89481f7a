//! One scanned root: its index, the query cache in front of it, and the
//! single-writer gate that serializes scans.
//!
//! Every read raises [`IndexError::Unavailable`] while no index file exists.
//! Writes create the index on demand.

use crate::cache::{CacheKey, CacheStats, QueryCache};
use crate::config::Config;
use crate::db::Db;
use crate::error::IndexError;
use crate::fetch::{FetchOptions, FetchSummary, fetch_all};
use crate::graph::{
    self, ImpactOutcome, PatternReport, PatternSettings, ProjectDependencies, TraceFlowResult,
    VersionMismatch,
};
use crate::indexer::csharp::DotnetExtractor;
use crate::indexer::extract::SourceExtractor;
use crate::indexer::scan::discover_projects;
use crate::indexer::{CancelToken, Indexer, ScanMode, ScanSummary};
use crate::model::{
    ConfigEntryRecord, EndpointRecord, IndexOverview, ProjectSummary, TypeDetail, TypeKind,
    TypeRef,
};
use crate::util::default_db_path;
use crate::vcs::{BranchState, GitClient, RepoStatus, VersionControl};
use anyhow::{Result, bail};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, info};

/// Row caps and thresholds applied by the workspace queries.
#[derive(Debug, Clone)]
pub struct Limits {
    pub search_limit: usize,
    pub list_limit: usize,
    pub max_flow_depth: usize,
    pub high_coupling_threshold: usize,
    pub scan_workers: usize,
}

impl Limits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            search_limit: config.search_limit.max(1),
            list_limit: config.list_limit.max(1),
            max_flow_depth: config.max_flow_depth.max(1),
            high_coupling_threshold: config.high_coupling_threshold.max(1),
            scan_workers: config.scan_workers.max(1),
        }
    }
}

/// Rows of a capped query together with the cap that produced them.
#[derive(Debug, Clone, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub cap: usize,
}

impl<T> Listing<T> {
    /// More rows may exist past the cap.
    pub fn truncated(&self) -> bool {
        self.items.len() == self.cap
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub fetch: FetchSummary,
    /// Present when the fetch updated something and a rescan was requested.
    pub scan: Option<ScanSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoStatusRow {
    pub repository: String,
    pub branch: BranchState,
    pub status: Option<RepoStatus>,
    pub error: Option<String>,
}

pub struct WorkspaceBuilder {
    root: PathBuf,
    db_path: Option<PathBuf>,
    extractor: Option<Arc<dyn SourceExtractor>>,
    vcs: Option<Arc<dyn VersionControl>>,
    cache: Option<QueryCache>,
    limits: Option<Limits>,
}

impl WorkspaceBuilder {
    pub fn db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = Some(db_path);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn SourceExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn cache(mut self, cache: QueryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn build(self) -> Workspace {
        let db_path = self
            .db_path
            .unwrap_or_else(|| default_db_path(&self.root));
        Workspace {
            db_path,
            root: self.root,
            db: RwLock::new(None),
            cache: self.cache.unwrap_or_default(),
            scan_gate: Mutex::new(()),
            extractor: self.extractor.unwrap_or_else(|| Arc::new(DotnetExtractor)),
            vcs: self.vcs.unwrap_or_else(|| Arc::new(GitClient)),
            limits: self
                .limits
                .unwrap_or_else(|| Limits::from_config(Config::get())),
        }
    }
}

pub struct Workspace {
    root: PathBuf,
    db_path: PathBuf,
    db: RwLock<Option<Arc<Db>>>,
    cache: QueryCache,
    /// Held for the whole of any scan, rescan or forget.
    scan_gate: Mutex<()>,
    extractor: Arc<dyn SourceExtractor>,
    vcs: Arc<dyn VersionControl>,
    limits: Limits,
}

impl Workspace {
    pub fn builder(root: PathBuf) -> WorkspaceBuilder {
        WorkspaceBuilder {
            root,
            db_path: None,
            extractor: None,
            vcs: None,
            cache: None,
            limits: None,
        }
    }

    /// Default collaborators: the .NET extractor, `git`, a 30s cache.
    pub fn open(root: PathBuf, db_path: Option<PathBuf>) -> Self {
        let builder = Self::builder(root);
        match db_path {
            Some(db_path) => builder.db_path(db_path),
            None => builder,
        }
        .build()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The open index, opening it on first use. Never creates one.
    fn store(&self) -> Result<Arc<Db>> {
        if let Some(db) = self
            .db
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            if db.db_path().is_file() {
                return Ok(db.clone());
            }
        }
        let mut slot = self
            .db
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.db_path.is_file() {
            *slot = None;
            return Err(IndexError::Unavailable {
                path: self.db_path.clone(),
            }
            .into());
        }
        if let Some(db) = slot.as_ref() {
            return Ok(db.clone());
        }
        let db = Arc::new(Db::open_existing(&self.db_path)?);
        *slot = Some(db.clone());
        Ok(db)
    }

    /// The index for a write, created when absent. `fresh` discards any
    /// existing file first. Callers hold the scan gate.
    fn writable_store(&self, fresh: bool) -> Result<Arc<Db>> {
        let mut slot = self
            .db
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if fresh {
            *slot = None;
            let db = Arc::new(Db::create_fresh(&self.db_path)?);
            *slot = Some(db.clone());
            return Ok(db);
        }
        if let Some(db) = slot.as_ref() {
            if db.db_path().is_file() {
                return Ok(db.clone());
            }
        }
        let db = Arc::new(Db::create(&self.db_path)?);
        *slot = Some(db.clone());
        Ok(db)
    }

    fn with_reader<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&crate::db::StoreReader<'_>) -> Result<T>,
    ) -> Result<T> {
        let started = Instant::now();
        let db = self.store()?;
        let out = db.read(f);
        debug!("{operation} took {}ms", started.elapsed().as_millis());
        out
    }

    pub fn list_projects(&self) -> Result<Listing<ProjectSummary>> {
        let cap = self.limits.list_limit;
        let db = self.store()?;
        self.cache
            .get_or_compute(CacheKey::new("list_projects").arg(cap), || {
                let items = db.read(|reader| reader.project_summaries(cap))?;
                Ok(Listing { items, cap })
            })
    }

    pub fn search_types(
        &self,
        query: &str,
        project: Option<&str>,
        kind: Option<TypeKind>,
    ) -> Result<Listing<TypeRef>> {
        let cap = self.limits.search_limit;
        let query = query.trim();
        let db = self.store()?;
        let key = CacheKey::new("search_types")
            .arg(query)
            .opt_arg(project)
            .opt_arg(kind)
            .arg(cap);
        self.cache.get_or_compute(key, || {
            let items = db.read(|reader| reader.search_types(query, project, kind, cap))?;
            Ok(Listing { items, cap })
        })
    }

    pub fn find_implementations(
        &self,
        interface: &str,
        project: Option<&str>,
    ) -> Result<Listing<TypeRef>> {
        let cap = self.limits.list_limit;
        let interface = interface.trim();
        let db = self.store()?;
        let key = CacheKey::new("find_implementations")
            .arg(interface)
            .opt_arg(project)
            .arg(cap);
        self.cache.get_or_compute(key, || {
            let items = db.read(|reader| reader.implementations(interface, project, cap))?;
            Ok(Listing { items, cap })
        })
    }

    /// Every type with this name, fully expanded. Empty when none match.
    pub fn describe_type(&self, name: &str) -> Result<Vec<TypeDetail>> {
        self.with_reader("describe_type", |reader| reader.type_details(name.trim()))
    }

    pub fn list_endpoints(
        &self,
        project: Option<&str>,
        query: Option<&str>,
    ) -> Result<Listing<EndpointRecord>> {
        let cap = self.limits.list_limit;
        let items = self.with_reader("list_endpoints", |reader| {
            reader.endpoints(project, query, cap)
        })?;
        Ok(Listing { items, cap })
    }

    pub fn search_config(
        &self,
        query: &str,
        project: Option<&str>,
    ) -> Result<Listing<ConfigEntryRecord>> {
        let cap = self.limits.list_limit;
        let items = self.with_reader("search_config", |reader| {
            reader.config_entries(query.trim(), project, cap)
        })?;
        Ok(Listing { items, cap })
    }

    pub fn project_dependencies(&self, project: &str) -> Result<Option<ProjectDependencies>> {
        self.with_reader("project_dependencies", |reader| {
            graph::project_dependencies(reader, project.trim())
        })
    }

    pub fn version_mismatches(&self, package: Option<&str>) -> Result<Vec<VersionMismatch>> {
        self.with_reader("version_mismatches", |reader| {
            graph::version_mismatches(reader, package)
        })
    }

    pub fn overview(&self) -> Result<IndexOverview> {
        self.with_reader("overview", |reader| reader.overview())
    }

    /// `depth` defaults to, and is capped at, the configured maximum.
    pub fn trace_flow(&self, type_name: &str, depth: Option<usize>) -> Result<TraceFlowResult> {
        let max = self.limits.max_flow_depth;
        let depth = depth.unwrap_or(max).clamp(1, max);
        self.with_reader("trace_flow", |reader| {
            graph::trace_flow(reader, type_name.trim(), depth)
        })
    }

    pub fn analyze_impact(&self, type_name: &str) -> Result<ImpactOutcome> {
        self.with_reader("analyze_impact", |reader| {
            graph::analyze_impact(reader, type_name)
        })
    }

    pub fn detect_patterns(&self, project: Option<&str>) -> Result<PatternReport> {
        let settings = PatternSettings {
            high_coupling_threshold: self.limits.high_coupling_threshold,
        };
        self.with_reader("detect_patterns", |reader| {
            graph::detect_patterns(reader, project, &settings)
        })
    }

    /// Runs one scan. A second caller blocks until the first finishes.
    pub fn scan(&self, mode: ScanMode, cancel: &CancelToken) -> Result<ScanSummary> {
        let _gate = self
            .scan_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.scan_locked(mode, cancel)
    }

    fn scan_locked(&self, mode: ScanMode, cancel: &CancelToken) -> Result<ScanSummary> {
        let db = self.writable_store(mode == ScanMode::Rebuild)?;
        let indexer = Indexer::new(
            self.root.clone(),
            self.extractor.clone(),
            self.vcs.clone(),
            self.limits.scan_workers,
        );
        let result = indexer.run(&db, mode, cancel);
        // committed projects are visible even when the run stopped early
        self.cache.invalidate_all();
        result
    }

    /// Forces one repository to rescan: its fingerprint is cleared and an
    /// incremental scan runs, so every other unchanged project is skipped.
    pub fn rescan_project(&self, name: &str, cancel: &CancelToken) -> Result<ScanSummary> {
        let name = name.trim();
        if name.is_empty() || !self.root.join(name).is_dir() {
            bail!("no repository named {name:?} under {}", self.root.display());
        }
        let _gate = self
            .scan_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let db = self.writable_store(false)?;
        if db.clear_fingerprint(name)? {
            debug!("{name}: fingerprint cleared");
        }
        self.scan_locked(ScanMode::Incremental, cancel)
    }

    /// Removes a project and its fingerprint. Returns whether anything was
    /// indexed under that name.
    pub fn forget_project(&self, name: &str) -> Result<bool> {
        let _gate = self
            .scan_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let db = self.store()?;
        let removed = db.forget_project(name.trim())?;
        if removed {
            info!("{}: removed from the index", name.trim());
            self.cache.invalidate_all();
        }
        Ok(removed)
    }

    pub fn fetch(&self, options: &FetchOptions, cancel: &CancelToken) -> Result<FetchReport> {
        let fetch = fetch_all(&self.root, self.vcs.as_ref(), options, cancel)?;
        let scan = if options.rescan && fetch.any_updated() && !cancel.is_cancelled() {
            info!("{} repositories updated, rescanning", fetch.updated);
            Some(self.scan(ScanMode::Incremental, cancel)?)
        } else {
            None
        };
        Ok(FetchReport { fetch, scan })
    }

    /// Branch and working-tree state of every repository under the root.
    pub fn repo_status(&self) -> Result<Vec<RepoStatusRow>> {
        let mut rows = Vec::new();
        for dir in discover_projects(&self.root)?
            .into_iter()
            .filter(|dir| dir.is_repo)
        {
            let branch = self.vcs.current_branch(&dir.path);
            let status = self.vcs.status(&dir.path);
            let error = match (&branch, &status) {
                (Err(err), _) | (_, Err(err)) => Some(format!("{err:#}")),
                _ => None,
            };
            rows.push(RepoStatusRow {
                repository: dir.name,
                branch: branch.unwrap_or(BranchState::Unknown),
                status: status.ok(),
                error,
            });
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workspace(temp: &TempDir) -> Workspace {
        Workspace::builder(temp.path().to_path_buf())
            .limits(Limits::from_config(&Config::default()))
            .build()
    }

    #[test]
    fn test_reads_without_index_are_unavailable() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let errors = [
            ws.list_projects().map(|_| ()).unwrap_err(),
            ws.search_types("Cache", None, None).map(|_| ()).unwrap_err(),
            ws.trace_flow("ICache", None).map(|_| ()).unwrap_err(),
            ws.analyze_impact("ICache").map(|_| ()).unwrap_err(),
            ws.overview().map(|_| ()).unwrap_err(),
            ws.forget_project("acme").map(|_| ()).unwrap_err(),
        ];
        for err in errors {
            assert!(matches!(
                IndexError::find(&err),
                Some(IndexError::Unavailable { .. })
            ));
        }
        assert!(!ws.db_path().exists());
    }

    #[test]
    fn test_scan_of_empty_root_creates_index() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let summary = ws.scan(ScanMode::Full, &CancelToken::new()).unwrap();
        assert!(summary.success);
        assert_eq!(summary.scanned, 0);
        assert_eq!(summary.failed, 0);
        assert!(ws.db_path().starts_with(temp.path().join("memory")));
        assert!(ws.list_projects().unwrap().is_empty());
        assert_eq!(ws.overview().unwrap().projects, 0);
    }

    #[test]
    fn test_rescan_rejects_unknown_repository() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("acme.core")).unwrap();
        let ws = workspace(&temp);
        assert!(ws.rescan_project("acme.missing", &CancelToken::new()).is_err());
    }

    #[test]
    fn test_listing_truncation_flag() {
        let full = Listing {
            items: vec![1, 2],
            cap: 2,
        };
        let partial = Listing {
            items: vec![1],
            cap: 2,
        };
        assert!(full.truncated());
        assert!(!partial.truncated());
    }
}
