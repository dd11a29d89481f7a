#![allow(dead_code)]

use anyhow::Result;
use reposcope::Workspace;
use reposcope::cache::QueryCache;
use reposcope::config::Config;
use reposcope::vcs::{BranchState, PullOutcome, RepoStatus, VersionControl};
use reposcope::workspace::Limits;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Version control that never touches `git`: every repository is on `main`,
/// clean and up to date.
pub struct QuietVcs;

impl VersionControl for QuietVcs {
    fn current_branch(&self, _repo: &Path) -> Result<BranchState> {
        Ok(BranchState::Named("main".to_string()))
    }

    fn status(&self, _repo: &Path) -> Result<RepoStatus> {
        Ok(RepoStatus::default())
    }

    fn fetch_and_pull(&self, _repo: &Path) -> Result<PullOutcome> {
        Ok(PullOutcome::UpToDate)
    }

    fn remote_url(&self, _repo: &Path) -> Result<Option<String>> {
        Ok(None)
    }

    fn default_branch(&self, _repo: &Path) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A temporary root holding one directory per repository.
pub struct Corpus {
    dir: TempDir,
}

impl Corpus {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp root"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Creates `name` with a `.git` marker so it counts as a repository.
    pub fn repo(&self, name: &str) -> PathBuf {
        let path = self.root().join(name);
        fs::create_dir_all(path.join(".git")).expect("create repo");
        path
    }

    pub fn write(&self, repo: &str, rel: &str, content: &str) {
        let path = self.root().join(repo).join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    pub fn remove(&self, repo: &str, rel: &str) {
        fs::remove_file(self.root().join(repo).join(rel)).expect("remove file");
    }

    pub fn workspace(&self) -> Workspace {
        self.workspace_with(Arc::new(QuietVcs), default_limits())
    }

    pub fn workspace_with(&self, vcs: Arc<dyn VersionControl>, limits: Limits) -> Workspace {
        Workspace::builder(self.root().to_path_buf())
            .vcs(vcs)
            .limits(limits)
            .cache(QueryCache::new())
            .build()
    }
}

pub fn default_limits() -> Limits {
    Limits::from_config(&Config::default())
}

/// A minimal SDK-style project file.
pub fn csproj(packages: &[(&str, &str)]) -> String {
    let mut items = String::new();
    for (name, version) in packages {
        items.push_str(&format!(
            "    <PackageReference Include=\"{name}\" Version=\"{version}\" />\n"
        ));
    }
    format!(
        "<Project Sdk=\"Microsoft.NET.Sdk\">\n  <PropertyGroup>\n    <TargetFramework>net8.0</TargetFramework>\n  </PropertyGroup>\n  <ItemGroup>\n{items}  </ItemGroup>\n</Project>\n"
    )
}
