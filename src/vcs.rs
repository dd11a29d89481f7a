//! Version-control access through the `git` executable.
//!
//! Expected repository conditions (detached head, no upstream, rejected
//! pulls) come back as values. Only failing to run `git` at all is an error.

use crate::util::strip_url_credentials;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::process::{Command, Output};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "name", rename_all = "snake_case")]
pub enum BranchState {
    Named(String),
    Detached,
    Unknown,
}

impl BranchState {
    pub fn name(&self) -> Option<&str> {
        match self {
            BranchState::Named(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoStatus {
    /// Uncommitted changes in the working tree or index.
    pub dirty: bool,
    pub ahead: u32,
    pub behind: u32,
    pub has_upstream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum PullOutcome {
    UpToDate,
    Updated,
    Failed(String),
}

pub trait VersionControl: Send + Sync {
    fn current_branch(&self, repo: &Path) -> Result<BranchState>;
    fn status(&self, repo: &Path) -> Result<RepoStatus>;
    fn fetch_and_pull(&self, repo: &Path) -> Result<PullOutcome>;
    /// `origin` URL with any embedded credentials removed.
    fn remote_url(&self, repo: &Path) -> Result<Option<String>>;
    fn default_branch(&self, repo: &Path) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Default)]
pub struct GitClient;

impl GitClient {
    fn run(&self, repo: &Path, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .with_context(|| format!("run git {} in {}", args.join(" "), repo.display()))
    }

    /// Trimmed stdout of a successful command, `None` on a non-zero exit.
    fn stdout(&self, repo: &Path, args: &[&str]) -> Result<Option<String>> {
        let output = self.run(repo, args)?;
        if !output.status.success() {
            debug!(
                "git {} failed in {}: {}",
                args.join(" "),
                repo.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(text))
    }

    fn head_sha(&self, repo: &Path) -> Result<Option<String>> {
        self.stdout(repo, &["rev-parse", "HEAD"])
    }
}

impl VersionControl for GitClient {
    fn current_branch(&self, repo: &Path) -> Result<BranchState> {
        match self.stdout(repo, &["rev-parse", "--abbrev-ref", "HEAD"])? {
            Some(name) if name == "HEAD" => Ok(BranchState::Detached),
            Some(name) if !name.is_empty() => Ok(BranchState::Named(name)),
            _ => Ok(BranchState::Unknown),
        }
    }

    fn status(&self, repo: &Path) -> Result<RepoStatus> {
        let mut status = RepoStatus::default();
        if let Some(porcelain) = self.stdout(repo, &["status", "--porcelain"])? {
            status.dirty = !porcelain.is_empty();
        }
        let counts = self.stdout(
            repo,
            &["rev-list", "--left-right", "--count", "HEAD...@{upstream}"],
        )?;
        if let Some((ahead, behind)) = counts.as_deref().and_then(parse_ahead_behind) {
            status.has_upstream = true;
            status.ahead = ahead;
            status.behind = behind;
        }
        Ok(status)
    }

    fn fetch_and_pull(&self, repo: &Path) -> Result<PullOutcome> {
        let fetch = self.run(repo, &["fetch", "--prune", "--quiet"])?;
        if !fetch.status.success() {
            return Ok(PullOutcome::Failed(failure_text("fetch", &fetch)));
        }
        let before = self.head_sha(repo)?;
        let pull = self.run(repo, &["pull", "--ff-only", "--quiet"])?;
        if !pull.status.success() {
            return Ok(PullOutcome::Failed(failure_text("pull", &pull)));
        }
        let after = self.head_sha(repo)?;
        if before == after {
            Ok(PullOutcome::UpToDate)
        } else {
            Ok(PullOutcome::Updated)
        }
    }

    fn remote_url(&self, repo: &Path) -> Result<Option<String>> {
        Ok(self
            .stdout(repo, &["config", "--get", "remote.origin.url"])?
            .filter(|url| !url.is_empty())
            .map(|url| strip_url_credentials(&url)))
    }

    fn default_branch(&self, repo: &Path) -> Result<Option<String>> {
        let head = self.stdout(
            repo,
            &["symbolic-ref", "--quiet", "--short", "refs/remotes/origin/HEAD"],
        )?;
        Ok(head
            .map(|name| name.strip_prefix("origin/").unwrap_or(&name).to_string())
            .filter(|name| !name.is_empty()))
    }
}

/// Parses `rev-list --left-right --count` output: `<ahead>\t<behind>`.
fn parse_ahead_behind(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    Some((ahead, behind))
}

fn failure_text(step: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let first = stderr.lines().map(str::trim).find(|line| !line.is_empty());
    match first {
        Some(line) => format!("{step} failed: {line}"),
        None => format!("{step} failed with {}", output.status),
    }
}
