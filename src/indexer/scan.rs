use crate::util::{is_hidden_name, normalize_rel_path};
use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;

/// Directory names never enumerated inside a project.
const EXCLUDED_DIRS: &[&str] = &[".git", "bin", "obj", "node_modules", "packages"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Source,
    Descriptor,
    Solution,
    Config,
}

#[derive(Debug, Clone)]
pub struct ProjectFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    /// Nanoseconds since the epoch.
    pub modified: u128,
    pub kind: FileKind,
}

/// A top-level directory under the scanned root.
#[derive(Debug, Clone)]
pub struct DiscoveredDir {
    pub name: String,
    pub path: PathBuf,
    pub is_repo: bool,
}

/// Lists the non-hidden directories directly under `root`, sorted by name.
pub fn discover_projects(root: &Path) -> Result<Vec<DiscoveredDir>> {
    let mut dirs = Vec::new();
    let entries = fs::read_dir(root).with_context(|| format!("read dir {}", root.display()))?;
    for entry in entries {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                warn!("read dir error under {}: {err}", root.display());
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if is_hidden_name(&name) {
            continue;
        }
        let path = entry.path();
        let is_repo = path.join(".git").exists();
        dirs.push(DiscoveredDir { name, path, is_repo });
    }
    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(dirs)
}

pub fn file_kind(path: &Path) -> Option<FileKind> {
    let file_name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    let extension = path.extension()?.to_string_lossy().to_ascii_lowercase();
    match extension.as_str() {
        "cs" => Some(FileKind::Source),
        "csproj" | "props" | "targets" => Some(FileKind::Descriptor),
        "sln" | "slnx" => Some(FileKind::Solution),
        "json" if file_name.starts_with("appsettings") => Some(FileKind::Config),
        _ => None,
    }
}

/// Enumerates source, descriptor, solution and config files of one project.
/// Sorted by relative path.
pub fn scan_project_files(project_root: &Path) -> Result<Vec<ProjectFile>> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(project_root)
        .ignore(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .parents(false)
        .require_git(false)
        .hidden(true)
        .filter_entry(|entry| !is_excluded_entry(entry))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                warn!("walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let Some(kind) = file_kind(path) else {
            continue;
        };
        let rel_path = normalize_rel_path(project_root, path)?;
        let metadata = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        files.push(ProjectFile {
            rel_path,
            abs_path: path.to_path_buf(),
            size: metadata.len(),
            modified,
            kind,
        });
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

fn is_excluded_entry(entry: &ignore::DirEntry) -> bool {
    let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
    is_dir
        && EXCLUDED_DIRS
            .iter()
            .any(|name| entry.file_name().eq_ignore_ascii_case(OsStr::new(name)))
}
