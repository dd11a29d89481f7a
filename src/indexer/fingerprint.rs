//! Content fingerprints that decide whether a project must be rescanned.
//!
//! The hash covers `(relative path, mtime, length)` of every source, descriptor
//! and config file. Touching a file without editing it changes the mtime and
//! therefore the fingerprint; a spurious rescan is preferred over a missed
//! change.

use super::scan::{ProjectFile, scan_project_files};
use anyhow::Result;
use blake3::Hasher;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanReason {
    IncrementalOff,
    NoPriorFingerprint,
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    Scan(ScanReason),
    SkipUnchanged,
}

pub fn compute_fingerprint(project_root: &Path) -> Result<String> {
    let files = scan_project_files(project_root)?;
    Ok(fingerprint_files(&files))
}

pub fn fingerprint_files(files: &[ProjectFile]) -> String {
    let mut ordered: Vec<&ProjectFile> = files.iter().collect();
    ordered.sort_by(|a, b| {
        a.rel_path
            .to_lowercase()
            .cmp(&b.rel_path.to_lowercase())
            .then_with(|| a.rel_path.cmp(&b.rel_path))
    });

    let mut hasher = Hasher::new();
    for file in ordered {
        hasher.update(file.rel_path.as_bytes());
        hasher.update(b"\0");
        hasher.update(file.modified.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(file.size.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

pub fn decide(incremental: bool, previous: Option<&str>, current: &str) -> ScanDecision {
    if !incremental {
        return ScanDecision::Scan(ScanReason::IncrementalOff);
    }
    match previous {
        None => ScanDecision::Scan(ScanReason::NoPriorFingerprint),
        Some(prev) if prev != current => ScanDecision::Scan(ScanReason::Changed),
        Some(_) => ScanDecision::SkipUnchanged,
    }
}
