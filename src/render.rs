//! Text rendering for query results and the structured result envelope.
//!
//! Renderers only format; every number they print was computed upstream.

use crate::fetch::{FetchStatus, FetchSummary};
use crate::graph::{
    ImpactOutcome, MismatchSeverity, PatternReport, ProjectDependencies, ProjectHop, TraceFlowResult,
    VersionMismatch,
};
use crate::indexer::{ProjectState, ScanMode, ScanSummary};
use crate::model::{
    ConfigEntryRecord, EndpointRecord, IndexOverview, ProjectSummary, TypeDetail, TypeRef,
};
use crate::util::now_secs;
use crate::workspace::{FetchReport, Listing, RepoStatusRow};
use anyhow::Result;
use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct QueryEnvelope {
    pub content: String,
    pub result_count: usize,
    /// The row cap was reached, so more rows may exist.
    pub truncated: bool,
    pub query_ms: u64,
}

impl QueryEnvelope {
    pub fn new(content: String, result_count: usize, cap: Option<usize>, elapsed: Duration) -> Self {
        Self {
            content,
            result_count,
            truncated: cap.is_some_and(|cap| result_count == cap),
            query_ms: elapsed.as_millis() as u64,
        }
    }
}

fn age(timestamp: i64) -> String {
    let secs = (now_secs() - timestamp).max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn truncation_note<T>(out: &mut String, listing: &Listing<T>) -> Result<()> {
    if listing.truncated() {
        writeln!(out, "(showing first {}; narrow the query for more)", listing.cap)?;
    }
    Ok(())
}

fn type_line(t: &TypeRef) -> String {
    format!(
        "{} {} {}.{} [{}] {}",
        t.visibility.as_str(),
        t.kind,
        t.namespace,
        t.name,
        t.project,
        t.file_path
    )
}

pub fn projects(listing: &Listing<ProjectSummary>) -> Result<String> {
    if listing.is_empty() {
        return Ok("No projects indexed.".to_string());
    }
    let mut out = String::new();
    writeln!(out, "{} project(s)", listing.len())?;
    for p in &listing.items {
        writeln!(
            out,
            "- {}: {} assemblies, {} types, scanned {}",
            p.name,
            p.assembly_count,
            p.type_count,
            age(p.scanned_at)
        )?;
        if let Some(remote) = &p.remote_url {
            let branch = p.default_branch.as_deref().unwrap_or("?");
            writeln!(out, "  {remote} ({branch})")?;
        }
    }
    truncation_note(&mut out, listing)?;
    Ok(out)
}

pub fn types(listing: &Listing<TypeRef>, heading: &str) -> Result<String> {
    if listing.is_empty() {
        return Ok(format!("No matches for {heading}."));
    }
    let mut out = String::new();
    writeln!(out, "{} match(es) for {heading}", listing.len())?;
    for t in &listing.items {
        writeln!(out, "- {}", type_line(t))?;
    }
    truncation_note(&mut out, listing)?;
    Ok(out)
}

pub fn type_details(name: &str, details: &[TypeDetail]) -> Result<String> {
    if details.is_empty() {
        return Ok(format!("Type {name} not found."));
    }
    let mut out = String::new();
    for detail in details {
        writeln!(out, "{}", type_line(&detail.type_ref))?;
        if let Some(summary) = &detail.summary {
            writeln!(out, "  /// {summary}")?;
        }
        if let Some(base) = &detail.base_type {
            writeln!(out, "  base: {base}")?;
        }
        if !detail.implements.is_empty() {
            writeln!(out, "  implements: {}", detail.implements.join(", "))?;
        }
        if !detail.injects.is_empty() {
            writeln!(out, "  injects: {}", detail.injects.join(", "))?;
        }
        for method in &detail.methods {
            let params: Vec<String> = method
                .parameters
                .iter()
                .map(|p| format!("{} {}", p.type_name, p.name))
                .collect();
            let modifier = if method.is_static { "static " } else { "" };
            writeln!(
                out,
                "  {modifier}{} {}({})",
                method.return_type,
                method.name,
                params.join(", ")
            )?;
            for endpoint in &method.endpoints {
                writeln!(out, "    {} {}", endpoint.verb, endpoint.route)?;
            }
        }
    }
    Ok(out)
}

pub fn endpoints(listing: &Listing<EndpointRecord>) -> Result<String> {
    if listing.is_empty() {
        return Ok("No endpoints found.".to_string());
    }
    let mut out = String::new();
    for e in &listing.items {
        writeln!(
            out,
            "- [{}] {} {} -> {}.{} ({})",
            e.kind.as_str(),
            e.verb,
            e.route,
            e.type_name,
            e.method_name,
            e.project
        )?;
    }
    truncation_note(&mut out, listing)?;
    Ok(out)
}

pub fn config_entries(listing: &Listing<ConfigEntryRecord>) -> Result<String> {
    if listing.is_empty() {
        return Ok("No configuration keys found.".to_string());
    }
    let mut out = String::new();
    for c in &listing.items {
        let default = c
            .default_value
            .as_deref()
            .map(|value| format!(" = {value}"))
            .unwrap_or_default();
        writeln!(
            out,
            "- {}{default} [{} {}] {}",
            c.key,
            c.project,
            c.source.as_str(),
            c.file_path
        )?;
    }
    truncation_note(&mut out, listing)?;
    Ok(out)
}

pub fn trace_flow(result: &TraceFlowResult) -> Result<String> {
    if result.no_connections {
        return Ok(format!(
            "{}: no connections (nothing implements or injects it).",
            result.root
        ));
    }
    let mut out = String::new();
    writeln!(
        out,
        "Flow from {} (depth {}, {} nodes)",
        result.root,
        result.max_depth,
        result.visited.len()
    )?;
    for edge in &result.edges {
        writeln!(
            out,
            "{}{} {} {} [{}]",
            "  ".repeat(edge.depth),
            edge.to,
            edge.relation,
            edge.from,
            edge.project
        )?;
    }
    Ok(out)
}

fn hops(out: &mut String, heading: &str, hops: &[ProjectHop]) -> Result<()> {
    writeln!(out, "{heading}: {}", hops.len())?;
    for hop in hops {
        writeln!(
            out,
            "  - {} (depth {}, via {} from {})",
            hop.project, hop.depth, hop.via_package, hop.via_project
        )?;
    }
    Ok(())
}

pub fn impact(outcome: &ImpactOutcome) -> Result<String> {
    let report = match outcome {
        ImpactOutcome::NotFound { type_name } => {
            return Ok(format!("Type {type_name} not found among public types."));
        }
        ImpactOutcome::Report(report) => report,
    };
    let mut out = String::new();
    writeln!(out, "Impact of changing {}", report.type_name)?;
    writeln!(out, "Declared in: {}", report.home_projects.join(", "))?;
    writeln!(out, "Direct references: {}", report.direct_reference_count)?;
    for reference in &report.direct_references {
        writeln!(
            out,
            "  - {} {} [{}]",
            reference.type_ref.name, reference.relation, reference.type_ref.project
        )?;
    }
    writeln!(
        out,
        "Directly touched projects: {} ({})",
        report.direct_project_count,
        report.direct_projects.join(", ")
    )?;
    hops(&mut out, "Transitive projects", &report.transitive_projects)?;
    writeln!(out, "Total blast radius: {}", report.total_blast_radius)?;
    Ok(out)
}

pub fn dependencies(project: &str, deps: Option<&ProjectDependencies>) -> Result<String> {
    let Some(deps) = deps else {
        return Ok(format!("Project {project} not found."));
    };
    let mut out = String::new();
    writeln!(out, "{}", deps.project)?;
    hops(&mut out, "Depends on", &deps.dependencies)?;
    hops(&mut out, "Depended on by", &deps.dependents)?;
    Ok(out)
}

pub fn patterns(report: &PatternReport) -> Result<String> {
    if report.is_empty() {
        return Ok("No patterns detected.".to_string());
    }
    let mut out = String::new();
    for finding in &report.findings {
        let marker = if finding.kind.is_warning() { "!" } else { "-" };
        let project = finding
            .project
            .as_deref()
            .map(|p| format!(" [{p}]"))
            .unwrap_or_default();
        writeln!(
            out,
            "{marker} {}: {}{project}: {}",
            finding.kind.label(),
            finding.subject,
            finding.detail
        )?;
        if finding.types.len() > 1 {
            writeln!(out, "    {}", finding.types.join(", "))?;
        }
    }
    Ok(out)
}

pub fn version_mismatches(mismatches: &[VersionMismatch]) -> Result<String> {
    if mismatches.is_empty() {
        return Ok("No version mismatches.".to_string());
    }
    let mut out = String::new();
    for mismatch in mismatches {
        let internal = if mismatch.is_internal { " (internal)" } else { "" };
        let severity = match mismatch.severity {
            MismatchSeverity::Major => "MAJOR",
            MismatchSeverity::Minor => "MINOR",
        };
        writeln!(out, "{severity} {}{internal}", mismatch.package)?;
        for usage in &mismatch.versions {
            writeln!(out, "  {}: {}", usage.version, usage.projects.join(", "))?;
        }
    }
    Ok(out)
}

pub fn overview(overview: &IndexOverview) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "projects:        {}", overview.projects)?;
    writeln!(out, "assemblies:      {}", overview.assemblies)?;
    writeln!(
        out,
        "packages:        {} ({} internal)",
        overview.package_references, overview.internal_package_references
    )?;
    writeln!(out, "types:           {}", overview.types)?;
    writeln!(out, "methods:         {}", overview.methods)?;
    writeln!(out, "endpoints:       {}", overview.endpoints)?;
    writeln!(out, "config keys:     {}", overview.config_entries)?;
    let last = overview.last_scan.map(age).unwrap_or_else(|| "never".to_string());
    writeln!(out, "last scan:       {last}")?;
    Ok(out)
}

pub fn scan_summary(summary: &ScanSummary) -> Result<String> {
    let mut out = String::new();
    writeln!(
        out,
        "{} scan {}: {} scanned, {} unchanged, {} failed, {} types in {}ms",
        match summary.mode {
            ScanMode::Full => "full",
            ScanMode::Incremental => "incremental",
            ScanMode::Rebuild => "rebuild",
        },
        if summary.cancelled { "cancelled" } else { "finished" },
        summary.scanned,
        summary.skipped_unchanged,
        summary.failed,
        summary.types_indexed,
        summary.duration_ms
    )?;
    if summary.not_started > 0 {
        writeln!(out, "not started: {}", summary.not_started)?;
    }
    for failure in &summary.failures {
        writeln!(out, "failed {}: {}", failure.project, failure.message)?;
    }
    for outcome in &summary.outcomes {
        if outcome.state == ProjectState::Scanned && !outcome.warnings.is_empty() {
            writeln!(
                out,
                "{}: {} warning(s)",
                outcome.project,
                outcome.warnings.len()
            )?;
        }
    }
    if !summary.stale_projects.is_empty() {
        writeln!(
            out,
            "stale (directory gone, still indexed): {}",
            summary.stale_projects.join(", ")
        )?;
    }
    Ok(out)
}

fn fetch_summary(out: &mut String, summary: &FetchSummary) -> Result<()> {
    for result in &summary.results {
        let status = match &result.status {
            FetchStatus::Skipped { branch } => format!("skipped, on non-default branch {branch}"),
            FetchStatus::UpToDate => "up to date".to_string(),
            FetchStatus::Updated => "updated".to_string(),
            FetchStatus::Error { message } => format!("error: {message}"),
            FetchStatus::NotStarted => "not started".to_string(),
        };
        writeln!(out, "- {}: {status}", result.repository)?;
    }
    writeln!(
        out,
        "{} updated, {} up to date, {} skipped, {} errors",
        summary.updated, summary.up_to_date, summary.skipped, summary.errors
    )?;
    Ok(())
}

pub fn fetch_report(report: &FetchReport) -> Result<String> {
    let mut out = String::new();
    fetch_summary(&mut out, &report.fetch)?;
    if let Some(scan) = &report.scan {
        out.push_str(&scan_summary(scan)?);
    }
    Ok(out)
}

pub fn repo_status(rows: &[RepoStatusRow]) -> Result<String> {
    if rows.is_empty() {
        return Ok("No repositories found.".to_string());
    }
    let mut out = String::new();
    for row in rows {
        let branch = row.branch.name().unwrap_or("(detached)");
        match (&row.status, &row.error) {
            (_, Some(error)) => writeln!(out, "- {}: {branch}, error: {error}", row.repository)?,
            (Some(status), None) => {
                let dirty = if status.dirty { ", dirty" } else { "" };
                let tracking = if status.has_upstream {
                    format!(", +{} -{}", status.ahead, status.behind)
                } else {
                    ", no upstream".to_string()
                };
                writeln!(out, "- {}: {branch}{dirty}{tracking}", row.repository)?;
            }
            (None, None) => writeln!(out, "- {}: {branch}", row.repository)?,
        }
    }
    Ok(out)
}
