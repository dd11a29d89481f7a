//! JSONL request/response protocol over stdin/stdout, and the one method
//! dispatcher shared by the server and the CLI.

use crate::error::user_message;
use crate::fetch::FetchOptions;
use crate::indexer::{CancelToken, ScanMode};
use crate::model::TypeKind;
use crate::render::{self, QueryEnvelope};
use crate::workspace::{Listing, Workspace};
use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Rendered text only.
    Text,
    /// The structured result.
    #[default]
    Json,
    /// `{content, result_count, truncated, query_ms}`.
    Envelope,
}

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcResponse {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    message: String,
}

const METHODS: &[(&str, &str)] = &[
    ("help", "list methods"),
    ("list_projects", "indexed projects"),
    ("search_types", "query, project?, kind?"),
    ("find_implementations", "interface, project?"),
    ("describe_type", "name"),
    ("list_endpoints", "project?, query?"),
    ("search_config", "query, project?"),
    ("project_dependencies", "project"),
    ("version_mismatches", "package?"),
    ("overview", "row counts and last scan time"),
    ("trace_flow", "type_name, depth?"),
    ("analyze_impact", "type_name"),
    ("detect_patterns", "project?"),
    ("scan", "mode? (full|incremental|rebuild)"),
    ("rescan_project", "project"),
    ("forget_project", "project"),
    ("fetch", "concurrency?, branches?, rescan?"),
    ("repo_status", "branch and status of every repository"),
    ("cache_stats", "query cache counters"),
];

#[derive(Deserialize, Default)]
struct FormatParam {
    #[serde(default)]
    format: Option<Format>,
}

#[derive(Deserialize)]
struct SearchTypesParams {
    #[serde(alias = "name")]
    query: String,
    project: Option<String>,
    kind: Option<String>,
}

#[derive(Deserialize)]
struct ImplementationsParams {
    interface: String,
    project: Option<String>,
}

#[derive(Deserialize)]
struct NameParams {
    #[serde(alias = "type_name")]
    name: String,
}

#[derive(Deserialize, Default)]
struct EndpointsParams {
    project: Option<String>,
    query: Option<String>,
}

#[derive(Deserialize)]
struct ConfigParams {
    query: String,
    project: Option<String>,
}

#[derive(Deserialize)]
struct ProjectParams {
    #[serde(alias = "name")]
    project: String,
}

#[derive(Deserialize, Default)]
struct ProjectFilterParams {
    project: Option<String>,
}

#[derive(Deserialize, Default)]
struct PackageParams {
    package: Option<String>,
}

#[derive(Deserialize)]
struct TraceFlowParams {
    #[serde(alias = "name")]
    type_name: String,
    depth: Option<usize>,
}

#[derive(Deserialize)]
struct ImpactParams {
    #[serde(alias = "name")]
    type_name: String,
}

#[derive(Deserialize, Default)]
struct ScanParams {
    mode: Option<String>,
}

#[derive(Deserialize, Default)]
struct FetchParams {
    concurrency: Option<usize>,
    branches: Option<Vec<String>>,
    #[serde(default)]
    rescan: bool,
}

/// A computed result plus what the envelope and text formats need.
struct Answer {
    data: Value,
    content: String,
    count: usize,
    cap: Option<usize>,
}

impl Answer {
    fn new(data: impl Serialize, content: String, count: usize) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_value(data)?,
            content,
            count,
            cap: None,
        })
    }

    fn listing<T: Serialize>(listing: &Listing<T>, content: String) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_value(&listing.items)?,
            content,
            count: listing.len(),
            cap: Some(listing.cap),
        })
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).context("invalid params")
}

fn parse_kind(raw: Option<&str>) -> Result<Option<TypeKind>> {
    raw.map(|raw| {
        TypeKind::parse(&raw.trim().to_lowercase())
            .ok_or_else(|| anyhow!("unknown type kind {raw:?}"))
    })
    .transpose()
}

fn parse_mode(raw: Option<&str>) -> Result<ScanMode> {
    match raw.map(str::trim) {
        None | Some("incremental") => Ok(ScanMode::Incremental),
        Some("full") => Ok(ScanMode::Full),
        Some("rebuild") => Ok(ScanMode::Rebuild),
        Some(other) => Err(anyhow!("unknown scan mode {other:?}")),
    }
}

/// Runs one method. `params.format` picks the output shape; JSON when absent.
pub fn handle_method(workspace: &Workspace, method: &str, params: Value) -> Result<Value> {
    let started = Instant::now();
    let format = serde_json::from_value::<FormatParam>(params.clone())
        .unwrap_or_default()
        .format
        .unwrap_or_default();
    let answer = dispatch(workspace, method, params)?;
    let elapsed = started.elapsed();
    debug!("{method} answered {} rows in {}ms", answer.count, elapsed.as_millis());
    Ok(match format {
        Format::Json => answer.data,
        Format::Text => Value::String(answer.content),
        Format::Envelope => serde_json::to_value(QueryEnvelope::new(
            answer.content,
            answer.count,
            answer.cap,
            elapsed,
        ))?,
    })
}

fn dispatch(ws: &Workspace, method: &str, params: Value) -> Result<Answer> {
    match method {
        "help" => {
            let lines: Vec<String> = METHODS
                .iter()
                .map(|(name, args)| format!("{name}: {args}"))
                .collect();
            let methods: Vec<Value> = METHODS
                .iter()
                .map(|(name, args)| json!({ "method": name, "params": args }))
                .collect();
            Answer::new(methods, lines.join("\n"), METHODS.len())
        }
        "list_projects" => {
            let listing = ws.list_projects()?;
            Answer::listing(&listing, render::projects(&listing)?)
        }
        "search_types" => {
            let p: SearchTypesParams = parse_params(params)?;
            let kind = parse_kind(p.kind.as_deref())?;
            let listing = ws.search_types(&p.query, p.project.as_deref(), kind)?;
            Answer::listing(&listing, render::types(&listing, &p.query)?)
        }
        "find_implementations" => {
            let p: ImplementationsParams = parse_params(params)?;
            let listing = ws.find_implementations(&p.interface, p.project.as_deref())?;
            let heading = format!("implementations of {}", p.interface);
            Answer::listing(&listing, render::types(&listing, &heading)?)
        }
        "describe_type" => {
            let p: NameParams = parse_params(params)?;
            let details = ws.describe_type(&p.name)?;
            let content = render::type_details(&p.name, &details)?;
            let count = details.len();
            Answer::new(details, content, count)
        }
        "list_endpoints" => {
            let p: EndpointsParams = parse_params(params)?;
            let listing = ws.list_endpoints(p.project.as_deref(), p.query.as_deref())?;
            Answer::listing(&listing, render::endpoints(&listing)?)
        }
        "search_config" => {
            let p: ConfigParams = parse_params(params)?;
            let listing = ws.search_config(&p.query, p.project.as_deref())?;
            Answer::listing(&listing, render::config_entries(&listing)?)
        }
        "project_dependencies" => {
            let p: ProjectParams = parse_params(params)?;
            let deps = ws.project_dependencies(&p.project)?;
            let content = render::dependencies(&p.project, deps.as_ref())?;
            let count = deps
                .as_ref()
                .map(|d| d.dependencies.len() + d.dependents.len())
                .unwrap_or(0);
            Answer::new(deps, content, count)
        }
        "version_mismatches" => {
            let p: PackageParams = parse_params(params)?;
            let mismatches = ws.version_mismatches(p.package.as_deref())?;
            let content = render::version_mismatches(&mismatches)?;
            let count = mismatches.len();
            Answer::new(mismatches, content, count)
        }
        "overview" => {
            let overview = ws.overview()?;
            let content = render::overview(&overview)?;
            Answer::new(overview, content, 1)
        }
        "trace_flow" => {
            let p: TraceFlowParams = parse_params(params)?;
            let result = ws.trace_flow(&p.type_name, p.depth)?;
            let content = render::trace_flow(&result)?;
            let count = result.edges.len();
            Answer::new(result, content, count)
        }
        "analyze_impact" => {
            let p: ImpactParams = parse_params(params)?;
            let outcome = ws.analyze_impact(&p.type_name)?;
            let content = render::impact(&outcome)?;
            let count = match &outcome {
                crate::graph::ImpactOutcome::Report(report) => report.direct_reference_count,
                crate::graph::ImpactOutcome::NotFound { .. } => 0,
            };
            Answer::new(outcome, content, count)
        }
        "detect_patterns" => {
            let p: ProjectFilterParams = parse_params(params)?;
            let report = ws.detect_patterns(p.project.as_deref())?;
            let content = render::patterns(&report)?;
            let count = report.findings.len();
            Answer::new(report, content, count)
        }
        "scan" => {
            let p: ScanParams = parse_params(params)?;
            let summary = ws.scan(parse_mode(p.mode.as_deref())?, &CancelToken::new())?;
            let content = render::scan_summary(&summary)?;
            let count = summary.scanned;
            Answer::new(summary, content, count)
        }
        "rescan_project" => {
            let p: ProjectParams = parse_params(params)?;
            let summary = ws.rescan_project(&p.project, &CancelToken::new())?;
            let content = render::scan_summary(&summary)?;
            let count = summary.scanned;
            Answer::new(summary, content, count)
        }
        "forget_project" => {
            let p: ProjectParams = parse_params(params)?;
            let removed = ws.forget_project(&p.project)?;
            let content = if removed {
                format!("{} removed from the index.", p.project)
            } else {
                format!("{} was not indexed.", p.project)
            };
            Answer::new(json!({ "project": p.project, "removed": removed }), content, removed as usize)
        }
        "fetch" => {
            let p: FetchParams = parse_params(params)?;
            let config = crate::config::Config::get();
            let options = FetchOptions {
                concurrency: p.concurrency.unwrap_or(config.fetch_concurrency).max(1),
                allowed_branches: p
                    .branches
                    .filter(|branches| !branches.is_empty())
                    .unwrap_or_else(|| config.allowed_branches.clone()),
                rescan: p.rescan,
            };
            let report = ws.fetch(&options, &CancelToken::new())?;
            let content = render::fetch_report(&report)?;
            let count = report.fetch.results.len();
            Answer::new(report, content, count)
        }
        "repo_status" => {
            let rows = ws.repo_status()?;
            let content = render::repo_status(&rows)?;
            let count = rows.len();
            Answer::new(rows, content, count)
        }
        "cache_stats" => {
            let stats = ws.cache_stats();
            let content = format!(
                "hits {}, misses {}, entries {}, generation {}",
                stats.hits, stats.misses, stats.entries, stats.generation
            );
            Answer::new(stats, content, 1)
        }
        other => Err(anyhow!("unknown method {other:?}; try \"help\"")),
    }
}

fn handle_request(workspace: &Workspace, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    match handle_method(workspace, &request.method, request.params) {
        Ok(value) => RpcResponse {
            id,
            result: Some(value),
            error: None,
        },
        Err(err) => {
            warn!("{} failed: {err:#}", request.method);
            error_response(id, &user_message(&err))
        }
    }
}

/// Serves requests line by line until stdin closes.
pub fn serve(workspace: &Workspace) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(value) => value,
            Err(err) => {
                warn!("stdin error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => handle_request(workspace, request),
            Err(err) => error_response(Value::Null, &format!("invalid request: {err}")),
        };

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    Ok(())
}

/// Runs one request and returns the response line.
pub fn call(workspace: &Workspace, method: String, params_raw: &str, id_raw: &str) -> Result<String> {
    let params: Value = serde_json::from_str(params_raw).with_context(|| "parse params JSON")?;
    let id = parse_value(id_raw);
    let response = handle_request(workspace, RpcRequest { id, method, params });
    Ok(serde_json::to_string(&response)?)
}

fn error_response(id: Value, message: &str) -> RpcResponse {
    RpcResponse {
        id,
        result: None,
        error: Some(RpcError {
            message: message.to_string(),
        }),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
