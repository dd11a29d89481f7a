use crate::rpc::Format;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "reposcope",
    version,
    about = "Cross-repository .NET code index",
    after_help = r#"Examples:
  reposcope --root ~/src scan
  reposcope --root ~/src scan --full
  reposcope --root ~/src impact ICoherentCache
  reposcope --root ~/src trace-flow ICoherentCache --depth 2
  reposcope --root ~/src fetch --rescan
  reposcope --root ~/src request --method search_types --params '{"query":"Cache"}'
  reposcope --root ~/src serve
"#
)]
pub struct Args {
    /// Directory holding one repository per child directory.
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,
    /// Index file; defaults to <root>/memory/reposcope.sqlite.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: Format,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scan every repository. Incremental unless told otherwise.
    Scan {
        /// Extract every repository regardless of fingerprints.
        #[arg(long, conflicts_with = "rebuild")]
        full: bool,
        /// Discard the index and scan from scratch.
        #[arg(long)]
        rebuild: bool,
    },
    /// Force one repository to rescan.
    Rescan { project: String },
    /// Remove a project from the index.
    Forget { project: String },
    /// Fetch and fast-forward every repository on an allowed branch.
    Fetch {
        #[arg(long)]
        concurrency: Option<usize>,
        /// Allowed branch; repeat for several. Defaults to the configured list.
        #[arg(long = "branch")]
        branches: Vec<String>,
        /// Run an incremental scan when anything was updated.
        #[arg(long)]
        rescan: bool,
    },
    /// Branch and working-tree status of every repository.
    Status,
    /// List indexed projects.
    Projects,
    /// Search types by name.
    Types {
        query: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        kind: Option<String>,
    },
    /// Types implementing an interface.
    Implementations {
        interface: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Everything known about a type.
    Describe { name: String },
    /// REST and GraphQL endpoints.
    Endpoints {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        query: Option<String>,
    },
    /// Search configuration keys.
    Config {
        query: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Implementors and injectors reachable from a type.
    TraceFlow {
        type_name: String,
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Blast radius of changing a type.
    Impact { type_name: String },
    /// Architecture patterns and coupling warnings.
    Patterns {
        #[arg(long)]
        project: Option<String>,
    },
    /// Packages referenced at more than one version.
    Versions {
        #[arg(long)]
        package: Option<String>,
    },
    /// Projects a project depends on and is depended on by.
    Dependencies { project: String },
    /// Index row counts and last scan time.
    Overview,
    /// Run the JSONL server over stdin/stdout.
    Serve,
    /// Run a single JSONL request and exit.
    Request {
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_name = "PATH")]
        params_file: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        id: String,
    },
}

fn insert_opt(params: &mut Map<String, Value>, key: &str, value: Option<impl Into<Value>>) {
    if let Some(value) = value {
        params.insert(key.to_string(), value.into());
    }
}

impl Command {
    /// The dispatcher method and params a query subcommand maps to. `None`
    /// for `serve` and `request`, which drive the protocol directly.
    pub fn to_method(&self) -> Option<(&'static str, Value)> {
        let mut params = Map::new();
        let method = match self {
            Command::Scan { full, rebuild } => {
                let mode = match (full, rebuild) {
                    (_, true) => "rebuild",
                    (true, false) => "full",
                    (false, false) => "incremental",
                };
                params.insert("mode".to_string(), json!(mode));
                "scan"
            }
            Command::Rescan { project } => {
                params.insert("project".to_string(), json!(project));
                "rescan_project"
            }
            Command::Forget { project } => {
                params.insert("project".to_string(), json!(project));
                "forget_project"
            }
            Command::Fetch {
                concurrency,
                branches,
                rescan,
            } => {
                insert_opt(&mut params, "concurrency", *concurrency);
                if !branches.is_empty() {
                    params.insert("branches".to_string(), json!(branches));
                }
                params.insert("rescan".to_string(), json!(rescan));
                "fetch"
            }
            Command::Status => "repo_status",
            Command::Projects => "list_projects",
            Command::Types {
                query,
                project,
                kind,
            } => {
                params.insert("query".to_string(), json!(query));
                insert_opt(&mut params, "project", project.clone());
                insert_opt(&mut params, "kind", kind.clone());
                "search_types"
            }
            Command::Implementations { interface, project } => {
                params.insert("interface".to_string(), json!(interface));
                insert_opt(&mut params, "project", project.clone());
                "find_implementations"
            }
            Command::Describe { name } => {
                params.insert("name".to_string(), json!(name));
                "describe_type"
            }
            Command::Endpoints { project, query } => {
                insert_opt(&mut params, "project", project.clone());
                insert_opt(&mut params, "query", query.clone());
                "list_endpoints"
            }
            Command::Config { query, project } => {
                params.insert("query".to_string(), json!(query));
                insert_opt(&mut params, "project", project.clone());
                "search_config"
            }
            Command::TraceFlow { type_name, depth } => {
                params.insert("type_name".to_string(), json!(type_name));
                insert_opt(&mut params, "depth", *depth);
                "trace_flow"
            }
            Command::Impact { type_name } => {
                params.insert("type_name".to_string(), json!(type_name));
                "analyze_impact"
            }
            Command::Patterns { project } => {
                insert_opt(&mut params, "project", project.clone());
                "detect_patterns"
            }
            Command::Versions { package } => {
                insert_opt(&mut params, "package", package.clone());
                "version_mismatches"
            }
            Command::Dependencies { project } => {
                params.insert("project".to_string(), json!(project));
                "project_dependencies"
            }
            Command::Overview => "overview",
            Command::Serve | Command::Request { .. } => return None,
        };
        Some((method, Value::Object(params)))
    }
}
