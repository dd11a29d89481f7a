//! Cross-repository code index for .NET sources: incremental scanning into
//! SQLite and graph queries (flow tracing, impact analysis, project closure,
//! pattern detection, version consistency) over the result.

pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod indexer;
pub mod model;
pub mod render;
pub mod rpc;
pub mod util;
pub mod vcs;
pub mod workspace;

pub use error::IndexError;
pub use workspace::Workspace;
