//! Graph queries over one store snapshot: flow tracing, impact analysis,
//! project closure, pattern rules and version consistency.
//!
//! Everything here is a pure function of a [`StoreReader`](crate::db::StoreReader);
//! nothing is persisted.

pub mod closure;
pub mod flow;
pub mod impact;
pub mod patterns;
pub mod types;
pub mod versions;

pub use closure::{dependencies_closure, dependents_closure, project_dependencies};
pub use flow::trace_flow;
pub use impact::analyze_impact;
pub use patterns::{PatternSettings, detect_patterns};
pub use types::*;
pub use versions::version_mismatches;
