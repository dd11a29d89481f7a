use crate::model::{RelationKind, TypeRef};
use serde::Serialize;

/// One traversed relation: `to` relates to `from` by `relation`
/// (`to` implements or injects `from`).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FlowEdge {
    pub from: String,
    pub to: String,
    pub relation: RelationKind,
    /// Hops from the root; direct neighbours are at depth 1.
    pub depth: usize,
    pub project: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceFlowResult {
    pub root: String,
    pub max_depth: usize,
    pub edges: Vec<FlowEdge>,
    /// Every node reached, the root first, in discovery order.
    pub visited: Vec<String>,
    /// The root has no implementors and no injectors.
    pub no_connections: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectReference {
    #[serde(flatten)]
    pub type_ref: TypeRef,
    pub relation: RelationKind,
}

/// A project reached through internal package references.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProjectHop {
    pub project: String,
    /// Breadth-first distance from the starting projects.
    pub depth: usize,
    /// The project this one was reached from.
    pub via_project: String,
    /// The package name linking the two.
    pub via_package: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactReport {
    pub type_name: String,
    pub home_projects: Vec<String>,
    pub direct_references: Vec<DirectReference>,
    pub direct_projects: Vec<String>,
    pub transitive_projects: Vec<ProjectHop>,
    pub direct_reference_count: usize,
    pub direct_project_count: usize,
    pub transitive_project_count: usize,
    pub total_blast_radius: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImpactOutcome {
    NotFound { type_name: String },
    Report(ImpactReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectDependencies {
    pub project: String,
    /// Projects that consume this one's packages, directly or transitively.
    pub dependents: Vec<ProjectHop>,
    /// Projects whose packages this one consumes, directly or transitively.
    pub dependencies: Vec<ProjectHop>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Repository,
    Decorator,
    Cqrs,
    Factory,
    EventSourcing,
    Options,
    ServiceLayer,
    HighCoupling,
    UnitOfWork,
}

impl PatternKind {
    pub fn label(self) -> &'static str {
        match self {
            PatternKind::Repository => "Repository",
            PatternKind::Decorator => "Decorator",
            PatternKind::Cqrs => "CQRS / Mediator",
            PatternKind::Factory => "Factory",
            PatternKind::EventSourcing => "Event Sourcing",
            PatternKind::Options => "Options",
            PatternKind::ServiceLayer => "Service Layer",
            PatternKind::HighCoupling => "High Coupling",
            PatternKind::UnitOfWork => "Unit of Work",
        }
    }

    /// Findings of this kind are warnings rather than descriptions.
    pub fn is_warning(self) -> bool {
        self == PatternKind::HighCoupling
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternFinding {
    pub kind: PatternKind,
    /// Interface or type the finding is about.
    pub subject: String,
    pub project: Option<String>,
    pub detail: String,
    /// Participating types, sorted.
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternReport {
    pub project: Option<String>,
    pub findings: Vec<PatternFinding>,
}

impl PatternReport {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MismatchSeverity {
    Major,
    Minor,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionUsage {
    pub version: String,
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionMismatch {
    pub package: String,
    pub severity: MismatchSeverity,
    pub is_internal: bool,
    /// Sorted by version string.
    pub versions: Vec<VersionUsage>,
}
