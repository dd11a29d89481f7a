use super::closure::dependents_closure;
use super::types::{DirectReference, ImpactOutcome, ImpactReport};
use crate::db::{NameMatch, StoreReader};
use crate::model::RelationKind;
use anyhow::Result;
use std::collections::BTreeSet;
use tracing::debug;

/// Blast radius of changing `type_name`: the types referring to it by
/// implements, injects or inheritance, the projects owning them, and every
/// project reachable from those through internal packages.
///
/// Names match exactly here; only public types count as a home.
pub fn analyze_impact(reader: &StoreReader<'_>, type_name: &str) -> Result<ImpactOutcome> {
    let type_name = type_name.trim();
    let homes = reader.public_types_named(type_name)?;
    if homes.is_empty() {
        return Ok(ImpactOutcome::NotFound {
            type_name: type_name.to_string(),
        });
    }

    let mut direct_references = Vec::new();
    for (relation, found) in [
        (
            RelationKind::Implements,
            reader.implementors_of(type_name, NameMatch::Exact)?,
        ),
        (
            RelationKind::Injects,
            reader.injectors_of(type_name, NameMatch::Exact)?,
        ),
        (RelationKind::Inherits, reader.inheritors_of(type_name)?),
    ] {
        direct_references.extend(
            found
                .into_iter()
                .map(|type_ref| DirectReference { type_ref, relation }),
        );
    }

    let home_projects: BTreeSet<String> = homes.into_iter().map(|t| t.project).collect();
    let direct_projects: BTreeSet<String> = home_projects
        .iter()
        .cloned()
        .chain(direct_references.iter().map(|r| r.type_ref.project.clone()))
        .collect();
    let direct_projects: Vec<String> = direct_projects.into_iter().collect();
    let transitive_projects = dependents_closure(reader, &direct_projects)?;

    let direct_reference_count = direct_references.len();
    let direct_project_count = direct_projects.len();
    let transitive_project_count = transitive_projects.len();
    debug!(
        "impact {type_name}: {direct_reference_count} references, {direct_project_count} projects, {transitive_project_count} transitive"
    );
    Ok(ImpactOutcome::Report(ImpactReport {
        type_name: type_name.to_string(),
        home_projects: home_projects.into_iter().collect(),
        direct_references,
        direct_projects,
        transitive_projects,
        direct_reference_count,
        direct_project_count,
        transitive_project_count,
        total_blast_radius: direct_reference_count + direct_project_count + transitive_project_count,
    }))
}
