//! Transitive project closure over internal package references.
//!
//! Project A reaches project B when B holds an internal package reference
//! naming one of A's non-test assemblies. A global visited set keyed by
//! project name guarantees termination on cycles.

use super::types::{ProjectDependencies, ProjectHop};
use crate::db::StoreReader;
use anyhow::Result;
use std::collections::{HashSet, VecDeque};

/// Projects that consume `start` projects' packages, directly or through
/// other consumers. The start projects themselves are never reported.
pub fn dependents_closure(reader: &StoreReader<'_>, start: &[String]) -> Result<Vec<ProjectHop>> {
    let mut visited: HashSet<String> = start.iter().cloned().collect();
    let mut queue: VecDeque<(String, usize)> = start.iter().map(|p| (p.clone(), 0)).collect();
    let mut hops = Vec::new();

    while let Some((project, depth)) = queue.pop_front() {
        for assembly in reader.non_test_assembly_names(&project)? {
            for (consumer, package) in reader.internal_consumers(&assembly)? {
                if !visited.insert(consumer.clone()) {
                    continue;
                }
                hops.push(ProjectHop {
                    project: consumer.clone(),
                    depth: depth + 1,
                    via_project: project.clone(),
                    via_package: package,
                });
                queue.push_back((consumer, depth + 1));
            }
        }
    }
    Ok(hops)
}

/// Projects whose packages `project` consumes, directly or transitively.
pub fn dependencies_closure(reader: &StoreReader<'_>, project: &str) -> Result<Vec<ProjectHop>> {
    let mut visited: HashSet<String> = HashSet::from([project.to_string()]);
    let mut queue: VecDeque<(String, usize)> = VecDeque::from([(project.to_string(), 0)]);
    let mut hops = Vec::new();

    while let Some((current, depth)) = queue.pop_front() {
        for (provider, package) in reader.internal_providers(&current)? {
            if !visited.insert(provider.clone()) {
                continue;
            }
            hops.push(ProjectHop {
                project: provider.clone(),
                depth: depth + 1,
                via_project: current.clone(),
                via_package: package,
            });
            queue.push_back((provider, depth + 1));
        }
    }
    Ok(hops)
}

/// Both directions for one project; `None` when it is not indexed.
pub fn project_dependencies(
    reader: &StoreReader<'_>,
    project: &str,
) -> Result<Option<ProjectDependencies>> {
    let Some(name) = reader.find_project(project)? else {
        return Ok(None);
    };
    let dependents = dependents_closure(reader, std::slice::from_ref(&name))?;
    let dependencies = dependencies_closure(reader, &name)?;
    Ok(Some(ProjectDependencies {
        project: name,
        dependents,
        dependencies,
    }))
}
