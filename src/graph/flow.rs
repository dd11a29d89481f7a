//! Breadth-first flow trace over the name-keyed implements/injects relations.

use super::types::{FlowEdge, TraceFlowResult};
use crate::db::{NameMatch, StoreReader};
use crate::model::{RelationKind, TypeRef};
use anyhow::Result;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Traces who implements and who injects `type_name`, then repeats from each
/// newly reached type until `max_depth` hops. Every name is visited at most
/// once (case-insensitive), so only the first path to a node is reported.
/// Unresolved names are leaves.
pub fn trace_flow(
    reader: &StoreReader<'_>,
    type_name: &str,
    max_depth: usize,
) -> Result<TraceFlowResult> {
    let root = type_name.trim().to_string();
    let max_depth = max_depth.max(1);
    let mut visited_keys: HashSet<String> = HashSet::new();
    let mut visited = Vec::new();
    let mut edges = Vec::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();

    visited_keys.insert(root.to_lowercase());
    visited.push(root.clone());
    queue.push_back((root.clone(), 0));

    while let Some((node, level)) = queue.pop_front() {
        if level >= max_depth {
            continue;
        }
        let implementors = reader.implementors_of(&node, NameMatch::IgnoreCase)?;
        let injectors = reader.injectors_of(&node, NameMatch::IgnoreCase)?;
        let neighbours = implementors
            .into_iter()
            .map(|t| (t, RelationKind::Implements))
            .chain(injectors.into_iter().map(|t| (t, RelationKind::Injects)));

        for (neighbour, relation) in neighbours {
            if !visited_keys.insert(neighbour.name.to_lowercase()) {
                continue;
            }
            edges.push(edge(&node, &neighbour, relation, level + 1));
            visited.push(neighbour.name.clone());
            queue.push_back((neighbour.name, level + 1));
        }
    }

    debug!(
        "trace_flow {root}: {} edges, {} nodes",
        edges.len(),
        visited.len()
    );
    Ok(TraceFlowResult {
        no_connections: edges.is_empty(),
        root,
        max_depth,
        edges,
        visited,
    })
}

fn edge(from: &str, to: &TypeRef, relation: RelationKind, depth: usize) -> FlowEdge {
    FlowEdge {
        from: from.to_string(),
        to: to.name.clone(),
        relation,
        depth,
        project: to.project.clone(),
        namespace: to.namespace.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{class, interface, seed};

    #[test]
    fn test_implementor_is_direct_neighbour() {
        let (db, _temp) = seed(vec![(
            "acme.caching",
            vec![
                interface("ICoherentCache"),
                class("CoherentCacheService").with_implements(&["ICoherentCache"]),
            ],
        )]);
        let result = db.read(|r| trace_flow(r, "ICoherentCache", 3)).unwrap();
        assert!(!result.no_connections);
        assert_eq!(result.edges.len(), 1);
        let edge = &result.edges[0];
        assert_eq!(edge.to, "CoherentCacheService");
        assert_eq!(edge.relation, RelationKind::Implements);
        assert_eq!(edge.depth, 1);
        assert_eq!(edge.project, "acme.caching");
    }

    #[test]
    fn test_follows_injectors_of_implementors() {
        let (db, _temp) = seed(vec![(
            "acme.caching",
            vec![
                interface("ICache"),
                class("CacheService").with_implements(&["ICache"]),
                class("CacheController").with_injects(&["CacheService"]),
                class("Far").with_injects(&["CacheController"]),
            ],
        )]);
        let result = db.read(|r| trace_flow(r, "icache", 2)).unwrap();
        let reached: Vec<_> = result.edges.iter().map(|e| (e.to.as_str(), e.depth)).collect();
        assert_eq!(reached, vec![("CacheService", 1), ("CacheController", 2)]);
    }

    #[test]
    fn test_cycle_terminates_and_visits_once() {
        let (db, _temp) = seed(vec![(
            "acme.loop",
            vec![
                class("A").with_implements(&["B"]).with_injects(&["B"]),
                class("B").with_implements(&["A"]).with_injects(&["A"]),
            ],
        )]);
        let result = db.read(|r| trace_flow(r, "A", 10)).unwrap();
        assert_eq!(result.visited, vec!["A", "B"]);
        assert_eq!(result.edges.len(), 1);
    }

    #[test]
    fn test_isolated_type_reports_no_connections() {
        let (db, _temp) = seed(vec![("acme.core", vec![class("Lonely")])]);
        let result = db.read(|r| trace_flow(r, "Lonely", 3)).unwrap();
        assert!(result.no_connections);
        assert!(result.edges.is_empty());
        assert_eq!(result.visited, vec!["Lonely"]);
    }
}
