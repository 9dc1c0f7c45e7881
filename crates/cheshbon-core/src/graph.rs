//! Dependency graph over sources, derived variables, and constraints.
//!
//! Nodes are stable ids; edges run dependency -> dependent with reverse
//! edges maintained. Construction validates the spec's global invariants:
//! every referenced input resolves to a node, and the graph is acyclic.
//! The first cycle found (minimal by DFS over sorted neighbors) is rotated
//! to start at its lexicographically smallest id and reported with the
//! participating edge kinds.
//!
//! All queries iterate sorted containers, so results are deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::errors::{CheshbonError, CheshbonResult};
use crate::model::spec::MappingSpec;

/// Cap on reported alternative paths; more than this reports as "10+".
pub const MAX_ALTERNATIVE_PATHS: u32 = 10;

/// Node classification by id prefix.
pub fn node_kind(id: &str) -> &'static str {
    if id.starts_with("s:") {
        "source"
    } else if id.starts_with("d:") || id.starts_with("v:") {
        "derived"
    } else if id.starts_with("c:") {
        "constraint"
    } else {
        "unknown"
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    /// node -> its dependencies
    edges: BTreeMap<String, BTreeSet<String>>,
    /// dependency -> nodes that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build and validate the graph for one spec version.
    pub fn build(spec: &MappingSpec) -> CheshbonResult<Self> {
        let mut graph = Self {
            nodes: BTreeSet::new(),
            edges: BTreeMap::new(),
            reverse_edges: BTreeMap::new(),
        };

        for source in &spec.sources {
            graph.nodes.insert(source.id.clone());
            graph.edges.entry(source.id.clone()).or_default();
        }
        for derived in &spec.derived {
            graph.nodes.insert(derived.id.clone());
            graph.add_edges(&derived.id, &derived.inputs);
        }
        for constraint in &spec.constraints {
            graph.nodes.insert(constraint.id.clone());
            graph.add_edges(&constraint.id, &constraint.inputs);
        }

        let mut missing: BTreeSet<String> = BTreeSet::new();
        for deps in graph.edges.values() {
            for dep in deps {
                if !graph.nodes.contains(dep) {
                    missing.insert(dep.clone());
                }
            }
        }
        if !missing.is_empty() {
            return Err(CheshbonError::MissingDependencies { missing });
        }

        if let Some(cycle) = graph.find_cycle() {
            let rotated = rotate_cycle(cycle);
            let edge_kinds = cycle_edge_kinds(&rotated);
            return Err(CheshbonError::CycleDetected {
                cycle: rotated,
                edge_kinds,
            });
        }

        Ok(graph)
    }

    fn add_edges(&mut self, node: &str, inputs: &[String]) {
        let deps: BTreeSet<String> = inputs.iter().cloned().collect();
        for dep in &deps {
            self.reverse_edges
                .entry(dep.clone())
                .or_default()
                .insert(node.to_string());
        }
        self.edges.insert(node.to_string(), deps);
    }

    pub fn nodes(&self) -> &BTreeSet<String> {
        &self.nodes
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    /// Direct dependencies of a node.
    pub fn dependencies(&self, node: &str) -> BTreeSet<String> {
        self.edges.get(node).cloned().unwrap_or_default()
    }

    /// Nodes that directly depend on this node.
    pub fn dependents(&self, node: &str) -> BTreeSet<String> {
        self.reverse_edges.get(node).cloned().unwrap_or_default()
    }

    /// All transitive dependencies, excluding the node itself.
    pub fn transitive_dependencies(&self, node: &str) -> BTreeSet<String> {
        self.walk(node, |g, n| g.dependencies(n))
    }

    /// All transitive dependents, excluding the node itself.
    pub fn transitive_dependents(&self, node: &str) -> BTreeSet<String> {
        self.walk(node, |g, n| g.dependents(n))
    }

    fn walk(
        &self,
        start: &str,
        neighbors: impl Fn(&Self, &str) -> BTreeSet<String>,
    ) -> BTreeSet<String> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for next in neighbors(self, &current) {
                if !visited.contains(&next) {
                    stack.push(next);
                }
            }
        }
        visited.remove(start);
        visited
    }

    /// Shortest dependency path from `from` to `to` along reverse edges
    /// (BFS), or None when no path exists.
    pub fn dependency_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let mut queue: VecDeque<(String, Vec<String>)> = VecDeque::new();
        queue.push_back((from.to_string(), vec![from.to_string()]));
        let mut visited: BTreeSet<String> = BTreeSet::new();
        visited.insert(from.to_string());

        while let Some((current, path)) = queue.pop_front() {
            for dependent in self.dependents(&current) {
                if dependent == to {
                    let mut full = path.clone();
                    full.push(dependent);
                    return Some(full);
                }
                if visited.insert(dependent.clone()) {
                    let mut next_path = path.clone();
                    next_path.push(dependent.clone());
                    queue.push_back((dependent, next_path));
                }
            }
        }
        None
    }

    /// Bounded count of simple paths strictly longer than the shortest path
    /// (the diamond diagnostic). The traversal is length-limited to
    /// `shortest + 10` edges and count-limited so dense graphs terminate;
    /// the result is capped at [`MAX_ALTERNATIVE_PATHS`].
    pub fn count_alternative_paths(&self, from: &str, to: &str) -> u32 {
        if from == to {
            return 0;
        }
        let Some(shortest) = self.dependency_path(from, to) else {
            return 0;
        };
        let shortest_edges = shortest.len() - 1;
        let max_path_length = shortest_edges + 10;

        let mut visited: BTreeSet<String> = BTreeSet::new();
        visited.insert(from.to_string());
        let total = self.count_paths_bounded(
            from,
            to,
            &mut visited,
            max_path_length,
            MAX_ALTERNATIVE_PATHS + 1,
        );
        total.saturating_sub(1).min(MAX_ALTERNATIVE_PATHS)
    }

    fn count_paths_bounded(
        &self,
        current: &str,
        target: &str,
        visited: &mut BTreeSet<String>,
        max_length: usize,
        max_count: u32,
    ) -> u32 {
        if current == target {
            return 1;
        }
        if visited.len() >= max_length {
            return 0;
        }
        let mut count = 0;
        for dependent in self.dependents(current) {
            if visited.contains(&dependent) {
                continue;
            }
            visited.insert(dependent.clone());
            count += self.count_paths_bounded(
                &dependent,
                target,
                visited,
                max_length,
                max_count - count,
            );
            visited.remove(&dependent);
            if count >= max_count {
                return max_count;
            }
        }
        count
    }

    /// First cycle by DFS with tri-color marking over sorted neighbors, or
    /// None when the graph is acyclic. The cycle is returned without the
    /// closing duplicate node.
    fn find_cycle(&self) -> Option<Vec<String>> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let mut color: BTreeMap<String, u8> =
            self.nodes.iter().map(|n| (n.clone(), WHITE)).collect();

        for start in &self.nodes {
            if color[start] != WHITE {
                continue;
            }
            let mut path: Vec<String> = vec![start.clone()];
            let mut stack: Vec<(String, Vec<String>, usize)> = vec![(
                start.clone(),
                self.dependents(start).into_iter().collect(),
                0,
            )];
            color.insert(start.clone(), GRAY);

            while !stack.is_empty() {
                let next = {
                    let (_, neighbors, idx) = stack.last_mut().expect("stack non-empty");
                    if *idx < neighbors.len() {
                        let next = neighbors[*idx].clone();
                        *idx += 1;
                        Some(next)
                    } else {
                        None
                    }
                };
                match next {
                    Some(next) => match color[&next] {
                        WHITE => {
                            color.insert(next.clone(), GRAY);
                            path.push(next.clone());
                            let next_neighbors = self.dependents(&next).into_iter().collect();
                            stack.push((next, next_neighbors, 0));
                        }
                        GRAY => {
                            let cycle_start = path
                                .iter()
                                .position(|n| n == &next)
                                .expect("gray node is on the current path");
                            return Some(path[cycle_start..].to_vec());
                        }
                        _ => {}
                    },
                    None => {
                        let (node, _, _) = stack.pop().expect("stack non-empty");
                        color.insert(node, BLACK);
                        path.pop();
                    }
                }
            }
        }
        None
    }
}

/// Rotate a cycle (closing node not repeated) to start at its
/// lexicographically smallest id, so equal cycles compare equal regardless
/// of where the DFS entered them.
fn rotate_cycle(cycle: Vec<String>) -> Vec<String> {
    if cycle.is_empty() {
        return cycle;
    }
    let min_idx = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated = Vec::with_capacity(cycle.len());
    rotated.extend_from_slice(&cycle[min_idx..]);
    rotated.extend_from_slice(&cycle[..min_idx]);
    rotated
}

/// The `kind->kind` label of every edge participating in the cycle.
fn cycle_edge_kinds(cycle: &[String]) -> Vec<String> {
    (0..cycle.len())
        .map(|i| {
            let from = &cycle[i];
            let to = &cycle[(i + 1) % cycle.len()];
            format!("{}->{}", node_kind(from), node_kind(to))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn spec(sources: &[&str], derived: &[(&str, &[&str])]) -> MappingSpec {
        let sources: Vec<_> = sources
            .iter()
            .map(|id| json!({"id": id, "name": id.trim_start_matches("s:"), "type": "string"}))
            .collect();
        let derived: Vec<_> = derived
            .iter()
            .map(|(id, inputs)| {
                json!({
                    "id": id, "name": id.trim_start_matches("d:"), "type": "string",
                    "transform_ref": "t:direct_copy", "inputs": inputs
                })
            })
            .collect();
        serde_json::from_value(json!({
            "spec_version": "1", "study_id": "S1", "source_table": "DM",
            "sources": sources, "derived": derived
        }))
        .unwrap()
    }

    #[test]
    fn builds_forward_and_reverse_edges() {
        let g = DependencyGraph::build(&spec(
            &["s:X"],
            &[("d:A", &["s:X"]), ("d:B", &["d:A"])],
        ))
        .unwrap();
        assert_eq!(g.dependencies("d:A"), ["s:X".to_string()].into());
        assert_eq!(g.dependents("s:X"), ["d:A".to_string()].into());
        assert_eq!(
            g.transitive_dependents("s:X"),
            ["d:A".to_string(), "d:B".to_string()].into()
        );
        assert_eq!(
            g.transitive_dependencies("d:B"),
            ["d:A".to_string(), "s:X".to_string()].into()
        );
    }

    #[test]
    fn missing_reference_is_an_error() {
        let err = DependencyGraph::build(&spec(&[], &[("d:A", &["s:GHOST"])])).unwrap_err();
        assert_matches!(
            err,
            CheshbonError::MissingDependencies { ref missing }
                if missing.contains("s:GHOST")
        );
    }

    #[test]
    fn cycle_detected_and_rotated() {
        // d:B -> d:A -> d:B; the reported cycle starts at d:A.
        let err =
            DependencyGraph::build(&spec(&[], &[("d:A", &["d:B"]), ("d:B", &["d:A"])]))
                .unwrap_err();
        match err {
            CheshbonError::CycleDetected { cycle, edge_kinds } => {
                assert_eq!(cycle[0], "d:A");
                assert_eq!(cycle.len(), 2);
                assert!(edge_kinds.iter().all(|k| k == "derived->derived"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let err = DependencyGraph::build(&spec(&[], &[("d:A", &["d:A"])])).unwrap_err();
        assert_matches!(err, CheshbonError::CycleDetected { ref cycle, .. } if cycle == &vec!["d:A".to_string()]);
    }

    #[test]
    fn dependency_path_is_shortest() {
        let g = DependencyGraph::build(&spec(
            &["s:X"],
            &[
                ("d:A", &["s:X"]),
                ("d:B", &["d:A"]),
                ("d:C", &["d:B", "s:X"]),
            ],
        ))
        .unwrap();
        // s:X -> d:C directly beats s:X -> d:A -> d:B -> d:C.
        assert_eq!(
            g.dependency_path("s:X", "d:C").unwrap(),
            vec!["s:X", "d:C"]
        );
        assert_eq!(g.dependency_path("d:C", "s:X"), None);
        assert_eq!(g.dependency_path("d:A", "d:A").unwrap(), vec!["d:A"]);
    }

    #[test]
    fn diamond_has_alternative_paths() {
        let g = DependencyGraph::build(&spec(
            &["s:X"],
            &[
                ("d:A", &["s:X"]),
                ("d:B", &["s:X"]),
                ("d:C", &["d:A", "d:B"]),
            ],
        ))
        .unwrap();
        assert!(g.count_alternative_paths("s:X", "d:C") >= 1);
        assert_eq!(g.count_alternative_paths("s:X", "d:A"), 0);
        assert_eq!(g.count_alternative_paths("s:X", "s:X"), 0);
    }

    #[test]
    fn alternative_paths_capped() {
        // Ten parallel two-hop routes plus the direct edge.
        let mut derived: Vec<(String, Vec<String>)> = Vec::new();
        for i in 0..12 {
            derived.push((format!("d:M{i:02}"), vec!["s:X".to_string()]));
        }
        let mut sink_inputs: Vec<String> = (0..12).map(|i| format!("d:M{i:02}")).collect();
        sink_inputs.push("s:X".to_string());
        derived.push(("d:Z".to_string(), sink_inputs));

        let derived_refs: Vec<(&str, Vec<&str>)> = derived
            .iter()
            .map(|(id, inputs)| (id.as_str(), inputs.iter().map(String::as_str).collect()))
            .collect();
        let derived_json: Vec<_> = derived_refs
            .iter()
            .map(|(id, inputs)| {
                json!({
                    "id": id, "name": *id, "type": "string",
                    "transform_ref": "t:direct_copy", "inputs": inputs
                })
            })
            .collect();
        let s: MappingSpec = serde_json::from_value(json!({
            "spec_version": "1", "study_id": "S1", "source_table": "DM",
            "sources": [{"id": "s:X", "name": "X", "type": "string"}],
            "derived": derived_json
        }))
        .unwrap();
        let g = DependencyGraph::build(&s).unwrap();
        assert_eq!(
            g.count_alternative_paths("s:X", "d:Z"),
            MAX_ALTERNATIVE_PATHS
        );
    }
}
