//! Shortest weighted paths over an [`InfoflowGraph`].
//!
//! Dijkstra with deterministic tie-breaking: among equal distances the
//! lexicographically smaller type is settled first, and among equal-cost
//! predecessors the lexicographically smaller one is kept.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet};

use super::graph::InfoflowGraph;
use crate::types::{FlowStep, Orientation, TypeName};

/// Nodes and oriented edges a search must not use.
#[derive(Debug, Default)]
pub(crate) struct Exclusions {
    pub nodes: HashSet<TypeName>,
    pub edges: HashSet<(TypeName, TypeName)>,
}

/// Single-source search parameters.
pub(crate) struct Search<'g> {
    pub graph: &'g InfoflowGraph,
    pub orientation: Orientation,
    /// Stop as soon as this node is settled.
    pub target: Option<&'g TypeName>,
}

/// Distances and predecessor links from one source.
#[derive(Debug)]
pub(crate) struct ShortestPaths {
    source: TypeName,
    dist: BTreeMap<TypeName, u32>,
    prev: BTreeMap<TypeName, TypeName>,
}

impl ShortestPaths {
    /// Reached nodes other than the source, sorted.
    pub fn reached(&self) -> impl Iterator<Item = (&TypeName, u32)> {
        self.dist
            .iter()
            .filter(move |(n, _)| **n != self.source)
            .map(|(n, d)| (n, *d))
    }

    /// Node sequence from the source to `end` in walk order.
    pub fn path_to(&self, end: &TypeName) -> Option<Vec<TypeName>> {
        if !self.dist.contains_key(end) {
            return None;
        }
        let mut path = vec![end.clone()];
        let mut current = end;
        while let Some(p) = self.prev.get(current) {
            path.push(p.clone());
            current = p;
        }
        path.reverse();
        Some(path)
    }
}

#[derive(Debug, PartialEq, Eq)]
struct State {
    cost: u32,
    node: TypeName,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap: lower cost, then smaller name
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'g> Search<'g> {
    /// Run Dijkstra from `source`.
    ///
    /// `passable` decides whether a reached node may be expanded further;
    /// the source is always expanded. Excluded nodes are never entered and
    /// excluded edges are keyed in walk order.
    pub fn run(
        &self,
        source: &TypeName,
        passable: impl Fn(&TypeName) -> bool,
        exclusions: &Exclusions,
    ) -> ShortestPaths {
        let mut dist: BTreeMap<TypeName, u32> = BTreeMap::new();
        let mut prev: BTreeMap<TypeName, TypeName> = BTreeMap::new();
        let mut settled: BTreeSet<TypeName> = BTreeSet::new();
        let mut heap = BinaryHeap::new();

        dist.insert(source.clone(), 0);
        heap.push(State {
            cost: 0,
            node: source.clone(),
        });

        while let Some(State { cost, node }) = heap.pop() {
            if !settled.insert(node.clone()) {
                continue;
            }
            if self.target == Some(&node) {
                break;
            }
            if &node != source && !passable(&node) {
                continue;
            }

            for (next, edge) in self.graph.neighbors(&node, self.orientation) {
                if settled.contains(next) || exclusions.nodes.contains(next) {
                    continue;
                }
                if exclusions.edges.contains(&(node.clone(), next.clone())) {
                    continue;
                }
                let next_cost = cost.saturating_add(edge.weight);
                let is_better = match dist.get(next) {
                    None => true,
                    Some(&d) if next_cost < d => true,
                    Some(&d) if next_cost == d => prev.get(next).map_or(false, |p| node < *p),
                    _ => false,
                };
                if is_better {
                    dist.insert(next.clone(), next_cost);
                    prev.insert(next.clone(), node.clone());
                    heap.push(State {
                        cost: next_cost,
                        node: next.clone(),
                    });
                }
            }
        }

        // Drop tentative distances of nodes beyond an early stop
        if self.target.is_some() {
            dist.retain(|n, _| settled.contains(n));
            prev.retain(|n, _| settled.contains(n));
        }

        ShortestPaths {
            source: source.clone(),
            dist,
            prev,
        }
    }
}

/// Convert a walk-order node sequence into flow-order steps.
///
/// Walking backward visits the flow in reverse, so the sequence is flipped
/// first. Returns `None` if a hop has no edge in the graph.
pub(crate) fn steps_for_walk(
    graph: &InfoflowGraph,
    walk: &[TypeName],
    orientation: Orientation,
) -> Option<Vec<FlowStep>> {
    let flow: Vec<&TypeName> = match orientation {
        Orientation::Forward => walk.iter().collect(),
        Orientation::Backward => walk.iter().rev().collect(),
    };
    flow.windows(2)
        .map(|pair| graph.edge(pair[0], pair[1]).map(FlowStep::from))
        .collect()
}

/// Total weight of a walk-order node sequence.
pub(crate) fn walk_weight(graph: &InfoflowGraph, walk: &[TypeName], orientation: Orientation) -> Option<u32> {
    walk.windows(2)
        .map(|pair| graph.oriented_edge(&pair[0], &pair[1], orientation).map(|e| e.weight))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::infoflow::graph::{BuildCriteria, GraphBuilder};
    use crate::permmap::{PermDirection, PermissionMap};
    use crate::store::InMemoryPolicy;

    /// a → b → d (3 + 3), a → c → d (2 + 4), a → d (9)
    fn diamond() -> InfoflowGraph {
        let map = PermissionMap::new()
            .with("file", "w2", PermDirection::Write, 2)
            .with("file", "w3", PermDirection::Write, 3)
            .with("file", "w4", PermDirection::Write, 4)
            .with("file", "w9", PermDirection::Write, 9);
        let mut p = InMemoryPolicy::new();
        for t in ["a_t", "b_t", "c_t", "d_t"] {
            p.add_type(t);
        }
        p.allow("a_t", "b_t", "file", &["w3"]);
        p.allow("b_t", "d_t", "file", &["w3"]);
        p.allow("a_t", "c_t", "file", &["w2"]);
        p.allow("c_t", "d_t", "file", &["w4"]);
        p.allow("a_t", "d_t", "file", &["w9"]);
        let config = AnalysisConfig::default();
        GraphBuilder::new(&p, Some(&map), &config)
            .unwrap()
            .build(BuildCriteria::unrestricted(Default::default()), None)
            .unwrap()
    }

    fn names(path: &[TypeName]) -> Vec<&str> {
        path.iter().map(TypeName::as_str).collect()
    }

    #[test]
    fn test_equal_cost_tie_prefers_smaller_predecessor() {
        let graph = diamond();
        let search = Search {
            graph: &graph,
            orientation: Orientation::Forward,
            target: None,
        };
        let paths = search.run(&"a_t".into(), |_| true, &Exclusions::default());

        // Both a→b→d and a→c→d cost 6; b_t sorts first
        let path = paths.path_to(&"d_t".into()).unwrap();
        assert_eq!(names(&path), vec!["a_t", "b_t", "d_t"]);
        assert_eq!(walk_weight(&graph, &path, Orientation::Forward), Some(6));
    }

    #[test]
    fn test_backward_walk_yields_flow_order_steps() {
        let graph = diamond();
        let search = Search {
            graph: &graph,
            orientation: Orientation::Backward,
            target: None,
        };
        let paths = search.run(&"d_t".into(), |_| true, &Exclusions::default());
        let walk = paths.path_to(&"a_t".into()).unwrap();
        assert_eq!(names(&walk), vec!["d_t", "b_t", "a_t"]);

        let steps = steps_for_walk(&graph, &walk, Orientation::Backward).unwrap();
        assert_eq!(steps[0].start_type.as_str(), "a_t");
        assert_eq!(steps[1].end_type.as_str(), "d_t");
    }

    #[test]
    fn test_impassable_nodes_are_leaves() {
        let graph = diamond();
        let search = Search {
            graph: &graph,
            orientation: Orientation::Forward,
            target: None,
        };
        let paths = search.run(&"a_t".into(), |n| n.as_str() != "b_t" && n.as_str() != "c_t", &Exclusions::default());
        let path = paths.path_to(&"d_t".into()).unwrap();
        assert_eq!(names(&path), vec!["a_t", "d_t"]);
        assert!(paths.path_to(&"b_t".into()).is_some());
    }

    #[test]
    fn test_exclusions() {
        let graph = diamond();
        let end: TypeName = "d_t".into();
        let search = Search {
            graph: &graph,
            orientation: Orientation::Forward,
            target: Some(&end),
        };
        let mut exclusions = Exclusions::default();
        exclusions.nodes.insert("b_t".into());
        exclusions.edges.insert(("a_t".into(), "c_t".into()));
        let paths = search.run(&"a_t".into(), |_| true, &exclusions);
        let path = paths.path_to(&"d_t".into()).unwrap();
        assert_eq!(names(&path), vec!["a_t", "d_t"]);
    }
}
