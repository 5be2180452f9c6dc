//! Information-flow graph construction.
//!
//! Nodes are concrete types; an edge `S → T` means information can move
//! from `S` to `T` through at least one allow rule. For a rule with source
//! `S`, target `T` and a permission mapped:
//!
//! ```text
//! write (OUT) → edge S → T
//! read  (IN)  → edge T → S
//! both        → both edges
//! ```
//!
//! Parallel contributions merge into one edge with the minimum weight and
//! the union of rule references.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::canonical::canonical_hash_hex;
use crate::config::AnalysisConfig;
use crate::permmap::PermissionMap;
use crate::store::PolicyDatabase;
use crate::types::{AnalysisError, ClassPermPair, Edge, Orientation, RuleId, TransitiveDirection, TypeName};

/// How much of the graph around a start type is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GraphScope {
    /// Only the start type's immediate neighbours.
    Direct,
    /// Everything reachable from the start type in the given direction.
    Transitive(TransitiveDirection),
}

/// Criteria a graph is built (and later extended) with.
#[derive(Debug, Clone, Serialize)]
pub struct BuildCriteria {
    /// Class/permission filter; empty means every mapped permission.
    pub class_perms: BTreeSet<ClassPermPair>,
    /// Materialization scope.
    pub scope: GraphScope,
    /// Types a path may pass through; `None` means any.
    pub intermediate: Option<BTreeSet<TypeName>>,
}

impl BuildCriteria {
    /// Criteria for a whole-policy graph.
    pub fn unrestricted(class_perms: BTreeSet<ClassPermPair>) -> Self {
        Self {
            class_perms,
            scope: GraphScope::Direct,
            intermediate: None,
        }
    }

    /// Whether a path may continue through `ty`.
    pub fn is_passable(&self, ty: &TypeName) -> bool {
        self.intermediate.as_ref().map_or(true, |set| set.contains(ty))
    }

    /// Content fingerprint of the criteria.
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        canonical_hash_hex(self)
    }

    fn admits(&self, class: &str, perm: &str) -> bool {
        self.class_perms.is_empty()
            || self
                .class_perms
                .iter()
                .any(|cp| cp.class == class && cp.perm == perm)
    }
}

/// A weighted directed graph of types.
///
/// Uses BTreeMap/BTreeSet throughout so every traversal is deterministic.
#[derive(Debug, Clone)]
pub struct InfoflowGraph {
    criteria: BuildCriteria,
    nodes: BTreeSet<TypeName>,
    edges: BTreeMap<(TypeName, TypeName), Edge>,
    successors: BTreeMap<TypeName, BTreeSet<TypeName>>,
    predecessors: BTreeMap<TypeName, BTreeSet<TypeName>>,
    roots: BTreeSet<TypeName>,
}

impl InfoflowGraph {
    fn empty(criteria: BuildCriteria) -> Self {
        Self {
            criteria,
            nodes: BTreeSet::new(),
            edges: BTreeMap::new(),
            successors: BTreeMap::new(),
            predecessors: BTreeMap::new(),
            roots: BTreeSet::new(),
        }
    }

    /// Criteria the graph was built with.
    pub fn criteria(&self) -> &BuildCriteria {
        &self.criteria
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether a type is a node.
    pub fn contains(&self, ty: &TypeName) -> bool {
        self.nodes.contains(ty)
    }

    /// Nodes, sorted.
    pub fn nodes(&self) -> impl Iterator<Item = &TypeName> {
        self.nodes.iter()
    }

    /// Start types the graph has been grown from.
    pub fn roots(&self) -> impl Iterator<Item = &TypeName> {
        self.roots.iter()
    }

    /// Edge from `source` to `target`, if any.
    pub fn edge(&self, source: &TypeName, target: &TypeName) -> Option<&Edge> {
        self.edges.get(&(source.clone(), target.clone()))
    }

    /// All edges in canonical order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Neighbours of `node` when walking in `orientation`, with the edge
    /// connecting them. Sorted by neighbour name.
    pub fn neighbors<'a>(
        &'a self,
        node: &TypeName,
        orientation: Orientation,
    ) -> impl Iterator<Item = (&'a TypeName, &'a Edge)> + 'a {
        let adjacency = match orientation {
            Orientation::Forward => &self.successors,
            Orientation::Backward => &self.predecessors,
        };
        let node = node.clone();
        adjacency
            .get(&node)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(move |next| {
                let key = match orientation {
                    Orientation::Forward => (node.clone(), next.clone()),
                    Orientation::Backward => (next.clone(), node.clone()),
                };
                self.edges.get(&key).map(|edge| (next, edge))
            })
    }

    /// Edge met when stepping from `from` to `to` in `orientation`.
    pub fn oriented_edge(&self, from: &TypeName, to: &TypeName, orientation: Orientation) -> Option<&Edge> {
        match orientation {
            Orientation::Forward => self.edge(from, to),
            Orientation::Backward => self.edge(to, from),
        }
    }

    fn add_root(&mut self, ty: TypeName) {
        self.nodes.insert(ty.clone());
        self.roots.insert(ty);
    }

    fn insert_edge(&mut self, edge: Edge) {
        let (source, target) = edge.key();
        self.nodes.insert(source.clone());
        self.nodes.insert(target.clone());
        self.successors
            .entry(source.clone())
            .or_default()
            .insert(target.clone());
        self.predecessors
            .entry(target.clone())
            .or_default()
            .insert(source.clone());
        match self.edges.get_mut(&(source.clone(), target.clone())) {
            Some(existing) => existing.merge(edge.weight, edge.rules),
            None => {
                self.edges.insert((source, target), edge);
            }
        }
    }

    fn add_contribution(&mut self, source: &TypeName, target: &TypeName, weight: u32, rule: RuleId) {
        self.insert_edge(Edge::new(source.clone(), target.clone(), weight, rule));
    }
}

/// Builds information-flow graphs from a policy and a permission map.
pub struct GraphBuilder<'a, P: PolicyDatabase + ?Sized> {
    policy: &'a P,
    permmap: &'a PermissionMap,
    config: &'a AnalysisConfig,
}

impl<'a, P: PolicyDatabase + ?Sized> GraphBuilder<'a, P> {
    /// Create a builder. Fails if no permission map is loaded.
    pub fn new(
        policy: &'a P,
        permmap: Option<&'a PermissionMap>,
        config: &'a AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        let permmap = permmap.ok_or_else(|| {
            AnalysisError::configuration("information flow analysis requires a permission map")
        })?;
        Ok(Self {
            policy,
            permmap,
            config,
        })
    }

    /// Build a graph.
    ///
    /// Without a start type the whole filtered policy is materialized; with
    /// one, only what the criteria's scope needs around it. Nothing is
    /// returned unless the build completes.
    pub fn build(&self, criteria: BuildCriteria, start: Option<&str>) -> Result<InfoflowGraph, AnalysisError> {
        let start = start.map(|name| self.resolve(name)).transpose()?;
        let index = self.scan(&criteria);
        match start {
            None => {
                self.check_limit(index.edge_count())?;
                Ok(index)
            }
            Some(start) => self.select_from(&index, &start),
        }
    }

    /// Every edge of the filtered policy, unscoped and unbounded.
    ///
    /// Sessions keep the index next to their graph so that continuations
    /// select from it instead of scanning the rules again.
    pub fn scan(&self, criteria: &BuildCriteria) -> InfoflowGraph {
        let mut index = InfoflowGraph::empty(criteria.clone());

        for rule in self.policy.active_allow_rules() {
            let mut in_weight: Option<u32> = None;
            let mut out_weight: Option<u32> = None;
            for perm in &rule.perms {
                if !criteria.admits(&rule.class, perm) {
                    continue;
                }
                let Some(mapping) = self.permmap.flow(&rule.class, perm) else {
                    continue;
                };
                if mapping.direction.flows_in() {
                    in_weight = Some(in_weight.map_or(mapping.weight, |w| w.min(mapping.weight)));
                }
                if mapping.direction.flows_out() {
                    out_weight = Some(out_weight.map_or(mapping.weight, |w| w.min(mapping.weight)));
                }
            }
            if in_weight.is_none() && out_weight.is_none() {
                continue;
            }

            for (source, target) in self.policy.rule_pairs(&rule.source, &rule.target) {
                if source == target {
                    continue;
                }
                if let Some(w) = out_weight {
                    index.add_contribution(&source, &target, w, rule.id);
                }
                if let Some(w) = in_weight {
                    index.add_contribution(&target, &source, w, rule.id);
                }
            }
        }

        tracing::debug!(
            nodes = index.node_count(),
            edges = index.edge_count(),
            criteria = ?index.criteria.fingerprint().ok(),
            "scanned policy for information flow"
        );
        index
    }

    /// Materialize the part of `index` the criteria's scope needs around
    /// `start`. The edge limit applies to the result, not to the index.
    pub fn select_from(&self, index: &InfoflowGraph, start: &TypeName) -> Result<InfoflowGraph, AnalysisError> {
        let mut graph = InfoflowGraph::empty(index.criteria.clone());
        for edge in select(index, start) {
            graph.insert_edge(edge);
        }
        self.check_limit(graph.edge_count())?;
        graph.add_root(start.clone());
        tracing::debug!(
            start = %start,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built information flow graph"
        );
        Ok(graph)
    }

    /// Grow an existing graph from another start type, selecting from the
    /// index it was built from. The graph is left untouched if this fails.
    pub fn extend(
        &self,
        index: &InfoflowGraph,
        graph: &mut InfoflowGraph,
        start: &TypeName,
    ) -> Result<(), AnalysisError> {
        if graph.roots.contains(start) {
            return Ok(());
        }
        let additions = select(index, start);
        let new_edges: BTreeSet<(TypeName, TypeName)> = additions
            .iter()
            .map(|e| e.key())
            .filter(|key| !graph.edges.contains_key(key))
            .collect();
        self.check_limit(graph.edge_count() + new_edges.len())?;
        for edge in additions {
            graph.insert_edge(edge);
        }
        graph.add_root(start.clone());
        tracing::debug!(
            start = %start,
            added = new_edges.len(),
            edges = graph.edge_count(),
            "extended information flow graph"
        );
        Ok(())
    }

    /// Resolve a type name for use as a start type.
    pub fn resolve(&self, name: &str) -> Result<TypeName, AnalysisError> {
        self.policy
            .resolve_type(name)
            .ok_or_else(|| AnalysisError::unknown_type(name))
    }

    fn check_limit(&self, count: usize) -> Result<(), AnalysisError> {
        if count > self.config.max_graph_edges {
            return Err(self.too_many_edges(count));
        }
        Ok(())
    }

    fn too_many_edges(&self, count: usize) -> AnalysisError {
        AnalysisError::Allocation(format!(
            "information flow graph would hold {count} edges, limit is {}",
            self.config.max_graph_edges
        ))
    }
}

/// Edges of `index` needed around `start` under its criteria scope.
fn select(index: &InfoflowGraph, start: &TypeName) -> Vec<Edge> {
    match index.criteria.scope {
        GraphScope::Direct => {
            let mut picked = Vec::new();
            for orientation in [Orientation::Forward, Orientation::Backward] {
                picked.extend(index.neighbors(start, orientation).map(|(_, e)| e.clone()));
            }
            picked
        }
        GraphScope::Transitive(direction) => {
            let orientation = direction.orientation();
            let mut picked = Vec::new();
            let mut visited: BTreeSet<TypeName> = BTreeSet::new();
            let mut queue: VecDeque<TypeName> = VecDeque::new();
            visited.insert(start.clone());
            queue.push_back(start.clone());

            while let Some(node) = queue.pop_front() {
                if &node != start && !index.criteria.is_passable(&node) {
                    continue;
                }
                for (next, edge) in index.neighbors(&node, orientation) {
                    picked.push(edge.clone());
                    if visited.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
            }
            picked
        }
    }
}
