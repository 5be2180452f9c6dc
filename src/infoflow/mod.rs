//! Information-flow analysis.
//!
//! ## Operations
//!
//! ```text
//! analyze_direct / analyze_transitive → (results, GraphHandle)
//!            ↓
//!   continue_from(handle, new start)      reuses the graph's criteria
//!   prepare_further(handle, start, end)   seeds a k-shortest session
//!   next_further(handle)                  one more path per call
//!   abort_further / destroy
//! ```
//!
//! Every graph is registered in the [`GraphHandleRegistry`] together with
//! the query kind and result filter it was built for, so continuations
//! behave exactly like the original query.

pub mod further;
pub mod graph;
pub(crate) mod search;

pub use further::FurtherSession;
pub use graph::{BuildCriteria, GraphBuilder, GraphScope, InfoflowGraph};

use std::collections::{BTreeMap, BTreeSet};

use crate::config::AnalysisConfig;
use crate::permmap::PermissionMap;
use crate::query::{passes, DirectFlowQuery, ResultFilter, TransitiveFlowQuery};
use crate::registry::{GraphHandle, GraphHandleRegistry};
use crate::store::PolicyDatabase;
use crate::types::{
    AnalysisError, FlowDirection, FlowResult, FlowStep, Orientation, TransitiveDirection, TypeName,
};
use search::{steps_for_walk, Exclusions, Search};

/// Which analysis a registered graph serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// One-hop flows in the given direction.
    Direct(FlowDirection),
    /// Shortest paths to or from the start type.
    Transitive(TransitiveDirection),
}

/// A registered graph and the state tied to it.
///
/// `index` is the filtered policy the graph was selected from. It is
/// scanned once per handle; continuations grow `graph` from it.
#[derive(Debug)]
pub struct InfoflowSession {
    index: InfoflowGraph,
    graph: InfoflowGraph,
    kind: SessionKind,
    result_filter: Option<ResultFilter>,
    further: Option<FurtherSession>,
}

impl InfoflowSession {
    /// The graph.
    pub fn graph(&self) -> &InfoflowGraph {
        &self.graph
    }

    /// Analysis the graph was built for.
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// In-progress path enumeration, if any.
    pub fn further(&self) -> Option<&FurtherSession> {
        self.further.as_ref()
    }
}

/// Registry of information-flow sessions.
pub type InfoflowRegistry = GraphHandleRegistry<InfoflowSession>;

/// Runs information-flow queries against one policy and permission map.
pub struct InfoflowAnalyzer<'a, P: PolicyDatabase + ?Sized> {
    policy: &'a P,
    permmap: Option<&'a PermissionMap>,
    config: &'a AnalysisConfig,
    registry: &'a mut InfoflowRegistry,
}

impl<'a, P: PolicyDatabase + ?Sized> InfoflowAnalyzer<'a, P> {
    /// Create an analyzer over borrowed session state.
    pub fn new(
        policy: &'a P,
        permmap: Option<&'a PermissionMap>,
        config: &'a AnalysisConfig,
        registry: &'a mut InfoflowRegistry,
    ) -> Self {
        Self {
            policy,
            permmap,
            config,
            registry,
        }
    }

    fn builder(&self) -> Result<GraphBuilder<'a, P>, AnalysisError> {
        GraphBuilder::new(self.policy, self.permmap, self.config)
    }

    /// Flows one hop into and/or out of the start type.
    pub fn analyze_direct(
        &mut self,
        query: &DirectFlowQuery,
    ) -> Result<(Vec<FlowResult>, GraphHandle), AnalysisError> {
        let builder = self.builder()?;
        let start = builder.resolve(&query.start_type)?;
        let criteria = BuildCriteria {
            class_perms: query.class_perms.clone(),
            scope: GraphScope::Direct,
            intermediate: None,
        };
        let index = builder.scan(&criteria);
        let graph = builder.select_from(&index, &start)?;
        let results = direct_results(
            self.policy,
            &graph,
            &start,
            query.direction,
            query.result_filter.as_ref(),
        );

        let handle = self.registry.register(InfoflowSession {
            index,
            graph,
            kind: SessionKind::Direct(query.direction),
            result_filter: query.result_filter.clone(),
            further: None,
        })?;
        tracing::debug!(
            start = %start,
            direction = %query.direction,
            results = results.len(),
            handle = %handle,
            "direct flow analysis"
        );
        Ok((results, handle))
    }

    /// Shortest flow paths to or from the start type.
    pub fn analyze_transitive(
        &mut self,
        query: &TransitiveFlowQuery,
    ) -> Result<(Vec<FlowResult>, GraphHandle), AnalysisError> {
        let builder = self.builder()?;
        let start = builder.resolve(&query.start_type)?;
        let intermediate = query
            .intermediate_types
            .as_ref()
            .map(|names| self.expand_types(names))
            .transpose()?;
        let criteria = BuildCriteria {
            class_perms: query.class_perms.clone(),
            scope: GraphScope::Transitive(query.direction),
            intermediate,
        };
        let index = builder.scan(&criteria);
        let graph = builder.select_from(&index, &start)?;
        let results = transitive_results(
            self.policy,
            &graph,
            &start,
            query.direction,
            query.result_filter.as_ref(),
        );

        let handle = self.registry.register(InfoflowSession {
            index,
            graph,
            kind: SessionKind::Transitive(query.direction),
            result_filter: query.result_filter.clone(),
            further: None,
        })?;
        tracing::debug!(
            start = %start,
            direction = %query.direction,
            results = results.len(),
            handle = %handle,
            "transitive flow analysis"
        );
        Ok((results, handle))
    }

    /// Re-run the handle's analysis from another start type, growing the
    /// graph with its original criteria when needed.
    pub fn continue_from(
        &mut self,
        handle: &GraphHandle,
        new_start: &str,
    ) -> Result<Vec<FlowResult>, AnalysisError> {
        self.registry.resolve(handle)?;
        let builder = self.builder()?;
        let start = builder.resolve(new_start)?;
        let session = self.registry.resolve_mut(handle)?;
        builder.extend(&session.index, &mut session.graph, &start)?;

        let filter = session.result_filter.as_ref();
        let results = match session.kind {
            SessionKind::Direct(direction) => {
                direct_results(self.policy, &session.graph, &start, direction, filter)
            }
            SessionKind::Transitive(direction) => {
                transitive_results(self.policy, &session.graph, &start, direction, filter)
            }
        };
        tracing::debug!(start = %start, handle = %handle, results = results.len(), "continued analysis");
        Ok(results)
    }

    /// Start enumerating alternative paths between two types on a
    /// transitive graph. Replaces any session already attached.
    pub fn prepare_further(
        &mut self,
        handle: &GraphHandle,
        start: &str,
        end: &str,
    ) -> Result<(), AnalysisError> {
        let direction = match self.registry.resolve(handle)?.kind {
            SessionKind::Transitive(direction) => direction,
            SessionKind::Direct(_) => {
                return Err(AnalysisError::query(
                    "alternative paths need a graph built by a transitive analysis",
                ))
            }
        };
        let builder = self.builder()?;
        let start = builder.resolve(start)?;
        let end = builder.resolve(end)?;
        if start == end {
            return Err(AnalysisError::query(format!(
                "start and end of a path search must differ, both are '{start}'"
            )));
        }

        let session = self.registry.resolve_mut(handle)?;
        builder.extend(&session.index, &mut session.graph, &start)?;
        let further = FurtherSession::prepare(
            &session.graph,
            start,
            end,
            direction.orientation(),
            self.config.max_further_candidates,
        );
        tracing::debug!(
            start = %further.start(),
            end = %further.end(),
            seeded = further.pending(),
            "prepared further search"
        );
        session.further = Some(further);
        Ok(())
    }

    /// Next best path of the prepared session; empty once exhausted.
    pub fn next_further(&mut self, handle: &GraphHandle) -> Result<Vec<FlowResult>, AnalysisError> {
        let session = self.registry.resolve_mut(handle)?;
        let direction = match session.kind {
            SessionKind::Transitive(direction) => direction.result_direction(),
            SessionKind::Direct(_) => FlowDirection::Out,
        };
        let InfoflowSession { graph, further, .. } = session;
        let further = further
            .as_mut()
            .ok_or_else(|| AnalysisError::query(format!("no path search prepared on {handle}")))?;

        let Some(path) = further.next(graph)? else {
            return Ok(Vec::new());
        };
        let result = path_result(
            graph,
            &path.walk,
            further.orientation(),
            direction,
            further.start(),
        );
        Ok(result.into_iter().collect())
    }

    /// Discard the handle's path enumeration. Returns whether one existed.
    pub fn abort_further(&mut self, handle: &GraphHandle) -> Result<bool, AnalysisError> {
        let session = self.registry.resolve_mut(handle)?;
        Ok(session.further.take().is_some())
    }

    /// Release the graph and any session state.
    pub fn destroy(&mut self, handle: &GraphHandle) -> Result<(), AnalysisError> {
        self.registry.destroy(handle)?;
        tracing::debug!(handle = %handle, "destroyed graph");
        Ok(())
    }

    fn expand_types(&self, names: &BTreeSet<String>) -> Result<BTreeSet<TypeName>, AnalysisError> {
        let mut types = BTreeSet::new();
        for name in names {
            let expanded = self.policy.expand(name);
            if expanded.is_empty() {
                return Err(AnalysisError::unknown_type(name));
            }
            types.extend(expanded);
        }
        Ok(types)
    }
}

/// One-hop results around `start`.
///
/// `Both` keeps in- and out-results separate; `Either` folds them into a
/// single result per end type whose direction is `Both` when flow goes
/// both ways.
fn direct_results<P: PolicyDatabase + ?Sized>(
    policy: &P,
    graph: &InfoflowGraph,
    start: &TypeName,
    direction: FlowDirection,
    filter: Option<&ResultFilter>,
) -> Vec<FlowResult> {
    let hop = |orientation: Orientation| -> BTreeMap<TypeName, FlowStep> {
        if !graph.contains(start) {
            return BTreeMap::new();
        }
        graph
            .neighbors(start, orientation)
            .filter(|(next, _)| passes(filter, policy, next))
            .map(|(next, edge)| (next.clone(), FlowStep::from(edge)))
            .collect()
    };
    let ins = if direction.wants_in() { hop(Orientation::Backward) } else { BTreeMap::new() };
    let outs = if direction.wants_out() { hop(Orientation::Forward) } else { BTreeMap::new() };

    let single = |dir: FlowDirection, end: &TypeName, step: &FlowStep| {
        FlowResult::from_path(dir, start.clone(), end.clone(), vec![step.clone()])
    };

    let mut results = Vec::new();
    if direction == FlowDirection::Either {
        let ends: BTreeSet<&TypeName> = ins.keys().chain(outs.keys()).collect();
        for end in ends {
            let result = match (ins.get(end), outs.get(end)) {
                (Some(i), Some(o)) => FlowResult {
                    direction: FlowDirection::Both,
                    start_type: start.clone(),
                    end_type: end.clone(),
                    length: i.weight.min(o.weight),
                    steps: vec![i.clone(), o.clone()],
                },
                (Some(i), None) => single(FlowDirection::In, end, i),
                (None, Some(o)) => single(FlowDirection::Out, end, o),
                (None, None) => continue,
            };
            results.push(result);
        }
    } else {
        results.extend(ins.iter().map(|(end, step)| single(FlowDirection::In, end, step)));
        results.extend(outs.iter().map(|(end, step)| single(FlowDirection::Out, end, step)));
        results.sort_by(|a, b| {
            a.end_type
                .cmp(&b.end_type)
                .then_with(|| a.direction.cmp(&b.direction))
        });
    }
    results
}

/// Shortest-path results from `start` to every reachable type.
fn transitive_results<P: PolicyDatabase + ?Sized>(
    policy: &P,
    graph: &InfoflowGraph,
    start: &TypeName,
    direction: TransitiveDirection,
    filter: Option<&ResultFilter>,
) -> Vec<FlowResult> {
    if !graph.contains(start) {
        return Vec::new();
    }
    let orientation = direction.orientation();
    let search = Search {
        graph,
        orientation,
        target: None,
    };
    let paths = search.run(start, |n| graph.criteria().is_passable(n), &Exclusions::default());

    paths
        .reached()
        .filter(|(end, _)| passes(filter, policy, end))
        .filter_map(|(end, _)| {
            let walk = paths.path_to(end)?;
            path_result(graph, &walk, orientation, direction.result_direction(), start)
        })
        .collect()
}

fn path_result(
    graph: &InfoflowGraph,
    walk: &[TypeName],
    orientation: Orientation,
    direction: FlowDirection,
    start: &TypeName,
) -> Option<FlowResult> {
    let end = walk.last()?.clone();
    let steps = steps_for_walk(graph, walk, orientation)?;
    Some(FlowResult::from_path(direction, start.clone(), end, steps))
}
