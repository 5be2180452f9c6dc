//! Incremental k-shortest path enumeration between a fixed pair of types.
//!
//! A [`FurtherSession`] holds the state of Yen's algorithm between calls:
//! the paths already handed out and a priority queue of candidate paths
//! ordered by weight. Each [`FurtherSession::next`] pops the best
//! unreturned candidate and queues its deviations. Calls on one session
//! are strictly sequential.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use super::graph::InfoflowGraph;
use super::search::{walk_weight, Exclusions, Search};
use crate::types::{AnalysisError, Orientation, TypeName};

/// A candidate path in walk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CandidatePath {
    pub weight: u32,
    pub walk: Vec<TypeName>,
}

impl Ord for CandidatePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .cmp(&other.weight)
            .then_with(|| self.walk.len().cmp(&other.walk.len()))
            .then_with(|| self.walk.cmp(&other.walk))
    }
}

impl PartialOrd for CandidatePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// State of one "further" enumeration.
#[derive(Debug)]
pub struct FurtherSession {
    start: TypeName,
    end: TypeName,
    orientation: Orientation,
    returned: Vec<Vec<TypeName>>,
    seen: HashSet<Vec<TypeName>>,
    candidates: BinaryHeap<Reverse<CandidatePath>>,
    max_candidates: usize,
}

impl FurtherSession {
    /// Seed a session with the shortest path from `start` to `end`.
    pub(crate) fn prepare(
        graph: &InfoflowGraph,
        start: TypeName,
        end: TypeName,
        orientation: Orientation,
        max_candidates: usize,
    ) -> Self {
        let mut session = Self {
            start,
            end,
            orientation,
            returned: Vec::new(),
            seen: HashSet::new(),
            candidates: BinaryHeap::new(),
            max_candidates,
        };
        let search = Search {
            graph,
            orientation,
            target: Some(&session.end),
        };
        let passable = |n: &TypeName| graph.criteria().is_passable(n);
        let shortest = search
            .run(&session.start, passable, &Exclusions::default())
            .path_to(&session.end);
        if let Some(walk) = shortest {
            if let Some(weight) = walk_weight(graph, &walk, orientation) {
                session.seen.insert(walk.clone());
                session.candidates.push(Reverse(CandidatePath { weight, walk }));
            }
        }
        session
    }

    /// Start type of the enumeration.
    pub fn start(&self) -> &TypeName {
        &self.start
    }

    /// End type of the enumeration.
    pub fn end(&self) -> &TypeName {
        &self.end
    }

    /// Walk orientation.
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Number of paths handed out so far.
    pub fn returned_count(&self) -> usize {
        self.returned.len()
    }

    /// Number of queued candidates.
    pub fn pending(&self) -> usize {
        self.candidates.len()
    }

    /// Pop the next best path, or `None` when exhausted.
    ///
    /// On an allocation error the session is left exactly as it was.
    pub(crate) fn next(&mut self, graph: &InfoflowGraph) -> Result<Option<CandidatePath>, AnalysisError> {
        let Some(Reverse(best)) = self.candidates.peek().cloned() else {
            return Ok(None);
        };

        let deviations = self.deviations(graph, &best);
        let queued = self.candidates.len() - 1 + deviations.len();
        if queued > self.max_candidates {
            return Err(AnalysisError::Allocation(format!(
                "path enumeration from {} to {} would queue {queued} candidates, limit is {}",
                self.start, self.end, self.max_candidates
            )));
        }

        self.candidates.pop();
        self.returned.push(best.walk.clone());
        for candidate in deviations {
            self.seen.insert(candidate.walk.clone());
            self.candidates.push(Reverse(candidate));
        }
        tracing::debug!(
            start = %self.start,
            end = %self.end,
            weight = best.weight,
            returned = self.returned.len(),
            pending = self.candidates.len(),
            "next further path"
        );
        Ok(Some(best))
    }

    /// Spur paths deviating from `path`, not yet seen.
    fn deviations(&self, graph: &InfoflowGraph, path: &CandidatePath) -> Vec<CandidatePath> {
        let mut found: Vec<CandidatePath> = Vec::new();
        let passable = |n: &TypeName| graph.criteria().is_passable(n);

        for spur_idx in 0..path.walk.len().saturating_sub(1) {
            let spur_node = &path.walk[spur_idx];
            let root = &path.walk[..=spur_idx];

            let mut exclusions = Exclusions::default();
            let earlier = self.returned.iter().chain(std::iter::once(&path.walk));
            for prior in earlier {
                if prior.len() > spur_idx + 1 && &prior[..=spur_idx] == root {
                    exclusions
                        .edges
                        .insert((prior[spur_idx].clone(), prior[spur_idx + 1].clone()));
                }
            }
            exclusions.nodes.extend(root[..spur_idx].iter().cloned());

            let search = Search {
                graph,
                orientation: self.orientation,
                target: Some(&self.end),
            };
            let Some(spur) = search.run(spur_node, passable, &exclusions).path_to(&self.end) else {
                continue;
            };

            let mut walk = root[..spur_idx].to_vec();
            walk.extend(spur);
            if self.seen.contains(&walk) {
                continue;
            }
            if let Some(weight) = walk_weight(graph, &walk, self.orientation) {
                found.push(CandidatePath { weight, walk });
            }
        }

        found.sort();
        found.dedup_by(|a, b| a.walk == b.walk);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::infoflow::graph::{BuildCriteria, GraphBuilder};
    use crate::permmap::{PermDirection, PermissionMap};
    use crate::store::InMemoryPolicy;

    /// a → b → d (3 + 3), a → c → d (2 + 4), a → d (9), b → c (1)
    fn graph() -> InfoflowGraph {
        let map = PermissionMap::new()
            .with("file", "w1", PermDirection::Write, 1)
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
        p.allow("b_t", "c_t", "file", &["w1"]);
        let config = AnalysisConfig::default();
        GraphBuilder::new(&p, Some(&map), &config)
            .unwrap()
            .build(BuildCriteria::unrestricted(Default::default()), None)
            .unwrap()
    }

    fn drain(session: &mut FurtherSession, graph: &InfoflowGraph) -> Vec<CandidatePath> {
        let mut out = Vec::new();
        while let Some(p) = session.next(graph).unwrap() {
            out.push(p);
        }
        out
    }

    #[test]
    fn test_enumerates_all_simple_paths_in_weight_order() {
        let graph = graph();
        let mut session =
            FurtherSession::prepare(&graph, "a_t".into(), "d_t".into(), Orientation::Forward, 100);
        let paths = drain(&mut session, &graph);

        let weights: Vec<u32> = paths.iter().map(|p| p.weight).collect();
        // a-b-d 6, a-c-d 6, a-b-c-d 8, a-d 9
        assert_eq!(weights, vec![6, 6, 8, 9]);
        let unique: HashSet<_> = paths.iter().map(|p| p.walk.clone()).collect();
        assert_eq!(unique.len(), paths.len());
        assert_eq!(session.returned_count(), 4);
    }

    #[test]
    fn test_no_path_is_exhausted_immediately() {
        let graph = graph();
        let mut session =
            FurtherSession::prepare(&graph, "d_t".into(), "a_t".into(), Orientation::Forward, 100);
        assert!(session.next(&graph).unwrap().is_none());
    }

    #[test]
    fn test_candidate_limit_leaves_session_untouched() {
        let graph = graph();
        let mut session =
            FurtherSession::prepare(&graph, "a_t".into(), "d_t".into(), Orientation::Forward, 1);
        let err = session.next(&graph).unwrap_err();
        assert!(matches!(err, AnalysisError::Allocation(_)));
        assert_eq!(session.returned_count(), 0);
        assert_eq!(session.pending(), 1);
    }

    #[test]
    fn test_backward_orientation() {
        let graph = graph();
        let mut session =
            FurtherSession::prepare(&graph, "d_t".into(), "a_t".into(), Orientation::Backward, 100);
        let paths = drain(&mut session, &graph);
        assert_eq!(paths.len(), 4);
        assert_eq!(paths[0].walk.first().unwrap().as_str(), "d_t");
    }
}
