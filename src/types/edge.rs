//! Information-flow edges.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::names::{RuleId, TypeName};

/// Orientation used when walking the flow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    /// Follow edges from source to target (information leaving the start).
    Forward,
    /// Follow edges from target to source (information reaching the start).
    Backward,
}

/// A directed flow edge between two concrete types.
///
/// Information flows from `source` to `target`. Several rules between the
/// same ordered pair merge into one edge that keeps the minimum weight and
/// the union of rule references.
///
/// Implements `Ord` for deterministic ordering: (source, target).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Type information flows out of.
    pub source: TypeName,
    /// Type information flows into.
    pub target: TypeName,
    /// Minimum weight among contributing rules.
    pub weight: u32,
    /// Contributing rules, ordered and unique.
    pub rules: BTreeSet<RuleId>,
}

impl Edge {
    /// Create an edge carrying a single rule.
    pub fn new(source: TypeName, target: TypeName, weight: u32, rule: RuleId) -> Self {
        let mut rules = BTreeSet::new();
        rules.insert(rule);
        Self {
            source,
            target,
            weight,
            rules,
        }
    }

    /// Merge another contribution into this edge.
    pub fn merge(&mut self, weight: u32, rules: impl IntoIterator<Item = RuleId>) {
        self.weight = self.weight.min(weight);
        self.rules.extend(rules);
    }

    /// Ordered pair key of this edge.
    pub fn key(&self) -> (TypeName, TypeName) {
        (self.source.clone(), self.target.clone())
    }
}

// Canonical ordering: source, then target
impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.source.cmp(&other.source) {
            std::cmp::Ordering::Equal => self.target.cmp(&other.target),
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_minimum_weight_and_unions_rules() {
        let mut edge = Edge::new("a_t".into(), "b_t".into(), 5, RuleId::new(1));
        edge.merge(3, [RuleId::new(2)]);
        edge.merge(9, [RuleId::new(1), RuleId::new(4)]);

        assert_eq!(edge.weight, 3);
        let rules: Vec<u32> = edge.rules.iter().map(|r| r.as_u32()).collect();
        assert_eq!(rules, vec![1, 2, 4]);
    }

    #[test]
    fn test_edge_ordering() {
        let e1 = Edge::new("a_t".into(), "b_t".into(), 1, RuleId::new(0));
        let e2 = Edge::new("a_t".into(), "c_t".into(), 1, RuleId::new(0));
        let e3 = Edge::new("b_t".into(), "a_t".into(), 1, RuleId::new(0));

        // Same source, different target
        assert!(e1 < e2);
        // Different source
        assert!(e2 < e3);
    }
}
