//! Information-flow query directions and results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::edge::{Edge, Orientation};
use super::names::{RuleId, TypeName};

/// Direction of a direct flow query, and of a flow result.
///
/// Results only ever carry `In`, `Out` or `Both`; `Either` is a query mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    /// Information flowing into the start type.
    In,
    /// Information flowing out of the start type.
    Out,
    /// Either direction, one result per end type.
    Either,
    /// Both directions, one result per end type and direction.
    Both,
}

impl FlowDirection {
    /// Parse a direction from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            "either" => Some(Self::Either),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    /// Whether in-flows are part of this query.
    pub fn wants_in(&self) -> bool {
        !matches!(self, Self::Out)
    }

    /// Whether out-flows are part of this query.
    pub fn wants_out(&self) -> bool {
        !matches!(self, Self::In)
    }
}

impl fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "in"),
            Self::Out => write!(f, "out"),
            Self::Either => write!(f, "either"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// Direction of a transitive flow query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitiveDirection {
    /// Flows that end at the start type.
    To,
    /// Flows that originate at the start type.
    From,
}

impl TransitiveDirection {
    /// Parse a direction from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "to" => Some(Self::To),
            "from" => Some(Self::From),
            _ => None,
        }
    }

    /// Walk orientation for the search.
    pub fn orientation(&self) -> Orientation {
        match self {
            Self::To => Orientation::Backward,
            Self::From => Orientation::Forward,
        }
    }

    /// Direction reported on results.
    pub fn result_direction(&self) -> FlowDirection {
        match self {
            Self::To => FlowDirection::In,
            Self::From => FlowDirection::Out,
        }
    }
}

impl fmt::Display for TransitiveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::To => write!(f, "to"),
            Self::From => write!(f, "from"),
        }
    }
}

/// One edge traversal, always oriented in the direction information flows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStep {
    /// Type the information leaves.
    pub start_type: TypeName,
    /// Type the information reaches.
    pub end_type: TypeName,
    /// Edge weight.
    pub weight: u32,
    /// Rules that produced the edge.
    pub rule_refs: Vec<RuleId>,
}

impl From<&Edge> for FlowStep {
    fn from(edge: &Edge) -> Self {
        Self {
            start_type: edge.source.clone(),
            end_type: edge.target.clone(),
            weight: edge.weight,
            rule_refs: edge.rules.iter().copied().collect(),
        }
    }
}

/// A flow between the queried start type and one end type.
///
/// Steps are in flow order: for an `Out` result the first step leaves
/// `start_type`; for an `In` result the first step leaves `end_type`.
/// For transitive results `length` is the sum of step weights. Direct
/// results have one step per flow direction and report the lightest one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResult {
    /// Direction of the flow relative to the start type.
    pub direction: FlowDirection,
    /// The queried type.
    pub start_type: TypeName,
    /// The type found.
    pub end_type: TypeName,
    /// Path length.
    pub length: u32,
    /// Steps in flow order.
    pub steps: Vec<FlowStep>,
}

impl FlowResult {
    /// Build a transitive result from steps already in flow order.
    pub fn from_path(
        direction: FlowDirection,
        start_type: TypeName,
        end_type: TypeName,
        steps: Vec<FlowStep>,
    ) -> Self {
        let length = steps.iter().map(|s| s.weight).sum();
        Self {
            direction,
            start_type,
            end_type,
            length,
            steps,
        }
    }

    /// Union of the rule references of every step, ordered.
    pub fn rule_refs(&self) -> Vec<RuleId> {
        let refs: BTreeSet<RuleId> = self
            .steps
            .iter()
            .flat_map(|s| s.rule_refs.iter().copied())
            .collect();
        refs.into_iter().collect()
    }

    /// Ordered type sequence visited by the steps.
    pub fn type_sequence(&self) -> Vec<TypeName> {
        let mut seq = Vec::with_capacity(self.steps.len() + 1);
        if let Some(first) = self.steps.first() {
            seq.push(first.start_type.clone());
        }
        seq.extend(self.steps.iter().map(|s| s.end_type.clone()));
        seq
    }
}

/// Flat record for a direct flow result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectFlowRecord {
    /// Direction of the flow.
    pub direction: FlowDirection,
    /// The queried type.
    pub start_type: TypeName,
    /// The type found.
    pub end_type: TypeName,
    /// Every rule contributing to the flow.
    pub rule_refs: Vec<RuleId>,
}

impl From<&FlowResult> for DirectFlowRecord {
    fn from(result: &FlowResult) -> Self {
        Self {
            direction: result.direction,
            start_type: result.start_type.clone(),
            end_type: result.end_type.clone(),
            rule_refs: result.rule_refs(),
        }
    }
}
