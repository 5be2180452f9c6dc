//! Domain-transition and relabel result types.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::names::{RuleId, TypeName};

/// Direction of a domain-transition search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionDirection {
    /// Domains the start domain can transition into.
    Forward,
    /// Domains that can transition into the start domain.
    Reverse,
}

impl TransitionDirection {
    /// Parse a direction from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "forward" => Some(Self::Forward),
            "reverse" => Some(Self::Reverse),
            _ => None,
        }
    }
}

impl fmt::Display for TransitionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Reverse => write!(f, "reverse"),
        }
    }
}

/// One valid domain transition and the rules that make it possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainTransResult {
    /// Domain the process starts in.
    pub source_type: TypeName,
    /// Domain the process ends up in.
    pub target_type: TypeName,
    /// Executable file type used as the entrypoint.
    pub entrypoint_type: TypeName,
    /// `process:transition` rules from source to target.
    pub proc_trans_rules: Vec<RuleId>,
    /// `file:entrypoint` rules on the entrypoint type.
    pub entrypoint_rules: Vec<RuleId>,
    /// `file:execute` rules on the entrypoint type.
    pub exec_rules: Vec<RuleId>,
    /// `process:setexec` rules held by the source domain.
    pub setexec_rules: Vec<RuleId>,
    /// `type_transition` rules naming the target as default.
    pub type_trans_rules: Vec<RuleId>,
    /// Access rules that satisfied the caller's access filter.
    pub access_rules: Vec<RuleId>,
}

/// Mode of a relabel search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelabelMode {
    /// Subjects that can relabel objects to the start type.
    To,
    /// Subjects that can relabel objects from the start type.
    From,
    /// Subjects that can relabel objects to or from the start type.
    Both,
    /// Relabel capability of the start type as a subject.
    Subject,
}

impl RelabelMode {
    /// Parse a mode from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "to" => Some(Self::To),
            "from" => Some(Self::From),
            "both" => Some(Self::Both),
            "subject" => Some(Self::Subject),
            _ => None,
        }
    }
}

impl fmt::Display for RelabelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::To => write!(f, "to"),
            Self::From => write!(f, "from"),
            Self::Both => write!(f, "both"),
            Self::Subject => write!(f, "subject"),
        }
    }
}

/// Relabel rules for one subject, split into three disjoint groups.
///
/// A rule lands in `both_rules` when the subject can relabel the same
/// object type in both directions, even if that takes two separate rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelabelResult {
    /// Rules granting only `relabelto`.
    pub to_rules: Vec<RuleId>,
    /// Rules granting only `relabelfrom`.
    pub from_rules: Vec<RuleId>,
    /// Rules taking part in a two-way relabel.
    pub both_rules: Vec<RuleId>,
    /// Subject holding the rules.
    pub subject_type: TypeName,
}

impl RelabelResult {
    /// Whether the result carries any rule at all.
    pub fn is_empty(&self) -> bool {
        self.to_rules.is_empty() && self.from_rules.is_empty() && self.both_rules.is_empty()
    }
}
