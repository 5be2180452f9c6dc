//! Analysis queries.
//!
//! Each analysis takes a typed query. Callers that speak the flat
//! parameter records (string modes, nested lists) deserialize a `*Params`
//! record and convert it with `TryFrom`, which is the one place mode
//! strings, class/perm tuples and regular expressions are validated.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::store::PolicyDatabase;
use crate::types::{
    AnalysisError, ClassPermPair, FlowDirection, RelabelMode, TransitionDirection,
    TransitiveDirection, TypeName,
};

/// Compiled result-name filter.
///
/// Matches a type when the pattern matches its canonical name or any of
/// its aliases.
#[derive(Clone)]
pub struct ResultFilter {
    pattern: String,
    regex: Regex,
}

impl ResultFilter {
    /// Compile a filter. An empty pattern means "no filter".
    pub fn parse(pattern: &str) -> Result<Option<Self>, AnalysisError> {
        if pattern.is_empty() {
            return Ok(None);
        }
        let regex = Regex::new(pattern)
            .map_err(|e| AnalysisError::query(format!("invalid regular expression '{pattern}': {e}")))?;
        Ok(Some(Self {
            pattern: pattern.to_string(),
            regex,
        }))
    }

    /// The source pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether a type passes the filter.
    pub fn matches<P: PolicyDatabase + ?Sized>(&self, policy: &P, ty: &TypeName) -> bool {
        self.regex.is_match(ty.as_str())
            || policy.aliases(ty).iter().any(|a| self.regex.is_match(a))
    }
}

impl fmt::Debug for ResultFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResultFilter").field(&self.pattern).finish()
    }
}

/// Apply an optional filter.
pub(crate) fn passes<P: PolicyDatabase + ?Sized>(
    filter: Option<&ResultFilter>,
    policy: &P,
    ty: &TypeName,
) -> bool {
    filter.map_or(true, |f| f.matches(policy, ty))
}

fn parse_class_perms(raw: Vec<Vec<String>>) -> Result<BTreeSet<ClassPermPair>, AnalysisError> {
    raw.into_iter()
        .map(|entry| match <[String; 2]>::try_from(entry) {
            Ok([class, perm]) => Ok(ClassPermPair::new(class, perm)),
            Err(entry) => Err(AnalysisError::query(format!(
                "class/permission entry must have exactly 2 elements, got {}",
                entry.len()
            ))),
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Information flow
// ─────────────────────────────────────────────────────────────────────────────

/// Direct information-flow query.
#[derive(Debug, Clone)]
pub struct DirectFlowQuery {
    /// Flow direction relative to the start type.
    pub direction: FlowDirection,
    /// Type (or alias) to analyse.
    pub start_type: String,
    /// Class/permission filter; empty means every mapped permission.
    pub class_perms: BTreeSet<ClassPermPair>,
    /// Filter on result type names.
    pub result_filter: Option<ResultFilter>,
}

impl DirectFlowQuery {
    /// Create a query with no filters.
    pub fn new(start_type: impl Into<String>, direction: FlowDirection) -> Self {
        Self {
            direction,
            start_type: start_type.into(),
            class_perms: BTreeSet::new(),
            result_filter: None,
        }
    }

    /// Restrict to one class/permission pair (cumulative).
    pub fn with_class_perm(mut self, class: &str, perm: &str) -> Self {
        self.class_perms.insert(ClassPermPair::new(class, perm));
        self
    }

    /// Filter results by regular expression.
    pub fn with_result_regex(mut self, pattern: &str) -> Result<Self, AnalysisError> {
        self.result_filter = ResultFilter::parse(pattern)?;
        Ok(self)
    }
}

/// Flat parameters of a direct information-flow query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectFlowParams {
    /// "in", "out", "either" or "both".
    pub direction: String,
    /// Start type.
    pub start_type: String,
    /// `[class, perm]` entries.
    #[serde(default)]
    pub class_perm_pairs: Vec<Vec<String>>,
    /// Result regex; empty for none.
    #[serde(default)]
    pub result_regex: String,
}

impl TryFrom<DirectFlowParams> for DirectFlowQuery {
    type Error = AnalysisError;

    fn try_from(p: DirectFlowParams) -> Result<Self, Self::Error> {
        let direction = FlowDirection::from_str(&p.direction).ok_or_else(|| {
            AnalysisError::query(format!("unknown direct flow direction '{}'", p.direction))
        })?;
        Ok(Self {
            direction,
            start_type: p.start_type,
            class_perms: parse_class_perms(p.class_perm_pairs)?,
            result_filter: ResultFilter::parse(&p.result_regex)?,
        })
    }
}

/// Transitive information-flow query.
#[derive(Debug, Clone)]
pub struct TransitiveFlowQuery {
    /// Whether flows end at or start from the start type.
    pub direction: TransitiveDirection,
    /// Type (or alias) to analyse.
    pub start_type: String,
    /// Types a path may pass through; `None` means any.
    pub intermediate_types: Option<BTreeSet<String>>,
    /// Class/permission filter; empty means every mapped permission.
    pub class_perms: BTreeSet<ClassPermPair>,
    /// Filter on result type names.
    pub result_filter: Option<ResultFilter>,
}

impl TransitiveFlowQuery {
    /// Create a query with no filters.
    pub fn new(start_type: impl Into<String>, direction: TransitiveDirection) -> Self {
        Self {
            direction,
            start_type: start_type.into(),
            intermediate_types: None,
            class_perms: BTreeSet::new(),
            result_filter: None,
        }
    }

    /// Restrict to one class/permission pair (cumulative).
    pub fn with_class_perm(mut self, class: &str, perm: &str) -> Self {
        self.class_perms.insert(ClassPermPair::new(class, perm));
        self
    }

    /// Allow paths to pass through a type (cumulative).
    pub fn with_intermediate(mut self, ty: &str) -> Self {
        self.intermediate_types
            .get_or_insert_with(BTreeSet::new)
            .insert(ty.to_string());
        self
    }

    /// Filter results by regular expression.
    pub fn with_result_regex(mut self, pattern: &str) -> Result<Self, AnalysisError> {
        self.result_filter = ResultFilter::parse(pattern)?;
        Ok(self)
    }
}

/// Flat parameters of a transitive information-flow query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitiveFlowParams {
    /// "to" or "from".
    pub direction: String,
    /// Start type.
    pub start_type: String,
    /// Types paths may pass through; empty for any.
    #[serde(default)]
    pub intermediate_types: Vec<String>,
    /// `[class, perm]` entries.
    #[serde(default)]
    pub class_perm_pairs: Vec<Vec<String>>,
    /// Result regex; empty for none.
    #[serde(default)]
    pub result_regex: String,
}

impl TryFrom<TransitiveFlowParams> for TransitiveFlowQuery {
    type Error = AnalysisError;

    fn try_from(p: TransitiveFlowParams) -> Result<Self, Self::Error> {
        let direction = TransitiveDirection::from_str(&p.direction).ok_or_else(|| {
            AnalysisError::query(format!("unknown transitive flow direction '{}'", p.direction))
        })?;
        let intermediate_types = if p.intermediate_types.is_empty() {
            None
        } else {
            Some(p.intermediate_types.into_iter().collect())
        };
        Ok(Self {
            direction,
            start_type: p.start_type,
            intermediate_types,
            class_perms: parse_class_perms(p.class_perm_pairs)?,
            result_filter: ResultFilter::parse(&p.result_regex)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Domain transitions
// ─────────────────────────────────────────────────────────────────────────────

/// Domain-transition query.
#[derive(Debug, Clone)]
pub struct DomainTransQuery {
    /// Forward or reverse search.
    pub direction: TransitionDirection,
    /// Domain to start from.
    pub start_type: String,
    /// Object types the resulting domain must reach; empty for any.
    pub access_types: BTreeSet<String>,
    /// Class/permission pairs the resulting domain must hold; empty for any.
    pub class_perms: BTreeSet<ClassPermPair>,
    /// Filter on the resulting domain's name.
    pub result_filter: Option<ResultFilter>,
}

impl DomainTransQuery {
    /// Create a query with no filters.
    pub fn new(start_type: impl Into<String>, direction: TransitionDirection) -> Self {
        Self {
            direction,
            start_type: start_type.into(),
            access_types: BTreeSet::new(),
            class_perms: BTreeSet::new(),
            result_filter: None,
        }
    }

    /// Require access to an object type (cumulative).
    pub fn with_access_type(mut self, ty: &str) -> Self {
        self.access_types.insert(ty.to_string());
        self
    }

    /// Require a class/permission pair (cumulative).
    pub fn with_class_perm(mut self, class: &str, perm: &str) -> Self {
        self.class_perms.insert(ClassPermPair::new(class, perm));
        self
    }

    /// Filter results by regular expression.
    pub fn with_result_regex(mut self, pattern: &str) -> Result<Self, AnalysisError> {
        self.result_filter = ResultFilter::parse(pattern)?;
        Ok(self)
    }

    /// Whether any access filter is set.
    pub fn has_access_filter(&self) -> bool {
        !self.access_types.is_empty() || !self.class_perms.is_empty()
    }
}

/// Flat parameters of a domain-transition query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainTransParams {
    /// "forward" or "reverse".
    pub direction: String,
    /// Start domain.
    pub start_type: String,
    /// Access filter object types.
    #[serde(default)]
    pub access_types: Vec<String>,
    /// `[class, perm]` entries.
    #[serde(default)]
    pub class_perm_pairs: Vec<Vec<String>>,
    /// Result regex; empty for none.
    #[serde(default)]
    pub result_regex: String,
}

impl TryFrom<DomainTransParams> for DomainTransQuery {
    type Error = AnalysisError;

    fn try_from(p: DomainTransParams) -> Result<Self, Self::Error> {
        let direction = TransitionDirection::from_str(&p.direction).ok_or_else(|| {
            AnalysisError::query(format!("unknown domain transition direction '{}'", p.direction))
        })?;
        Ok(Self {
            direction,
            start_type: p.start_type,
            access_types: p.access_types.into_iter().collect(),
            class_perms: parse_class_perms(p.class_perm_pairs)?,
            result_filter: ResultFilter::parse(&p.result_regex)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relabeling
// ─────────────────────────────────────────────────────────────────────────────

/// Relabel query.
#[derive(Debug, Clone)]
pub struct RelabelQuery {
    /// Search mode.
    pub mode: RelabelMode,
    /// Object type, or subject type in subject mode.
    pub start_type: String,
    /// Object classes considered; empty for all.
    pub classes: BTreeSet<String>,
    /// Candidate subjects; empty for all. Ignored in subject mode.
    pub subject_types: BTreeSet<String>,
    /// Filter on result type names.
    pub result_filter: Option<ResultFilter>,
}

impl RelabelQuery {
    /// Create a query with no filters.
    pub fn new(start_type: impl Into<String>, mode: RelabelMode) -> Self {
        Self {
            mode,
            start_type: start_type.into(),
            classes: BTreeSet::new(),
            subject_types: BTreeSet::new(),
            result_filter: None,
        }
    }

    /// Restrict to an object class (cumulative).
    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.insert(class.to_string());
        self
    }

    /// Restrict to a subject type (cumulative).
    pub fn with_subject(mut self, ty: &str) -> Self {
        self.subject_types.insert(ty.to_string());
        self
    }

    /// Filter results by regular expression.
    pub fn with_result_regex(mut self, pattern: &str) -> Result<Self, AnalysisError> {
        self.result_filter = ResultFilter::parse(pattern)?;
        Ok(self)
    }
}

/// Flat parameters of a relabel query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelabelParams {
    /// "to", "from", "both" or "subject".
    pub mode: String,
    /// Start type.
    pub start_type: String,
    /// Object classes.
    #[serde(default)]
    pub classes: Vec<String>,
    /// Candidate subjects.
    #[serde(default)]
    pub subject_types: Vec<String>,
    /// Result regex; empty for none.
    #[serde(default)]
    pub result_regex: String,
}

impl TryFrom<RelabelParams> for RelabelQuery {
    type Error = AnalysisError;

    fn try_from(p: RelabelParams) -> Result<Self, Self::Error> {
        let mode = RelabelMode::from_str(&p.mode)
            .ok_or_else(|| AnalysisError::query(format!("unknown relabel mode '{}'", p.mode)))?;
        Ok(Self {
            mode,
            start_type: p.start_type,
            classes: p.classes.into_iter().collect(),
            subject_types: p.subject_types.into_iter().collect(),
            result_filter: ResultFilter::parse(&p.result_regex)?,
        })
    }
}
