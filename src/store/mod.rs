//! Policy database access.
//!
//! The analyses never parse policy files themselves; they read a compiled
//! policy through [`PolicyDatabase`]. [`InMemoryPolicy`] is the bundled
//! implementation, built programmatically or from a JSON fixture.

pub mod memory;
pub mod fixture;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::types::{RuleId, TypeName};

/// Rule target keyword meaning "the rule's own source type".
pub const SELF_TARGET: &str = "self";

/// Kind of an access-vector rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvRuleKind {
    /// Grants access.
    Allow,
    /// Audits granted access.
    AuditAllow,
    /// Suppresses denial audits.
    DontAudit,
    /// Compile-time assertion.
    NeverAllow,
}

impl fmt::Display for AvRuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::AuditAllow => write!(f, "auditallow"),
            Self::DontAudit => write!(f, "dontaudit"),
            Self::NeverAllow => write!(f, "neverallow"),
        }
    }
}

/// Kind of a type-enforcement labeling rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeRuleKind {
    /// Default type on object creation or process exec.
    TypeTransition,
    /// Default type on relabel.
    TypeChange,
    /// Default type for polyinstantiated members.
    TypeMember,
}

impl fmt::Display for TeRuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeTransition => write!(f, "type_transition"),
            Self::TypeChange => write!(f, "type_change"),
            Self::TypeMember => write!(f, "type_member"),
        }
    }
}

/// Guard placing a rule in one branch of a boolean conditional.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conditional {
    /// Controlling boolean.
    pub boolean: String,
    /// Branch the rule sits in: active when the boolean equals this value.
    pub branch: bool,
}

/// An access-vector rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvRule {
    /// Opaque reference handed back to callers.
    pub id: RuleId,
    /// Rule kind.
    pub kind: AvRuleKind,
    /// Source type or attribute.
    pub source: String,
    /// Target type, attribute or `self`.
    pub target: String,
    /// Object class.
    pub class: String,
    /// Granted permissions.
    pub perms: BTreeSet<String>,
    /// Conditional guard, if any.
    pub conditional: Option<Conditional>,
}

impl AvRule {
    /// Whether the rule lists a permission.
    pub fn grants(&self, perm: &str) -> bool {
        self.perms.contains(perm)
    }
}

/// A type-enforcement labeling rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeRule {
    /// Opaque reference handed back to callers.
    pub id: RuleId,
    /// Rule kind.
    pub kind: TeRuleKind,
    /// Source type or attribute.
    pub source: String,
    /// Target type, attribute or `self`.
    pub target: String,
    /// Object class.
    pub class: String,
    /// Default type.
    pub default_type: String,
    /// Conditional guard, if any.
    pub conditional: Option<Conditional>,
}

/// Read access to a compiled policy.
///
/// Implementations must return deterministic orderings: rule slices in
/// policy order, type sets sorted.
pub trait PolicyDatabase {
    /// Resolve a type name or alias to its canonical concrete type.
    ///
    /// Returns `None` for attributes and unknown names.
    fn resolve_type(&self, name: &str) -> Option<TypeName>;

    /// Whether the name is a type attribute.
    fn is_attribute(&self, name: &str) -> bool;

    /// Aliases of a concrete type.
    fn aliases(&self, ty: &TypeName) -> Vec<String>;

    /// Every concrete type, sorted.
    fn types(&self) -> Vec<TypeName>;

    /// Expand a type, alias or attribute to concrete types.
    fn expand(&self, symbol: &str) -> BTreeSet<TypeName>;

    /// All access-vector rules.
    fn av_rules(&self) -> &[AvRule];

    /// All type-enforcement labeling rules.
    fn te_rules(&self) -> &[TeRule];

    /// Current value of a conditional boolean.
    fn boolean(&self, name: &str) -> Option<bool>;

    /// Set a conditional boolean. Returns `false` if the boolean is unknown.
    fn set_boolean(&mut self, name: &str, value: bool) -> bool;

    /// Whether a rule guarded by `conditional` is currently in effect.
    fn is_active(&self, conditional: Option<&Conditional>) -> bool {
        match conditional {
            None => true,
            Some(cond) => self.boolean(&cond.boolean) == Some(cond.branch),
        }
    }

    /// `allow` rules currently in effect, in policy order.
    fn active_allow_rules(&self) -> Vec<&AvRule> {
        self.av_rules()
            .iter()
            .filter(|r| r.kind == AvRuleKind::Allow && self.is_active(r.conditional.as_ref()))
            .collect()
    }

    /// Labeling rules of one kind currently in effect, in policy order.
    fn active_te_rules(&self, kind: TeRuleKind) -> Vec<&TeRule> {
        self.te_rules()
            .iter()
            .filter(|r| r.kind == kind && self.is_active(r.conditional.as_ref()))
            .collect()
    }

    /// Concrete (source, target) pairs covered by a rule's type fields.
    ///
    /// A `self` target pairs each source type with itself.
    fn rule_pairs(&self, source: &str, target: &str) -> Vec<(TypeName, TypeName)> {
        let sources = self.expand(source);
        if target == SELF_TARGET {
            return sources.into_iter().map(|s| (s.clone(), s)).collect();
        }
        let targets = self.expand(target);
        let mut pairs = Vec::with_capacity(sources.len() * targets.len());
        for s in &sources {
            for t in &targets {
                pairs.push((s.clone(), t.clone()));
            }
        }
        pairs
    }

    /// Whether a rule's source field covers `ty`.
    fn source_covers(&self, source: &str, ty: &TypeName) -> bool {
        self.expand(source).contains(ty)
    }

    /// Whether a rule's target field covers `ty` for the given subject.
    fn target_covers(&self, target: &str, subject: &TypeName, ty: &TypeName) -> bool {
        if target == SELF_TARGET {
            return subject == ty;
        }
        self.expand(target).contains(ty)
    }
}

pub use memory::InMemoryPolicy;
pub use fixture::PolicyLoadError;
