//! Identifier types shared by every analysis.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical name of a concrete policy type.
///
/// Aliases are resolved to the primary name before a `TypeName` is built,
/// and attributes never become a `TypeName`. Ordering is lexicographic,
/// which is what every deterministic tie-break in the crate relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(String);

impl TypeName {
    /// Wrap an already-canonical type name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TypeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque, policy-relative reference to a rule.
///
/// The analyses only collect and return these; rendering a rule is the
/// caller's business (see [`crate::store::InMemoryPolicy::render_rule`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(u32);

impl RuleId {
    /// Create a rule reference from its raw index.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw index of the rule.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// An (object class, permission) pair used as a rule filter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassPermPair {
    /// Object class name.
    pub class: String,
    /// Permission name.
    pub perm: String,
}

impl ClassPermPair {
    /// Create a new pair.
    pub fn new(class: impl Into<String>, perm: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            perm: perm.into(),
        }
    }
}

impl fmt::Display for ClassPermPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.perm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_ordering_is_lexicographic() {
        let a = TypeName::from("httpd_log_t");
        let b = TypeName::from("httpd_t");
        assert!(a < b);
    }

    #[test]
    fn test_rule_id_serializes_as_number() {
        let json = serde_json::to_string(&RuleId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
