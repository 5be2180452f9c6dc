//! Permission maps: (class, permission) → flow direction and weight.

pub mod parser;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::canonical::canonical_hash_hex;

pub use parser::PermMapError;

/// Lowest weight a permission can carry.
pub const MIN_WEIGHT: u32 = 1;
/// Highest weight a permission can carry.
pub const MAX_WEIGHT: u32 = 10;

/// Information-flow direction of a permission, from the subject's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PermDirection {
    /// Subject reads the object: flow from target to source.
    Read,
    /// Subject writes the object: flow from source to target.
    Write,
    /// Flow in both directions.
    Both,
    /// No information flow.
    None,
}

impl PermDirection {
    /// Parse the single-letter map notation.
    pub fn from_letter(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "r" => Some(Self::Read),
            "w" => Some(Self::Write),
            "b" => Some(Self::Both),
            "n" => Some(Self::None),
            _ => None,
        }
    }

    /// Whether the permission moves information from object to subject.
    pub fn flows_in(&self) -> bool {
        matches!(self, Self::Read | Self::Both)
    }

    /// Whether the permission moves information from subject to object.
    pub fn flows_out(&self) -> bool {
        matches!(self, Self::Write | Self::Both)
    }
}

impl fmt::Display for PermDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "r"),
            Self::Write => write!(f, "w"),
            Self::Both => write!(f, "b"),
            Self::None => write!(f, "n"),
        }
    }
}

/// Mapping of one permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermMapping {
    /// Flow direction.
    pub direction: PermDirection,
    /// Weight within `[MIN_WEIGHT, MAX_WEIGHT]`.
    pub weight: u32,
}

/// Clamp a weight into the permitted range.
pub fn clamp_weight(weight: u32) -> u32 {
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// A loaded permission map.
///
/// Uses BTreeMap for deterministic iteration and fingerprints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionMap {
    classes: BTreeMap<String, BTreeMap<String, PermMapping>>,
}

impl PermissionMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a mapping. The weight is clamped into range.
    pub fn insert(
        &mut self,
        class: impl Into<String>,
        perm: impl Into<String>,
        direction: PermDirection,
        weight: u32,
    ) -> &mut Self {
        self.classes.entry(class.into()).or_default().insert(
            perm.into(),
            PermMapping {
                direction,
                weight: clamp_weight(weight),
            },
        );
        self
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(
        mut self,
        class: impl Into<String>,
        perm: impl Into<String>,
        direction: PermDirection,
        weight: u32,
    ) -> Self {
        self.insert(class, perm, direction, weight);
        self
    }

    /// Look up a mapping.
    pub fn get(&self, class: &str, perm: &str) -> Option<PermMapping> {
        self.classes.get(class)?.get(perm).copied()
    }

    /// Look up a mapping that actually carries flow.
    pub fn flow(&self, class: &str, perm: &str) -> Option<PermMapping> {
        self.get(class, perm)
            .filter(|m| m.direction != PermDirection::None)
    }

    /// Mapped classes, ordered.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Mappings of one class, ordered by permission.
    pub fn class_perms(&self, class: &str) -> impl Iterator<Item = (&str, PermMapping)> {
        self.classes
            .get(class)
            .into_iter()
            .flat_map(|perms| perms.iter().map(|(p, m)| (p.as_str(), *m)))
    }

    /// Number of mapped permissions.
    pub fn len(&self) -> usize {
        self.classes.values().map(BTreeMap::len).sum()
    }

    /// Whether nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content fingerprint; identical maps have identical fingerprints.
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        canonical_hash_hex(&self.classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_are_clamped() {
        let map = PermissionMap::new()
            .with("file", "write", PermDirection::Write, 42)
            .with("file", "getattr", PermDirection::Read, 0);

        assert_eq!(map.get("file", "write").unwrap().weight, MAX_WEIGHT);
        assert_eq!(map.get("file", "getattr").unwrap().weight, MIN_WEIGHT);
    }

    #[test]
    fn test_none_direction_carries_no_flow() {
        let map = PermissionMap::new().with("process", "signull", PermDirection::None, 1);
        assert!(map.get("process", "signull").is_some());
        assert!(map.flow("process", "signull").is_none());
        assert!(map.flow("process", "sigkill").is_none());
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let a = PermissionMap::new()
            .with("file", "read", PermDirection::Read, 10)
            .with("dir", "search", PermDirection::Read, 1);
        let b = PermissionMap::new()
            .with("dir", "search", PermDirection::Read, 1)
            .with("file", "read", PermDirection::Read, 10);
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let c = b.with("file", "write", PermDirection::Write, 10);
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }
}
