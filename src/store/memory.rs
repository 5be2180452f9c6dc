//! In-memory policy database.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{RuleId, TypeName};
use super::{AvRule, AvRuleKind, Conditional, PolicyDatabase, TeRule, TeRuleKind};

/// In-memory policy database.
///
/// Uses BTreeMap/BTreeSet for deterministic iteration order. Rule
/// references are assigned in insertion order across both rule tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPolicy {
    /// Concrete types by primary name, with their attributes.
    types: BTreeMap<String, BTreeSet<String>>,
    /// Alias -> primary name.
    aliases: BTreeMap<String, String>,
    /// Attribute -> member types.
    attributes: BTreeMap<String, BTreeSet<String>>,
    /// Conditional booleans and their current values.
    booleans: BTreeMap<String, bool>,
    av_rules: Vec<AvRule>,
    te_rules: Vec<TeRule>,
    next_rule: u32,
}

impl InMemoryPolicy {
    /// Create a new empty policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a concrete type.
    pub fn add_type(&mut self, name: &str) -> &mut Self {
        self.types.entry(name.to_string()).or_default();
        self
    }

    /// Declare an alias for an existing type.
    pub fn add_alias(&mut self, primary: &str, alias: &str) -> &mut Self {
        self.add_type(primary);
        self.aliases.insert(alias.to_string(), primary.to_string());
        self
    }

    /// Declare an attribute and assign it to member types.
    pub fn add_attribute(&mut self, attribute: &str, members: &[&str]) -> &mut Self {
        let set = self.attributes.entry(attribute.to_string()).or_default();
        for member in members {
            set.insert(member.to_string());
        }
        for member in members {
            self.types
                .entry(member.to_string())
                .or_default()
                .insert(attribute.to_string());
        }
        self
    }

    /// Declare a conditional boolean with its initial value.
    pub fn add_boolean(&mut self, name: &str, value: bool) -> &mut Self {
        self.booleans.insert(name.to_string(), value);
        self
    }

    fn next_id(&mut self) -> RuleId {
        let id = RuleId::new(self.next_rule);
        self.next_rule += 1;
        id
    }

    /// Add an access-vector rule.
    pub fn add_av_rule(
        &mut self,
        kind: AvRuleKind,
        source: &str,
        target: &str,
        class: &str,
        perms: &[&str],
        conditional: Option<Conditional>,
    ) -> RuleId {
        let id = self.next_id();
        self.av_rules.push(AvRule {
            id,
            kind,
            source: source.to_string(),
            target: target.to_string(),
            class: class.to_string(),
            perms: perms.iter().map(|p| p.to_string()).collect(),
            conditional,
        });
        id
    }

    /// Add an unconditional `allow` rule.
    pub fn allow(&mut self, source: &str, target: &str, class: &str, perms: &[&str]) -> RuleId {
        self.add_av_rule(AvRuleKind::Allow, source, target, class, perms, None)
    }

    /// Add a type-enforcement labeling rule.
    pub fn add_te_rule(
        &mut self,
        kind: TeRuleKind,
        source: &str,
        target: &str,
        class: &str,
        default_type: &str,
        conditional: Option<Conditional>,
    ) -> RuleId {
        let id = self.next_id();
        self.te_rules.push(TeRule {
            id,
            kind,
            source: source.to_string(),
            target: target.to_string(),
            class: class.to_string(),
            default_type: default_type.to_string(),
            conditional,
        });
        id
    }

    /// Add an unconditional `type_transition` rule.
    pub fn type_transition(
        &mut self,
        source: &str,
        target: &str,
        class: &str,
        default_type: &str,
    ) -> RuleId {
        self.add_te_rule(TeRuleKind::TypeTransition, source, target, class, default_type, None)
    }

    /// Look up an access-vector rule by reference.
    pub fn av_rule(&self, id: RuleId) -> Option<&AvRule> {
        self.av_rules
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.av_rules[i])
    }

    /// Look up a labeling rule by reference.
    pub fn te_rule(&self, id: RuleId) -> Option<&TeRule> {
        self.te_rules
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.te_rules[i])
    }

    /// Render a rule as policy source text.
    pub fn render_rule(&self, id: RuleId) -> Option<String> {
        if let Some(rule) = self.av_rule(id) {
            let perms: Vec<&str> = rule.perms.iter().map(String::as_str).collect();
            let perms = if perms.len() == 1 {
                perms[0].to_string()
            } else {
                format!("{{ {} }}", perms.join(" "))
            };
            return Some(format!(
                "{} {} {}:{} {};",
                rule.kind, rule.source, rule.target, rule.class, perms
            ));
        }
        self.te_rule(id).map(|rule| {
            format!(
                "{} {} {}:{} {};",
                rule.kind, rule.source, rule.target, rule.class, rule.default_type
            )
        })
    }

    /// Number of types.
    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    /// Number of rules of all kinds.
    pub fn num_rules(&self) -> usize {
        self.av_rules.len() + self.te_rules.len()
    }

    /// Whether a name is a declared boolean.
    pub fn has_boolean(&self, name: &str) -> bool {
        self.booleans.contains_key(name)
    }
}

impl PolicyDatabase for InMemoryPolicy {
    fn resolve_type(&self, name: &str) -> Option<TypeName> {
        if self.types.contains_key(name) {
            return Some(TypeName::new(name));
        }
        self.aliases.get(name).map(|primary| TypeName::new(primary.as_str()))
    }

    fn is_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    fn aliases(&self, ty: &TypeName) -> Vec<String> {
        self.aliases
            .iter()
            .filter(|(_, primary)| primary.as_str() == ty.as_str())
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    fn types(&self) -> Vec<TypeName> {
        self.types.keys().map(|t| TypeName::new(t.as_str())).collect()
    }

    fn expand(&self, symbol: &str) -> BTreeSet<TypeName> {
        if let Some(ty) = self.resolve_type(symbol) {
            let mut set = BTreeSet::new();
            set.insert(ty);
            return set;
        }
        self.attributes
            .get(symbol)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|m| self.resolve_type(m))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn av_rules(&self) -> &[AvRule] {
        &self.av_rules
    }

    fn te_rules(&self) -> &[TeRule] {
        &self.te_rules
    }

    fn boolean(&self, name: &str) -> Option<bool> {
        self.booleans.get(name).copied()
    }

    fn set_boolean(&mut self, name: &str, value: bool) -> bool {
        match self.booleans.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}
