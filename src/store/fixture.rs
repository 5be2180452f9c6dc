//! JSON policy fixtures.
//!
//! ```json
//! {
//!   "types": [{ "name": "httpd_t", "aliases": ["apache_t"], "attributes": ["domain"] }],
//!   "booleans": { "httpd_enable_cgi": false },
//!   "rules": [
//!     { "kind": "allow", "source": "httpd_t", "target": "httpd_log_t",
//!       "class": "file", "perms": ["write"] },
//!     { "kind": "type_transition", "source": "init_t", "target": "httpd_exec_t",
//!       "class": "process", "default": "httpd_t" }
//!   ]
//! }
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::memory::InMemoryPolicy;
use super::{AvRuleKind, Conditional, TeRuleKind, SELF_TARGET};
use crate::types::AnalysisError;

/// Error type for fixture loading.
#[derive(Debug, thiserror::Error)]
pub enum PolicyLoadError {
    /// File could not be read.
    #[error("Cannot read policy fixture: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON.
    #[error("Malformed policy fixture: {0}")]
    Json(#[from] serde_json::Error),
    /// A rule names a type or attribute that was never declared.
    #[error("Rule {index} references undeclared symbol '{symbol}'")]
    UndeclaredSymbol {
        /// Position of the rule in the fixture.
        index: usize,
        /// The unknown name.
        symbol: String,
    },
    /// A rule is guarded by an undeclared boolean.
    #[error("Rule {index} references undeclared boolean '{boolean}'")]
    UndeclaredBoolean {
        /// Position of the rule in the fixture.
        index: usize,
        /// The unknown boolean.
        boolean: String,
    },
}

impl From<PolicyLoadError> for AnalysisError {
    fn from(e: PolicyLoadError) -> Self {
        AnalysisError::Configuration(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TypeDecl {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    attributes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RuleDecl {
    Allow(AvDecl),
    Auditallow(AvDecl),
    Dontaudit(AvDecl),
    Neverallow(AvDecl),
    TypeTransition(TeDecl),
    TypeChange(TeDecl),
    TypeMember(TeDecl),
}

#[derive(Debug, Deserialize)]
struct AvDecl {
    source: String,
    target: String,
    class: String,
    perms: Vec<String>,
    #[serde(default)]
    conditional: Option<Conditional>,
}

#[derive(Debug, Deserialize)]
struct TeDecl {
    source: String,
    target: String,
    class: String,
    default: String,
    #[serde(default)]
    conditional: Option<Conditional>,
}

#[derive(Debug, Deserialize)]
struct PolicyFixture {
    #[serde(default)]
    types: Vec<TypeDecl>,
    #[serde(default)]
    booleans: BTreeMap<String, bool>,
    #[serde(default)]
    rules: Vec<RuleDecl>,
}

impl InMemoryPolicy {
    /// Build a policy from a JSON fixture.
    pub fn from_json(json: &str) -> Result<Self, PolicyLoadError> {
        let fixture: PolicyFixture = serde_json::from_str(json)?;
        let mut policy = InMemoryPolicy::new();

        for decl in &fixture.types {
            policy.add_type(&decl.name);
            for alias in &decl.aliases {
                policy.add_alias(&decl.name, alias);
            }
            for attribute in &decl.attributes {
                policy.add_attribute(attribute, &[decl.name.as_str()]);
            }
        }
        for (name, value) in &fixture.booleans {
            policy.add_boolean(name, *value);
        }

        for (index, rule) in fixture.rules.iter().enumerate() {
            match rule {
                RuleDecl::Allow(d) => policy.add_av(index, AvRuleKind::Allow, d)?,
                RuleDecl::Auditallow(d) => policy.add_av(index, AvRuleKind::AuditAllow, d)?,
                RuleDecl::Dontaudit(d) => policy.add_av(index, AvRuleKind::DontAudit, d)?,
                RuleDecl::Neverallow(d) => policy.add_av(index, AvRuleKind::NeverAllow, d)?,
                RuleDecl::TypeTransition(d) => policy.add_te(index, TeRuleKind::TypeTransition, d)?,
                RuleDecl::TypeChange(d) => policy.add_te(index, TeRuleKind::TypeChange, d)?,
                RuleDecl::TypeMember(d) => policy.add_te(index, TeRuleKind::TypeMember, d)?,
            }
        }

        tracing::debug!(
            types = policy.num_types(),
            rules = policy.num_rules(),
            "loaded policy fixture"
        );
        Ok(policy)
    }

    /// Build a policy from a JSON fixture file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PolicyLoadError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    fn check_symbol(&self, index: usize, symbol: &str, allow_self: bool) -> Result<(), PolicyLoadError> {
        use super::PolicyDatabase;
        if (allow_self && symbol == SELF_TARGET)
            || self.resolve_type(symbol).is_some()
            || self.is_attribute(symbol)
        {
            return Ok(());
        }
        Err(PolicyLoadError::UndeclaredSymbol {
            index,
            symbol: symbol.to_string(),
        })
    }

    fn check_conditional(&self, index: usize, cond: &Option<Conditional>) -> Result<(), PolicyLoadError> {
        match cond {
            Some(c) if !self.has_boolean(&c.boolean) => Err(PolicyLoadError::UndeclaredBoolean {
                index,
                boolean: c.boolean.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn add_av(&mut self, index: usize, kind: AvRuleKind, d: &AvDecl) -> Result<(), PolicyLoadError> {
        self.check_symbol(index, &d.source, false)?;
        self.check_symbol(index, &d.target, true)?;
        self.check_conditional(index, &d.conditional)?;
        let perms: Vec<&str> = d.perms.iter().map(String::as_str).collect();
        self.add_av_rule(kind, &d.source, &d.target, &d.class, &perms, d.conditional.clone());
        Ok(())
    }

    fn add_te(&mut self, index: usize, kind: TeRuleKind, d: &TeDecl) -> Result<(), PolicyLoadError> {
        self.check_symbol(index, &d.source, false)?;
        self.check_symbol(index, &d.target, true)?;
        self.check_symbol(index, &d.default, false)?;
        self.check_conditional(index, &d.conditional)?;
        self.add_te_rule(kind, &d.source, &d.target, &d.class, &d.default, d.conditional.clone());
        Ok(())
    }
}
