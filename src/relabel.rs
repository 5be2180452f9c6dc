//! Relabel analysis.
//!
//! Relabeling an object from type `A` to type `B` takes `relabelfrom` on
//! `A` and `relabelto` on `B`. For a (subject, object type) pair the rules
//! granting either permission are grouped as follows:
//!
//! - `both_rules` when the subject can relabel the object type in both
//!   directions, whether through one rule or several
//! - `to_rules` / `from_rules` otherwise

use std::collections::{BTreeMap, BTreeSet};

use crate::query::{passes, RelabelQuery};
use crate::store::PolicyDatabase;
use crate::types::{AnalysisError, RelabelMode, RelabelResult, RuleId, TypeName};

const RELABEL_TO: &str = "relabelto";
const RELABEL_FROM: &str = "relabelfrom";

#[derive(Debug, Default)]
struct PairGrants {
    to: BTreeSet<RuleId>,
    from: BTreeSet<RuleId>,
}

impl PairGrants {
    fn is_two_way(&self) -> bool {
        !self.to.is_empty() && !self.from.is_empty()
    }

    fn admits(&self, mode: RelabelMode) -> bool {
        match mode {
            RelabelMode::To => !self.to.is_empty(),
            RelabelMode::From => !self.from.is_empty(),
            RelabelMode::Both | RelabelMode::Subject => !self.to.is_empty() || !self.from.is_empty(),
        }
    }
}

/// Which side of a rule the start type is matched on.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Subject,
    Object,
}

/// Finds relabel capabilities.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelabelAnalyzer;

impl RelabelAnalyzer {
    /// Run a relabel query.
    ///
    /// Subject mode always yields exactly one result for the start type.
    /// The object modes yield one result per qualifying subject, sorted by
    /// subject name.
    pub fn analyze<P: PolicyDatabase + ?Sized>(
        &self,
        policy: &P,
        query: &RelabelQuery,
    ) -> Result<Vec<RelabelResult>, AnalysisError> {
        let start = policy
            .resolve_type(&query.start_type)
            .ok_or_else(|| AnalysisError::unknown_type(&query.start_type))?;

        let results = match query.mode {
            RelabelMode::Subject => vec![self.subject_result(policy, query, &start)],
            mode => self.object_results(policy, query, &start, mode)?,
        };
        tracing::debug!(
            start = %start,
            mode = %query.mode,
            results = results.len(),
            "relabel analysis"
        );
        Ok(results)
    }

    fn subject_result<P: PolicyDatabase + ?Sized>(
        &self,
        policy: &P,
        query: &RelabelQuery,
        subject: &TypeName,
    ) -> RelabelResult {
        let mut both = BTreeSet::new();
        let mut to = BTreeSet::new();
        let mut from = BTreeSet::new();

        for (object, grants) in collect_grants(policy, query, subject, Side::Subject) {
            if !passes(query.result_filter.as_ref(), policy, &object) {
                continue;
            }
            if grants.is_two_way() {
                both.extend(grants.to);
                both.extend(grants.from);
            } else {
                to.extend(grants.to);
                from.extend(grants.from);
            }
        }

        RelabelResult {
            to_rules: to.difference(&both).copied().collect(),
            from_rules: from.difference(&both).copied().collect(),
            both_rules: both.into_iter().collect(),
            subject_type: subject.clone(),
        }
    }

    fn object_results<P: PolicyDatabase + ?Sized>(
        &self,
        policy: &P,
        query: &RelabelQuery,
        object: &TypeName,
        mode: RelabelMode,
    ) -> Result<Vec<RelabelResult>, AnalysisError> {
        let subjects = expand_filter(policy, &query.subject_types)?;

        let results = collect_grants(policy, query, object, Side::Object)
            .into_iter()
            .filter(|(subject, _)| subjects.as_ref().map_or(true, |set| set.contains(subject)))
            .filter(|(_, grants)| grants.admits(mode))
            .filter(|(subject, _)| passes(query.result_filter.as_ref(), policy, subject))
            .map(|(subject, grants)| {
                if grants.is_two_way() {
                    let both: BTreeSet<RuleId> = grants.to.union(&grants.from).copied().collect();
                    RelabelResult {
                        to_rules: Vec::new(),
                        from_rules: Vec::new(),
                        both_rules: both.into_iter().collect(),
                        subject_type: subject,
                    }
                } else {
                    RelabelResult {
                        to_rules: grants.to.into_iter().collect(),
                        from_rules: grants.from.into_iter().collect(),
                        both_rules: Vec::new(),
                        subject_type: subject,
                    }
                }
            })
            .collect();
        Ok(results)
    }
}

/// Relabel grants involving `start` on `side`, keyed by the type on the
/// other side.
fn collect_grants<P: PolicyDatabase + ?Sized>(
    policy: &P,
    query: &RelabelQuery,
    start: &TypeName,
    side: Side,
) -> BTreeMap<TypeName, PairGrants> {
    let mut grants: BTreeMap<TypeName, PairGrants> = BTreeMap::new();
    let rules = policy
        .active_allow_rules()
        .into_iter()
        .filter(|r| query.classes.is_empty() || query.classes.contains(&r.class))
        .filter(|r| r.grants(RELABEL_TO) || r.grants(RELABEL_FROM));

    for rule in rules {
        for (subject, object) in policy.rule_pairs(&rule.source, &rule.target) {
            let other = match side {
                Side::Subject if &subject == start => object,
                Side::Object if &object == start => subject,
                _ => continue,
            };
            let entry = grants.entry(other).or_default();
            if rule.grants(RELABEL_TO) {
                entry.to.insert(rule.id);
            }
            if rule.grants(RELABEL_FROM) {
                entry.from.insert(rule.id);
            }
        }
    }
    grants
}

fn expand_filter<P: PolicyDatabase + ?Sized>(
    policy: &P,
    names: &BTreeSet<String>,
) -> Result<Option<BTreeSet<TypeName>>, AnalysisError> {
    if names.is_empty() {
        return Ok(None);
    }
    let mut types = BTreeSet::new();
    for name in names {
        let expanded = policy.expand(name);
        if expanded.is_empty() {
            return Err(AnalysisError::unknown_type(name));
        }
        types.extend(expanded);
    }
    Ok(Some(types))
}
