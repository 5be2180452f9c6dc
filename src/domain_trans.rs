//! Domain-transition analysis.
//!
//! A transition from domain `S` to domain `T` through file type `E` needs:
//!
//! ```text
//! allow S T:process transition;     (required)
//! allow S E:file execute;           (required)
//! allow T E:file entrypoint;        (required)
//! allow S S:process setexec;        (optional)
//! type_transition S E:process T;    (optional)
//! ```
//!
//! The execute/entrypoint pair is also accepted with the roles swapped
//! between `S` and `T`: `T` executes `E` and `S` holds entrypoint on `E`.
//! Such a pair is reported as a transition even though the kernel would
//! not perform one, so consumers wanting only kernel-enforceable
//! transitions must check that `exec_rules` come from `S`. When both
//! assignments hold for the same `E`, their rules are merged into one
//! result.
//!
//! Rule lookups go through a bounded LRU memo keyed by (type, class,
//! permission). The memo is cleared at the start of every analysis.

use lru::LruCache;
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;

use crate::config::CacheConfig;
use crate::query::{passes, DomainTransQuery};
use crate::store::{PolicyDatabase, TeRuleKind, SELF_TARGET};
use crate::types::{AnalysisError, ClassPermPair, DomainTransResult, RuleId, TransitionDirection, TypeName};

const PROCESS: &str = "process";
const FILE: &str = "file";
const TRANSITION: &str = "transition";
const EXECUTE: &str = "execute";
const ENTRYPOINT: &str = "entrypoint";
const SETEXEC: &str = "setexec";

/// Rules granting one permission, grouped by the type on the other side.
type Grants = BTreeMap<TypeName, BTreeSet<RuleId>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MemoKey {
    /// Objects `subject` holds `class:perm` on.
    BySubject {
        subject: TypeName,
        class: &'static str,
        perm: &'static str,
    },
    /// Subjects holding `class:perm` on `object`.
    ByObject {
        object: TypeName,
        class: &'static str,
        perm: &'static str,
    },
}

/// Memo statistics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Current number of entries in the memo.
    pub len: usize,
    /// Maximum capacity of the memo.
    pub cap: usize,
    /// Lookups answered from the memo since the last clear.
    pub hits: u64,
    /// Lookups computed from the policy since the last clear.
    pub misses: u64,
}

/// Finds valid process domain transitions.
pub struct DomainTransitionAnalyzer {
    memo: Option<LruCache<MemoKey, Grants>>,
    hits: u64,
    misses: u64,
}

impl DomainTransitionAnalyzer {
    /// Create an analyzer with the given memo sizing.
    pub fn new(config: &CacheConfig) -> Self {
        let memo = config.enabled.then(|| {
            let size = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
            LruCache::new(size)
        });
        Self {
            memo,
            hits: 0,
            misses: 0,
        }
    }

    /// Run a domain-transition query.
    ///
    /// Results are sorted by (source, target, entrypoint).
    pub fn analyze<P: PolicyDatabase + ?Sized>(
        &mut self,
        policy: &P,
        query: &DomainTransQuery,
    ) -> Result<Vec<DomainTransResult>, AnalysisError> {
        self.clear_cache();

        let start = policy
            .resolve_type(&query.start_type)
            .ok_or_else(|| AnalysisError::unknown_type(&query.start_type))?;
        let access = AccessFilter::from_query(policy, query)?;

        let pairs: Vec<(TypeName, TypeName, BTreeSet<RuleId>)> = match query.direction {
            TransitionDirection::Forward => self
                .grants(policy, MemoKey::BySubject {
                    subject: start.clone(),
                    class: PROCESS,
                    perm: TRANSITION,
                })
                .into_iter()
                .map(|(target, rules)| (start.clone(), target, rules))
                .collect(),
            TransitionDirection::Reverse => self
                .grants(policy, MemoKey::ByObject {
                    object: start.clone(),
                    class: PROCESS,
                    perm: TRANSITION,
                })
                .into_iter()
                .map(|(source, rules)| (source, start.clone(), rules))
                .collect(),
        };

        let mut results = Vec::new();
        for (source, target, proc_trans) in pairs {
            if source == target {
                continue;
            }
            let domain = match query.direction {
                TransitionDirection::Forward => &target,
                TransitionDirection::Reverse => &source,
            };
            if !passes(query.result_filter.as_ref(), policy, domain) {
                continue;
            }
            let access_rules = match &access {
                Some(filter) => {
                    let matched = filter.matching_rules(policy, domain);
                    if matched.is_empty() {
                        continue;
                    }
                    matched
                }
                None => BTreeSet::new(),
            };
            results.extend(self.pair_transitions(policy, &source, &target, &proc_trans, &access_rules));
        }

        results.sort_by(|a, b| {
            (&a.source_type, &a.target_type, &a.entrypoint_type).cmp(&(
                &b.source_type,
                &b.target_type,
                &b.entrypoint_type,
            ))
        });
        tracing::debug!(
            start = %start,
            direction = %query.direction,
            results = results.len(),
            memo_hits = self.hits,
            memo_misses = self.misses,
            "domain transition analysis"
        );
        Ok(results)
    }

    /// Memo statistics, or `None` when the memo is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.memo.as_ref().map(|memo| CacheStats {
            len: memo.len(),
            cap: memo.cap().get(),
            hits: self.hits,
            misses: self.misses,
        })
    }

    /// Empty the memo and reset its counters.
    pub fn clear_cache(&mut self) {
        if let Some(memo) = self.memo.as_mut() {
            memo.clear();
        }
        self.hits = 0;
        self.misses = 0;
    }

    /// Every entrypoint through which `source` can become `target`.
    fn pair_transitions<P: PolicyDatabase + ?Sized>(
        &mut self,
        policy: &P,
        source: &TypeName,
        target: &TypeName,
        proc_trans: &BTreeSet<RuleId>,
        access_rules: &BTreeSet<RuleId>,
    ) -> Vec<DomainTransResult> {
        let mut held = |subject: &TypeName, class: &'static str, perm: &'static str| {
            self.grants(policy, MemoKey::BySubject {
                subject: subject.clone(),
                class,
                perm,
            })
        };
        let exec_source = held(source, FILE, EXECUTE);
        let exec_target = held(target, FILE, EXECUTE);
        let entry_source = held(source, FILE, ENTRYPOINT);
        let entry_target = held(target, FILE, ENTRYPOINT);
        let setexec = held(source, PROCESS, SETEXEC)
            .remove(source)
            .unwrap_or_default();

        let assignments = [(&exec_source, &entry_target), (&exec_target, &entry_source)];
        let mut per_entrypoint: BTreeMap<&TypeName, (BTreeSet<RuleId>, BTreeSet<RuleId>)> = BTreeMap::new();
        for (exec, entry) in assignments {
            for (file_type, exec_rules) in exec {
                let Some(entry_rules) = entry.get(file_type) else {
                    continue;
                };
                let slot = per_entrypoint.entry(file_type).or_default();
                slot.0.extend(exec_rules);
                slot.1.extend(entry_rules);
            }
        }

        per_entrypoint
            .into_iter()
            .map(|(entrypoint, (exec_rules, entry_rules))| DomainTransResult {
                source_type: source.clone(),
                target_type: target.clone(),
                entrypoint_type: entrypoint.clone(),
                proc_trans_rules: proc_trans.iter().copied().collect(),
                entrypoint_rules: entry_rules.into_iter().collect(),
                exec_rules: exec_rules.into_iter().collect(),
                setexec_rules: setexec.iter().copied().collect(),
                type_trans_rules: type_transition_rules(policy, source, entrypoint, target),
                access_rules: access_rules.iter().copied().collect(),
            })
            .collect()
    }

    fn grants<P: PolicyDatabase + ?Sized>(&mut self, policy: &P, key: MemoKey) -> Grants {
        if let Some(found) = self.memo.as_mut().and_then(|memo| memo.get(&key)) {
            self.hits += 1;
            return found.clone();
        }
        self.misses += 1;
        let computed = compute_grants(policy, &key);
        if let Some(memo) = self.memo.as_mut() {
            memo.put(key, computed.clone());
        }
        computed
    }
}

fn compute_grants<P: PolicyDatabase + ?Sized>(policy: &P, key: &MemoKey) -> Grants {
    let (class, perm) = match key {
        MemoKey::BySubject { class, perm, .. } | MemoKey::ByObject { class, perm, .. } => (*class, *perm),
    };
    let mut grants = Grants::new();
    let rules = policy
        .active_allow_rules()
        .into_iter()
        .filter(|r| r.class == class && r.grants(perm));

    for rule in rules {
        match key {
            MemoKey::BySubject { subject, .. } => {
                if !policy.source_covers(&rule.source, subject) {
                    continue;
                }
                let objects = if rule.target == SELF_TARGET {
                    BTreeSet::from([subject.clone()])
                } else {
                    policy.expand(&rule.target)
                };
                for object in objects {
                    grants.entry(object).or_default().insert(rule.id);
                }
            }
            MemoKey::ByObject { object, .. } => {
                for subject in policy.expand(&rule.source) {
                    if policy.target_covers(&rule.target, &subject, object) {
                        grants.entry(subject).or_default().insert(rule.id);
                    }
                }
            }
        }
    }
    grants
}

fn type_transition_rules<P: PolicyDatabase + ?Sized>(
    policy: &P,
    source: &TypeName,
    entrypoint: &TypeName,
    target: &TypeName,
) -> Vec<RuleId> {
    policy
        .active_te_rules(TeRuleKind::TypeTransition)
        .into_iter()
        .filter(|r| {
            r.class == PROCESS
                && policy.source_covers(&r.source, source)
                && policy.target_covers(&r.target, source, entrypoint)
                && policy.resolve_type(&r.default_type).as_ref() == Some(target)
        })
        .map(|r| r.id)
        .collect()
}

/// Post-filter on what the resulting domain can access.
struct AccessFilter {
    types: Option<BTreeSet<TypeName>>,
    class_perms: BTreeSet<ClassPermPair>,
}

impl AccessFilter {
    fn from_query<P: PolicyDatabase + ?Sized>(
        policy: &P,
        query: &DomainTransQuery,
    ) -> Result<Option<Self>, AnalysisError> {
        if !query.has_access_filter() {
            return Ok(None);
        }
        let types = if query.access_types.is_empty() {
            None
        } else {
            let mut types = BTreeSet::new();
            for name in &query.access_types {
                let expanded = policy.expand(name);
                if expanded.is_empty() {
                    return Err(AnalysisError::unknown_type(name));
                }
                types.extend(expanded);
            }
            Some(types)
        };
        Ok(Some(Self {
            types,
            class_perms: query.class_perms.clone(),
        }))
    }

    /// Allow rules of `domain` that satisfy the filter.
    fn matching_rules<P: PolicyDatabase + ?Sized>(&self, policy: &P, domain: &TypeName) -> BTreeSet<RuleId> {
        policy
            .active_allow_rules()
            .into_iter()
            .filter(|rule| policy.source_covers(&rule.source, domain))
            .filter(|rule| {
                self.class_perms.is_empty()
                    || self
                        .class_perms
                        .iter()
                        .any(|cp| cp.class == rule.class && rule.grants(&cp.perm))
            })
            .filter(|rule| {
                self.types.as_ref().map_or(true, |types| {
                    types
                        .iter()
                        .any(|ty| policy.target_covers(&rule.target, domain, ty))
                })
            })
            .map(|rule| rule.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPolicy;

    fn analyzer() -> DomainTransitionAnalyzer {
        DomainTransitionAnalyzer::new(&CacheConfig::default())
    }

    struct Fixture {
        policy: InMemoryPolicy,
        transition: RuleId,
        execute: RuleId,
        entrypoint: RuleId,
    }

    /// init_t → httpd_t via httpd_exec_t, kernel role assignment.
    fn fixture() -> Fixture {
        let mut policy = InMemoryPolicy::new();
        for t in ["init_t", "httpd_t", "httpd_exec_t", "httpd_log_t", "shadow_t"] {
            policy.add_type(t);
        }
        let transition = policy.allow("init_t", "httpd_t", "process", &["transition"]);
        let execute = policy.allow("init_t", "httpd_exec_t", "file", &["execute", "read"]);
        let entrypoint = policy.allow("httpd_t", "httpd_exec_t", "file", &["entrypoint"]);
        policy.allow("httpd_t", "httpd_log_t", "file", &["append"]);
        Fixture {
            policy,
            transition,
            execute,
            entrypoint,
        }
    }

    #[test]
    fn test_forward_transition() {
        let f = fixture();
        let query = DomainTransQuery::new("init_t", TransitionDirection::Forward);
        let results = analyzer().analyze(&f.policy, &query).unwrap();

        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.target_type.as_str(), "httpd_t");
        assert_eq!(r.entrypoint_type.as_str(), "httpd_exec_t");
        assert_eq!(r.proc_trans_rules, vec![f.transition]);
        assert_eq!(r.exec_rules, vec![f.execute]);
        assert_eq!(r.entrypoint_rules, vec![f.entrypoint]);
        assert!(r.setexec_rules.is_empty());
        assert!(r.type_trans_rules.is_empty());
        assert!(r.access_rules.is_empty());
    }

    #[test]
    fn test_reverse_transition() {
        let f = fixture();
        let query = DomainTransQuery::new("httpd_t", TransitionDirection::Reverse);
        let results = analyzer().analyze(&f.policy, &query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_type.as_str(), "init_t");
    }

    #[test]
    fn test_optional_rules_are_collected() {
        let mut f = fixture();
        let setexec = f.policy.allow("init_t", "self", "process", &["setexec"]);
        let tt = f
            .policy
            .type_transition("init_t", "httpd_exec_t", "process", "httpd_t");
        // A type_transition to another default does not count
        f.policy.type_transition("init_t", "httpd_exec_t", "process", "shadow_t");

        let query = DomainTransQuery::new("init_t", TransitionDirection::Forward);
        let results = analyzer().analyze(&f.policy, &query).unwrap();
        assert_eq!(results[0].setexec_rules, vec![setexec]);
        assert_eq!(results[0].type_trans_rules, vec![tt]);
    }

    #[test]
    fn test_swapped_roles_are_reported_and_merged() {
        let mut policy = InMemoryPolicy::new();
        for t in ["init_t", "httpd_t", "httpd_exec_t"] {
            policy.add_type(t);
        }
        policy.allow("init_t", "httpd_t", "process", &["transition"]);
        let target_exec = policy.allow("httpd_t", "httpd_exec_t", "file", &["execute"]);
        let source_entry = policy.allow("init_t", "httpd_exec_t", "file", &["entrypoint"]);

        let query = DomainTransQuery::new("init_t", TransitionDirection::Forward);
        let results = analyzer().analyze(&policy, &query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].exec_rules, vec![target_exec]);
        assert_eq!(results[0].entrypoint_rules, vec![source_entry]);

        let source_exec = policy.allow("init_t", "httpd_exec_t", "file", &["execute"]);
        let target_entry = policy.allow("httpd_t", "httpd_exec_t", "file", &["entrypoint"]);
        let results = analyzer().analyze(&policy, &query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].exec_rules, vec![target_exec, source_exec]);
        assert_eq!(results[0].entrypoint_rules, vec![source_entry, target_entry]);
    }

    #[test]
    fn test_missing_entrypoint_yields_nothing() {
        let mut policy = InMemoryPolicy::new();
        for t in ["init_t", "httpd_t", "httpd_exec_t"] {
            policy.add_type(t);
        }
        policy.allow("init_t", "httpd_t", "process", &["transition"]);
        policy.allow("init_t", "httpd_exec_t", "file", &["execute"]);

        let query = DomainTransQuery::new("init_t", TransitionDirection::Forward);
        assert!(analyzer().analyze(&policy, &query).unwrap().is_empty());
    }

    #[test]
    fn test_access_post_filter() {
        let f = fixture();
        let mut analyzer = analyzer();

        let reaches_log = DomainTransQuery::new("init_t", TransitionDirection::Forward)
            .with_access_type("httpd_log_t")
            .with_class_perm("file", "append");
        let results = analyzer.analyze(&f.policy, &reaches_log).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].access_rules.len(), 1);

        let reaches_shadow =
            DomainTransQuery::new("init_t", TransitionDirection::Forward).with_access_type("shadow_t");
        assert!(analyzer.analyze(&f.policy, &reaches_shadow).unwrap().is_empty());
    }

    #[test]
    fn test_result_regex_filters_resulting_domain() {
        let f = fixture();
        let query = DomainTransQuery::new("init_t", TransitionDirection::Forward)
            .with_result_regex("^sshd")
            .unwrap();
        assert!(analyzer().analyze(&f.policy, &query).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_start_type() {
        let f = fixture();
        let query = DomainTransQuery::new("nope_t", TransitionDirection::Forward);
        assert!(matches!(analyzer().analyze(&f.policy, &query), Err(AnalysisError::Query(_))));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Memo
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_memo_does_not_leak_across_policies() {
        let f = fixture();
        let mut analyzer = analyzer();
        let query = DomainTransQuery::new("init_t", TransitionDirection::Forward);
        assert_eq!(analyzer.analyze(&f.policy, &query).unwrap().len(), 1);
        assert!(analyzer.cache_stats().unwrap().len > 0);

        // Same analyzer, policy without the entrypoint rule
        let mut bare = InMemoryPolicy::new();
        for t in ["init_t", "httpd_t", "httpd_exec_t"] {
            bare.add_type(t);
        }
        bare.allow("init_t", "httpd_t", "process", &["transition"]);
        bare.allow("init_t", "httpd_exec_t", "file", &["execute"]);
        assert!(analyzer.analyze(&bare, &query).unwrap().is_empty());
    }

    #[test]
    fn test_memo_hits_within_one_analysis() {
        let mut policy = InMemoryPolicy::new();
        for t in ["init_t", "a_t", "b_t", "exec_t"] {
            policy.add_type(t);
        }
        policy.add_attribute("daemons", &["a_t", "b_t"]);
        policy.allow("init_t", "daemons", "process", &["transition"]);
        policy.allow("init_t", "exec_t", "file", &["execute"]);
        policy.allow("daemons", "exec_t", "file", &["entrypoint"]);

        let mut analyzer = analyzer();
        let query = DomainTransQuery::new("init_t", TransitionDirection::Forward);
        let results = analyzer.analyze(&policy, &query).unwrap();
        assert_eq!(results.len(), 2);
        // Source-side lookups are shared between both targets
        assert!(analyzer.cache_stats().unwrap().hits > 0);

        analyzer.clear_cache();
        let stats = analyzer.cache_stats().unwrap();
        assert_eq!((stats.len, stats.hits, stats.misses), (0, 0, 0));
    }

    #[test]
    fn test_disabled_memo() {
        let f = fixture();
        let mut analyzer = DomainTransitionAnalyzer::new(&CacheConfig {
            max_entries: 0,
            enabled: false,
        });
        let query = DomainTransQuery::new("init_t", TransitionDirection::Forward);
        assert_eq!(analyzer.analyze(&f.policy, &query).unwrap().len(), 1);
        assert!(analyzer.cache_stats().is_none());
    }
}
