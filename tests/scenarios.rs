//! End-to-end scenarios for the analysis session.
//!
//! These tests load the fixture policy and permission map from
//! `tests/fixtures/` and drive every analysis through `PolicyAnalyzer`.

use sepolicy_analysis::{
    logging, AnalysisConfig, AnalysisError, DirectFlowQuery, DomainTransParams, DomainTransQuery,
    FlowDirection, HandleFault, InMemoryPolicy, PermDirection, PermissionMap, PolicyAnalyzer,
    RelabelMode, RelabelParams, RelabelQuery, RuleId, TransitionDirection, TransitiveDirection,
    TransitiveFlowParams, TransitiveFlowQuery,
};
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn httpd_session() -> PolicyAnalyzer<InMemoryPolicy> {
    logging::init_tracing_with(logging::LogFormat::Pretty);
    let mut analyzer = PolicyAnalyzer::new(AnalysisConfig::default());
    analyzer.load_policy_json(fixture("httpd.json")).unwrap();
    assert!(analyzer.load_permission_map_file(fixture("perm_map")).unwrap());
    analyzer
}

fn rules(ids: &[u32]) -> Vec<RuleId> {
    ids.iter().copied().map(RuleId::new).collect()
}

fn ends(results: &[sepolicy_analysis::FlowResult]) -> Vec<(String, u32)> {
    results
        .iter()
        .map(|r| (r.end_type.to_string(), r.length))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Information Flow
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_single_write_rule_direct_out() {
    let mut policy = InMemoryPolicy::new();
    for t in ["init_t", "httpd_t", "httpd_log_t"] {
        policy.add_type(t);
    }
    let rule = policy.allow("httpd_t", "httpd_log_t", "file", &["write"]);
    let mut analyzer = PolicyAnalyzer::with_policy(AnalysisConfig::default(), policy);
    analyzer.load_permission_map(PermissionMap::new().with("file", "write", PermDirection::Write, 3));

    let (results, _) = analyzer
        .analyze_direct(&DirectFlowQuery::new("httpd_t", FlowDirection::Out))
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].direction, FlowDirection::Out);
    assert_eq!(results[0].start_type.as_str(), "httpd_t");
    assert_eq!(results[0].end_type.as_str(), "httpd_log_t");
    assert_eq!(results[0].rule_refs(), vec![rule]);
}

#[test]
fn test_fixture_direct_out_uses_lightest_permission() {
    let mut analyzer = httpd_session();
    let (results, _) = analyzer
        .analyze_direct(&DirectFlowQuery::new("apache_t", FlowDirection::Out))
        .unwrap();

    // write (3) beats append (5) on the same rule
    assert_eq!(ends(&results), vec![("httpd_log_t".to_string(), 3)]);
    assert_eq!(results[0].rule_refs(), rules(&[0]));
}

#[test]
fn test_unmatched_class_perm_filter_yields_nothing() {
    let mut analyzer = httpd_session();
    let query = DirectFlowQuery::new("httpd_t", FlowDirection::Both).with_class_perm("socket", "bind");
    let (results, handle) = analyzer.analyze_direct(&query).unwrap();
    assert!(results.is_empty());
    assert!(analyzer.continue_from(&handle, "logrotate_t").unwrap().is_empty());
}

#[test]
fn test_transitive_from_and_to() {
    let mut analyzer = httpd_session();

    let (from, _) = analyzer
        .analyze_transitive(&TransitiveFlowQuery::new("httpd_t", TransitiveDirection::From))
        .unwrap();
    assert_eq!(
        ends(&from),
        vec![
            ("httpd_log_t".to_string(), 3),
            ("logrotate_t".to_string(), 13),
            // relabelto (1) is lighter than write (3) on the last hop
            ("var_log_t".to_string(), 14),
        ]
    );

    let (to, _) = analyzer
        .analyze_transitive(&TransitiveFlowQuery::new("httpd_t", TransitiveDirection::To))
        .unwrap();
    assert_eq!(
        ends(&to),
        vec![
            ("httpd_config_t".to_string(), 1),
            ("httpd_exec_t".to_string(), 7),
            ("init_t".to_string(), 5),
        ]
    );
    assert!(to.iter().all(|r| r.direction == FlowDirection::In));
}

#[test]
fn test_transitive_regex_matches_alias() {
    let mut analyzer = httpd_session();
    let query = TransitiveFlowQuery::new("httpd_t", TransitiveDirection::From)
        .with_result_regex("^apache_log")
        .unwrap();
    let (results, _) = analyzer.analyze_transitive(&query).unwrap();
    assert_eq!(ends(&results), vec![("httpd_log_t".to_string(), 3)]);
}

#[test]
fn test_flat_transitive_record_shape() {
    let mut analyzer = httpd_session();
    let params: TransitiveFlowParams = serde_json::from_str(
        r#"{"direction":"from","startType":"httpd_t","intermediateTypes":[],
            "classPermPairs":[["file","write"],["file","read"]],"resultRegex":"var_log"}"#,
    )
    .unwrap();
    let output = analyzer.run_transitive(params).unwrap();
    let json = serde_json::to_value(&output).unwrap();

    let result = &json["results"][0];
    assert_eq!(result["direction"], "out");
    assert_eq!(result["endType"], "var_log_t");
    assert_eq!(result["length"], 16);
    assert_eq!(result["steps"].as_array().unwrap().len(), 3);
    assert_eq!(result["steps"][0]["startType"], "httpd_t");

    assert!(result.get("ruleRefs").is_none());
    assert!(json["graphHandle"].as_str().unwrap().starts_with("graph:"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Continuation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_continue_more_grows_graph() {
    let mut analyzer = httpd_session();
    let output = analyzer
        .run_transitive(TransitiveFlowParams {
            direction: "from".into(),
            start_type: "httpd_t".into(),
            ..Default::default()
        })
        .unwrap();
    let token = output.graph_handle.to_string();

    let results = analyzer.continue_more(&token, "init_t").unwrap();
    assert_eq!(
        ends(&results),
        vec![
            ("httpd_log_t".to_string(), 8),
            ("httpd_t".to_string(), 5),
            ("logrotate_t".to_string(), 11),
            ("var_log_t".to_string(), 1),
        ]
    );
}

#[test]
fn test_handles_go_stale_after_invalidate() {
    let mut analyzer = httpd_session();
    let (_, direct) = analyzer
        .analyze_direct(&DirectFlowQuery::new("httpd_t", FlowDirection::Out))
        .unwrap();
    let (_, transitive) = analyzer
        .analyze_transitive(&TransitiveFlowQuery::new("httpd_t", TransitiveDirection::From))
        .unwrap();

    analyzer.invalidate_all();

    for handle in [direct, transitive] {
        let err = analyzer.continue_from(&handle, "init_t").unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            AnalysisError::InvalidHandle {
                fault: HandleFault::Stale { .. },
                ..
            }
        ));
    }
    assert_eq!(analyzer.purge_stale(), 2);
}

#[test]
fn test_destroyed_handle_is_unknown() {
    let mut analyzer = httpd_session();
    let (_, handle) = analyzer
        .analyze_transitive(&TransitiveFlowQuery::new("httpd_t", TransitiveDirection::From))
        .unwrap();
    analyzer.destroy(&handle).unwrap();

    let err = analyzer.continue_from(&handle, "init_t").unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::InvalidHandle {
            fault: HandleFault::Unknown,
            ..
        }
    ));
}

#[test]
fn test_boolean_toggle_changes_flows() {
    let mut analyzer = httpd_session();
    let query = DirectFlowQuery::new("httpd_t", FlowDirection::Out);
    assert_eq!(analyzer.analyze_direct(&query).unwrap().0.len(), 1);

    analyzer.set_boolean("httpd_enable_cgi", true).unwrap();
    let (results, _) = analyzer.analyze_direct(&query).unwrap();
    let names: Vec<String> = results.iter().map(|r| r.end_type.to_string()).collect();
    assert_eq!(names, vec!["cgi_script_t", "httpd_log_t"]);
    assert_eq!(results[0].rule_refs(), rules(&[7]));
}

// ─────────────────────────────────────────────────────────────────────────────
// Further
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_further_enumerates_alternatives() {
    let mut analyzer = httpd_session();
    let (_, handle) = analyzer
        .analyze_transitive(&TransitiveFlowQuery::new("init_t", TransitiveDirection::From))
        .unwrap();
    analyzer.prepare_further(&handle, "init_t", "var_log_t").unwrap();

    let first = analyzer.next_further(&handle).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].length, 1);

    let second = analyzer.next_further(&handle).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].length, 19);
    let seq: Vec<String> = second[0].type_sequence().iter().map(|t| t.to_string()).collect();
    assert_eq!(seq, vec!["init_t", "httpd_t", "httpd_log_t", "logrotate_t", "var_log_t"]);

    assert!(analyzer.next_further(&handle).unwrap().is_empty());
}

#[test]
fn test_further_abort_and_unknown_end() {
    let mut analyzer = httpd_session();
    let (_, handle) = analyzer
        .analyze_transitive(&TransitiveFlowQuery::new("init_t", TransitiveDirection::From))
        .unwrap();

    assert!(matches!(
        analyzer.prepare_further(&handle, "init_t", "ghost_t"),
        Err(AnalysisError::Query(_))
    ));
    analyzer.prepare_further(&handle, "init_t", "var_log_t").unwrap();
    assert!(analyzer.abort_further(&handle).unwrap());
    assert!(matches!(analyzer.next_further(&handle), Err(AnalysisError::Query(_))));
}

#[test]
fn test_further_candidate_limit() {
    let mut policy = InMemoryPolicy::new();
    for t in ["a_t", "b_t", "c_t", "d_t", "e_t"] {
        policy.add_type(t);
    }
    // Dense graph: every type writes every other type
    policy.add_attribute("all", &["a_t", "b_t", "c_t", "d_t", "e_t"]);
    policy.allow("all", "all", "file", &["write"]);

    let config = AnalysisConfig {
        max_further_candidates: 2,
        ..AnalysisConfig::default()
    };
    let mut analyzer = PolicyAnalyzer::with_policy(config, policy);
    analyzer.load_permission_map(PermissionMap::new().with("file", "write", PermDirection::Write, 1));

    let (_, handle) = analyzer
        .analyze_transitive(&TransitiveFlowQuery::new("a_t", TransitiveDirection::From))
        .unwrap();
    analyzer.prepare_further(&handle, "a_t", "e_t").unwrap();

    let mut failure = None;
    for _ in 0..10 {
        match analyzer.next_further(&handle) {
            Ok(paths) => assert_eq!(paths.len(), 1),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    let err = failure.expect("candidate queue should overflow");
    assert!(matches!(err, AnalysisError::Allocation(_)));
    assert!(!err.is_recoverable());
}

// ─────────────────────────────────────────────────────────────────────────────
// Domain Transitions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_minimal_domain_transition() {
    let mut policy = InMemoryPolicy::new();
    for t in ["init_t", "httpd_t", "httpd_exec_t"] {
        policy.add_type(t);
    }
    let transition = policy.allow("init_t", "httpd_t", "process", &["transition"]);
    let execute = policy.allow("httpd_t", "httpd_exec_t", "file", &["execute"]);
    let entrypoint = policy.allow("init_t", "httpd_exec_t", "file", &["entrypoint"]);
    let mut analyzer = PolicyAnalyzer::with_policy(AnalysisConfig::default(), policy);

    let results = analyzer
        .analyze_domain_transitions(&DomainTransQuery::new("init_t", TransitionDirection::Forward))
        .unwrap();

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.source_type.as_str(), "init_t");
    assert_eq!(r.target_type.as_str(), "httpd_t");
    assert_eq!(r.entrypoint_type.as_str(), "httpd_exec_t");
    assert_eq!(r.proc_trans_rules, vec![transition]);
    assert_eq!(r.exec_rules, vec![execute]);
    assert_eq!(r.entrypoint_rules, vec![entrypoint]);
    assert!(r.setexec_rules.is_empty());
    assert!(r.type_trans_rules.is_empty());
}

#[test]
fn test_fixture_domain_transitions_both_directions() {
    let mut analyzer = httpd_session();
    let output = analyzer
        .run_domain_transitions(DomainTransParams {
            direction: "forward".into(),
            start_type: "init_t".into(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(output.results.len(), 1);
    assert_eq!(output.results[0].type_trans_rules, rules(&[6]));

    let reverse = analyzer
        .analyze_domain_transitions(&DomainTransQuery::new("apache_t", TransitionDirection::Reverse))
        .unwrap();
    assert_eq!(reverse.len(), 1);
    assert_eq!(reverse[0].source_type.as_str(), "init_t");

    let json = serde_json::to_value(&output).unwrap();
    for key in [
        "sourceType",
        "targetType",
        "entrypointType",
        "procTransRules",
        "entrypointRules",
        "execRules",
        "setexecRules",
        "typeTransRules",
        "accessRules",
    ] {
        assert!(json["results"][0].get(key).is_some(), "missing {key}");
    }
}

#[test]
fn test_domain_transition_access_filter() {
    let mut analyzer = httpd_session();
    let writes_logs = DomainTransQuery::new("init_t", TransitionDirection::Forward)
        .with_access_type("logfile")
        .with_class_perm("file", "write");
    let results = analyzer.analyze_domain_transitions(&writes_logs).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].access_rules, rules(&[0]));

    let sends_signals = DomainTransQuery::new("init_t", TransitionDirection::Forward)
        .with_class_perm("process", "sigchld");
    assert!(analyzer.analyze_domain_transitions(&sends_signals).unwrap().is_empty());
}

#[test]
fn test_bad_transition_direction() {
    let mut analyzer = httpd_session();
    let err = analyzer
        .run_domain_transitions(DomainTransParams {
            direction: "sideways".into(),
            start_type: "init_t".into(),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Query(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Relabel
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_two_way_relabel_lands_in_both_rules() {
    let mut policy = InMemoryPolicy::new();
    for t in ["subj_t", "a_t"] {
        policy.add_type(t);
    }
    let to = policy.allow("subj_t", "a_t", "file", &["relabelto"]);
    let from = policy.allow("subj_t", "a_t", "file", &["relabelfrom"]);
    let analyzer = PolicyAnalyzer::with_policy(AnalysisConfig::default(), policy);

    let results = analyzer
        .analyze_relabel(&RelabelQuery::new("a_t", RelabelMode::Both))
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].both_rules, vec![to, from]);
    assert!(results[0].to_rules.is_empty());
    assert!(results[0].from_rules.is_empty());
}

#[test]
fn test_fixture_relabel_modes() {
    let analyzer = httpd_session();

    let to = analyzer
        .run_relabel(RelabelParams {
            mode: "to".into(),
            start_type: "var_log_t".into(),
            ..Default::default()
        })
        .unwrap();
    let subjects: Vec<String> = to.results.iter().map(|r| r.subject_type.to_string()).collect();
    assert_eq!(subjects, vec!["init_t", "logrotate_t"]);
    assert_eq!(to.results[0].to_rules, rules(&[9]));
    assert_eq!(to.results[1].both_rules, rules(&[8]));

    let from = analyzer
        .analyze_relabel(&RelabelQuery::new("var_log_t", RelabelMode::From))
        .unwrap();
    assert_eq!(from.len(), 1);

    let subject = analyzer
        .analyze_relabel(&RelabelQuery::new("logrotate_t", RelabelMode::Subject))
        .unwrap();
    assert_eq!(subject.len(), 1);
    assert_eq!(subject[0].both_rules, rules(&[8]));
    assert!(subject[0].to_rules.is_empty());
}

#[test]
fn test_relabel_without_policy() {
    let analyzer: PolicyAnalyzer<InMemoryPolicy> = PolicyAnalyzer::new(AnalysisConfig::default());
    let err = analyzer
        .analyze_relabel(&RelabelQuery::new("a_t", RelabelMode::To))
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Configuration(_)));
}
