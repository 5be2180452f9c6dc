//! Analysis session facade.
//!
//! [`PolicyAnalyzer`] owns everything one analysis session needs: the
//! policy, the permission map, the configuration, the graph handle
//! registry and the domain-transition memo. Every change to the policy or
//! permission map goes through [`PolicyAnalyzer::invalidate_all`], so
//! handles issued before the change can never be resolved again.
//!
//! Hosts with concurrent callers wrap the analyzer in a
//! [`SharedAnalyzer`], which is the single lock around all of it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::AnalysisConfig;
use crate::domain_trans::{CacheStats, DomainTransitionAnalyzer};
use crate::infoflow::{InfoflowAnalyzer, InfoflowRegistry};
use crate::permmap::PermissionMap;
use crate::query::{
    DirectFlowParams, DirectFlowQuery, DomainTransParams, DomainTransQuery, RelabelParams,
    RelabelQuery, TransitiveFlowParams, TransitiveFlowQuery,
};
use crate::registry::GraphHandle;
use crate::relabel::RelabelAnalyzer;
use crate::store::{InMemoryPolicy, PolicyDatabase};
use crate::types::{
    AnalysisError, DirectFlowRecord, DomainTransResult, FlowResult, RelabelResult,
};

/// An analyzer behind one mutual-exclusion boundary.
pub type SharedAnalyzer<P> = Arc<Mutex<PolicyAnalyzer<P>>>;

/// Output of a direct information-flow request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectFlowOutput {
    /// Handle of the graph built for the request.
    pub graph_handle: GraphHandle,
    /// One record per end type and direction.
    pub results: Vec<DirectFlowRecord>,
}

/// Output of a transitive information-flow request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitiveFlowOutput {
    /// Handle of the graph built for the request.
    pub graph_handle: GraphHandle,
    /// Shortest path to each reachable end type.
    pub results: Vec<FlowResult>,
}

/// Output of a domain-transition request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTransOutput {
    /// Transitions found.
    pub results: Vec<DomainTransResult>,
}

/// Output of a relabel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelabelOutput {
    /// Relabel groups found.
    pub results: Vec<RelabelResult>,
}

/// One analysis session over a policy.
pub struct PolicyAnalyzer<P: PolicyDatabase> {
    config: AnalysisConfig,
    policy: Option<P>,
    permmap: Option<PermissionMap>,
    permmap_fingerprint: Option<String>,
    registry: InfoflowRegistry,
    domain_trans: DomainTransitionAnalyzer,
}

impl<P: PolicyDatabase> PolicyAnalyzer<P> {
    /// Create a session with no policy loaded.
    pub fn new(config: AnalysisConfig) -> Self {
        tracing::info!(params_hash = ?config.params_hash().ok(), "created analysis session");
        let domain_trans = DomainTransitionAnalyzer::new(&config.memo_cache);
        Self {
            config,
            policy: None,
            permmap: None,
            permmap_fingerprint: None,
            registry: InfoflowRegistry::new(),
            domain_trans,
        }
    }

    /// Create a session over a policy.
    pub fn with_policy(config: AnalysisConfig, policy: P) -> Self {
        let mut analyzer = Self::new(config);
        analyzer.policy = Some(policy);
        analyzer
    }

    /// Wrap the session for concurrent callers.
    pub fn into_shared(self) -> SharedAnalyzer<P> {
        Arc::new(Mutex::new(self))
    }

    /// Session configuration.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The loaded policy.
    pub fn policy(&self) -> Option<&P> {
        self.policy.as_ref()
    }

    /// The loaded permission map.
    pub fn permission_map(&self) -> Option<&PermissionMap> {
        self.permmap.as_ref()
    }

    /// Current handle epoch.
    pub fn epoch(&self) -> u64 {
        self.registry.epoch()
    }

    /// Number of registered graphs, stale ones included.
    pub fn live_graphs(&self) -> usize {
        self.registry.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session state changes
    // ─────────────────────────────────────────────────────────────────────

    /// Swap in a new policy, returning the previous one.
    pub fn replace_policy(&mut self, policy: P) -> Option<P> {
        let previous = self.policy.replace(policy);
        let epoch = self.invalidate_all();
        tracing::info!(epoch, "replaced policy");
        previous
    }

    /// Load a permission map. Returns `false` (and keeps every handle
    /// valid) when the map has the same content as the loaded one.
    ///
    /// A map without a fingerprint never counts as unchanged.
    pub fn load_permission_map(&mut self, map: PermissionMap) -> bool {
        let fingerprint = match map.fingerprint() {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                tracing::warn!(error = %e, "cannot fingerprint permission map");
                None
            }
        };
        if fingerprint.is_some() && fingerprint == self.permmap_fingerprint {
            tracing::debug!(fingerprint = ?fingerprint, "permission map unchanged");
            return false;
        }
        self.permmap = Some(map);
        self.permmap_fingerprint = fingerprint;
        let epoch = self.invalidate_all();
        tracing::info!(epoch, fingerprint = ?self.permmap_fingerprint, "loaded permission map");
        true
    }

    /// Load a permission map from a file in the text format.
    pub fn load_permission_map_file(&mut self, path: impl AsRef<Path>) -> Result<bool, AnalysisError> {
        let map = PermissionMap::load(path)?;
        Ok(self.load_permission_map(map))
    }

    /// Toggle a conditional boolean. Setting a boolean to its current
    /// value changes nothing.
    pub fn set_boolean(&mut self, name: &str, value: bool) -> Result<(), AnalysisError> {
        let policy = self.policy.as_mut().ok_or_else(no_policy)?;
        match policy.boolean(name) {
            None => Err(AnalysisError::query(format!("unknown boolean '{name}'"))),
            Some(current) if current == value => Ok(()),
            Some(_) => {
                policy.set_boolean(name, value);
                let epoch = self.invalidate_all();
                tracing::info!(epoch, boolean = name, value, "toggled boolean");
                Ok(())
            }
        }
    }

    /// Invalidate every outstanding graph handle.
    pub fn invalidate_all(&mut self) -> u64 {
        self.domain_trans.clear_cache();
        self.registry.invalidate_all()
    }

    /// Free graphs whose handles went stale.
    pub fn purge_stale(&mut self) -> usize {
        self.registry.purge_stale()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Information flow
    // ─────────────────────────────────────────────────────────────────────

    /// Information-flow analyzer over this session's state.
    pub fn infoflow(&mut self) -> Result<InfoflowAnalyzer<'_, P>, AnalysisError> {
        let policy = self.policy.as_ref().ok_or_else(no_policy)?;
        Ok(InfoflowAnalyzer::new(
            policy,
            self.permmap.as_ref(),
            &self.config,
            &mut self.registry,
        ))
    }

    /// See [`InfoflowAnalyzer::analyze_direct`].
    pub fn analyze_direct(
        &mut self,
        query: &DirectFlowQuery,
    ) -> Result<(Vec<FlowResult>, GraphHandle), AnalysisError> {
        self.infoflow()?.analyze_direct(query)
    }

    /// See [`InfoflowAnalyzer::analyze_transitive`].
    pub fn analyze_transitive(
        &mut self,
        query: &TransitiveFlowQuery,
    ) -> Result<(Vec<FlowResult>, GraphHandle), AnalysisError> {
        self.infoflow()?.analyze_transitive(query)
    }

    /// See [`InfoflowAnalyzer::continue_from`].
    pub fn continue_from(
        &mut self,
        handle: &GraphHandle,
        new_start: &str,
    ) -> Result<Vec<FlowResult>, AnalysisError> {
        self.infoflow()?.continue_from(handle, new_start)
    }

    /// See [`InfoflowAnalyzer::prepare_further`].
    pub fn prepare_further(&mut self, handle: &GraphHandle, start: &str, end: &str) -> Result<(), AnalysisError> {
        self.infoflow()?.prepare_further(handle, start, end)
    }

    /// See [`InfoflowAnalyzer::next_further`].
    pub fn next_further(&mut self, handle: &GraphHandle) -> Result<Vec<FlowResult>, AnalysisError> {
        self.infoflow()?.next_further(handle)
    }

    /// See [`InfoflowAnalyzer::abort_further`].
    pub fn abort_further(&mut self, handle: &GraphHandle) -> Result<bool, AnalysisError> {
        self.infoflow()?.abort_further(handle)
    }

    /// See [`InfoflowAnalyzer::destroy`].
    pub fn destroy(&mut self, handle: &GraphHandle) -> Result<(), AnalysisError> {
        self.infoflow()?.destroy(handle)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Rule searches
    // ─────────────────────────────────────────────────────────────────────

    /// See [`DomainTransitionAnalyzer::analyze`].
    pub fn analyze_domain_transitions(
        &mut self,
        query: &DomainTransQuery,
    ) -> Result<Vec<DomainTransResult>, AnalysisError> {
        let policy = self.policy.as_ref().ok_or_else(no_policy)?;
        self.domain_trans.analyze(policy, query)
    }

    /// Domain-transition memo statistics.
    pub fn domain_trans_cache_stats(&self) -> Option<CacheStats> {
        self.domain_trans.cache_stats()
    }

    /// See [`RelabelAnalyzer::analyze`].
    pub fn analyze_relabel(&self, query: &RelabelQuery) -> Result<Vec<RelabelResult>, AnalysisError> {
        let policy = self.policy.as_ref().ok_or_else(no_policy)?;
        RelabelAnalyzer.analyze(policy, query)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Flat parameter records
    // ─────────────────────────────────────────────────────────────────────

    /// Direct information flow from a flat parameter record.
    pub fn run_direct(&mut self, params: DirectFlowParams) -> Result<DirectFlowOutput, AnalysisError> {
        let query = DirectFlowQuery::try_from(params)?;
        let (results, graph_handle) = self.analyze_direct(&query)?;
        Ok(DirectFlowOutput {
            graph_handle,
            results: results.iter().map(DirectFlowRecord::from).collect(),
        })
    }

    /// Transitive information flow from a flat parameter record.
    pub fn run_transitive(&mut self, params: TransitiveFlowParams) -> Result<TransitiveFlowOutput, AnalysisError> {
        let query = TransitiveFlowQuery::try_from(params)?;
        let (results, graph_handle) = self.analyze_transitive(&query)?;
        Ok(TransitiveFlowOutput {
            graph_handle,
            results,
        })
    }

    /// Domain transitions from a flat parameter record.
    pub fn run_domain_transitions(&mut self, params: DomainTransParams) -> Result<DomainTransOutput, AnalysisError> {
        let query = DomainTransQuery::try_from(params)?;
        Ok(DomainTransOutput {
            results: self.analyze_domain_transitions(&query)?,
        })
    }

    /// Relabel analysis from a flat parameter record.
    pub fn run_relabel(&self, params: RelabelParams) -> Result<RelabelOutput, AnalysisError> {
        let query = RelabelQuery::try_from(params)?;
        Ok(RelabelOutput {
            results: self.analyze_relabel(&query)?,
        })
    }

    /// Continue an analysis named by a handle token.
    pub fn continue_more(&mut self, handle: &str, new_start: &str) -> Result<Vec<FlowResult>, AnalysisError> {
        let handle: GraphHandle = handle.parse()?;
        self.continue_from(&handle, new_start)
    }

    /// Destroy the graph named by a handle token.
    pub fn destroy_handle(&mut self, handle: &str) -> Result<(), AnalysisError> {
        let handle: GraphHandle = handle.parse()?;
        self.destroy(&handle)
    }
}

impl PolicyAnalyzer<InMemoryPolicy> {
    /// Replace the policy with one loaded from a JSON fixture file.
    pub fn load_policy_json(&mut self, path: impl AsRef<Path>) -> Result<(), AnalysisError> {
        let policy = InMemoryPolicy::load_json(path)?;
        self.replace_policy(policy);
        Ok(())
    }
}

fn no_policy() -> AnalysisError {
    AnalysisError::configuration("no policy loaded")
}
