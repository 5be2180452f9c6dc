//! # sepolicy-analysis
//!
//! Reachability analysis over compiled access-control policies.
//!
//! The crate answers three questions about a policy:
//!
//! > Can information flow from type A to type B?
//! > Can a process in domain A transition into domain B?
//! > To and from which types can objects of type A be relabeled?
//!
//! ## Architecture
//!
//! ```text
//! Query → PolicyAnalyzer ─┬→ InfoflowAnalyzer → GraphBuilder → InfoflowGraph
//!                         │        ↓                              ↓
//!                         │   Search / FurtherSession     GraphHandleRegistry
//!                         ├→ DomainTransitionAnalyzer (LRU rule memo)
//!                         └→ RelabelAnalyzer
//!                                  ↓
//!                 PolicyDatabase (InMemoryPolicy) + PermissionMap
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same policy + same permission map + same query → identical results
//! - Shortest-path ties are broken by type name
//! - Results are ordered by end type (information flow), by
//!   (source, target, entrypoint) (domain transitions) or by subject
//!   (relabel)
//!
//! ## Handles
//!
//! Information-flow analyses return a [`GraphHandle`] that continuation
//! calls pass back. Any change to the policy, a boolean or the permission
//! map invalidates every outstanding handle.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analyzer;
pub mod canonical;
pub mod config;
pub mod domain_trans;
pub mod infoflow;
pub mod logging;
pub mod permmap;
pub mod query;
pub mod registry;
pub mod relabel;
pub mod store;
pub mod types;

// Re-exports
pub use analyzer::{
    DirectFlowOutput, DomainTransOutput, PolicyAnalyzer, RelabelOutput, SharedAnalyzer,
    TransitiveFlowOutput,
};
pub use config::{AnalysisConfig, CacheConfig};
pub use domain_trans::{CacheStats, DomainTransitionAnalyzer};
pub use infoflow::{
    BuildCriteria, FurtherSession, GraphBuilder, GraphScope, InfoflowAnalyzer, InfoflowGraph,
    InfoflowRegistry, InfoflowSession, SessionKind,
};
pub use permmap::{PermDirection, PermMapError, PermMapping, PermissionMap};
pub use query::{
    DirectFlowParams, DirectFlowQuery, DomainTransParams, DomainTransQuery, RelabelParams,
    RelabelQuery, ResultFilter, TransitiveFlowParams, TransitiveFlowQuery,
};
pub use registry::{GraphHandle, GraphHandleRegistry};
pub use relabel::RelabelAnalyzer;
pub use store::{
    AvRule, AvRuleKind, Conditional, InMemoryPolicy, PolicyDatabase, PolicyLoadError, TeRule,
    TeRuleKind,
};
pub use types::{
    AnalysisError, ClassPermPair, DirectFlowRecord, DomainTransResult, Edge, FlowDirection,
    FlowResult, FlowStep, HandleFault, Orientation, RelabelMode, RelabelResult, RuleId,
    TransitionDirection, TransitiveDirection, TypeName,
};

/// Crate version, for embedding in host diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
