//! Core types for policy analysis.

pub mod names;
pub mod edge;
pub mod flow;
pub mod transition;
pub mod error;

pub use names::{TypeName, RuleId, ClassPermPair};
pub use edge::{Edge, Orientation};
pub use flow::{FlowDirection, TransitiveDirection, FlowStep, FlowResult, DirectFlowRecord};
pub use transition::{
    TransitionDirection, DomainTransResult, RelabelMode, RelabelResult,
};
pub use error::{AnalysisError, HandleFault};
