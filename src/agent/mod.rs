//! The three participant kinds the [`crate::server::Server`] drives through
//! the four-phase iteration loop, and the trait/registry plumbing shared
//! between them.

mod meta;
mod model;
mod observer;
mod registry;
mod simulation_agent;

pub use meta::{
    EvaluateFn, ExplainFn, MetaAgent, PartnerSearchFn, PartnerSearchInternal, PartnerSearchResponses, PredictFn,
    VerifyFn,
};
pub use model::{BeginMainPhaseFn, ModelAgent, ModelPhaseHandle, StateUpdateFn, ValidationFn};
pub use observer::{ObservationStrategyFn, ObserverAgent, ScheduleHandle};
pub use registry::{AgentKind, AgentRegistry};
pub use simulation_agent::SimulationAgent;
