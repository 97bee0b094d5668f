//! Onboarding workflow: a checkpointed state machine that walks a new
//! agency location from first greeting to deployed AI staff.
//!
//! The engine runs one step graph; the orchestrator wraps it with the
//! session registry so each call resumes from the stored checkpoint and
//! commits the next one. A human approval gate sits between the build plan
//! and provisioning.

pub mod checkpoint;
pub mod engine;
pub mod model;
pub mod orchestrator;
pub mod prompts;
pub mod routes;
pub mod session;
pub mod state;
pub mod steps;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineRun, Halt, Resume, WorkflowEngine};
pub use orchestrator::{
    Orchestrator, SessionInspection, SessionSummary, StartRequest, TurnResponse,
    spawn_expiry_task,
};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use session::{SessionScope, SessionStatus, TenantRefs};
pub use state::{OnboardingStep, WorkflowState};
