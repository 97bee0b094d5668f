//! Onboard Orchestrator: checkpointed onboarding workflows for agency locations.

pub mod audit;
pub mod config;
pub mod error;
pub mod llm;
pub mod onboarding;
pub mod provisioning;
pub mod retry;
pub mod store;
