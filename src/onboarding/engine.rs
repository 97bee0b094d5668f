//! Workflow engine: drives the step graph from a checkpointed state.
//!
//! A run starts at `state.next_step`, executes steps until one suspends or
//! finishes, and returns the new state plus a record of every step it
//! touched. The engine performs no I/O of its own; persisting the result is
//! the caller's job, so an aborted run leaves nothing behind.

use tracing::{debug, warn};

use super::model::Turn;
use super::prompts;
use super::state::{ApprovalState, Finish, OnboardingStep, WorkflowState};
use super::steps::{self, Outcome, StepContext};
use crate::error::{EngineError, StepError};
use crate::llm::TextGenerator;
use crate::onboarding::session::SessionStatus;
use crate::provisioning::Provisioner;
use crate::retry::CallPolicy;

/// Input that resumes a suspended workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// First run of a fresh session.
    Start,
    /// Pick up at `next_step` with no new input.
    Continue,
    /// A user message.
    Message(String),
    /// An approve/reject decision at the approval gate.
    Decision {
        approved: bool,
        notes: Option<String>,
    },
}

/// Bounds that keep a single run finite.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    pub max_step_errors: u32,
    pub max_plan_revisions: u32,
    pub max_steps_per_run: usize,
    pub call_policy: CallPolicy,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// Waiting for a user message. `retry` is set when the last step failed.
    AwaitingInput { retry: bool },
    AwaitingApproval,
    /// The plan was approved; provisioning runs on the next `Continue`.
    Approved,
    Completed,
    Failed,
}

impl Halt {
    /// Session status a halted run maps to.
    pub fn status(&self) -> SessionStatus {
        match self {
            Halt::AwaitingInput { retry: false } => SessionStatus::Active,
            Halt::AwaitingInput { retry: true } => SessionStatus::AwaitingInput,
            Halt::AwaitingApproval => SessionStatus::AwaitingApproval,
            Halt::Approved => SessionStatus::Active,
            Halt::Completed => SessionStatus::Completed,
            Halt::Failed => SessionStatus::Failed,
        }
    }
}

/// One step the run executed.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub step: OnboardingStep,
    /// `None` when the step failed.
    pub outcome: Option<&'static str>,
    pub error: Option<String>,
    pub error_count: u32,
}

impl NodeRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// An approve/reject decision the run consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub approved: bool,
    pub notes: Option<String>,
    pub plan_revision: u32,
}

/// Result of one engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRun {
    pub state: WorkflowState,
    pub traversed: Vec<NodeRecord>,
    pub halt: Halt,
    pub decision: Option<GateDecision>,
}

pub struct WorkflowEngine<'a> {
    generator: &'a dyn TextGenerator,
    provisioner: &'a dyn Provisioner,
    limits: EngineLimits,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(
        generator: &'a dyn TextGenerator,
        provisioner: &'a dyn Provisioner,
        limits: EngineLimits,
    ) -> Self {
        Self {
            generator,
            provisioner,
            limits,
        }
    }

    /// Resume `state` with `input` and run until the workflow suspends or ends.
    pub async fn run(
        &self,
        thread_id: &str,
        mut state: WorkflowState,
        input: Resume,
    ) -> Result<EngineRun, EngineError> {
        if state.is_finished() {
            return Err(EngineError::AlreadyTerminal);
        }

        let mut message: Option<String> = None;
        let mut decision = None;

        match input {
            Resume::Start | Resume::Continue | Resume::Message(_) if state.awaiting_approval() => {
                return Err(EngineError::ApprovalPending);
            }
            Resume::Start | Resume::Continue => {}
            Resume::Message(text) => {
                state.transcript.push(Turn::user(text.clone()));
                message = Some(text);
            }
            Resume::Decision { approved, notes } => {
                let plan_revision = match (&state.build_plan, state.approval) {
                    (Some(plan), ApprovalState::Pending) => plan.revision,
                    _ => return Err(EngineError::NoPendingApproval),
                };
                decision = Some(GateDecision {
                    approved,
                    notes: notes.clone(),
                    plan_revision,
                });

                if !approved {
                    return Ok(self.reject(state, notes, decision));
                }

                // The decision is committed on its own before anything runs,
                // so provisioning only ever follows a decision that won.
                state.approval = ApprovalState::Approved;
                state.next_step = OnboardingStep::ProvisionStaff;
                state.say(prompts::plan_approved());
                return Ok(EngineRun {
                    state,
                    traversed: Vec::new(),
                    halt: Halt::Approved,
                    decision,
                });
            }
        }

        let ctx = StepContext {
            generator: self.generator,
            provisioner: self.provisioner,
            policy: self.limits.call_policy,
            thread_id,
        };

        let mut traversed = Vec::new();
        let mut input = message.as_deref();

        let halt = loop {
            let step = state.next_step;

            if traversed.len() >= self.limits.max_steps_per_run {
                let detail = format!(
                    "step budget of {} exhausted at {}",
                    self.limits.max_steps_per_run, step
                );
                warn!(thread_id, %detail, "Aborting run");
                finish(&mut state, false, detail);
                break Halt::Failed;
            }

            if step.requires_message() && input.is_none() {
                break Halt::AwaitingInput {
                    retry: state.error_count > 0,
                };
            }

            match steps::execute(step, &state, input.take(), &ctx).await {
                Ok((mut next, outcome)) => {
                    next.current_step = step;
                    next.error_count = 0;
                    next.last_error = None;
                    traversed.push(NodeRecord {
                        step,
                        outcome: Some(outcome.label()),
                        error: None,
                        error_count: 0,
                    });
                    debug!(thread_id, step = %step, outcome = outcome.label(), "Step completed");

                    match outcome {
                        Outcome::Advance(to) => {
                            next.next_step = to;
                            state = next;
                        }
                        Outcome::SuspendForInput(to) => {
                            next.next_step = to;
                            state = next;
                            break Halt::AwaitingInput { retry: false };
                        }
                        Outcome::SuspendForApproval(plan) => {
                            if !plan.is_complete() {
                                let err = StepError::MissingData {
                                    step: step.to_string(),
                                    missing: "a complete build plan".to_string(),
                                };
                                traversed.pop();
                                break self.step_failed(thread_id, &mut state, step, err, &mut traversed);
                            }
                            next.next_step = OnboardingStep::ProvisionStaff;
                            next.approval = ApprovalState::Pending;
                            state = next;
                            break Halt::AwaitingApproval;
                        }
                        Outcome::Terminal(result) => {
                            let halt = if result.success {
                                Halt::Completed
                            } else {
                                next.last_error = Some(result.detail.clone());
                                Halt::Failed
                            };
                            next.finished = Some(result);
                            state = next;
                            break halt;
                        }
                    }
                }
                Err(err) => {
                    break self.step_failed(thread_id, &mut state, step, err, &mut traversed);
                }
            }
        };

        Ok(EngineRun {
            state,
            traversed,
            halt,
            decision,
        })
    }

    /// Record a failed step on the pre-step state.
    fn step_failed(
        &self,
        thread_id: &str,
        state: &mut WorkflowState,
        step: OnboardingStep,
        err: StepError,
        traversed: &mut Vec<NodeRecord>,
    ) -> Halt {
        state.current_step = step;
        state.next_step = step;
        state.error_count += 1;
        let message = err.to_string();
        state.last_error = Some(message.clone());
        traversed.push(NodeRecord {
            step,
            outcome: None,
            error: Some(message.clone()),
            error_count: state.error_count,
        });

        if state.error_count > self.limits.max_step_errors {
            let detail = format!(
                "{} failed {} times: {}",
                step, state.error_count, message
            );
            warn!(thread_id, step = %step, %detail, "Error budget exhausted");
            finish(state, false, detail);
            return Halt::Failed;
        }

        warn!(thread_id, step = %step, error = %message, error_count = state.error_count, "Step failed, waiting for retry");
        Halt::AwaitingInput { retry: true }
    }

    /// Handle a rejection at the approval gate: loop back to plan generation,
    /// or fail once the revision budget is spent.
    fn reject(
        &self,
        mut state: WorkflowState,
        notes: Option<String>,
        decision: Option<GateDecision>,
    ) -> EngineRun {
        state.plan_revisions += 1;
        let notes = notes.filter(|n| !n.trim().is_empty());
        if let Some(n) = &notes {
            state.revision_notes.push(n.trim().to_string());
        }
        state.approval = ApprovalState::NotRequested;
        state.build_plan = None;
        state.next_step = OnboardingStep::GenerateBuildPlan;
        state.current_step = OnboardingStep::GenerateBuildPlan;

        let halt = if state.plan_revisions > self.limits.max_plan_revisions {
            let detail = format!(
                "build plan rejected {} times",
                state.plan_revisions
            );
            finish(&mut state, false, detail);
            Halt::Failed
        } else {
            state.say(prompts::revision_requested(notes.as_deref()));
            Halt::AwaitingInput { retry: false }
        };

        EngineRun {
            state,
            traversed: Vec::new(),
            halt,
            decision,
        }
    }
}

fn finish(state: &mut WorkflowState, success: bool, detail: String) {
    if !success {
        state.last_error = Some(detail.clone());
    }
    state.finished = Some(Finish { success, detail });
}
