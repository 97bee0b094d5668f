//! Step functions of the onboarding graph.
//!
//! Each step takes the current state (plus the user's message, if any),
//! and returns the updated state together with the edge to follow. Steps
//! never touch persistence; the engine decides what gets committed.

use tracing::debug;

use super::model::{BrandBrain, BuildPlan, PlannedStaff, StaffGoal, StaffRole};
use super::prompts;
use super::state::{ApprovalState, Finish, OnboardingStep, WorkflowState};
use crate::error::{LlmError, StepError};
use crate::llm::{GenerationRequest, TextGenerator};
use crate::provisioning::{ProvisionRequest, Provisioner};
use crate::retry::{CallPolicy, call_with_retry};

/// Most roles a plan may contain.
const MAX_ROLES: usize = 4;

/// Turns of recent conversation fed into plan generation.
const RECENT_TURNS: usize = 4;

/// What a step asks the engine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Run this step immediately.
    Advance(OnboardingStep),
    /// Stop and wait for a user message; the next run starts at this step.
    SuspendForInput(OnboardingStep),
    /// Stop at the approval gate with this plan.
    SuspendForApproval(BuildPlan),
    /// The workflow is over.
    Terminal(Finish),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Advance(_) => "advance",
            Outcome::SuspendForInput(_) => "suspend_for_input",
            Outcome::SuspendForApproval(_) => "suspend_for_approval",
            Outcome::Terminal(_) => "terminal",
        }
    }
}

/// Collaborators available to steps during one run.
pub struct StepContext<'a> {
    pub generator: &'a dyn TextGenerator,
    pub provisioner: &'a dyn Provisioner,
    pub policy: CallPolicy,
    /// Used as the provisioning idempotency key.
    pub thread_id: &'a str,
}

/// Execute one step against a copy of `state`.
///
/// On error the caller keeps its own, unmodified state.
pub async fn execute(
    step: OnboardingStep,
    state: &WorkflowState,
    message: Option<&str>,
    ctx: &StepContext<'_>,
) -> Result<(WorkflowState, Outcome), StepError> {
    let state = state.clone();
    debug!(step = %step, has_message = message.is_some(), "Executing step");
    match step {
        OnboardingStep::Greet => greet(state),
        OnboardingStep::CollectBrandFacts => collect_brand_facts(state, message),
        OnboardingStep::BuildBrandBrain => build_brand_brain(state, message, ctx).await,
        OnboardingStep::SelectStaffRoles => select_staff_roles(state, ctx).await,
        OnboardingStep::SetGoals => set_goals(state),
        OnboardingStep::GenerateBuildPlan => generate_build_plan(state, message, ctx).await,
        OnboardingStep::ProvisionStaff => provision_staff(state, ctx).await,
    }
}

fn greet(mut state: WorkflowState) -> Result<(WorkflowState, Outcome), StepError> {
    state.say(prompts::greeting());
    Ok((state, Outcome::SuspendForInput(OnboardingStep::CollectBrandFacts)))
}

fn collect_brand_facts(
    mut state: WorkflowState,
    message: Option<&str>,
) -> Result<(WorkflowState, Outcome), StepError> {
    let message = message.ok_or_else(|| missing(OnboardingStep::CollectBrandFacts, "a business description"))?;
    let facts = prompts::parse_brand_facts(message)
        .ok_or_else(|| StepError::InvalidInput("the business description is empty".to_string()))?;

    state.say(prompts::facts_acknowledgement(&facts));
    state.brand = Some(facts);
    Ok((state, Outcome::Advance(OnboardingStep::BuildBrandBrain)))
}

async fn build_brand_brain(
    mut state: WorkflowState,
    message: Option<&str>,
    ctx: &StepContext<'_>,
) -> Result<(WorkflowState, Outcome), StepError> {
    let mut facts = state
        .brand
        .clone()
        .ok_or_else(|| missing(OnboardingStep::BuildBrandBrain, "brand facts"))?;

    // A message on retry adds detail to the description.
    if let Some(extra) = message.map(str::trim).filter(|m| !m.is_empty()) {
        facts.description = format!("{}\n{}", facts.description, extra);
        if facts.founded_year.is_none() {
            facts.founded_year = prompts::parse_brand_facts(extra).and_then(|f| f.founded_year);
        }
    }

    let summary = generate(ctx, "brand_brain", prompts::brand_brain_request(&facts)).await?;
    state.brand = Some(facts);
    state.brand_brain = Some(BrandBrain { summary });
    Ok((state, Outcome::Advance(OnboardingStep::SelectStaffRoles)))
}

async fn select_staff_roles(
    mut state: WorkflowState,
    ctx: &StepContext<'_>,
) -> Result<(WorkflowState, Outcome), StepError> {
    let facts = state
        .brand
        .as_ref()
        .ok_or_else(|| missing(OnboardingStep::SelectStaffRoles, "brand facts"))?;
    let brain = state
        .brand_brain
        .as_ref()
        .ok_or_else(|| missing(OnboardingStep::SelectStaffRoles, "a brand brain"))?;

    let answer = generate(ctx, "staff_roles", prompts::staff_roles_request(facts, brain)).await?;
    let mut roles = prompts::parse_staff_roles(&answer);
    if roles.is_empty() {
        debug!(answer = %answer, "No roles recognized, using defaults");
        roles = StaffRole::DEFAULTS.to_vec();
    }
    roles.truncate(MAX_ROLES);

    state.staff_roles = roles;
    Ok((state, Outcome::Advance(OnboardingStep::SetGoals)))
}

fn set_goals(mut state: WorkflowState) -> Result<(WorkflowState, Outcome), StepError> {
    if state.staff_roles.is_empty() {
        return Err(missing(OnboardingStep::SetGoals, "selected staff roles"));
    }

    state.goals = state
        .staff_roles
        .iter()
        .map(|role| {
            let (goal, metric) = role.default_goal();
            StaffGoal {
                role: *role,
                goal: goal.to_string(),
                metric: metric.to_string(),
            }
        })
        .collect();
    Ok((state, Outcome::Advance(OnboardingStep::GenerateBuildPlan)))
}

async fn generate_build_plan(
    mut state: WorkflowState,
    message: Option<&str>,
    ctx: &StepContext<'_>,
) -> Result<(WorkflowState, Outcome), StepError> {
    // After a rejection, further messages are more revision feedback.
    if state.plan_revisions > 0
        && let Some(note) = message.map(str::trim).filter(|m| !m.is_empty())
    {
        state.revision_notes.push(note.to_string());
    }

    let facts = state
        .brand
        .as_ref()
        .ok_or_else(|| missing(OnboardingStep::GenerateBuildPlan, "brand facts"))?;
    let brain = state
        .brand_brain
        .as_ref()
        .ok_or_else(|| missing(OnboardingStep::GenerateBuildPlan, "a brand brain"))?;
    if state.goals.is_empty() {
        return Err(missing(OnboardingStep::GenerateBuildPlan, "staff goals"));
    }

    let staff: Vec<PlannedStaff> = state
        .staff_roles
        .iter()
        .map(|role| PlannedStaff {
            role: *role,
            goals: state.goals.iter().filter(|g| g.role == *role).cloned().collect(),
        })
        .collect();

    let recent_start = state.transcript.len().saturating_sub(RECENT_TURNS);
    let request = prompts::build_plan_request(
        facts,
        brain,
        &staff,
        &state.revision_notes,
        &state.transcript[recent_start..],
    );
    let summary = generate(ctx, "build_plan", request).await?;

    let plan = BuildPlan {
        revision: state.plan_revisions + 1,
        location_id: state.location_id.clone(),
        business_name: facts.business_name.clone(),
        brand_summary: brain.summary.clone(),
        staff,
        summary,
        revision_notes: state.revision_notes.clone(),
    };

    state.build_plan = Some(plan.clone());
    state.approval = ApprovalState::Pending;
    state.say(prompts::plan_ready(plan.revision));
    Ok((state, Outcome::SuspendForApproval(plan)))
}

async fn provision_staff(
    mut state: WorkflowState,
    ctx: &StepContext<'_>,
) -> Result<(WorkflowState, Outcome), StepError> {
    if state.approval != ApprovalState::Approved {
        return Err(missing(OnboardingStep::ProvisionStaff, "an approved build plan"));
    }
    let plan = state
        .build_plan
        .clone()
        .ok_or_else(|| missing(OnboardingStep::ProvisionStaff, "a build plan"))?;

    let request = ProvisionRequest {
        idempotency_key: ctx.thread_id,
        location_id: &state.location_id,
        plan: &plan,
    };
    let result = call_with_retry(ctx.policy, "provision", || ctx.provisioner.provision(&request)).await?;

    if !result.success {
        let reason = result
            .message
            .clone()
            .unwrap_or_else(|| "provisioning service reported failure".to_string());
        return Err(StepError::DeploymentFailed(reason));
    }

    let detail = format!("deployed {} staff", plan.staff.len());
    state.deployment = Some(result);
    state.say(prompts::deployment_done(&plan.staff));
    Ok((
        state,
        Outcome::Terminal(Finish {
            success: true,
            detail,
        }),
    ))
}

/// Call the generator under the retry policy and insist on a non-empty answer.
async fn generate(
    ctx: &StepContext<'_>,
    label: &str,
    request: GenerationRequest,
) -> Result<String, StepError> {
    let text = call_with_retry(ctx.policy, label, || ctx.generator.generate(request.clone())).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: ctx.generator.model_name().to_string(),
            reason: format!("empty answer for {label}"),
        }
        .into());
    }
    Ok(text.to_string())
}

fn missing(step: OnboardingStep, what: &str) -> StepError {
    StepError::MissingData {
        step: step.to_string(),
        missing: what.to_string(),
    }
}
