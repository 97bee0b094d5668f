//! Onboarding state machine: step identifiers and the resumable workflow state.

use serde::{Deserialize, Serialize};

use super::model::{BrandBrain, BrandFacts, BuildPlan, StaffGoal, StaffRole, Turn};
use crate::provisioning::DeploymentResult;

/// The steps of the onboarding graph.
///
/// Main line: Greet → CollectBrandFacts → BuildBrandBrain → SelectStaffRoles →
/// SetGoals → GenerateBuildPlan → (approval gate) → ProvisionStaff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Greet,
    CollectBrandFacts,
    BuildBrandBrain,
    SelectStaffRoles,
    SetGoals,
    GenerateBuildPlan,
    ProvisionStaff,
}

impl OnboardingStep {
    pub const ALL: [OnboardingStep; 7] = [
        OnboardingStep::Greet,
        OnboardingStep::CollectBrandFacts,
        OnboardingStep::BuildBrandBrain,
        OnboardingStep::SelectStaffRoles,
        OnboardingStep::SetGoals,
        OnboardingStep::GenerateBuildPlan,
        OnboardingStep::ProvisionStaff,
    ];

    /// The step every new session starts at.
    pub const INITIAL: OnboardingStep = OnboardingStep::Greet;

    /// Whether the step can only run with a user message.
    pub fn requires_message(&self) -> bool {
        matches!(self, Self::CollectBrandFacts)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greet => "greet",
            Self::CollectBrandFacts => "collect_brand_facts",
            Self::BuildBrandBrain => "build_brand_brain",
            Self::SelectStaffRoles => "select_staff_roles",
            Self::SetGoals => "set_goals",
            Self::GenerateBuildPlan => "generate_build_plan",
            Self::ProvisionStaff => "provision_staff",
        }
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OnboardingStep {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OnboardingStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("Unknown onboarding step: {}", s))
    }
}

/// Where the build plan stands with respect to the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    #[default]
    NotRequested,
    Pending,
    Approved,
}

/// How a finished workflow ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Finish {
    pub success: bool,
    pub detail: String,
}

/// Resumable engine state. This is what the checkpoint stores.
///
/// Holds no timestamps or random values, so replaying a checkpoint with the
/// same input yields the same result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowState {
    pub location_id: String,
    /// Step the next run starts at.
    pub next_step: OnboardingStep,
    /// Last step the engine executed (or the initial step before any run).
    pub current_step: OnboardingStep,
    #[serde(default)]
    pub transcript: Vec<Turn>,
    #[serde(default)]
    pub brand: Option<BrandFacts>,
    #[serde(default)]
    pub brand_brain: Option<BrandBrain>,
    #[serde(default)]
    pub staff_roles: Vec<StaffRole>,
    #[serde(default)]
    pub goals: Vec<StaffGoal>,
    #[serde(default)]
    pub build_plan: Option<BuildPlan>,
    #[serde(default)]
    pub approval: ApprovalState,
    /// Rejections received at the approval gate.
    #[serde(default)]
    pub plan_revisions: u32,
    #[serde(default)]
    pub revision_notes: Vec<String>,
    #[serde(default)]
    pub deployment: Option<DeploymentResult>,
    /// Consecutive failures of the current step.
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_reply: Option<String>,
    #[serde(default)]
    pub finished: Option<Finish>,
}

impl WorkflowState {
    pub fn new(location_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
            next_step: OnboardingStep::INITIAL,
            current_step: OnboardingStep::INITIAL,
            transcript: Vec::new(),
            brand: None,
            brand_brain: None,
            staff_roles: Vec::new(),
            goals: Vec::new(),
            build_plan: None,
            approval: ApprovalState::NotRequested,
            plan_revisions: 0,
            revision_notes: Vec::new(),
            deployment: None,
            error_count: 0,
            last_error: None,
            last_reply: None,
            finished: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn awaiting_approval(&self) -> bool {
        self.approval == ApprovalState::Pending && self.build_plan.is_some()
    }

    /// Record an assistant line and make it the reply shown to the caller.
    pub fn say(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.transcript.push(Turn::assistant(text.clone()));
        self.last_reply = Some(text);
    }

    /// Display projection stored in the session row's `state_data` column.
    pub fn projection(&self) -> serde_json::Value {
        serde_json::json!({
            "current_step": self.current_step,
            "next_step": self.next_step,
            "business_name": self.brand.as_ref().map(|b| b.business_name.as_str()),
            "brand_summary": self.brand_brain.as_ref().map(|b| b.summary.as_str()),
            "staff_roles": self.staff_roles,
            "goals": self.goals,
            "build_plan": self.build_plan,
            "approval": self.approval,
            "plan_revisions": self.plan_revisions,
            "error_count": self.error_count,
            "last_error": self.last_error,
            "last_reply": self.last_reply,
            "deployment": self.deployment,
        })
    }
}
