//! Onboarding data models: brand facts, staff roles, goals, and the build plan.

use serde::{Deserialize, Serialize};

/// AI staff roles that can be provisioned for a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Receptionist,
    AppointmentSetter,
    SalesAgent,
    SupportAgent,
    ReviewManager,
    SocialMediaManager,
}

impl StaffRole {
    pub const ALL: [StaffRole; 6] = [
        StaffRole::Receptionist,
        StaffRole::AppointmentSetter,
        StaffRole::SalesAgent,
        StaffRole::SupportAgent,
        StaffRole::ReviewManager,
        StaffRole::SocialMediaManager,
    ];

    /// Roles used when the model suggests nothing usable.
    pub const DEFAULTS: [StaffRole; 2] = [StaffRole::Receptionist, StaffRole::ReviewManager];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receptionist => "receptionist",
            Self::AppointmentSetter => "appointment_setter",
            Self::SalesAgent => "sales_agent",
            Self::SupportAgent => "support_agent",
            Self::ReviewManager => "review_manager",
            Self::SocialMediaManager => "social_media_manager",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Receptionist => "answers inbound calls and chats, routes leads",
            Self::AppointmentSetter => "books, confirms and reschedules appointments",
            Self::SalesAgent => "follows up on leads and quotes until they convert",
            Self::SupportAgent => "handles customer questions and service issues",
            Self::ReviewManager => "requests reviews and drafts replies to them",
            Self::SocialMediaManager => "plans and drafts social posts",
        }
    }

    /// The goal a role starts with before anyone tunes it.
    pub fn default_goal(&self) -> (&'static str, &'static str) {
        match self {
            Self::Receptionist => ("Answer inbound conversations within 1 minute", "first_response_seconds <= 60"),
            Self::AppointmentSetter => ("Book qualified leads into the calendar", "appointments_per_week >= 10"),
            Self::SalesAgent => ("Follow up every open quote", "quote_follow_up_rate >= 0.9"),
            Self::SupportAgent => ("Resolve customer questions without escalation", "self_resolution_rate >= 0.7"),
            Self::ReviewManager => ("Grow public reviews", "new_reviews_per_month >= 8"),
            Self::SocialMediaManager => ("Keep social channels active", "posts_per_week >= 3"),
        }
    }
}

impl std::fmt::Display for StaffRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StaffRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StaffRole::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("Unknown staff role: {}", s))
    }
}

/// Facts the business owner told us about themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrandFacts {
    pub business_name: String,
    /// Everything the owner wrote, accumulated across corrections.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub founded_year: Option<u16>,
}

/// Generated brand profile that the staff prompts are built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrandBrain {
    pub summary: String,
}

/// A measurable target for one staff role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaffGoal {
    pub role: StaffRole,
    pub goal: String,
    pub metric: String,
}

/// One staff member the plan will provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannedStaff {
    pub role: StaffRole,
    pub goals: Vec<StaffGoal>,
}

/// The proposal shown at the approval gate. Self-contained: provisioning
/// needs nothing beyond it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildPlan {
    /// 1 for the first plan, incremented on every regeneration.
    pub revision: u32,
    pub location_id: String,
    pub business_name: String,
    pub brand_summary: String,
    pub staff: Vec<PlannedStaff>,
    pub summary: String,
    /// Feedback the plan was revised against.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revision_notes: Vec<String>,
}

impl BuildPlan {
    pub fn roles(&self) -> Vec<StaffRole> {
        self.staff.iter().map(|s| s.role).collect()
    }

    /// A plan is complete when it names a business and at least one staff member.
    pub fn is_complete(&self) -> bool {
        !self.business_name.is_empty() && !self.staff.is_empty() && !self.summary.is_empty()
    }
}

/// Who said a line of the onboarding conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// One line of the onboarding conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Turn {
    pub speaker: Speaker,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            content: content.into(),
        }
    }
}
