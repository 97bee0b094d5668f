//! Prompts and response parsing for the onboarding steps.

use std::sync::LazyLock;

use regex::Regex;

use super::model::{BrandBrain, BrandFacts, PlannedStaff, StaffRole, Turn};
use crate::llm::GenerationRequest;

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").unwrap());

static ROLE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z][a-z_]+").unwrap());

const SYSTEM: &str = "\
You are the onboarding specialist for a marketing automation platform. \
You help a local business set up a team of AI staff. Be concise and concrete. \
Never invent facts the owner did not state.";

/// Opening line of every onboarding conversation.
pub fn greeting() -> String {
    "Hi! I'll help you set up your AI staff. To start, tell me about your business: \
     its name and what makes it special."
        .to_string()
}

/// Reply once the owner has described the business.
pub fn facts_acknowledgement(facts: &BrandFacts) -> String {
    format!(
        "Thanks! I've got {}. Give me a moment to put together a plan.",
        facts.business_name
    )
}

/// Reply once the build plan is ready for review.
pub fn plan_ready(revision: u32) -> String {
    if revision <= 1 {
        "Here's the build plan for your AI staff. Approve it to deploy, or reject it with notes."
            .to_string()
    } else {
        format!(
            "Here's revision {revision} of the build plan. Approve it to deploy, or reject it with notes."
        )
    }
}

/// Reply after a rejection at the approval gate.
pub fn revision_requested(notes: Option<&str>) -> String {
    match notes {
        Some(n) if !n.trim().is_empty() => format!(
            "Got it, I'll rework the plan (\"{}\"). Anything else you'd like changed?",
            n.trim()
        ),
        _ => "Got it, I'll rework the plan. What would you like changed?".to_string(),
    }
}

pub fn plan_approved() -> String {
    "Plan approved. Deploying your AI staff now.".to_string()
}

/// Reply after staff were deployed.
pub fn deployment_done(staff: &[PlannedStaff]) -> String {
    let names: Vec<&str> = staff.iter().map(|s| s.role.as_str()).collect();
    format!("All set! Deployed: {}.", names.join(", "))
}

/// Pull structured facts out of the owner's free-text description.
///
/// The business name is the leading clause (up to the first comma, period,
/// or dash). Returns `None` for blank input.
pub fn parse_brand_facts(message: &str) -> Option<BrandFacts> {
    let text = message.trim();
    if text.is_empty() {
        return None;
    }

    let name_end = text
        .find([',', '.', ';', '\n'])
        .or_else(|| text.find(" - "))
        .unwrap_or(text.len());
    let mut business_name = text[..name_end].trim().to_string();
    if business_name.is_empty() {
        business_name = text.to_string();
    }
    if business_name.chars().count() > 80 {
        business_name = business_name.chars().take(80).collect();
    }

    let founded_year = YEAR
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());

    Some(BrandFacts {
        business_name,
        description: text.to_string(),
        founded_year,
    })
}

pub fn brand_brain_request(facts: &BrandFacts) -> GenerationRequest {
    let founded = facts
        .founded_year
        .map(|y| format!("\nFounded: {y}"))
        .unwrap_or_default();
    let prompt = format!(
        "Write a short brand profile (3-5 sentences) for the business below: who they serve, \
         their tone of voice, and what sets them apart.\n\n\
         Business: {}{}\nOwner's description: {}",
        facts.business_name, founded, facts.description
    );
    GenerationRequest::new(SYSTEM, prompt).with_max_tokens(512)
}

pub fn staff_roles_request(facts: &BrandFacts, brain: &BrandBrain) -> GenerationRequest {
    let catalog: Vec<String> = StaffRole::ALL
        .iter()
        .map(|r| format!("- {}: {}", r.as_str(), r.description()))
        .collect();
    let prompt = format!(
        "Pick the AI staff roles this business needs most (between 1 and 4).\n\n\
         Available roles:\n{}\n\n\
         Business: {}\nBrand profile: {}\n\n\
         Answer with the role identifiers only, comma-separated.",
        catalog.join("\n"),
        facts.business_name,
        brain.summary
    );
    GenerationRequest::new(SYSTEM, prompt).with_max_tokens(64)
}

pub fn build_plan_request(
    facts: &BrandFacts,
    brain: &BrandBrain,
    staff: &[PlannedStaff],
    notes: &[String],
    recent: &[Turn],
) -> GenerationRequest {
    let staff_lines: Vec<String> = staff
        .iter()
        .map(|s| {
            let goals: Vec<&str> = s.goals.iter().map(|g| g.goal.as_str()).collect();
            format!("- {}: {}", s.role.as_str(), goals.join("; "))
        })
        .collect();

    let mut prompt = format!(
        "Summarize the deployment plan below for the business owner in 2-4 sentences.\n\n\
         Business: {}\nBrand profile: {}\nStaff:\n{}",
        facts.business_name,
        brain.summary,
        staff_lines.join("\n")
    );

    if !notes.is_empty() {
        prompt.push_str("\n\nThe owner rejected earlier versions with this feedback; address it:\n");
        for note in notes {
            prompt.push_str(&format!("- {note}\n"));
        }
    }

    if !recent.is_empty() {
        prompt.push_str("\n\nRecent conversation:\n");
        for turn in recent {
            let who = match turn.speaker {
                super::model::Speaker::User => "Owner",
                super::model::Speaker::Assistant => "Assistant",
            };
            prompt.push_str(&format!("{who}: {}\n", turn.content));
        }
    }

    GenerationRequest::new(SYSTEM, prompt).with_max_tokens(512)
}

/// Parse role identifiers out of a model answer. Unknown words are ignored,
/// duplicates dropped, order preserved.
pub fn parse_staff_roles(text: &str) -> Vec<StaffRole> {
    let lowered = text.to_lowercase();
    let mut roles = Vec::new();
    for token in ROLE_TOKEN.find_iter(&lowered) {
        if let Ok(role) = token.as_str().parse::<StaffRole>()
            && !roles.contains(&role)
        {
            roles.push(role);
        }
    }
    roles
}
