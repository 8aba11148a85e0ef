use crate::db::models::HealthProfile;
use crate::llm::ChatTurn;

pub const BASE_INSTRUCTIONS: &str = "You are Santra, an AI health assistant created by Prescribly. You provide thoughtful, empathetic health guidance while being clear about your limitations.

Core principles:
1. Be warm, supportive, and non-judgmental
2. Provide general health information and guidance
3. Never diagnose conditions or prescribe medications
4. Always recommend consulting a healthcare professional for serious concerns
5. Recognize emergencies and urge immediate medical attention

For emergencies (chest pain, difficulty breathing, severe bleeding, stroke symptoms, suicidal thoughts):
- Immediately acknowledge the emergency
- Provide clear first-aid guidance if applicable
- Strongly urge calling emergency services (911) or going to the nearest ER

Keep responses concise but thorough. Use simple, accessible language. Show empathy and understanding.";

pub const EMERGENCY_DIRECTIVE: &str =
    "If the user describes a medical emergency, include \"EMERGENCY:\" at the start of your response.";

pub const SUGGESTIONS_DIRECTIVE: &str = "IMPORTANT: At the end of EVERY response, on a new line, add 2-3 helpful follow-up questions the user might want to ask next. Format them exactly like this:
[SUGGESTIONS]: Question 1? | Question 2? | Question 3?

Make the suggestions contextually relevant to what you just discussed. Keep each suggestion concise (under 8 words).";

const CONTEXT_OPEN: &str = "--- Known user health context ---";
const CONTEXT_CLOSE: &str = "--- End of health context ---";

/// Builds the system prompt for one relay call.
pub fn system_prompt(instructions: Option<&str>, profile: Option<&HealthProfile>) -> String {
    let mut prompt = instructions
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(BASE_INSTRUCTIONS)
        .to_string();

    if let Some(block) = profile.and_then(health_context) {
        prompt.push_str("\n\n");
        prompt.push_str(&block);
    }

    if !prompt.contains("EMERGENCY:") {
        prompt.push_str("\n\n");
        prompt.push_str(EMERGENCY_DIRECTIVE);
    }
    if !prompt.contains("[SUGGESTIONS]:") {
        prompt.push_str("\n\n");
        prompt.push_str(SUGGESTIONS_DIRECTIVE);
    }
    prompt
}

/// Renders the delimited health-context block, or `None` when the profile
/// holds nothing worth mentioning.
pub fn health_context(profile: &HealthProfile) -> Option<String> {
    let mut parts = Vec::new();
    if !profile.allergies.is_empty() {
        parts.push(format!("Allergies: {}", profile.allergies.join(", ")));
    }
    if !profile.conditions.is_empty() {
        parts.push(format!("Existing conditions: {}", profile.conditions.join(", ")));
    }
    if !profile.medications.is_empty() {
        parts.push(format!("Current medications: {}", profile.medications.join(", ")));
    }
    if let Some(blood) = profile.blood_type.as_deref().filter(|b| !b.is_empty()) {
        parts.push(format!("Blood type: {blood}"));
    }
    if let Some(height) = profile.height_cm.filter(|h| *h > 0.0) {
        parts.push(format!("Height: {height} cm"));
    }
    if let Some(weight) = profile.weight_kg.filter(|w| *w > 0.0) {
        parts.push(format!("Weight: {weight} kg"));
    }

    if parts.is_empty() {
        return None;
    }
    Some(format!(
        "{CONTEXT_OPEN}\nThe user has provided the following health profile. Factor this into your responses when relevant (e.g. drug interactions with their medications, allergy warnings, condition-specific advice):\n{}\n{CONTEXT_CLOSE}",
        parts.join("\n")
    ))
}

/// System prompt first, then prior history in order, then the new turn(s).
pub fn assemble(system: String, history: Vec<ChatTurn>, new_turns: Vec<ChatTurn>) -> Vec<ChatTurn> {
    let mut messages = Vec::with_capacity(1 + history.len() + new_turns.len());
    messages.push(ChatTurn::system(system));
    messages.extend(history);
    messages.extend(new_turns);
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn base_prompt_ends_with_suggestions_directive() {
        let prompt = system_prompt(None, None);
        assert!(prompt.starts_with("You are Santra, an AI health assistant"));
        assert!(prompt.contains(EMERGENCY_DIRECTIVE));
        assert!(prompt.ends_with(SUGGESTIONS_DIRECTIVE));
    }

    #[test]
    fn override_replaces_instructions_but_keeps_contract() {
        let prompt = system_prompt(Some("Only talk about pharmacology."), None);
        assert!(prompt.starts_with("Only talk about pharmacology."));
        assert!(!prompt.contains("Core principles"));
        assert!(prompt.contains(EMERGENCY_DIRECTIVE));
        assert!(prompt.ends_with(SUGGESTIONS_DIRECTIVE));
    }

    #[test]
    fn override_with_its_own_directive_is_not_duplicated() {
        let custom = "Scope.\n[SUGGESTIONS]: A? | B?";
        let prompt = system_prompt(Some(custom), None);
        assert_eq!(prompt.matches("[SUGGESTIONS]:").count(), 1);
    }

    #[test]
    fn blank_override_falls_back_to_base() {
        assert_eq!(system_prompt(Some("   "), None), system_prompt(None, None));
    }

    #[test]
    fn health_context_lists_only_present_fields() {
        let profile = HealthProfile {
            user_id: "u".into(),
            allergies: vec!["penicillin".into(), "peanuts".into()],
            medications: vec!["warfarin".into()],
            blood_type: Some("AB-".into()),
            weight_kg: Some(70.5),
            ..Default::default()
        };
        let block = health_context(&profile).unwrap();
        assert!(block.starts_with(CONTEXT_OPEN));
        assert!(block.ends_with(CONTEXT_CLOSE));
        assert!(block.contains("Allergies: penicillin, peanuts"));
        assert!(block.contains("Current medications: warfarin"));
        assert!(block.contains("Blood type: AB-"));
        assert!(block.contains("Weight: 70.5 kg"));
        assert!(!block.contains("Existing conditions"));
        assert!(!block.contains("Height"));
    }

    #[test]
    fn empty_profile_adds_nothing() {
        let profile = HealthProfile {
            user_id: "u".into(),
            ..Default::default()
        };
        assert!(health_context(&profile).is_none());
        assert_eq!(
            system_prompt(None, Some(&profile)),
            system_prompt(None, None)
        );
    }

    #[test]
    fn health_context_sits_before_the_contract() {
        let profile = HealthProfile {
            user_id: "u".into(),
            conditions: vec!["asthma".into()],
            ..Default::default()
        };
        let prompt = system_prompt(None, Some(&profile));
        let ctx = prompt.find(CONTEXT_OPEN).unwrap();
        let contract = prompt.find(SUGGESTIONS_DIRECTIVE).unwrap();
        assert!(ctx < contract);
    }

    #[test]
    fn assemble_orders_system_history_then_new() {
        let messages = assemble(
            "sys".into(),
            vec![ChatTurn::user("q1"), ChatTurn::assistant("a1")],
            vec![ChatTurn::user("q2")],
        );
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(messages[3].content, "q2");
    }
}
