//! Prompt templates consumed by the decider, and the parser for the
//! checklist the requirements-extraction prompt asks the model to return.

use serde::Deserialize;

use crate::model::{ChecklistItem, Phase, SessionState};

/// Token allowance for the requirements-extraction call.
pub const REQUIREMENTS_MAX_TOKENS: u32 = 4000;

/// Token allowance for a per-turn generation call.
pub const TURN_MAX_TOKENS: u32 = 8000;

/// Build the requirements-extraction prompt. The template is stable so the
/// very first LLM call of every session is reproducible for a given prompt.
pub fn requirements_extraction_prompt(prompt: &str) -> String {
    format!(
        "You are planning an autonomous build of the following request.\n\
         \n\
         Request:\n{prompt}\n\
         \n\
         Break the work into a checklist covering these phases, in order:\n\
         requirements, design, implementation, testing, documentation, verification.\n\
         \n\
         Respond with a JSON array only. Each element must be an object with:\n\
         - \"phase\": one of the phase names above\n\
         - \"description\": what must be done\n\
         - \"verification\": how completion will be checked\n"
    )
}

/// Build the per-turn prompt: current position, score, the original request,
/// the phase checklist split into done/remaining, and this-phase artifacts.
pub fn phase_prompt(state: &SessionState) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Phase: {} (turn {})\nConfidence: {:.0}%\n\nOriginal request:\n{}\n",
        state.phase,
        state.turn,
        state.confidence.percent(),
        state.prompt
    ));

    let completed: Vec<_> = state
        .checklist_for(state.phase)
        .filter(|i| i.completed)
        .collect();
    let remaining: Vec<_> = state
        .checklist_for(state.phase)
        .filter(|i| !i.completed)
        .collect();

    out.push_str("\nCompleted this phase:\n");
    if completed.is_empty() {
        out.push_str("- (none)\n");
    }
    for item in completed {
        out.push_str(&format!("- [{}] {}\n", item.id, item.description));
    }

    out.push_str("\nRemaining this phase:\n");
    if remaining.is_empty() {
        out.push_str("- (none)\n");
    }
    for item in remaining {
        out.push_str(&format!("- [{}] {}\n", item.id, item.description));
    }

    out.push_str("\nArtifacts produced this phase:\n");
    let mut any = false;
    for artifact in state.artifacts_for(state.phase) {
        any = true;
        out.push_str(&format!("- {}\n", artifact.path));
    }
    if !any {
        out.push_str("- (none)\n");
    }

    out.push_str(
        "\nContinue the work for this phase. Use the write_file tool for every \
         file you produce, and keep changes consistent with earlier artifacts.\n",
    );
    out
}

#[derive(Debug, Deserialize)]
struct RawChecklistEntry {
    phase: String,
    description: String,
    #[serde(default)]
    #[allow(dead_code)]
    verification: Option<String>,
}

/// Extract checklist items from an LLM response. Tolerates prose and code
/// fences around the JSON array; entries with an unknown phase tag or a
/// missing field are skipped.
pub fn parse_checklist(content: &str) -> Vec<ChecklistItem> {
    let Some(json) = extract_json_array(content) else {
        return Vec::new();
    };
    let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(json) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for value in entries {
        let Ok(entry) = serde_json::from_value::<RawChecklistEntry>(value) else {
            continue;
        };
        let Some(phase) = Phase::parse(entry.phase.trim()) else {
            continue;
        };
        let id = format!("{}-{}", phase, items.len() + 1);
        items.push(ChecklistItem::new(id, phase, entry.description));
    }
    items
}

fn extract_json_array(content: &str) -> Option<&str> {
    let start = content.find('[')?;
    let end = content.rfind(']')?;
    (end > start).then(|| &content[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionState;

    #[test]
    fn test_requirements_prompt_embeds_request() {
        let prompt = requirements_extraction_prompt("build a todo API");
        assert!(prompt.contains("build a todo API"));
        assert!(prompt.contains("JSON array"));
    }

    #[test]
    fn test_parse_checklist_from_fenced_response() {
        let response = "Here is the plan:\n```json\n[\n  {\"phase\": \"requirements\", \"description\": \"List endpoints\", \"verification\": \"review\"},\n  {\"phase\": \"implementation\", \"description\": \"Write handlers\", \"verification\": \"tests\"}\n]\n```\nGood luck!";
        let items = parse_checklist(response);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].phase, Phase::Requirements);
        assert_eq!(items[1].description, "Write handlers");
        assert!(!items[0].completed);
    }

    #[test]
    fn test_parse_checklist_skips_malformed_entries() {
        let response = r#"[
            {"phase": "requirements", "description": "ok"},
            {"phase": "deployment", "description": "unknown phase"},
            {"description": "missing phase"},
            {"phase": "design"}
        ]"#;
        let items = parse_checklist(response);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "ok");
    }

    #[test]
    fn test_parse_checklist_without_array_is_empty() {
        assert!(parse_checklist("I could not produce a plan.").is_empty());
    }

    #[test]
    fn test_phase_prompt_sections() {
        let mut state = SessionState::initial("build a parser");
        state.checklist.push(ChecklistItem::new(
            "requirements-1",
            Phase::Requirements,
            "list grammar rules",
        ));
        let prompt = phase_prompt(&state);
        assert!(prompt.contains("Phase: requirements (turn 0)"));
        assert!(prompt.contains("build a parser"));
        assert!(prompt.contains("list grammar rules"));
        assert!(prompt.contains("Remaining this phase"));
    }
}
