use std::path::Path;

use log::{info, warn};

use crate::llm::{strip_code_fences, PlannerClient};
use crate::plan::{validate_plan, Action, Step};

/// Planning attempts per round before the fallback plan is installed.
const PLAN_ATTEMPTS: usize = 2;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful autonomous agent.";

const AUDITOR_SYSTEM_PROMPT: &str = "You are a Codebase Auditor. You analyze source \
repositories for security and quality issues using bounded filesystem tools.";

const AUDITOR_OVERLAY: &str = r#"SPECIALIZATION CONTEXT:
You are operating in Codebase Auditor mode.
Your goal is to audit a source code repository.
Prefer search_text for TODO, FIXME, import, and config patterns.
"#;

/// Pick the system prompt for a mode. A `prompts/<mode>.txt` file in `root`
/// overrides the built-ins.
pub fn load_system_prompt(root: &Path, mode: &str) -> String {
    let prompt_file = root.join("prompts").join(format!("{}.txt", mode));
    if let Ok(text) = std::fs::read_to_string(&prompt_file) {
        return text.trim().to_string();
    }
    match mode {
        "codebase_auditor" => AUDITOR_SYSTEM_PROMPT.to_string(),
        _ => DEFAULT_SYSTEM_PROMPT.to_string(),
    }
}

fn specialization_overlay(system_prompt: &str) -> &'static str {
    if system_prompt.contains("Codebase Auditor") {
        AUDITOR_OVERLAY
    } else {
        ""
    }
}

/// Fixed plan installed when initial planning fails outright.
pub fn initial_fallback_plan() -> Vec<Step> {
    vec![
        Step::bare(Action::ListDir),
        Step::with_target(Action::ReadTextFile, "README.md"),
        Step::bare(Action::Pwd),
    ]
}

/// Safe plan installed when a revision comes back invalid.
pub fn revision_fallback_plan() -> Vec<Step> {
    vec![Step::bare(Action::ListDir), Step::bare(Action::Pwd)]
}

/// Last-resort single-step plan when even the reviser call errors out.
pub fn emergency_plan() -> Vec<Step> {
    vec![Step::bare(Action::Pwd)]
}

fn plan_prompt(task: &str, environment_facts: &str, system_prompt: &str) -> String {
    let overlay = specialization_overlay(system_prompt);
    format!(
        r#"{overlay}
Task: {task}
Environment: {environment_facts}

You MUST output ONLY valid JSON.
Do NOT include explanations.
Do NOT include markdown.
Do NOT include backticks.
If unsure, output an empty JSON object {{}}.

MANDATORY RULE: If the user request includes words like "find", "search", "locate", "count", or "where", you MUST use the search_text action.
Do NOT use read_text_file for searching when search_text is available.

Example:
User: Find import statements in Python files
Required plan: {{"steps": [{{"action": "search_text", "pattern": "import", "target": ".", "max_results": 20}}]}}

Valid actions:
- search_text: find plain text in files (pattern: plain string, target: directory/file, max_results: number <= 50)
- read_text_file: for [text] files only (use actual filenames from environment)
- describe_binary_file: for [binary] files only (use actual filenames from environment)
- list_dir: list directory contents
- pwd: show current directory
- whoami: show current user

Use ONLY files that exist in the environment above.
For search_text: use plain strings only, no regex.
Output ONLY the JSON."#
    )
}

/// Ask the provider for an initial plan. Up to two attempts, each fed through
/// the validator; when both fail the fixed fallback plan is installed
/// silently so a planner outage never halts the run.
pub async fn request_plan(
    client: &dyn PlannerClient,
    task: &str,
    environment_facts: &str,
    system_prompt: &str,
) -> Vec<Step> {
    let prompt = plan_prompt(task, environment_facts, system_prompt);

    for attempt in 1..=PLAN_ATTEMPTS {
        match client.complete(system_prompt, &prompt).await {
            Ok(reply) => {
                if let Some(steps) = validate_plan(strip_code_fences(&reply)) {
                    info!("plan accepted on attempt {} ({} steps)", attempt, steps.len());
                    return steps;
                }
                warn!("invalid plan format, attempt {}", attempt);
            }
            Err(e) => warn!("plan generation failed on attempt {}: {e}", attempt),
        }
    }

    warn!("planner exhausted, installing fallback plan");
    initial_fallback_plan()
}

fn revision_prompt(
    failed_step: &Step,
    task: &str,
    environment_facts: &str,
    remaining: &[Step],
) -> String {
    let failed = serde_json::to_string(failed_step).unwrap_or_default();
    let remaining = serde_json::to_string(remaining).unwrap_or_default();
    format!(
        r#"The step {failed} failed repeatedly.
Task: {task}
Environment: {environment_facts}
Remaining steps: {remaining}

Create a revised plan that skips the failed step and continues the task.
Output ONLY valid JSON:
{{"steps": [{{"action": "list_dir"}}, {{"action": "read_text_file", "target": "actual_file.py"}}]}}

Valid actions: read_text_file, describe_binary_file, search_text, list_dir, pwd, whoami
Use ONLY actual files from environment."#
    )
}

/// Ask the provider for a corrective plan after repeated failure on one step.
/// Degrades through two static fallbacks so the loop can never deadlock on a
/// broken planner.
pub async fn revise_plan(
    client: &dyn PlannerClient,
    failed_step: &Step,
    task: &str,
    environment_facts: &str,
    remaining: &[Step],
    system_prompt: &str,
) -> Vec<Step> {
    let prompt = revision_prompt(failed_step, task, environment_facts, remaining);

    match client.complete(system_prompt, &prompt).await {
        Ok(reply) => {
            if let Some(steps) = validate_plan(strip_code_fences(&reply)) {
                info!("plan revised with {} steps", steps.len());
                steps
            } else {
                warn!("revision came back invalid, using fallback revised plan");
                revision_fallback_plan()
            }
        }
        Err(e) => {
            warn!("revision call failed ({e}), using emergency plan");
            emergency_plan()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedPlanner;

    const VALID_PLAN: &str =
        r#"{"steps": [{"action": "search_text", "pattern": "TODO", "target": ".", "max_results": 10}]}"#;

    #[tokio::test]
    async fn first_valid_reply_wins() {
        let client = ScriptedPlanner::new([Some(VALID_PLAN.to_string())]);
        let steps = request_plan(&client, "find TODOs", "facts", DEFAULT_SYSTEM_PROMPT).await;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, Action::SearchText);
    }

    #[tokio::test]
    async fn fenced_reply_is_salvaged() {
        let fenced = format!("```json\n{}\n```", VALID_PLAN);
        let client = ScriptedPlanner::new([Some(fenced)]);
        let steps = request_plan(&client, "find TODOs", "facts", DEFAULT_SYSTEM_PROMPT).await;
        assert_eq!(steps[0].action, Action::SearchText);
    }

    #[tokio::test]
    async fn invalid_then_valid_uses_second_attempt() {
        let client = ScriptedPlanner::new([
            Some("not json at all".to_string()),
            Some(VALID_PLAN.to_string()),
        ]);
        let steps = request_plan(&client, "task", "facts", DEFAULT_SYSTEM_PROMPT).await;
        assert_eq!(steps[0].action, Action::SearchText);
    }

    #[tokio::test]
    async fn two_invalid_replies_install_fixed_fallback() {
        let client = ScriptedPlanner::new([
            Some("{}".to_string()),
            Some(r#"{"steps": [{"action": "nope"}]}"#.to_string()),
        ]);
        let steps = request_plan(&client, "task", "facts", DEFAULT_SYSTEM_PROMPT).await;
        assert_eq!(steps, initial_fallback_plan());
        assert_eq!(steps[1].target.as_deref(), Some("README.md"));
    }

    #[tokio::test]
    async fn provider_outage_installs_fixed_fallback() {
        let client = ScriptedPlanner::new([None, None]);
        let steps = request_plan(&client, "task", "facts", DEFAULT_SYSTEM_PROMPT).await;
        assert_eq!(steps, initial_fallback_plan());
    }

    #[tokio::test]
    async fn revision_replaces_plan_when_valid() {
        let client = ScriptedPlanner::new([Some(VALID_PLAN.to_string())]);
        let failed = Step::with_target(Action::ReadTextFile, "gone.txt");
        let steps = revise_plan(&client, &failed, "task", "facts", &[], DEFAULT_SYSTEM_PROMPT).await;
        assert_eq!(steps[0].action, Action::SearchText);
    }

    #[tokio::test]
    async fn invalid_revision_falls_back_to_two_step_plan() {
        let client = ScriptedPlanner::new([Some("garbage".to_string())]);
        let failed = Step::with_target(Action::ReadTextFile, "gone.txt");
        let steps = revise_plan(&client, &failed, "task", "facts", &[], DEFAULT_SYSTEM_PROMPT).await;
        assert_eq!(steps, revision_fallback_plan());
    }

    #[tokio::test]
    async fn revision_outage_falls_back_to_emergency_plan() {
        let client = ScriptedPlanner::failing();
        let failed = Step::with_target(Action::ReadTextFile, "gone.txt");
        let steps = revise_plan(&client, &failed, "task", "facts", &[], DEFAULT_SYSTEM_PROMPT).await;
        assert_eq!(steps, emergency_plan());
    }

    #[test]
    fn auditor_mode_selects_overlay() {
        let prompt = load_system_prompt(Path::new("/nonexistent"), "codebase_auditor");
        assert!(prompt.contains("Codebase Auditor"));
        assert!(!specialization_overlay(&prompt).is_empty());

        let default = load_system_prompt(Path::new("/nonexistent"), "default");
        assert!(specialization_overlay(&default).is_empty());
    }

    #[test]
    fn prompt_file_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("prompts")).unwrap();
        std::fs::write(dir.path().join("prompts/custom.txt"), "Be terse.\n").unwrap();
        assert_eq!(load_system_prompt(dir.path(), "custom"), "Be terse.");
    }
}
