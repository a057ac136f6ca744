use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One schema-conformant action the executor knows how to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ReadTextFile,
    DescribeBinaryFile,
    SearchText,
    ListDir,
    Pwd,
    Whoami,
}

impl Action {
    /// Whether a `target` field is mandatory for this action.
    pub fn requires_target(self) -> bool {
        matches!(
            self,
            Action::ReadTextFile | Action::DescribeBinaryFile | Action::SearchText
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::ReadTextFile => "read_text_file",
            Action::DescribeBinaryFile => "describe_binary_file",
            Action::SearchText => "search_text",
            Action::ListDir => "list_dir",
            Action::Pwd => "pwd",
            Action::Whoami => "whoami",
        }
    }
}

pub const MAX_RESULTS_CAP: i64 = 50;
pub const MAX_RESULTS_DEFAULT: u32 = 20;

/// A normalized plan step. After validation, `pattern` and `max_results` are
/// always populated for `search_text` steps and absent otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

impl Step {
    pub fn bare(action: Action) -> Self {
        Step {
            action,
            target: None,
            pattern: None,
            max_results: None,
        }
    }

    pub fn with_target(action: Action, target: &str) -> Self {
        Step {
            action,
            target: Some(target.to_string()),
            pattern: None,
            max_results: None,
        }
    }
}

/// Parse raw planner output into a normalized step sequence.
///
/// Fails closed: anything that is not a JSON object carrying a non-empty
/// `steps` array of schema-conformant steps invalidates the whole plan.
/// `max_results` is clamped to [1, 50] and defaults to 20 when absent or
/// non-numeric.
pub fn validate_plan(raw: &str) -> Option<Vec<Step>> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    let steps = value.as_object()?.get("steps")?.as_array()?;
    if steps.is_empty() {
        return None;
    }

    let mut normalized = Vec::with_capacity(steps.len());
    for raw_step in steps {
        let obj = raw_step.as_object()?;
        let action: Action = serde_json::from_value(obj.get("action")?.clone()).ok()?;

        let target = obj
            .get("target")
            .and_then(Value::as_str)
            .map(str::to_string);
        if action.requires_target() && target.as_deref().map_or(true, str::is_empty) {
            return None;
        }

        let (pattern, max_results) = if action == Action::SearchText {
            let pattern = obj.get("pattern")?.as_str()?.to_string();
            let max_results = obj
                .get("max_results")
                .and_then(Value::as_i64)
                .map(|n| n.clamp(1, MAX_RESULTS_CAP) as u32)
                .unwrap_or(MAX_RESULTS_DEFAULT);
            (Some(pattern), Some(max_results))
        } else {
            (None, None)
        };

        normalized.push(Step {
            action,
            target,
            pattern,
            max_results,
        });
    }

    Some(normalized)
}
