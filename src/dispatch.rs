use crate::plan::{Action, Step};

/// Advisory output of the dispatcher: a diagnostic thought plus the canonical
/// tool-request token the executor will independently re-validate.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub thought: String,
    pub tool_request: String,
}

/// Convert the current plan step into a canonical tool-request token.
///
/// Grammar:
///   read_text:<target> | describe_binary:<target>
///   | search_text:<pattern>:<target>:<max_results>
///   | ls [<target>] | pwd | whoami
///
/// An out-of-range `current_step` yields a "Plan completed" thought and the
/// safe `ls` token.
pub fn dispatch(plan: &[Step], current_step: usize) -> Dispatch {
    let Some(step) = plan.get(current_step) else {
        return Dispatch {
            thought: "Plan completed".to_string(),
            tool_request: "ls".to_string(),
        };
    };

    let target = step.target.as_deref().unwrap_or("");
    let tool_request = match step.action {
        Action::ReadTextFile => format!("read_text:{}", target),
        Action::DescribeBinaryFile => format!("describe_binary:{}", target),
        Action::SearchText => format!(
            "search_text:{}:{}:{}",
            step.pattern.as_deref().unwrap_or(""),
            target,
            step.max_results.unwrap_or(crate::plan::MAX_RESULTS_DEFAULT)
        ),
        Action::ListDir => {
            if target.is_empty() {
                "ls".to_string()
            } else {
                format!("ls {}", target)
            }
        }
        Action::Pwd => "pwd".to_string(),
        Action::Whoami => "whoami".to_string(),
    };

    Dispatch {
        thought: format!("Executing: {} {}", step.action.as_str(), target)
            .trim_end()
            .to_string(),
        tool_request,
    }
}
