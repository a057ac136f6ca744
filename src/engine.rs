use std::path::PathBuf;

use anyhow::Result;
use log::{info, warn};
use serde::Serialize;

use crate::config::Config;
use crate::dispatch::dispatch;
use crate::llm::PlannerClient;
use crate::memory::MemoryStore;
use crate::plan::Step;
use crate::{planner, probe, sandbox};

/// The single mutable record threaded through the control loop. Created per
/// task invocation, discarded at termination.
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub task: String,
    pub thought: String,
    pub result: String,
    pub observation: String,
    pub step_count: u32,
    pub tool_request: String,
    pub plan: Vec<Step>,
    pub current_step: usize,
    pub environment_facts: String,
    pub step_success: bool,
    pub failure_count: u32,
    pub system_prompt: String,
}

impl AgentState {
    fn new(task: &str, system_prompt: String) -> Self {
        Self {
            task: task.to_string(),
            thought: String::new(),
            result: String::new(),
            observation: String::new(),
            step_count: 1,
            tool_request: String::new(),
            plan: Vec::new(),
            current_step: 0,
            environment_facts: String::new(),
            step_success: false,
            failure_count: 0,
            system_prompt,
        }
    }
}

/// Terminal result record: the sole stable contract between the engine and
/// downstream consumers (report printers, policy layers). Those read these
/// fields and nothing else.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task: String,
    pub result: String,
    pub observation: String,
    pub plan: Vec<Step>,
    pub current_step: usize,
    pub step_count: u32,
    pub failure_count: u32,
    pub step_success: bool,
    pub environment_facts: String,
    pub system_prompt: String,
}

/// Control loop states. One transition function, no hidden graph machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ground,
    Plan,
    ExecuteStep,
    Act,
    Observe,
    RevisePlan,
    Done,
}

pub struct Engine {
    state: AgentState,
    client: Box<dyn PlannerClient>,
    memory: MemoryStore,
    config: Config,
    root: PathBuf,
}

impl Engine {
    pub fn new(
        task: &str,
        mode: &str,
        client: Box<dyn PlannerClient>,
        config: Config,
        root: PathBuf,
    ) -> Result<Self> {
        let system_prompt = planner::load_system_prompt(&root, mode);
        let memory = MemoryStore::new(root.join(&config.memory_db));
        memory.init()?;
        Ok(Self {
            state: AgentState::new(task, system_prompt),
            client,
            memory,
            config,
            root,
        })
    }

    /// Drive the state machine to termination. The loop is bounded by the
    /// global step budget regardless of plan length or revision count.
    pub async fn run(mut self) -> TaskReport {
        let mut phase = Phase::Ground;
        while phase != Phase::Done {
            phase = self.advance(phase).await;
        }
        self.into_report()
    }

    /// The single transition function: performs the work of `phase` on the
    /// agent state and returns the next phase.
    async fn advance(&mut self, phase: Phase) -> Phase {
        match phase {
            Phase::Ground => {
                info!("grounding in {}", self.root.display());
                self.state.environment_facts = probe::probe_environment(&self.root).await;
                Phase::Plan
            }
            Phase::Plan => {
                if self.state.plan.is_empty() {
                    self.state.plan = planner::request_plan(
                        self.client.as_ref(),
                        &self.state.task,
                        &self.state.environment_facts,
                        &self.state.system_prompt,
                    )
                    .await;
                    self.state.current_step = 0;
                }
                Phase::ExecuteStep
            }
            Phase::ExecuteStep => {
                let d = dispatch(&self.state.plan, self.state.current_step);
                self.state.thought = d.thought;
                self.state.tool_request = d.tool_request;
                Phase::Act
            }
            Phase::Act => {
                self.state.result = sandbox::execute(&self.state.tool_request, &self.root).await;
                Phase::Observe
            }
            Phase::Observe => {
                self.observe();
                self.decide()
            }
            Phase::RevisePlan => {
                self.revise().await;
                Phase::ExecuteStep
            }
            Phase::Done => Phase::Done,
        }
    }

    /// Interpret the tagged result, advance or hold the step cursor, update
    /// the failure counter, and append a gated memory record.
    fn observe(&mut self) {
        self.state.step_success = self.state.result.starts_with("SUCCESS:");
        let executed = self.state.plan.get(self.state.current_step).cloned();

        if self.state.step_success {
            if let Some(step) = &executed {
                info!(
                    "Step {} completed: {} {}",
                    self.state.current_step + 1,
                    step.action.as_str(),
                    step.target.as_deref().unwrap_or("")
                );
            }
            self.state.current_step += 1;
            self.state.failure_count = 0;
        } else {
            self.state.failure_count += 1;
            if let Some(step) = &executed {
                warn!(
                    "Step {} failed ({}/{}): {} {}",
                    self.state.current_step + 1,
                    self.state.failure_count,
                    self.config.failure_threshold,
                    step.action.as_str(),
                    step.target.as_deref().unwrap_or("")
                );
            }
        }

        self.state.observation = format!(
            "Step {} done - Success: {}",
            self.state.step_count, self.state.step_success
        );

        if let Some(step) = executed {
            if let Err(e) = self.memory.save_outcome(
                step.action.as_str(),
                &self.state.result,
                self.state.step_success,
                &self.config.memory_gate,
            ) {
                warn!("memory write failed: {e}");
            }
        }

        self.state.step_count += 1;
    }

    /// Continue / revise / stop, evaluated in that priority order.
    fn decide(&self) -> Phase {
        if self.state.failure_count >= self.config.failure_threshold {
            info!("too many failures, triggering plan revision");
            Phase::RevisePlan
        } else if self.state.current_step >= self.state.plan.len() {
            info!("stopping: plan completed");
            Phase::Done
        } else if self.state.step_count >= self.config.max_steps {
            info!("stopping: reached max steps");
            Phase::Done
        } else {
            Phase::ExecuteStep
        }
    }

    /// Replace the plan wholesale after repeated failure on one step.
    async fn revise(&mut self) {
        let revised = match self.state.plan.get(self.state.current_step) {
            Some(failed_step) => {
                let remaining = self.state.plan[self.state.current_step + 1..].to_vec();
                planner::revise_plan(
                    self.client.as_ref(),
                    failed_step,
                    &self.state.task,
                    &self.state.environment_facts,
                    &remaining,
                    &self.state.system_prompt,
                )
                .await
            }
            // Failure past the end of the plan has no step to revise around.
            None => planner::revision_fallback_plan(),
        };
        self.state.plan = revised;
        self.state.current_step = 0;
        self.state.failure_count = 0;
    }

    fn into_report(self) -> TaskReport {
        let s = self.state;
        TaskReport {
            task: s.task,
            result: s.result,
            observation: s.observation,
            plan: s.plan,
            current_step: s.current_step,
            step_count: s.step_count,
            failure_count: s.failure_count,
            step_success: s.step_success,
            environment_facts: s.environment_facts,
            system_prompt: s.system_prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedPlanner;
    use crate::plan::Action;
    use std::fs::File;
    use std::io::Write;

    fn engine_with(replies: Vec<Option<String>>, root: &std::path::Path) -> Engine {
        Engine::new(
            "Explore this directory",
            "default",
            Box::new(ScriptedPlanner::new(replies)),
            Config::default(),
            root.to_path_buf(),
        )
        .unwrap()
    }

    fn write_file(dir: &std::path::Path, name: &str, content: &str) {
        let mut f = File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn single_step_plan_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", "hello");

        let plan = r#"{"steps": [{"action": "list_dir"}]}"#;
        let engine = engine_with(vec![Some(plan.to_string())], dir.path());
        let report = engine.run().await;

        assert!(report.step_success);
        assert!(report.result.contains("a.txt"));
        assert_eq!(report.current_step, 1);
        assert_eq!(report.plan.len(), 1);
        assert_eq!(report.step_count, 2);
        assert_eq!(report.failure_count, 0);
    }

    #[tokio::test]
    async fn repeated_failure_triggers_one_revision_then_recovers() {
        let dir = tempfile::tempdir().unwrap();

        let plan = r#"{"steps": [{"action": "read_text_file", "target": "missing.txt"}]}"#;
        // Initial plan targets a missing file; the revision reply is garbage,
        // forcing the safe two-step fallback.
        let engine = engine_with(
            vec![Some(plan.to_string()), Some("garbage".to_string())],
            dir.path(),
        );
        let report = engine.run().await;

        assert_eq!(report.plan, planner::revision_fallback_plan());
        assert!(report.step_success);
        assert_eq!(report.current_step, 2);
        assert_eq!(report.failure_count, 0);
        // 1 seed + two failures + ls + pwd
        assert_eq!(report.step_count, 5);
    }

    #[tokio::test]
    async fn planner_outage_installs_fallback_and_executes_it() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "README.md", "# hello\n");

        let engine = engine_with(vec![None, None], dir.path());
        let report = engine.run().await;

        assert_eq!(report.plan, planner::initial_fallback_plan());
        assert!(report.step_success);
        assert_eq!(report.current_step, 3);
        assert_eq!(report.step_count, 4);
    }

    #[tokio::test]
    async fn global_step_budget_caps_long_plans() {
        let dir = tempfile::tempdir().unwrap();

        let steps: Vec<String> = (0..10).map(|_| r#"{"action": "pwd"}"#.to_string()).collect();
        let plan = format!(r#"{{"steps": [{}]}}"#, steps.join(","));
        let engine = engine_with(vec![Some(plan)], dir.path());
        let report = engine.run().await;

        assert_eq!(report.step_count, 8);
        assert_eq!(report.plan.len(), 10);
        assert!(report.current_step < report.plan.len());
    }

    #[tokio::test]
    async fn single_failure_retries_same_step_without_revision() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(vec![], dir.path());
        engine.state.plan = vec![Step::with_target(Action::ReadTextFile, "gone.txt")];

        let mut phase = Phase::ExecuteStep;
        phase = engine.advance(phase).await; // -> Act
        phase = engine.advance(phase).await; // -> Observe
        let next = engine.advance(phase).await;

        assert_eq!(engine.state.failure_count, 1);
        assert_eq!(engine.state.current_step, 0);
        assert_eq!(next, Phase::ExecuteStep);

        // The retried step fails again: revision fires exactly now.
        let mut phase = next;
        phase = engine.advance(phase).await;
        phase = engine.advance(phase).await;
        let next = engine.advance(phase).await;
        assert_eq!(engine.state.failure_count, 2);
        assert_eq!(next, Phase::RevisePlan);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", "hi");
        let mut engine = engine_with(vec![], dir.path());
        engine.state.plan = vec![Step::with_target(Action::ReadTextFile, "a.txt")];
        engine.state.failure_count = 1;

        let mut phase = Phase::ExecuteStep;
        phase = engine.advance(phase).await;
        phase = engine.advance(phase).await;
        engine.advance(phase).await;

        assert_eq!(engine.state.failure_count, 0);
        assert_eq!(engine.state.current_step, 1);
        assert!(engine.state.step_success);
    }

    #[tokio::test]
    async fn observation_records_step_counter_and_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(vec![], dir.path());
        engine.state.plan = vec![Step::with_target(Action::ReadTextFile, "gone.txt")];
        engine.state.result = "FAILED: read_text:gone.txt - no such file".to_string();

        engine.observe();
        assert_eq!(engine.state.observation, "Step 1 done - Success: false");
        assert_eq!(engine.state.step_count, 2);
    }
}
