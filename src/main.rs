// src/main.rs

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

mod config;
mod dispatch;
mod engine;
mod llm;
mod memory;
mod plan;
mod planner;
mod probe;
mod sandbox;
mod ui;

use crate::config::Config;
use crate::engine::{Engine, TaskReport};
use crate::llm::HttpPlanner;

struct CliArgs {
    task: String,
    mode: String,
    config_path: PathBuf,
    output: Option<PathBuf>,
    quiet: bool,
}

fn parse_args() -> Result<CliArgs> {
    let mut task_words: Vec<String> = Vec::new();
    let mut mode = "default".to_string();
    let mut config_path = PathBuf::from("config.toml");
    let mut output = None;
    let mut quiet = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--quiet" | "-q" => quiet = true,
            "--mode" => mode = args.next().context("--mode requires a value")?,
            "--config" => {
                config_path = PathBuf::from(args.next().context("--config requires a value")?)
            }
            "--output" => {
                output = Some(PathBuf::from(
                    args.next().context("--output requires a value")?,
                ))
            }
            _ if arg.starts_with("--") => bail!("Unknown flag: {}", arg),
            _ => task_words.push(arg),
        }
    }

    if task_words.is_empty() {
        bail!("Usage: auditcraft [--mode MODE] [--config FILE] [--output FILE] [--quiet] <task>");
    }

    Ok(CliArgs {
        task: task_words.join(" "),
        mode,
        config_path,
        output,
        quiet,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args()?;
    let config = Config::load(&args.config_path);
    let root = std::env::current_dir()?;

    if !args.quiet {
        ui::banner();
        ui::info(&format!("Task: {}", args.task));
    }

    let client = Box::new(HttpPlanner::from_config(&config));
    let engine = Engine::new(&args.task, &args.mode, client, config, root)?;

    let pb = (!args.quiet).then(|| ui::spinner("Executing task…"));
    let report = engine.run().await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if let Some(out) = &args.output {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(out, json).with_context(|| format!("Failed to write {}", out.display()))?;
        if !args.quiet {
            ui::success(&format!("Results saved to {}", out.display()));
        }
    }

    if args.quiet {
        let status = if report.step_success { "SUCCESS" } else { "FAILED" };
        println!("{}: {}", status, report.observation);
    } else {
        display_results(&report);
    }

    Ok(())
}

// Plain summary for the terminal. Reads only the report's stable fields.
fn display_results(report: &TaskReport) {
    if report.step_success {
        ui::success("\nSuccess");
    } else {
        ui::error("\nFailed");
    }

    ui::print(&format!("Steps completed: {}", report.step_count));
    ui::print(&format!("Plan steps:      {}", report.plan.len()));
    ui::print(&format!("Current step:    {}", report.current_step));
    ui::print(&format!("Failures:        {}", report.failure_count));

    if !report.plan.is_empty() {
        ui::print("\nPlan executed:");
        for (i, step) in report.plan.iter().enumerate() {
            let marker = if i < report.current_step { "+" } else { "-" };
            ui::print(&format!(
                "  {} {}. {} {}",
                marker,
                i + 1,
                step.action.as_str(),
                step.target.as_deref().unwrap_or("")
            ));
        }
    }

    ui::print(&format!("\nFinal result: {}", report.result));
    ui::print(&format!("Observation:  {}", report.observation));
}
