//! CLI command implementations.

pub mod seldon;
pub mod services;
pub mod train;

use anyhow::{Context, Result};
use mlstack_config::{RunConfig, StackConfig, load_run_config, load_stack_config};
use mlstack_scheduler::{Pipeline, PipelineEvent, PipelineOrchestrator, PipelineResult, StepState};
use mlstack_stack::Stack;
use std::sync::Arc;

pub fn load_config(path: &str) -> Result<StackConfig> {
    load_stack_config(path)
        .with_context(|| format!("Failed to load stack configuration: {path}"))
}

pub fn load_run(path: Option<&str>) -> Result<Option<RunConfig>> {
    path.map(|p| {
        load_run_config(p).with_context(|| format!("Failed to load run configuration: {p}"))
    })
    .transpose()
}

pub async fn activate(config: &StackConfig) -> Result<Arc<Stack>> {
    let stack = Stack::from_config(config)
        .await
        .context("Failed to activate the stack")?;
    Ok(Arc::new(stack))
}

/// Run a pipeline, printing progress as it goes.
pub async fn run_pipeline(stack: &Arc<Stack>, pipeline: &Pipeline) -> Result<PipelineResult> {
    println!("Running pipeline: {}", pipeline.name());
    println!("Steps: {}", pipeline.steps().len());

    let orchestrator = PipelineOrchestrator::new(stack.clone());
    let (mut rx, result_handle) = orchestrator.execute(pipeline);

    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::RunStarted { run_id } => {
                println!("\n--- Run {run_id} on stack '{}' ---\n", stack.name());
            }
            PipelineEvent::StepStarted { step } => {
                println!("▶ Step '{step}' started");
            }
            PipelineEvent::StepCompleted { step, success } => {
                if success {
                    println!("✓ Step '{step}' completed successfully");
                } else {
                    println!("✗ Step '{step}' failed");
                }
            }
            PipelineEvent::StepSkipped { step, reason } => {
                println!("⊘ Step '{step}' skipped: {reason}");
            }
            PipelineEvent::PipelineCompleted { success } => {
                if success {
                    println!("\n--- Pipeline completed successfully ---");
                } else {
                    println!("\n--- Pipeline failed ---");
                }
            }
        }
    }

    let result = result_handle
        .await
        .context("Pipeline execution task failed")?;

    if !result.success {
        println!("\n--- Step Summary ---");
        for spec in pipeline.ordered_steps() {
            let status = match result.step_states.get(&spec.name) {
                Some(StepState::Succeeded { .. }) => "✓ succeeded".to_string(),
                Some(StepState::Failed { message }) => format!("✗ failed: {message}"),
                Some(StepState::Skipped { reason }) => format!("⊘ skipped: {reason}"),
                Some(StepState::Running) => "▶ running".to_string(),
                Some(StepState::Pending) | None => "○ pending".to_string(),
            };
            println!("  {} - {status}", spec.name);
        }
    }

    result
        .into_result()
        .with_context(|| format!("Pipeline '{}' failed", pipeline.name()))
}

pub fn validate(path: &str) -> Result<()> {
    let config = load_config(path)?;
    let active = config.active().context("Configuration has no valid active stack")?;
    println!(
        "Configuration is valid: {} components, {} stacks, active stack '{}'",
        config.components.len(),
        config.stacks.len(),
        active.name
    );
    for warning in config.check() {
        println!("warning: {warning}");
    }
    Ok(())
}
