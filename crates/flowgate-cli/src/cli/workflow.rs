//! CLI workflow subcommands: list, run, and validate.

use std::path::Path;

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use flowgate_core::workflow::dag::validate_dag;
use flowgate_core::workflow::definition::{
    WorkflowDefinition, load_workflow_file, validate_definition,
};
use flowgate_core::workflow::engine::EngineError;
use flowgate_types::workflow::{StepResult, WorkflowStatus};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let workflows = state.engine.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!(
            "  No workflows found in {}.",
            style(state.workflows_dir.display()).cyan()
        );
        println!("  Add one as {}", style("<name>.yaml").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Description"),
            Cell::new("Steps"),
        ]);

    for wf in &workflows {
        let steps = wf
            .steps
            .iter()
            .map(|s| {
                let mut label = s.name.clone();
                if s.parallel == Some(true) {
                    label.push_str(" [parallel]");
                }
                if !s.depends_on.is_empty() {
                    label.push_str(&format!(" <- {}", s.depends_on.join(", ")));
                }
                label
            })
            .collect::<Vec<_>>()
            .join("\n");

        table.add_row(vec![
            Cell::new(&wf.name),
            Cell::new(wf.description.as_deref().unwrap_or("-")),
            Cell::new(steps),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(
    state: &AppState,
    name: &str,
    vars: Option<&str>,
    parallel: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let outcome = state.engine.run(name, vars, parallel).await;

    match outcome {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if !quiet {
                println!();
                let marker = if report.succeeded() {
                    style("*").green().bold()
                } else {
                    style("!").yellow().bold()
                };
                println!(
                    "  {} Ran workflow '{}' ({})",
                    marker,
                    style(name).cyan(),
                    if parallel { "parallel" } else { "sequential" }
                );
                println!("  Run ID: {}", report.run_id);
                println!();
                print_status_table(&state.engine.status(name));
                println!(
                    "  {} step(s), {} failed, {} retr{}, {}ms",
                    report.results.len(),
                    report.failed_steps.len(),
                    report.retry_count,
                    if report.retry_count == 1 { "y" } else { "ies" },
                    report.elapsed.as_millis()
                );
                println!();
            }

            if !report.succeeded() {
                bail!(
                    "workflow '{name}' finished with failed step(s): {}",
                    report.failed_steps.join(", ")
                );
            }
            Ok(())
        }
        Err(err) => {
            let status = state.engine.status(name);
            if json {
                let out = serde_json::json!({
                    "workflow": name,
                    "error": err.to_string(),
                    "status": status,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if !quiet && matches!(err, EngineError::WorkflowExecution { .. }) {
                println!();
                println!(
                    "  {} Workflow '{}' stopped",
                    style("x").red().bold(),
                    style(name).cyan()
                );
                println!();
                print_status_table(&status);
            }
            Err(err.into())
        }
    }
}

fn print_status_table(status: &WorkflowStatus) {
    let Some(results) = status.results() else {
        println!("  No results recorded.");
        println!();
        return;
    };

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Result"),
        ]);

    for (i, StepResult { step, success }) in results.iter().enumerate() {
        let result = if *success {
            Cell::new("ok").fg(Color::Green)
        } else {
            Cell::new("failed").fg(Color::Red)
        };
        table.add_row(vec![Cell::new(i + 1), Cell::new(step), result]);
    }

    println!("{table}");
    println!();
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let definition = check_workflow_file(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&definition.summary())?);
    } else {
        println!();
        println!(
            "  {} '{}' is valid",
            style("*").green().bold(),
            style(&definition.name).cyan()
        );
        println!("  Steps: {}", definition.steps.len());
        println!("  On error: {}", definition.on_error);
        println!();
    }

    Ok(())
}

/// Parse, convert, and structurally validate a workflow file, including
/// dependency cycles.
fn check_workflow_file(file: &Path) -> Result<WorkflowDefinition> {
    let document = load_workflow_file(file)?;
    let mut definition = WorkflowDefinition::from_document(document)?;
    definition.name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    validate_definition(&definition)?;
    validate_dag(&definition.steps)?;
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn valid_file_passes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("release.yaml");
        std::fs::write(
            &path,
            "steps:\n  - name: build\n    command: make\n  - name: ship\n    command: ./ship.sh\n    dependsOn: [build]\n",
        )
        .unwrap();

        let def = check_workflow_file(&path).unwrap();
        assert_eq!(def.name, "release");
        assert_eq!(def.steps.len(), 2);
    }

    #[test]
    fn cycle_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("loop.json");
        std::fs::write(
            &path,
            r#"{ "steps": [
                { "name": "a", "command": "x", "dependsOn": ["b"] },
                { "name": "b", "command": "y", "dependsOn": ["a"] }
            ] }"#,
        )
        .unwrap();

        let err = check_workflow_file(&path).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(check_workflow_file(&tmp.path().join("nope.yaml")).is_err());
    }
}
