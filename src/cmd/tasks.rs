//! Live task table (`opshub tasks`).

use std::path::Path;

use anyhow::{Result, bail};
use console::style;
use opshub::feeds;
use opshub::models::{Priority, Task};
use opshub::sync::Phase;

use super::cell;
use crate::Cli;

pub async fn cmd_tasks(cli: &Cli, project_dir: &Path, project_id: &str, once: bool) -> Result<()> {
    let hub = super::open_hub(cli, project_dir)?;
    if !once {
        super::sign_in(cli, &hub);
    }

    let tasks = feeds::project_tasks(&hub);
    tasks.mount(project_id.to_string()).await;
    if let Phase::Failed(message) = tasks.phase() {
        bail!("Failed to load tasks for project {}: {}", project_id, message);
    }
    print_table(project_id, &tasks.items());
    if once {
        return Ok(());
    }

    let mut changes = tasks.changes();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                println!();
                print_table(project_id, &tasks.items());
            }
        }
    }

    tasks.unmount();
    hub.set_identity(None);
    Ok(())
}

fn print_table(project_id: &str, tasks: &[Task]) {
    println!(
        "{} {} ({} task{})",
        style("Project").bold(),
        project_id,
        tasks.len(),
        if tasks.len() == 1 { "" } else { "s" }
    );
    if tasks.is_empty() {
        println!("  {}", style("No tasks yet").dim());
        return;
    }
    println!(
        "  {} {} {} {} {}",
        style(cell("ID", 24)).dim(),
        style(cell("STATUS", 12)).dim(),
        style(cell("PRIORITY", 8)).dim(),
        style(cell("TYPE", 11)).dim(),
        style("TITLE").dim()
    );
    for task in tasks {
        let priority = cell(&task.priority.to_string(), 8);
        let priority = match task.priority {
            Priority::High => style(priority).red(),
            Priority::Medium => style(priority).yellow(),
            _ => style(priority).dim(),
        };
        let status = cell(&task.status, 12);
        let status = if task.is_done() {
            style(status).green()
        } else {
            style(status)
        };
        println!(
            "  {} {} {} {} {}",
            cell(&task.id, 24),
            status,
            priority,
            cell(&task.kind.to_string(), 11),
            task.title
        );
    }
}
