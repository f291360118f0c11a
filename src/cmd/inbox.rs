//! Pending admin requests (`opshub inbox`).

use std::path::Path;

use anyhow::{Result, bail};
use console::style;
use opshub::feeds;
use opshub::models::AdminAction;
use opshub::sync::Phase;

use crate::Cli;

pub async fn cmd_inbox(cli: &Cli, project_dir: &Path, once: bool) -> Result<()> {
    let Some(org) = cli.org.clone() else {
        bail!("`opshub inbox` needs --org");
    };
    let hub = super::open_hub(cli, project_dir)?;
    if !once {
        super::sign_in(cli, &hub);
    }

    let actions = feeds::pending_actions(&hub);
    let badge = feeds::unread_badge(&hub);
    actions.mount(org.clone()).await;
    if let Phase::Failed(message) = actions.phase() {
        bail!("Failed to load requests for {}: {}", org, message);
    }
    badge.mount(org.clone()).await;
    print_inbox(badge.value(), &actions.items());
    if once {
        return Ok(());
    }

    let mut list_changes = actions.changes();
    let mut badge_changes = badge.changes();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = list_changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = badge_changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        println!();
        print_inbox(badge.value(), &actions.items());
    }

    actions.unmount();
    badge.unmount();
    hub.set_identity(None);
    Ok(())
}

fn print_inbox(unread: u64, actions: &[AdminAction]) {
    let badge = if unread == 0 {
        style(unread.to_string()).dim()
    } else {
        style(unread.to_string()).red().bold()
    };
    println!("{} [{}]", style("Notifications").bold(), badge);
    if actions.is_empty() {
        println!("  {}", style("Nothing pending").dim());
        return;
    }
    for action in actions {
        let when = action
            .created_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "  {} {}  {}",
            style(action.kind.title()).yellow(),
            style(when).dim(),
            action.summary()
        );
        println!("    {}", style(&action.id).dim());
    }
}
