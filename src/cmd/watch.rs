//! Raw event tail (`opshub watch`).

use std::path::Path;

use anyhow::{Result, bail};
use console::style;
use opshub::live::{ConnectionState, Room};

use crate::Cli;

pub async fn cmd_watch(cli: &Cli, project_dir: &Path, extra_rooms: &[Room]) -> Result<()> {
    let Some(identity) = super::identity(cli) else {
        bail!("`opshub watch` needs --user to open a live connection");
    };
    let hub = super::open_hub(cli, project_dir)?;
    let Some(conn) = hub.set_identity(Some(identity.clone())) else {
        bail!("Failed to open a live connection");
    };

    let mut rooms = vec![conn.lease_room(Room::User(identity.user_id.clone()))];
    if let Some(org) = &identity.org_id {
        rooms.push(conn.lease_room(Room::Org(org.clone())));
    }
    for room in extra_rooms {
        rooms.push(conn.lease_room(room.clone()));
    }

    let _tail = conn.on_any(|event, payload| {
        println!(
            "{} {} {}",
            style(chrono::Local::now().format("%H:%M:%S")).dim(),
            style(event).cyan().bold(),
            payload
        );
    });

    println!(
        "{} as {} in {} room(s). Ctrl+C to stop.",
        style("Watching").bold(),
        identity.user_id,
        rooms.len()
    );

    let mut state = conn.watch_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *state.borrow_and_update();
                let label = match now {
                    ConnectionState::Connected => style(now.to_string()).green(),
                    ConnectionState::Connecting => style(now.to_string()).yellow(),
                    ConnectionState::Disconnected => style(now.to_string()).red(),
                };
                eprintln!("{} {}", style("connection").dim(), label);
            }
        }
    }

    drop(rooms);
    hub.set_identity(None);
    Ok(())
}
