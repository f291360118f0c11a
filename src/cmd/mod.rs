//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `watch`   | `Watch`          |
//! | `tasks`   | `Tasks`          |
//! | `inbox`   | `Inbox`          |
//! | `upload`  | `Upload`         |
//! | `config`  | `Config`         |

pub mod config;
pub mod inbox;
pub mod tasks;
pub mod upload;
pub mod watch;

pub use config::cmd_config;
pub use inbox::cmd_inbox;
pub use tasks::cmd_tasks;
pub use upload::cmd_upload;
pub use watch::cmd_watch;

use std::path::Path;

use anyhow::{Context, Result};
use opshub::config::HubConfig;
use opshub::hub::Hub;
use opshub::models::Identity;

use crate::Cli;

pub(crate) fn load_config(cli: &Cli, project_dir: &Path) -> Result<HubConfig> {
    Ok(HubConfig::load(project_dir)?.with_token(cli.token.clone()))
}

pub(crate) fn open_hub(cli: &Cli, project_dir: &Path) -> Result<Hub> {
    let config = load_config(cli, project_dir)?;
    Hub::from_config(&config).context("Failed to set up the hub client")
}

/// Identity from `--user` / `--org`.
pub(crate) fn identity(cli: &Cli) -> Option<Identity> {
    let user = cli.user.as_deref()?;
    let identity = Identity::new(user);
    Some(match cli.org.as_deref() {
        Some(org) => identity.with_org(org),
        None => identity,
    })
}

/// Sign in when an identity was given; otherwise views stay snapshot-only.
pub(crate) fn sign_in(cli: &Cli, hub: &Hub) {
    match identity(cli) {
        Some(id) => {
            hub.set_identity(Some(id));
        }
        None => eprintln!(
            "{}",
            console::style("No --user given: showing a snapshot without live updates").yellow()
        ),
    }
}

/// Clip `s` to `width` columns, padding short strings.
pub(crate) fn cell(s: &str, width: usize) -> String {
    console::pad_str(s, width, console::Alignment::Left, Some("…")).into_owned()
}
