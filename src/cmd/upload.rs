//! Attachment upload (`opshub upload`).

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use opshub::storage::BlobStore;

use crate::Cli;

pub async fn cmd_upload(
    cli: &Cli,
    project_dir: &Path,
    file: &Path,
    bucket: Option<&str>,
) -> Result<()> {
    let config = super::load_config(cli, project_dir)?;
    let bucket = bucket
        .map(str::to_string)
        .unwrap_or_else(|| config.storage_bucket());
    let store = BlobStore::new(
        config.storage_url().as_deref(),
        config.storage_key().as_deref(),
        Some(&bucket),
    )?;

    let stored = store
        .upload_file(file)
        .await
        .with_context(|| format!("Failed to upload {}", file.display()))?;

    eprintln!(
        "{} {} to {}/{}",
        style("Uploaded").green().bold(),
        file.display(),
        stored.bucket,
        stored.name
    );
    println!("{}", stored.public_url);
    Ok(())
}
