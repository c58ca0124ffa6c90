use colored::Colorize;
use infraflow_core::PersistedState;
use infraflow_core::whiteboard::{DELETED_MARKER, MARKER_CLEANED_UP, MARKER_MIGRATED};
use std::path::Path;
use tracing::debug;

pub async fn show(file: &Path) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(file).await?;
    let state = PersistedState::from_json(&content)?;
    debug!(keys = state.data.len(), "loaded state");

    if state.has_valid_version() {
        println!("version: {}", state.version.green());
    } else {
        println!("version: {} {}", state.version.red(), "(unsupported)".red());
    }

    if state.data.is_empty() {
        println!("{}", "(empty)".dimmed());
    }
    for (key, value) in &state.data {
        if value == DELETED_MARKER {
            println!("  {} {}", key.dimmed(), "deleted".red());
        } else if key == MARKER_MIGRATED || key == MARKER_CLEANED_UP {
            println!("  {} = {}", key.yellow(), value);
        } else {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if !state.has_valid_version() {
        anyhow::bail!("{} has unsupported version {:?}", file.display(), state.version);
    }
    Ok(())
}
