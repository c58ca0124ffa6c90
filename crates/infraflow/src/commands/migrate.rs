use anyhow::Context;
use colored::Colorize;
use infraflow_core::{
    FilePersister, InfrastructureConfig, decode_terraform_state, migrate_terraform_state,
};
use std::path::Path;
use tracing::debug;

pub async fn handle(
    terraform_state: &Path,
    config: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let config = InfrastructureConfig::load(config)
        .await
        .with_context(|| format!("failed to load {}", config.display()))?;
    config.validate()?;

    let blob = tokio::fs::read(terraform_state)
        .await
        .with_context(|| format!("failed to read {}", terraform_state.display()))?;
    debug!(bytes = blob.len(), path = %terraform_state.display(), "decoding terraform state");
    let legacy = decode_terraform_state(&blob)?;
    let board = migrate_terraform_state(&legacy, &config)?;
    let state = board.to_persisted();

    match output {
        Some(path) => {
            FilePersister::new(path).save(&state).await?;
            eprintln!(
                "{} {} keys written to {}",
                "✓".green().bold(),
                state.data.len(),
                path.display().to_string().cyan()
            );
        }
        None => println!("{}", state.to_json()?),
    }
    Ok(())
}
