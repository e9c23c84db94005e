//! enrichd CLI entry point

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use enrichd::checkpoint::{CheckpointStore, read_records};
use enrichd::cli::{Cli, Command, OutputFormat};
use enrichd::client::GeminiClient;
use enrichd::config::Config;
use enrichd::dispatcher::Dispatcher;
use enrichd::pool::CredentialPool;

fn setup_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run { input, output } => cmd_run(&config, &input, &output).await,
        Command::Status { input, output, format } => cmd_status(&input, &output, format),
        Command::Prune { output } => cmd_prune(&output).await,
    }
}

/// Enrich the backlog, resuming from whatever the output store already holds.
async fn cmd_run(config: &Config, input: &Path, output: &Path) -> Result<()> {
    config.validate()?;

    let store = Arc::new(CheckpointStore::new(output));

    // Drop unresolved artifacts from an interrupted run up front, so the
    // store holds at most one terminal row per key after this run too.
    let removed = store.prune_and_rewrite().await?;
    if removed > 0 {
        info!(removed, "dropped stale unresolved rows before resuming");
    }

    let inputs = read_records(input).context("Failed to read input records")?;
    if inputs.is_empty() {
        return Err(eyre::eyre!("input store {} is empty or missing", input.display()));
    }

    let pending = store.remaining(inputs)?;
    if pending.is_empty() {
        println!("Nothing to do: all input rows are already enriched.");
        return Ok(());
    }

    let pool = Arc::new(CredentialPool::new(
        config.credentials.keys.clone(),
        config.credentials.cooldown(),
        config.credentials.evict_after_strikes,
    ));
    let client = Arc::new(GeminiClient::from_config(&config.service)?);
    let dispatcher = Arc::new(Dispatcher::new(
        config.dispatch.to_dispatcher_config(),
        pool,
        client,
        Arc::clone(&store),
    ));

    let summary = dispatcher.run(pending).await?;

    println!(
        "Run complete: {} succeeded, {} sentinels, {} unresolved.",
        summary.succeeded, summary.sentinels, summary.unresolved
    );
    if summary.unresolved > 0 {
        println!("Unresolved rows will be retried on the next run.");
    }
    Ok(())
}

/// Print done/pending counts for an input/output pair.
fn cmd_status(input: &Path, output: &Path, format: OutputFormat) -> Result<()> {
    let store = CheckpointStore::new(output);
    let inputs = read_records(input).context("Failed to read input records")?;
    let total = inputs.len();
    let pending = store.remaining(inputs)?.len();
    let summary = store.summary()?;

    match format {
        OutputFormat::Text => {
            println!("input rows:  {total}");
            println!("done:        {} ({} sentinels)", summary.done + summary.sentinel, summary.sentinel);
            println!("unresolved:  {}", summary.unresolved);
            println!("pending:     {pending}");
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "input_rows": total,
                "done": summary.done + summary.sentinel,
                "sentinels": summary.sentinel,
                "unresolved": summary.unresolved,
                "pending": pending,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}

/// Physically drop unresolved rows from the output store.
async fn cmd_prune(output: &Path) -> Result<()> {
    let store = CheckpointStore::new(output);
    let removed = store.prune_and_rewrite().await?;
    println!("Pruned {removed} row(s) from {}.", output.display());
    Ok(())
}
