//! Maintenance CLI for the consistency core
//!
//! Opens the store directly, without starting a consumer, so health
//! readings reflect the running service rather than this process.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use recovery::{replay_dlq, verify_chain, DlqFilter, HealthMonitor, ModelKey, Rebuilder};
use stock_core::error::fingerprint;
use stock_core::types::{ChainStream, VenueId};
use stock_core::{CoreConfig, Storage, Topic};

const USAGE: &str = "usage: stockctl <config.toml> <command>

commands:
  health                                 health snapshot as JSON
  verify <venue>                         verify ledger and audit chains
  rebuild <venue> <models> [--truncate]  rebuild read models (comma list or 'all')
  replay <venue> [topic]                 replay dead letters
  stats                                  storage statistics as JSON";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    if let Err(error) = run().await {
        let text = format!("{:#}", error);
        let code = error
            .downcast_ref::<stock_core::Error>()
            .map(|e| e.code())
            .unwrap_or("cli");
        tracing::error!(code, fingerprint = %fingerprint(&text), "{}", text);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        bail!("{}", USAGE);
    }

    let config = CoreConfig::from_file(&args[0])
        .with_context(|| format!("loading config from {}", args[0]))?;
    config.validate()?;
    let storage = Arc::new(Storage::open(&config)?);

    match args[1].as_str() {
        "health" => {
            let monitor = HealthMonitor::new(storage, &config.health);
            let snapshot = monitor.snapshot()?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        "verify" => {
            let venue = venue_arg(&args, 2)?;
            for stream in [ChainStream::Ledger, ChainStream::Audit] {
                let report = verify_chain(&storage, &venue, stream)?;
                match report.first_bad_index {
                    None => println!(
                        "{} {}: ok ({} entries)",
                        venue, stream, report.entries_checked
                    ),
                    Some(index) => println!(
                        "{} {}: BROKEN at entry {} of {}",
                        venue, stream, index, report.entries_checked
                    ),
                }
            }
        }
        "rebuild" => {
            let venue = venue_arg(&args, 2)?;
            let models = args
                .get(3)
                .with_context(|| format!("missing model list\n{}", USAGE))?;
            let keys: Vec<ModelKey> = if models == "all" {
                ModelKey::ALL.to_vec()
            } else {
                models
                    .split(',')
                    .map(ModelKey::parse)
                    .collect::<recovery::Result<_>>()?
            };
            let truncate = args.iter().any(|arg| arg == "--truncate");

            info!(venue = %venue, models = %models, truncate, "rebuild starting");
            let rebuilder = Rebuilder::new(storage, &config.projections, &config.rebuild);
            let stats = rebuilder.rebuild(&venue, &keys, truncate).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        "replay" => {
            let venue = venue_arg(&args, 2)?;
            let filter = match args.get(3) {
                Some(name) => DlqFilter::topic(
                    Topic::parse(name)
                        .with_context(|| format!("unknown topic: {}", name))?,
                ),
                None => DlqFilter::all(),
            };
            let stats = replay_dlq(&storage, &venue, &filter)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        "stats" => {
            let stats = storage.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        other => bail!("unknown command: {}\n{}", other, USAGE),
    }

    Ok(())
}

fn venue_arg(args: &[String], index: usize) -> anyhow::Result<VenueId> {
    let name = args
        .get(index)
        .with_context(|| format!("missing venue\n{}", USAGE))?;
    Ok(VenueId::new(name.as_str()))
}
