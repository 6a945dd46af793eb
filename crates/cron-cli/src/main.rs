//! `cronctl`: wires a [`cron_core::Manager`] to the single-host
//! façade implementations in `cron-runtime` and exposes the five
//! `cron.*` request topics (§6) as subcommands, plus `serve`, the
//! nearest analogue to the original module's `mod_main`.

mod cli;
mod config;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cron_core::serialize::{CreateRequest, SyncResponse};
use cron_core::Manager;
use cron_kernel::SystemClock;
use cron_runtime::{LocalEventBus, LocalRemoteExec};

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = tokio::runtime::Runtime::new().context("failed to start the Tokio runtime")?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let module_args = config::parse_module_args(&cli.module_args)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let cwd = std::env::current_dir()
        .context("failed to read the current working directory")?
        .to_string_lossy()
        .into_owned();

    let manager = Manager::new(
        cwd,
        Arc::new(LocalRemoteExec::new()),
        Arc::new(LocalEventBus::new()),
        Arc::new(SystemClock),
    );

    if let Some(topic) = module_args.sync_topic {
        // Only forward an explicit `sync_epsilon=` module arg; leaving
        // it `None` keeps the manager's own §4.5 default (15ms) intact
        // instead of clobbering it with an unspecified 0.
        manager
            .sync(Some(topic), false, module_args.sync_epsilon)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    if let Some(path) = &cli.entries {
        seed_entries(&manager, path).await?;
    }

    match cli.command {
        Commands::Create {
            kind,
            name,
            command,
            args,
            cwd,
            environ,
            repeat,
            rank,
            task_history_count,
            stop_on_failure,
            timeout,
            watch,
        } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let req = CreateRequest {
                kind,
                name,
                command,
                args,
                environ: parse_env_pairs(&environ)?,
                cwd,
                repeat,
                rank,
                task_history_count,
                stop_on_failure,
                timeout,
            };
            let rendered = manager.create(req).await.map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&rendered);

            if let Some(seconds) = watch {
                tokio::time::sleep(std::time::Duration::from_secs_f64(seconds.max(0.0))).await;
                print_json(&cron_core::manager::list_response(&manager).await);
            }
        }
        Commands::Delete { id, kill } => {
            let rendered = manager
                .delete(id, kill)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&rendered);
        }
        Commands::List => {
            print_json(&cron_core::manager::list_response(&manager).await);
        }
        Commands::Start { id } => {
            let rendered = manager.start(id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&rendered);
        }
        Commands::Stop { id } => {
            let rendered = manager.stop(id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&rendered);
        }
        Commands::Sync {
            topic,
            disable,
            sync_epsilon,
        } => {
            let epsilon = sync_epsilon
                .map(|s| config::parse_fsd(&s))
                .transpose()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            let resp = manager
                .sync(topic, disable, epsilon)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&sync_response_value(&resp));
        }
        Commands::Serve { snapshot_interval } => {
            serve(&manager, snapshot_interval).await;
        }
    }

    Ok(())
}

/// Loads a JSON array of `cron.create` request bodies and registers
/// each, in order, so entry ids are assigned deterministically across
/// runs that pass the same seed file.
async fn seed_entries(manager: &Manager, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let requests: Vec<CreateRequest> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of cron.create bodies", path.display()))?;
    for req in requests {
        manager.create(req).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    Ok(())
}

/// Runs until interrupted (`Ctrl-C`), the nearest analogue to the
/// original module's `flux_reactor_run`. With `snapshot_interval` set,
/// prints `cron.list` periodically so a long-lived `serve` session can
/// be observed without a separate client.
async fn serve(manager: &Manager, snapshot_interval: Option<f64>) {
    tracing::info!("cron service running, press Ctrl-C to stop");
    match snapshot_interval {
        Some(secs) if secs > 0.0 => {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs_f64(secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        print_json(&cron_core::manager::list_response(manager).await);
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        _ => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    tracing::info!("shutting down");
    print_json(&cron_core::manager::list_response(manager).await);
}

fn parse_env_pairs(pairs: &[String]) -> Result<Option<std::collections::HashMap<String, String>>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut map = std::collections::HashMap::new();
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("--env {pair:?} is not NAME=VALUE"))?;
        map.insert(name.to_string(), value.to_string());
    }
    Ok(Some(map))
}

fn sync_response_value(resp: &SyncResponse) -> serde_json::Value {
    serde_json::to_value(resp).expect("SyncResponse always serializes")
}

fn print_json(value: &serde_json::Value) {
    println!("{value}");
}
