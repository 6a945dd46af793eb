//! Command-line surface for `cronctl`.
//!
//! Each subcommand corresponds to one of the five request topics in
//! §6 of the design (`cron.create`, `cron.delete`, `cron.list`,
//! `cron.start`, `cron.stop`, `cron.sync`), plus `serve`, which is the
//! closest analogue to the original module's `mod_main`: it registers
//! entries and runs the reactor (here, the Tokio runtime) until
//! interrupted. Grounded on `mofa-cli`'s `clap::Parser`/`Subcommand`
//! derive style.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cronctl", about = "Flux-style cron service control", version)]
pub struct Cli {
    /// Emit debug-level logs instead of info.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Seed the manager with entries from a JSON array of `cron.create`
    /// request bodies before running the subcommand. Since the service
    /// keeps no state across invocations, this is how a one-shot
    /// subcommand gets anything interesting to act on — pass the same
    /// file to every invocation in a demo session to keep entry ids
    /// stable.
    #[arg(long, global = true)]
    pub entries: Option<PathBuf>,

    /// Module argument in `key=value` form, repeatable, exactly as the
    /// original module's argv (`sync=<topic>`, `sync_epsilon=<FSD>`).
    #[arg(long = "module-arg", global = true)]
    pub module_args: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// `cron.create`: register a new entry and print its rendering.
    Create {
        /// Trigger type: interval, datetime, or event.
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        command: String,
        /// Trigger-specific args as a JSON object, e.g. '{"interval":5}'.
        #[arg(long, default_value = "{}")]
        args: String,
        #[arg(long)]
        cwd: Option<String>,
        /// Repeatable NAME=VALUE environment entries.
        #[arg(long = "env", value_name = "NAME=VALUE")]
        environ: Vec<String>,
        #[arg(long)]
        repeat: Option<i64>,
        #[arg(long)]
        rank: Option<i64>,
        #[arg(long = "task-history-count")]
        task_history_count: Option<i64>,
        #[arg(long = "stop-on-failure")]
        stop_on_failure: Option<i64>,
        #[arg(long)]
        timeout: Option<f64>,
        /// After creating the entry, keep the manager running for this
        /// many seconds so the trigger can actually fire, then print
        /// the final `cron.list` snapshot before exiting.
        #[arg(long)]
        watch: Option<f64>,
    },
    /// `cron.delete`: unregister an entry, printing its last rendering.
    Delete {
        id: u64,
        /// Send SIGTERM to the entry's active task before deleting it.
        #[arg(long)]
        kill: bool,
    },
    /// `cron.list`: render every live entry.
    List,
    /// `cron.start`: (re)start a stopped entry.
    Start { id: u64 },
    /// `cron.stop`: stop an entry's trigger without removing it.
    Stop { id: u64 },
    /// `cron.sync`: configure, update, or disable the sync event.
    Sync {
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        disable: bool,
        /// Flux Standard Duration (e.g. "5s", "2m", or a bare number).
        #[arg(long = "sync-epsilon")]
        sync_epsilon: Option<String>,
    },
    /// Run the manager until interrupted, optionally seeded from
    /// `--entries`. The closest analogue to `mod_main`'s
    /// `flux_reactor_run`.
    Serve {
        /// Snapshot the entry list to stdout at this interval while
        /// running (seconds). Omit to stay silent until shutdown.
        #[arg(long = "snapshot-interval")]
        snapshot_interval: Option<f64>,
    },
}
