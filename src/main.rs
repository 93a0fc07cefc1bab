//! Vigil - a live system monitor for your terminal
//!
//! Samples CPU, memory, GPU, storage and network telemetry from several
//! fallback sources and keeps an identity-stable process tree that survives
//! sampling jitter, grouping changes and re-sorting.

mod config;
mod core;
mod error;
mod platform;
mod process;
mod telemetry;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, SettingsStore};
use crate::core::app::App;
use crate::process::{
    ProcessActions, ProcessRow, ProcessTableSampler, ProcessTreeReconciler, SortColumn, SortState,
};
use crate::telemetry::format::format_bytes;
use crate::telemetry::{SystemSnapshot, SystemSnapshotSampler};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(author = "Vigil Contributors")]
#[command(version)]
#[command(about = "A live system monitor with an identity-stable process tree", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample the system twice and print the second snapshot
    Snapshot {
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Print the reconciled process list
    Processes {
        /// Show children indented under their parents
        #[arg(short, long)]
        tree: bool,

        /// Group processes that share a name, whatever the config says
        #[arg(short, long)]
        group: bool,

        /// Sort column: cpu, ram, gpu or name
        #[arg(short, long, default_value = "cpu")]
        sort: SortColumn,

        /// Maximum rows to print
        #[arg(short, long, default_value = "25")]
        limit: usize,
    },

    /// Terminate a process
    Kill {
        pid: u32,

        /// Terminate its descendants too
        #[arg(short, long)]
        tree: bool,
    },

    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

fn setup_logging(verbosity: u8) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    // The terminal belongs to the UI, so logs go to a file.
    let log_dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigil")
        .join("logs");

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "vigil.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep the guard alive for the duration of the program
    let _logging_guard = setup_logging(cli.verbose)?;

    let config_path = cli.config.clone().or_else(Config::default_path);

    if let Some(Commands::Init { force }) = cli.command {
        let path = config_path.context("no configuration directory on this system")?;
        return config::init_config(&path, force);
    }

    let config = Config::load_or_default(cli.config.as_deref())?;
    let tick = Duration::from_millis(config.general.tick_interval_ms.max(100));
    let settings = Arc::new(SettingsStore::new(config));

    match cli.command {
        Some(Commands::Snapshot { json }) => {
            let snapshot = sample_twice(Arc::clone(&settings), tick).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
        }
        Some(Commands::Processes {
            tree,
            group,
            sort,
            limit,
        }) => {
            let rows = reconcile_twice(Arc::clone(&settings), tick, tree, group, sort).await?;
            print_processes(&rows, limit);
        }
        Some(Commands::Kill { pid, tree }) => {
            let actions = ProcessActions::new(ProcessTableSampler::linux(settings).source());
            if tree {
                let report = actions.kill_tree(pid);
                println!("Terminated {} process(es)", report.killed.len());
                for (failed, err) in &report.failed {
                    eprintln!("  {}: {}", failed, err);
                }
                if !report.success() {
                    anyhow::bail!("some processes could not be terminated");
                }
            } else {
                actions
                    .kill(pid)
                    .with_context(|| format!("terminating {}", pid))?;
                println!("Terminated {}", pid);
            }
        }
        // Written before any config is loaded
        Some(Commands::Init { .. }) => {}
        None => {
            // Hot-reload while the dashboard runs; the debouncer stops on drop.
            let _watcher = match config_path.filter(|p| p.exists()) {
                Some(path) => settings
                    .watch(path)
                    .map_err(|err| tracing::warn!(error = %err, "config watch unavailable"))
                    .ok(),
                None => None,
            };
            let mut app = App::new(settings)?;
            app.run().await?;
        }
    }

    Ok(())
}

/// Rates need two readings, so sample once, wait a tick, and keep the second.
async fn sample_twice(settings: Arc<SettingsStore>, tick: Duration) -> Result<SystemSnapshot> {
    let sampler = Arc::new(SystemSnapshotSampler::linux(settings));
    let first = Arc::clone(&sampler);
    tokio::task::spawn_blocking(move || first.snapshot()).await?;
    tokio::time::sleep(tick).await;
    Ok(tokio::task::spawn_blocking(move || sampler.snapshot()).await?)
}

async fn reconcile_twice(
    settings: Arc<SettingsStore>,
    tick: Duration,
    tree: bool,
    group: bool,
    sort: SortColumn,
) -> Result<Vec<ProcessRow>> {
    let processes = settings.read(|c| c.processes.clone());
    let mut table = ProcessTableSampler::linux(settings);
    let mut table = tokio::task::spawn_blocking(move || {
        table.sample();
        table
    })
    .await?;
    tokio::time::sleep(tick).await;
    let snapshots = tokio::task::spawn_blocking(move || table.sample()).await?;

    let mut reconciler = ProcessTreeReconciler::new(&processes);
    if group {
        reconciler.set_grouping(true);
    }
    reconciler.set_sort_state(SortState {
        column: sort,
        descending: sort.default_descending(),
    });
    reconciler.reconcile(&snapshots);
    Ok(reconciler.rows(tree))
}

fn print_snapshot(snapshot: &SystemSnapshot) {
    let cpu = &snapshot.cpu;
    println!("CPU     {} ({})", cpu.name, cpu.cores_and_threads);
    println!(
        "        {:.1}%  {:.0}°C  {:.2} GHz  {:.1} W",
        cpu.usage, cpu.temperature_c, cpu.clock_ghz, cpu.power_watts
    );

    let ram = &snapshot.ram;
    println!(
        "Memory  {:.1} / {:.1} GB ({:.1}%)  {}",
        ram.used_gb, ram.total_gb, ram.usage, ram.type_and_speed
    );

    for (i, gpu) in snapshot.gpus.iter().enumerate() {
        println!(
            "GPU {}   {}  {:.1}%  {}  driver {}",
            i, gpu.name, gpu.usage, gpu.memory_display, gpu.driver_version
        );
    }

    for drive in &snapshot.storage {
        println!(
            "Disk    {} {}  {:.1}% used  {:.1}% active  {}",
            drive.name, drive.mount_point, drive.used_percent, drive.activity_percent, drive.media_kind
        );
    }

    let net = &snapshot.network;
    println!(
        "Network {} {} ({})  ↑ {}  ↓ {}",
        net.kind,
        net.interface,
        net.status(),
        net.upload_display,
        net.download_display
    );

    if let Some(top) = &snapshot.top_disk_process {
        println!(
            "Top I/O {} [{}]  {}/s",
            top.name,
            top.pid,
            format_bytes(top.total_bytes_per_sec() as u64)
        );
    }
}

fn print_processes(rows: &[ProcessRow], limit: usize) {
    println!("{:<40} {:>8} {:>10} {:>8}", "NAME", "CPU", "MEM", "GPU");
    for row in rows.iter().take(limit) {
        let mut name = format!("{}{}", "  ".repeat(row.depth), row.name);
        if row.instance_count > 1 {
            name.push_str(&format!(" ({})", row.instance_count));
        }
        println!(
            "{:<40} {:>7.1}% {:>10} {:>7.1}%",
            name,
            row.cpu_percent,
            format_bytes(row.memory_bytes),
            row.gpu_percent
        );
    }
    if rows.len() > limit {
        println!("… {} more", rows.len() - limit);
    }
}
