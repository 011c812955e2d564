use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use procwatch_core::{
    AttributeRegistry, ExportConfig, ExporterRegistry, ProcessDataSet, ProcessHandle,
    ProcessWatcher, SystemSource, WatcherConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "procwatch", version, about = "Watch processes and record their resource usage")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log process start and stop events until Ctrl+C
    Watch {
        /// Time between two process snapshots
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    /// Record samples of one process and export them
    Record {
        #[arg(long)]
        pid: u32,
        #[arg(long, default_value_t = 5)]
        frames: usize,
        /// Delay between two frames
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
        /// Where export files are written
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Exporters to use, all of them when omitted
        #[arg(long = "exporter")]
        exporters: Vec<String>,
    },
    /// List available exporters
    Exporters,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Watch { interval_ms } => watch(Duration::from_millis(interval_ms)).await,
        Command::Record {
            pid,
            frames,
            delay_ms,
            out_dir,
            exporters,
        } => {
            let mut config = ExportConfig::new();
            if let Some(dir) = out_dir {
                config = config.with_output_dir(dir);
            }
            record(pid, frames, Duration::from_millis(delay_ms), config, exporters).await
        }
        Command::Exporters => {
            for name in ExporterRegistry::builtin(ExportConfig::new()).discover() {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

async fn watch(interval: Duration) -> Result<()> {
    let watcher = ProcessWatcher::new(
        Arc::new(SystemSource::new()),
        WatcherConfig::new().with_sleep_interval(interval),
    );

    watcher.on_new_process(|process| {
        info!(pid = process.id(), "process started");
    });
    watcher.on_process_stopped(|pid| {
        info!(pid, "process stopped");
    });

    let session = watcher.session()?;
    tokio::signal::ctrl_c().await?;
    session.close()?;

    Ok(())
}

async fn record(
    pid: u32,
    frames: usize,
    delay: Duration,
    config: ExportConfig,
    exporters: Vec<String>,
) -> Result<()> {
    let target = ProcessHandle::system(pid);
    if !target.is_alive() {
        bail!("process {} is not running", pid);
    }

    let mut data_set = ProcessDataSet::new(target);
    for sampler in AttributeRegistry::builtin().instantiate_all() {
        data_set.add_attribute_data_set(sampler);
    }

    for i in 0..frames {
        if i > 0 {
            tokio::time::sleep(delay).await;
        }
        if !data_set.record() {
            warn!(pid, recorded = data_set.frame_count(), "process exited, stopping early");
            break;
        }
    }

    if data_set.frame_count() == 0 {
        bail!("no samples recorded for process {}", pid);
    }

    let registry = ExporterRegistry::builtin(config);
    let names: Vec<String> = if exporters.is_empty() {
        registry.discover().into_iter().map(str::to_string).collect()
    } else {
        exporters
    };

    for name in &names {
        let exporter = registry.instantiate(name)?;
        let path = data_set
            .export(exporter.as_ref())
            .with_context(|| format!("{} export failed", name))?;
        println!("{}", path.display());
    }

    Ok(())
}
