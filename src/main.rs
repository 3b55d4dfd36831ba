use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scene_sync_native::clean::{clean_manifest_paths, clean_non_kept_files};
use scene_sync_native::config::DEFAULT_CONFIG_FILE;
use scene_sync_native::{SyncConfig, SyncWatcher, Synchronizer, TransformResult};

#[derive(Parser)]
#[command(name = "scene-sync", version, about, long_about = None)]
struct Cli {
    /// Config file; defaults apply when it does not exist
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long)]
    watch_dir: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    conversion_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mirror the watched tree once
    Sync,
    /// Mirror once, then keep mirroring changes
    Watch,
    /// Production cleanup of the mirrored tree and the manifest paths
    Clean {
        /// Directory holding the manifest; defaults to the parent of output_dir
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Print the rewritten form of one script
    Transform { file: PathBuf },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = SyncConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(dir) = cli.watch_dir {
        config.watch_dir = dir;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if let Some(dir) = cli.conversion_dir {
        config.conversion_dir = Some(dir);
    }

    match cli.command {
        Command::Sync => {
            let report = Synchronizer::new(config).initial_sync()?;
            if report.failed > 0 {
                bail!("{} paths failed to sync", report.failed);
            }
        }
        Command::Watch => {
            let debounce = Duration::from_millis(config.debounce_ms);
            let sync = Arc::new(Synchronizer::new(config));
            sync.initial_sync()?;
            let watcher = SyncWatcher::start(Arc::clone(&sync), debounce)?;
            info!("Press Ctrl-C to stop");
            watcher.wait();
        }
        Command::Clean { root } => {
            let options = config.clean_options();
            let root = root
                .or_else(|| config.output_dir.parent().map(PathBuf::from))
                .unwrap_or_default();
            let mirrored = clean_non_kept_files(&config.output_dir, &options)?;
            let manifest = clean_manifest_paths(&root, &options)?;
            info!("Removed {} entries", mirrored.removed() + manifest.removed());
        }
        Command::Transform { file } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let transformer = scene_sync_native::ScriptTransformer::new(config.transform_options());
            match transformer.transform(&file, &source)? {
                TransformResult::Rewritten(text) => print!("{}", text),
                TransformResult::Unchanged => {
                    info!("{} is not rewritten", file.display());
                    print!("{}", source);
                }
            }
        }
    }

    Ok(())
}
