//! assettrack CLI tool
//!
//! Command-line interface for inspecting the transform state of an asset tree.
//!
//! ## Commands
//!
//! - `scan <path>`: Register every asset document once and report what needs work
//! - `stamp <asset>`: Record that an asset was transformed from its current hashes
//! - `watch <path>`: Keep the transform state current while files change (feature `service`)
//!
//! Parsed document information is cached in `<path>/.assettrack/documents.json` unless the
//! configuration file names another location.

use assettrack_core::{
    codec::asset_doc::write_transform_stamp,
    config::{TomlConfigProvider, TrackerConfig, TrackerConfigProvider},
    engine::AssetEngine,
    properties::TransformState,
    AssetTrackError,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
#[cfg(feature = "service")]
use {
    assettrack_core::{event::AssetEvent, scheduler::UpdateScheduler, watch::AssetWatcher},
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    },
};

#[derive(Parser)]
#[command(name = "assettrack")]
#[command(author, version, about = "Track which assets of a data directory need to be transformed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register every asset document once and report transform states
    Scan {
        /// Data directory to scan
        path: PathBuf,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Re-evaluate every asset and rehash every file, ignoring cached hashes
        #[arg(long)]
        force: bool,

        /// List every asset, not only the ones needing work
        #[arg(short, long)]
        verbose: bool,
    },

    /// Mark an asset as transformed from its current hashes
    Stamp {
        /// The asset document that was transformed
        asset: PathBuf,

        /// Data directory containing the asset (default: the asset's directory)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Watch a data directory and keep transform states current
    #[cfg(feature = "service")]
    Watch {
        /// Data directory to watch
        path: PathBuf,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print every asset event
        #[arg(short, long)]
        verbose: bool,
    },
}

fn load_config(data_dir: &Path, config: Option<PathBuf>) -> Result<TrackerConfig, AssetTrackError> {
    let mut config = match config {
        Some(path) => TomlConfigProvider::new(path).get_config()?,
        None => TrackerConfig::default(),
    };
    if config.data_dirs.is_empty() {
        config.data_dirs.push(data_dir.to_path_buf());
    }
    if config.document_cache.is_none() {
        config.document_cache = Some(data_dir.join(".assettrack").join("documents.json"));
    }
    Ok(config)
}

fn needs_attention(state: TransformState) -> bool {
    !matches!(state, TransformState::UpToDate)
}

fn scan(path: PathBuf, config: Option<PathBuf>, force: bool, verbose: bool) -> Result<(), AssetTrackError> {
    let engine = AssetEngine::open(load_config(&path, config)?, None)?;
    let visited = engine.scan_data_directories();
    if force {
        for asset in engine.assets().into_iter().filter(|asset| !asset.is_removed()) {
            // Failures are logged and recorded on the asset.
            let _ = engine.ensure_transform_state(&asset.guid, true);
        }
    }
    engine.process_all();

    let assets = engine.assets();
    for asset in assets.iter().filter(|asset| !asset.is_removed()) {
        if verbose || needs_attention(asset.transform_state) {
            println!(
                "{:<28} {} {:016x} {:016x} {}",
                asset.transform_state.to_string(),
                asset.guid,
                asset.asset_hash,
                asset.thumb_hash,
                asset.path
            );
            for entry in asset.log.iter() {
                println!("    {:?}: {}", entry.level, entry.message);
            }
        }
    }

    println!("\n=== Scan Results ===");
    println!("Documents visited: {visited}");
    for state in TransformState::all() {
        let count = engine.assets_in_state(state).len();
        if count > 0 {
            println!("{state}: {count}");
        }
    }
    let unresolved = engine.unresolved_edges();
    if !unresolved.is_empty() {
        println!("Unresolved references: {}", unresolved.len());
    }
    engine.shutdown()
}

fn stamp(
    asset: PathBuf,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
) -> Result<(), AssetTrackError> {
    let asset = asset.canonicalize()?;
    let data_dir = match data_dir {
        Some(dir) => dir.canonicalize()?,
        None => asset
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| AssetTrackError::NotFound(format!("{asset:?} has no parent directory")))?,
    };
    let engine = AssetEngine::open(load_config(&data_dir, config)?, None)?;
    engine.scan_data_directories();
    engine.process_all();

    let info = engine
        .asset_at(&asset)
        .ok_or_else(|| AssetTrackError::NotFound(format!("{asset:?} is not a tracked asset")))?;
    if info.asset_hash == 0 {
        println!("{} cannot be stamped while {}", info.path, info.transform_state);
        return engine.shutdown();
    }
    write_transform_stamp(&info.absolute_path, info.asset_hash, info.thumb_hash)?;
    let state = engine.report_transform_result(&info.guid, Ok(()))?;
    println!("{} {state}", info.path);
    engine.shutdown()
}

#[cfg(feature = "service")]
fn watch(path: PathBuf, config: Option<PathBuf>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&path, config)?;
    let worker_count = config.worker_count;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<AssetEvent>();
    let printer = runtime.spawn(async move {
        while let Some(event) = rx.recv().await {
            if verbose {
                println!("[Event] {event:?}");
            }
        }
    });

    let engine = Arc::new(AssetEngine::open(config, Some(tx))?);
    let visited = engine.scan_data_directories();
    println!("Registered {visited} documents");
    let scheduler = UpdateScheduler::start(engine.clone(), worker_count, runtime.handle());
    let watcher = AssetWatcher::start(engine.clone(), Duration::from_millis(300))?;
    println!(
        "Watching {} for changes. Press Ctrl-C to stop.",
        path.display()
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })?;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    watcher.stop();
    runtime.block_on(scheduler.shutdown());
    let reaped = engine.reap_removed();
    if !reaped.is_empty() {
        tracing::info!("Reaped {} removed assets", reaped.len());
    }
    engine.shutdown()?;
    printer.abort();
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            path,
            config,
            force,
            verbose,
        } => Ok(scan(path, config, force, verbose)?),
        Commands::Stamp {
            asset,
            data_dir,
            config,
        } => Ok(stamp(asset, data_dir, config)?),
        #[cfg(feature = "service")]
        Commands::Watch {
            path,
            config,
            verbose,
        } => watch(path, config, verbose),
    }
}
