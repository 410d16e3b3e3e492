//! map-mirror CLI: mirror a live source map into a target map.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use map_mirror::config::MirrorConfig;
use map_mirror::paths::MirrorPaths;
use map_mirror::reconcile::{Mirror, StateStore};
use map_mirror::session::{JournalEvents, MemorySession};

#[derive(Parser)]
#[command(name = "map-mirror", version, about = "Mirror a live source map into a target map")]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/map-mirror/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file.
    Init,

    /// Recover from persisted state, then follow the event journal.
    Run {
        /// Drain the journal once and exit instead of polling forever.
        #[arg(long)]
        once: bool,
    },

    /// Show persisted outings and correspondence counts.
    Status,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let paths = MirrorPaths::resolve()?;
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());

    match cli.command {
        Commands::Init => {
            if config_path.exists() {
                miette::bail!("config already exists: {}", config_path.display());
            }
            MirrorConfig::default().save(&config_path)?;
            println!("Wrote {}", config_path.display());
        }

        Commands::Run { once } => {
            let config = MirrorConfig::load(&config_path)?;
            let base = config_path.parent().unwrap_or(Path::new("."));
            let state_path = resolve(base, &config.state_path(&paths));
            if let Some(dir) = state_path.parent() {
                map_mirror::paths::create_dir(dir)?;
            }

            // Either session failing to open ends the process.
            let source =
                MemorySession::open(&config.source_map, &resolve(base, &config.source_snapshot))?;
            let target = MemorySession::open_or_create(
                &config.target_map,
                &resolve(base, &config.target_snapshot),
            )?;
            let store = StateStore::open(&state_path)?;
            tracing::info!(
                source = %config.source_map,
                target = %config.target_map,
                state = %state_path.display(),
                "sessions open"
            );

            let mut mirror = Mirror::new(source, target, store, config.settings());
            let report = mirror.start()?;
            println!(
                "Recovered: {} replayed, {} created, {} skipped, {} failed",
                report.replayed, report.created, report.skipped, report.failed
            );

            let mut events = JournalEvents::new(&resolve(base, &config.journal));
            if once {
                let handled = mirror.poll_once(&mut events)?;
                println!("Handled {handled} events");
            } else {
                mirror.run(&mut events, config.poll_interval())?;
            }
        }

        Commands::Status => {
            let config = MirrorConfig::load(&config_path)?;
            let base = config_path.parent().unwrap_or(Path::new("."));
            let state_path = resolve(base, &config.state_path(&paths));
            let store = StateStore::open(&state_path)?;
            let state = store.state();

            println!("State: {}", state_path.display());
            println!("Correspondence entries: {}", state.correspondence.len());
            println!(
                "Mirrored target ids: {}",
                state.correspondence.values().map(Vec::len).sum::<usize>()
            );
            println!("Outings: {}", state.outings.len());
            for outing in state.outings.values() {
                let assignment = outing
                    .source_assignment_id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "  {:<16} assignment={} boundary={} tracks={} pending={} clues={}",
                    outing.key,
                    assignment,
                    if outing.boundary_id.is_some() { "yes" } else { "no" },
                    outing.cropped_track_groups.len(),
                    outing.uncropped_track_ids.len(),
                    outing.clue_ids.len(),
                );
            }
            let json = serde_json::to_string_pretty(state).into_diagnostic()?;
            tracing::debug!(state = %json, "persisted state");
        }
    }

    Ok(())
}

/// Relative paths in the config are relative to the config file.
fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
