// src/main.rs

//! bibstack CLI entry point.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};

use bibstack::error::{AppError, Result};
use bibstack::models::Config;
use bibstack::output::{Format, OutputWriter};
use bibstack::pipeline::{run_enrich, run_harvest};
use bibstack::services::{HttpEnrichmentApi, HttpWorkApi, shared_limiter};
use bibstack::storage::LocalStore;

/// bibstack - journal article corpus builder
#[derive(Parser, Debug)]
#[command(name = "bibstack", version, about = "Incremental journal-article corpus builder")]
struct Cli {
    /// Path to the data directory containing config.toml
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Incrementally fetch all configured sources into the corpus
    Harvest,

    /// Run an enrichment pass from a configured secondary endpoint
    Enrich {
        /// Name of the enrichment endpoint (default: first configured)
        #[arg(long)]
        source: Option<String>,
    },

    /// Write corpus export targets
    Export {
        /// Comma-separated formats (csv, jsonl, bibtex)
        #[arg(long)]
        formats: Option<String>,

        /// Output directory (default: {data_dir}/exports)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration file
    Validate,

    /// Show per-source state and corpus size
    Status,

    /// Delete a source's fetch state (explicit operator reset)
    Reset {
        /// Journal code of the source to reset
        #[arg(long)]
        source: String,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Arm a shutdown flag that trips on ctrl-c; workers check it between
/// pages so in-flight work commits before exit.
fn arm_shutdown() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received; finishing in-flight pages");
            flag.store(true, Ordering::SeqCst);
        }
    });
    shutdown
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.data_dir.join("config.toml");
    let config = Config::load_or_default(&config_path);
    let store = LocalStore::new(&cli.data_dir);

    match cli.command {
        Command::Harvest => {
            config.validate()?;
            let limiter = shared_limiter(config.harvest.requests_per_second);
            let api = HttpWorkApi::new(config.api.clone(), &config.harvest, limiter)?;
            let shutdown = arm_shutdown();

            let manifest = run_harvest(&config, Arc::new(api), &store, shutdown).await?;
            log::info!(
                "harvest done: {} new records, corpus size {}",
                manifest.total_new(),
                manifest.corpus_size
            );
            if manifest.has_failures() {
                log::warn!("some sources failed; see manifest.json");
            }
        }

        Command::Enrich { source } => {
            config.validate()?;
            let endpoint = match &source {
                Some(name) => config
                    .enrichment
                    .iter()
                    .find(|e| &e.name == name)
                    .ok_or_else(|| {
                        AppError::config(format!("no enrichment endpoint named '{name}'"))
                    })?,
                None => config.enrichment.first().ok_or_else(|| {
                    AppError::config("no enrichment endpoints configured")
                })?,
            };

            let limiter = shared_limiter(config.harvest.requests_per_second);
            let api = HttpEnrichmentApi::new(
                endpoint.clone(),
                &config.api,
                &config.harvest,
                limiter,
            )?;
            let shutdown = arm_shutdown();

            let manifest = run_enrich(endpoint, Arc::new(api), &store, shutdown).await?;
            let summary = &manifest.sources[0];
            log::info!(
                "enrich done: {} lookups, {} articles updated",
                summary.fetched,
                summary.merged_records
            );
        }

        Command::Export { formats, output } => {
            let formats = match formats {
                Some(list) => list
                    .split(',')
                    .map(Format::from_str)
                    .collect::<Result<Vec<_>>>()?,
                None => config
                    .output
                    .formats
                    .iter()
                    .map(|f| Format::from_str(f))
                    .collect::<Result<Vec<_>>>()?,
            };
            let out_dir = output.unwrap_or_else(|| cli.data_dir.join("exports"));

            let corpus = store.load_corpus().await?;
            let written = OutputWriter::new(&out_dir).write(&corpus, &formats).await?;
            for path in written {
                log::info!("wrote {}", path.display());
            }
        }

        Command::Validate => {
            config.validate()?;
            log::info!(
                "config OK: {} sources, {} enrichment endpoints",
                config.sources.len(),
                config.enrichment.len()
            );
        }

        Command::Status => {
            let corpus = store.load_corpus().await?;
            log::info!("corpus: {} records", corpus.len());
            let usable = corpus.values().filter(|a| a.has_usable_abstract()).count();
            log::info!("usable abstracts: {usable}");

            for source in store.list_state_sources().await? {
                match store.load_state(&source).await {
                    Ok(Some(state)) => log::info!(
                        "[{source}] last run {}, {} known ids, cursor {:?}",
                        state.last_run_at,
                        state.known_ids.len(),
                        state.last_cursor
                    ),
                    Ok(None) => {}
                    Err(e) => log::error!("[{source}] {e}"),
                }
            }

            if let Some(manifest) = store.load_manifest().await? {
                log::info!(
                    "last run: {} finished {}, {} sources, failures: {}",
                    manifest.kind,
                    manifest.finished_at,
                    manifest.sources.len(),
                    manifest.has_failures()
                );
            }
        }

        Command::Reset { source } => {
            if store.reset_state(&source).await? {
                log::info!("state for '{source}' deleted");
            } else {
                log::warn!("no state found for '{source}'");
            }
        }
    }

    Ok(())
}
