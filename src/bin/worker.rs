//! facegraph-worker: background indexing daemon.
//!
//! Polls the document store for pending images, embeds and upserts them,
//! and finalizes albums as they drain. SIGINT requests a graceful stop:
//! the in-flight batch finishes and is reconciled before the process exits.
//!
//! ```bash
//! facegraph-worker               # run until interrupted
//! facegraph-worker --once        # process one batch and exit
//! ```

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use facegraph::config::Config;
use facegraph::db::Database;
use facegraph::embedder::EmbedderClient;
use facegraph::index::IndexClient;
use facegraph::pipeline::Indexer;

struct WorkerArgs {
    once: bool,
    interval: Option<u64>,
    config_path: Option<PathBuf>,
}

fn parse_args() -> WorkerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = WorkerArgs {
        once: false,
        interval: None,
        config_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                parsed.once = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        parsed.interval = Some(interval);
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"facegraph-worker - background indexing daemon

USAGE:
    facegraph-worker [OPTIONS]

OPTIONS:
    --once, -1          Process one batch and exit
    --interval, -i N    Seconds between empty polls (default from config)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    FACEGRAPH_CONFIG    Path to config file (overrides default location)
    FACEGRAPH_LOG       Log level (trace, debug, info, warn, error)

SIGINT stops the worker after the in-flight batch is reconciled.
"#
    );
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = parse_args();

    facegraph::logging::init(None)?;
    info!("facegraph worker starting");

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, draining in-flight batch");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    // Everything below blocks (sqlite, sync HTTP), so it lives on a
    // blocking thread; the async side only waits for the signal.
    let flag = Arc::clone(&cancel);
    let handle = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut config = Config::load(args.config_path)?;
        if let Some(interval) = args.interval {
            config.indexer.interval_secs = interval;
        }

        let db = Database::open(&config.database.path)?;
        db.initialize()?;
        info!(path = ?config.database.path, "database opened");

        let index = IndexClient::new(&config.index);
        index.ensure_collection(&config.index.visual_collection, config.index.visual_dim)?;
        index.ensure_collection(&config.index.face_collection, config.index.face_dim)?;
        index.ensure_collection(&config.index.dominants_collection, config.index.face_dim)?;

        let embedder = EmbedderClient::new(&config.embedder)?;

        let worker = Indexer::new(db, embedder, index, config)?;
        if args.once {
            worker.process_batch(&flag)?;
        } else {
            worker.run(&flag);
        }
        Ok(())
    });

    handle.await??;
    info!("facegraph worker stopped");
    Ok(())
}
