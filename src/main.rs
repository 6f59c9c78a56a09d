use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use facegraph::config::Config;
use facegraph::db::{Database, ReviewStatus};
use facegraph::embedder::EmbedderClient;
use facegraph::finalizer::AlbumFinalizer;
use facegraph::index::{IndexClient, SearchFilter};
use facegraph::seed::seed_directory;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "seed" => cmd_seed(&args[2..]),
        "finalize" => cmd_finalize(&args[2..]),
        "search" => cmd_search(&args[2..]),
        "status" => cmd_status(&args[2..]),
        "reviews" => cmd_reviews(&args[2..]),
        "resolve" => cmd_resolve(&args[2..]),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        "--version" | "-V" => {
            println!("facegraph {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"facegraph - face-clustering photo indexer

USAGE:
    facegraph <COMMAND> [OPTIONS]

COMMANDS:
    seed <DIR>          Hash a directory tree and enqueue pending images
        --album NAME        Album id (default: directory leaf name)
        --flat              Do not recurse into subdirectories
        --videos            Include video files
    finalize <ALBUM>    Recompute clusters and dominance for one album
    search <QUERY>      Text search against the visual index
        --album NAME        Restrict to one album
        --limit N           Hits to return (default: 10)
    status              Embedder health and per-status image counts
    reviews             List the pending review queue
        --all               Include resolved and dismissed items
    resolve <ID>        Close a review item
        --dismiss           Dismiss instead of resolving
    help                Show this help message

Every command accepts --config PATH. The FACEGRAPH_CONFIG environment
variable overrides the default config location, FACEGRAPH_LOG the log level.

The indexing worker is a separate binary: facegraph-worker.
"#
    );
}

/// Pop `--config PATH` out of an argument list.
fn split_config(args: &[String]) -> (Option<PathBuf>, Vec<String>) {
    let mut config_path = None;
    let mut rest = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" || args[i] == "-c" {
            if i + 1 < args.len() {
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 1;
            }
        } else {
            rest.push(args[i].clone());
        }
        i += 1;
    }
    (config_path, rest)
}

fn open(config_path: Option<PathBuf>) -> Result<(Config, Database)> {
    facegraph::logging::init(None)?;
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path)?;
    db.initialize()?;
    Ok((config, db))
}

fn flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn option_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn cmd_seed(args: &[String]) -> Result<()> {
    let (config_path, rest) = split_config(args);
    let dir = match rest.first() {
        Some(dir) if !dir.starts_with("--") => PathBuf::from(dir),
        _ => bail!("usage: facegraph seed <DIR> [--album NAME] [--flat] [--videos]"),
    };

    let (config, db) = open(config_path)?;
    let report = seed_directory(
        &db,
        &config.scanner,
        &dir,
        option_value(&rest, "--album").as_deref(),
        !flag(&rest, "--flat"),
        flag(&rest, "--videos"),
    )?;

    println!(
        "seeded {}: {} matched, {} new, {} already known, {} failed",
        dir.display(),
        report.matched,
        report.inserted,
        report.skipped,
        report.failed
    );
    Ok(())
}

fn cmd_finalize(args: &[String]) -> Result<()> {
    let (config_path, rest) = split_config(args);
    let album_id = match rest.first() {
        Some(album) if !album.starts_with("--") => album.clone(),
        _ => bail!("usage: facegraph finalize <ALBUM>"),
    };

    let (config, db) = open(config_path)?;
    let index = IndexClient::new(&config.index);
    let cancel = AtomicBool::new(false);

    let result = AlbumFinalizer::new(&db, &index, &config).finalize(&album_id, &cancel)?;
    let summary = &result.summary;

    println!(
        "album {}: {} images, {} with faces, {} clusters",
        summary.id, summary.image_count, summary.face_image_count, result.cluster_count
    );
    match &summary.dominant {
        Some(dominant) => println!(
            "dominant subject: {} (ratio {:.2}, {} images)",
            dominant.cluster_id, dominant.ratio, dominant.image_count
        ),
        None => println!("dominant subject: none"),
    }
    if summary.suspicious_aggregator {
        println!("flagged as suspected aggregator");
    }
    if result.aggregator_review_created || result.ambiguous_review_created {
        println!("review item created");
    }
    Ok(())
}

fn cmd_search(args: &[String]) -> Result<()> {
    let (config_path, rest) = split_config(args);
    let query = match rest.first() {
        Some(q) if !q.starts_with("--") => q.clone(),
        _ => bail!("usage: facegraph search <QUERY> [--album NAME] [--limit N]"),
    };
    let limit: usize = option_value(&rest, "--limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    let (config, _db) = open(config_path)?;
    let embedder = EmbedderClient::new(&config.embedder)?;
    let index = IndexClient::new(&config.index);

    let vector = embedder.embed_text(&query)?;
    let mut filter = SearchFilter::default();
    filter.album_id = option_value(&rest, "--album");

    let hits = index.search(&config.index.visual_collection, &vector, limit, &filter)?;
    if hits.is_empty() {
        println!("no hits");
        return Ok(());
    }
    for hit in hits {
        let path = hit
            .payload
            .as_ref()
            .map(|p| p.absolute_path.clone())
            .unwrap_or_default();
        let album = hit
            .payload
            .as_ref()
            .map(|p| p.album_id.clone())
            .unwrap_or_default();
        println!("{:.4}  [{}]  {}", hit.score, album, path);
    }
    Ok(())
}

fn cmd_status(args: &[String]) -> Result<()> {
    let (config_path, _rest) = split_config(args);
    let (config, db) = open(config_path)?;

    for (status, count) in db.count_by_status()? {
        println!("images {}: {}", status, count);
    }

    let embedder = EmbedderClient::new(&config.embedder)?;
    match embedder.status() {
        Ok(status) => println!(
            "embedder: clip={} face={}",
            status.clip_device.unwrap_or_else(|| "?".to_string()),
            status.face_device.unwrap_or_else(|| "?".to_string())
        ),
        Err(e) => println!("embedder: unavailable ({e})"),
    }
    match embedder.self_test() {
        Ok(report) => println!(
            "self-test: {} {}",
            if report.passed { "passed" } else { "failed" },
            report.details.unwrap_or_default()
        ),
        Err(e) => println!("self-test: unavailable ({e})"),
    }
    Ok(())
}

fn cmd_reviews(args: &[String]) -> Result<()> {
    let (config_path, rest) = split_config(args);
    let (_config, db) = open(config_path)?;

    let reviews = db.list_reviews(!flag(&rest, "--all"))?;
    if reviews.is_empty() {
        println!("no reviews");
        return Ok(());
    }
    for review in reviews {
        println!(
            "{}  {}  {}  album={}{}{}",
            review.id,
            review.status.as_str(),
            review.review_type.as_str(),
            review.album_id,
            review
                .ratio
                .map(|r| format!("  ratio={r:.2}"))
                .unwrap_or_default(),
            review
                .notes
                .map(|n| format!("  ({n})"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

fn cmd_resolve(args: &[String]) -> Result<()> {
    let (config_path, rest) = split_config(args);
    let review_id = match rest.first() {
        Some(id) if !id.starts_with("--") => id.clone(),
        _ => bail!("usage: facegraph resolve <ID> [--dismiss]"),
    };

    let (_config, db) = open(config_path)?;
    let status = if flag(&rest, "--dismiss") {
        ReviewStatus::Dismissed
    } else {
        ReviewStatus::Resolved
    };

    if db.close_review(&review_id, status)? {
        println!("review {} {}", review_id, status.as_str());
    } else {
        bail!("no pending review with id {}", review_id);
    }
    Ok(())
}
