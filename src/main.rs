//! trail - self-hosted web access log analytics
//!
//! Follows a reverse-proxy access log, keeps hourly multi-dimensional
//! aggregates in SQLite, and exposes them to a dashboard process:
//! - Tailer follows the active file across rotations and truncations
//! - Backfill imports rotated siblings once at startup
//! - Aggregator batches counters in memory and flushes transactionally

mod aggregator;
mod backfill;
mod classify;
mod config;
mod db;
mod geoip;
mod metrics;
mod parser;
mod retention;
mod tailer;
mod web;

use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::aggregator::{Aggregator, LINE_CHANNEL_CAPACITY};
use crate::parser::{Format, Parser};

async fn sigint() -> std::io::Result<()> {
    signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}

async fn sigterm() -> std::io::Result<()> {
    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config::Config::load().context("invalid configuration")?;
    info!(
        log_file = %cfg.log_file,
        db_path = %cfg.db_path,
        listen = %cfg.listen,
        retention_days = cfg.retention_days,
        "starting trail"
    );

    let store = db::Store::open(&cfg.db_path)
        .await
        .context("opening store")?;
    store.run_migrations().await.context("migrating store")?;

    let mut parser = Parser::new(&cfg.log_format);
    if parser.format() == Format::Auto {
        match read_first_lines(&cfg.log_file, 10).await {
            Ok(lines) if !lines.is_empty() => {
                let detected = parser.detect(&lines);
                info!(format = detected.as_str(), "auto-detected log format");
            }
            _ => {
                // No sample available yet; auto tries both grammars per line
            }
        }
    }

    let metrics = metrics::IngestMetrics::new();
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    // Rotated siblings are imported to completion before the live tail
    // starts, so this run never sees the same bytes twice
    if let Err(e) = backfill::run(&store, &cfg.log_file, &parser, &metrics, &token).await {
        warn!(error = %e, "backfill failed, continuing with live tail");
    }

    let geoip = geoip::GeoIp::open(&cfg.geoip_path);
    let (lines_tx, lines_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);

    let agg = Aggregator::new(store.clone(), parser.clone(), geoip, metrics.clone());
    tracker.spawn(agg.run(token.clone(), lines_rx));

    let tail = tailer::Tailer::new(cfg.log_file.clone(), store.clone(), metrics.clone());
    {
        let token = token.clone();
        tracker.spawn(async move {
            if let Err(e) = tail.run(token, lines_tx).await {
                error!(error = %e, "tailer failed");
            }
        });
    }

    let cleaner = retention::Cleaner::new(store.clone(), cfg.retention_days);
    tracker.spawn(cleaner.run(token.clone()));

    {
        let state = web::AppState {
            store: store.clone(),
            metrics: metrics.clone(),
            log_format: parser.format().as_str(),
        };
        let token = token.clone();
        let listen = cfg.listen.clone();
        tracker.spawn(async move {
            if let Err(e) = web::serve(&listen, state, token.clone()).await {
                error!(error = %e, "http server failed");
                token.cancel();
            }
        });
    }

    tracker.close();

    tokio::select! {
        res = sigint() => match res {
            Ok(()) => info!("received SIGINT, shutting down"),
            Err(e) => warn!(error = %e, "unable to listen for SIGINT"),
        },
        res = sigterm() => match res {
            Ok(()) => info!("received SIGTERM, shutting down"),
            Err(e) => warn!(error = %e, "unable to listen for SIGTERM"),
        },
        _ = token.cancelled() => {
            info!("shutting down after fatal task error");
        }
    }

    // Cancellation fans out; the aggregator flushes once before exiting
    token.cancel();
    tracker.wait().await;
    info!("shutdown complete");

    Ok(())
}

/// Reads up to `n` non-empty lines from the head of a file, for format
/// auto-detection.
async fn read_first_lines(path: &str, n: usize) -> std::io::Result<Vec<String>> {
    let file = tokio::fs::File::open(path).await?;
    let reader = tokio::io::BufReader::new(file);
    let mut lines = reader.lines();

    let mut out = Vec::new();
    while out.len() < n {
        match lines.next_line().await? {
            Some(line) => {
                if !line.is_empty() {
                    out.push(line);
                }
            }
            None => break,
        }
    }
    Ok(out)
}
