//! doctap - resumable document collection tap
//!
//! This is the composition root that wires together all the components.
//! Records go to stdout as JSON lines; logs go to stderr.

use anyhow::Context;
use doctap::adapters::outbound::{JsonLinesSink, MongoCollection, SqliteBookmarkBackend};
use doctap::config::{load_config, Config, SelectedStream};
use doctap::infrastructure::{shutdown_signal, StopSignal};
use doctap::{BookmarkStore, ExtractionEngine, ExtractionSettings};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    let streams = cfg.streams()?;
    if streams.is_empty() {
        tracing::warn!("no collections selected; set DOCTAP_COLLECTIONS");
        return Ok(());
    }
    let settings = cfg.extraction_settings()?;

    tracing::info!(
        "starting doctap streams={} method={} state={}",
        streams.len(),
        cfg.replication_method,
        cfg.state_path
    );

    let stop = StopSignal::new();
    tokio::spawn(shutdown_signal(stop.clone()));

    tokio::task::spawn_blocking(move || run_streams(&cfg, streams, &settings, &stop))
        .await
        .context("extraction thread panicked")?
}

/// Run every selected stream in turn on the current (blocking) thread.
fn run_streams(
    cfg: &Config,
    streams: Vec<SelectedStream>,
    settings: &ExtractionSettings,
    stop: &StopSignal,
) -> anyhow::Result<()> {
    // ===== COMPOSITION ROOT =====
    let uri = cfg.connection_string()?;
    let backend = Arc::new(
        SqliteBookmarkBackend::open(&cfg.state_path)
            .with_context(|| format!("opening state database {}", cfg.state_path))?,
    );
    let store = Arc::new(BookmarkStore::new(backend));
    let mut sink = JsonLinesSink::new(std::io::stdout().lock());

    for selected in streams {
        if stop.is_stopped() {
            break;
        }

        let source = Arc::new(
            MongoCollection::connect(
                &uri,
                &selected.collection.database,
                &selected.collection.collection,
            )
            .with_context(|| format!("connecting for stream {}", selected.descriptor.name))?,
        );
        let engine = ExtractionEngine::new(selected.descriptor, settings, source, store.clone())?;
        let summary = engine.run(&mut sink, stop)?;

        tracing::info!(
            stream = %engine.stream().name,
            bookmark = ?summary.bookmark,
            "stream complete"
        );
    }

    Ok(())
}
