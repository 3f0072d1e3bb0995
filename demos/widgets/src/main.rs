//! DriftDB widgets walkthrough
//!
//! Edits a `widgets` collection while offline, reconnects and syncs with an
//! in-process remote, then receives an edit made by another client through
//! a push notification.

use clap::Parser;
use driftdb_core::{generate_id, Collection, CollectionEventKind, Query, Record, SortOrder};
use driftdb_storage::Changeset;
use driftdb_sync_engine::{
    Connectivity, InMemoryRemote, PushChannel, SyncConfig, SyncManager, SyncStores,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Offline-first sync walkthrough.
#[derive(Parser)]
#[command(name = "widgets")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Keep the pending log and sync cursors in this directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SyncConfig::default();
    let stores = match &cli.data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "persisting sync stores");
            SyncStores::open_dir(dir, &config)?
        }
        None => SyncStores::in_memory(&config),
    };
    let channel = PushChannel::new();
    let remote = Arc::new(InMemoryRemote::with_channel(channel.clone()));
    let connectivity = Connectivity::offline();
    let manager = SyncManager::new(config, remote.clone(), stores, connectivity.clone());
    manager.listen(&channel);

    let widgets: Collection = Collection::in_memory("widgets");
    widgets.on(CollectionEventKind::Inserted, |event| {
        if let Some(record) = event.record() {
            println!("  + {} ({})", record.name, record.id);
        }
    });
    widgets.on(CollectionEventKind::Updated, |event| {
        if let Some(record) = event.record() {
            println!("  ~ {} ({})", record.name, record.id);
        }
    });
    widgets.on(CollectionEventKind::Removed, |event| {
        if let Some(record) = event.record() {
            println!("  - {} ({})", record.name, record.id);
        }
    });
    manager.add_collection("widgets", &widgets);

    println!("offline edits:");
    let gear = widgets
        .insert(json!({"name": "Gear", "teeth": 12}))
        .await
        .ok_or("insert failed")?;
    widgets
        .update(json!({"id": gear.id, "teeth": 14}))
        .await
        .ok_or("update failed")?;
    let scratch = widgets
        .insert(json!({"name": "Scratch", "teeth": 1}))
        .await
        .ok_or("insert failed")?;
    widgets.remove(&scratch.id).await;
    manager.flush().await?;
    println!(
        "pending changes: {}",
        manager.pending_changes("widgets").await?.len()
    );

    println!("reconnecting:");
    connectivity.set_online(true);
    let result = manager.sync("widgets").await?;
    debug!(?result, "sync pass finished");
    println!(
        "synced: pulled {}, pushed {}, conflicts {}",
        result.pulled, result.pushed, result.conflicts
    );
    println!("remote holds {} widget(s)", remote.records("widgets").len());

    println!("another client edits the remote:");
    remote.apply(
        "widgets",
        Changeset::added(
            Record::new(generate_id())
                .with_name("Sprocket")
                .with_field("teeth", json!(30)),
        ),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let big = Query::parse(&json!({"teeth": {"$gte": 14}}))?.sort_by("name", SortOrder::Ascending);
    println!("widgets with 14+ teeth:");
    for widget in widgets.find(&big).await {
        let teeth = widget.field("teeth").cloned().unwrap_or_default();
        println!("  {} ({teeth} teeth)", widget.name);
    }

    if let Some(stats) = manager.stats("widgets") {
        println!(
            "stats: {} pass(es), {} pulled, {} pushed, {} pushed immediately",
            stats.cycles_completed,
            stats.records_pulled,
            stats.records_pushed,
            stats.immediate_pushes
        );
    }
    Ok(())
}
