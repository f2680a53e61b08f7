//! Command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use stowaway_registry::StorageRegistry;
use stowaway_storage::{LocalAdapter, StorageAdapter};
use stowaway_transfer::{
    ChunkingManager, Direction, JsonFileStore, MaintenanceSweeper, SpeedCalculator, StateStore,
    TickStatus, UploadInfo,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CliConfig;

/// Parses a `FROM=TO` argument.
pub fn parse_item(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() => {
            Ok((from.to_string(), to.to_string()))
        }
        _ => Err(format!("expected FROM=TO, got {arg:?}")),
    }
}

fn resolve_storage<'a>(
    registry: &'a StorageRegistry,
    storage: Option<&'a str>,
) -> anyhow::Result<&'a str> {
    match storage {
        Some(name) => Ok(name),
        None => registry
            .default_name()
            .context("no --storage given and no default_storage configured"),
    }
}

/// Ticks a transfer until it finishes, fails or Ctrl-C is pressed.
///
/// Every tick gets a fresh [`ChunkingManager`] that resumes from the saved
/// checkpoint.
pub async fn transfer(
    config: &CliConfig,
    direction: Direction,
    storage: Option<String>,
    id: String,
    items: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let registry = config.registry()?;
    let name = resolve_storage(&registry, storage.as_deref())?.to_string();
    let remote: Arc<dyn StorageAdapter> = Arc::from(registry.build(&name)?);
    let local: Arc<dyn StorageAdapter> = Arc::new(LocalAdapter::new("/"));
    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(&config.state_dir));
    let chunk_config = config.transfer.chunk_config();

    let info_path = info_path(&config.state_dir, &id);
    let mut record = load_info(&info_path)
        .await?
        .filter(|r| r.storage_id == name)
        .unwrap_or_else(|| UploadInfo::new(&name, direction == Direction::Download));
    record.start();
    save_info(&info_path, &record).await?;

    let sweeper = (direction == Direction::Upload).then(|| {
        let sweeper = MaintenanceSweeper::new(
            vec![Arc::clone(&remote)],
            config.stale_session_age(),
            config.purge_interval(),
        );
        sweeper.start();
        sweeper
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current tick");
            ctrl_c.cancel();
        }
    });

    info!(transfer = %id, storage = %name, ?direction, items = items.len(), "transfer started");
    let speed = SpeedCalculator::default();
    speed.add_sample(0);

    let outcome = loop {
        if cancel.is_cancelled() {
            record.cancel();
            break Ok(());
        }

        let mut manager = ChunkingManager::new(
            id.clone(),
            direction,
            Arc::clone(&remote),
            Arc::clone(&local),
            items.clone(),
            Arc::clone(&store),
            chunk_config,
        );
        let report = manager.tick().await;
        let progress = manager.progress_percent();
        record.record_tick(&report, manager.session(), progress);
        save_info(&info_path, &record).await?;

        speed.add_sample(report.bytes_this_tick);
        let iterator = manager.iterator();
        let remaining = iterator
            .total_size()
            .map(|total| total.saturating_sub(iterator.cumulative_bytes()));
        info!(
            transfer = %id,
            progress = %format!("{progress:.1}%"),
            bytes = report.bytes_this_tick,
            bytes_per_sec = speed.bytes_per_second() as u64,
            eta_secs = remaining.and_then(|r| speed.eta(r)).map(|d| d.as_secs()),
            "tick"
        );

        match report.status {
            TickStatus::Continue => {}
            TickStatus::Done => {
                if let Err(e) = store.remove(&id).await {
                    warn!(transfer = %id, error = %e, "failed to remove checkpoint");
                }
                info!(transfer = %id, "transfer complete");
                break Ok(());
            }
            TickStatus::Failed => {
                break Err(anyhow::anyhow!("transfer {id} failed: {}", report.message));
            }
        }
    };

    if let Some(sweeper) = sweeper {
        sweeper.stop();
    }
    save_info(&info_path, &record).await?;
    outcome
}

/// Runs one purge pass over the named storage, or every storage.
pub async fn purge(config: &CliConfig, storage: Option<&str>) -> anyhow::Result<()> {
    let registry = config.registry()?;
    let names: Vec<String> = match storage {
        Some(name) => vec![name.to_string()],
        None => registry.names().map(str::to_string).collect(),
    };
    if names.is_empty() {
        bail!("no storages configured");
    }

    let mut adapters: Vec<Arc<dyn StorageAdapter>> = Vec::with_capacity(names.len());
    for name in &names {
        adapters.push(Arc::from(registry.build(name)?));
    }
    let sweeper = MaintenanceSweeper::new(
        adapters,
        config.stale_session_age(),
        config.purge_interval(),
    );
    let purged = sweeper.sweep_once().await;
    println!("purged {purged} stale upload session(s)");
    Ok(())
}

/// Prints the checkpoint and the run record of a transfer.
pub async fn status(config: &CliConfig, id: &str) -> anyhow::Result<()> {
    let store = JsonFileStore::new(&config.state_dir);
    let record = load_info(&info_path(&config.state_dir, id)).await?;
    let state = store.load(id).await?;

    if record.is_none() && state.is_none() {
        bail!("no transfer with id {id}");
    }
    if let Some(record) = &record {
        println!("storage:  {}", record.storage_id);
        println!("status:   {:?}", record.status);
        println!("progress: {:.1}%", record.progress_percent);
        if let Some(started) = record.started_at {
            println!("started:  {started}");
        }
        if let Some(stopped) = record.stopped_at {
            println!("stopped:  {stopped}");
        }
        if let Some(error) = &record.error {
            println!("error:    {error}");
        }
    }
    if let Some(state) = &state {
        println!(
            "position: item {} offset {}",
            state.position.index, state.position.offset
        );
        if let Some(total) = state.total_size {
            println!("total:    {total} bytes");
        }
        println!("sessions: {}", state.session.len());
    }
    Ok(())
}

fn info_path(state_dir: &Path, id: &str) -> PathBuf {
    state_dir.join("runs").join(format!("{id}.json"))
}

async fn load_info(path: &Path) -> anyhow::Result<Option<UploadInfo>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).with_context(|| {
            format!("corrupt run record {}", path.display())
        })?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn save_info(path: &Path, record: &UploadInfo) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_string_pretty(record)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
