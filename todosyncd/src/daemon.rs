use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::Context;
use todosync_core::{TodoClient, TodoClientConfig};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::sync::engine::{EngineError, PassOutcome, SyncContext, SyncEngine, now_millis};
use crate::sync::events::ObservedMutation;
use crate::sync::journal::ChangeJournal;
use crate::sync::local_store::{FsLocalStore, TrashMode};
use crate::sync::local_watcher::start_notify_watcher;
use crate::sync::schedule::{SyncSchedule, TriggerReason};

const DEFAULT_VAULT_DIR_NAME: &str = "Notes";
const DEFAULT_TICK_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub vault_root: PathBuf,
    pub provider: TodoClientConfig,
    pub schedule: SyncSchedule,
    pub tick_interval: Duration,
    pub enable_local_watcher: bool,
    pub trash_mode: TrashMode,
    /// `None` uses the XDG data directory.
    pub db_path: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let vault_root = std::env::var("TODOSYNC_VAULT_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_VAULT_DIR_NAME));
        let defaults = TodoClientConfig::default();
        let provider = TodoClientConfig {
            base_url: std::env::var("TODOSYNC_HOST").unwrap_or(defaults.base_url),
            session: std::env::var("TODOSYNC_SESSION").context("TODOSYNC_SESSION is not set")?,
            group_prefix: std::env::var("TODOSYNC_GROUP_PREFIX").unwrap_or(defaults.group_prefix),
            timeout: defaults.timeout,
        };
        let schedule = SyncSchedule {
            sync_interval: Duration::from_secs(read_u64_env("TODOSYNC_SYNC_INTERVAL_SECS", 0)),
            on_save_delay: Duration::from_secs(read_u64_env("TODOSYNC_ON_SAVE_DELAY_SECS", 0)),
        };
        let tick_interval =
            Duration::from_secs(read_u64_env("TODOSYNC_TICK_SECS", DEFAULT_TICK_SECS).max(1));
        let enable_local_watcher = read_bool_env("TODOSYNC_ENABLE_LOCAL_WATCHER", true);
        let trash_mode = match std::env::var("TODOSYNC_TRASH") {
            Ok(value) => parse_trash_mode(&value)?,
            Err(_) => TrashMode::System,
        };
        let db_path = std::env::var("TODOSYNC_DB")
            .ok()
            .map(|value| expand_with_home(&value, &home));

        Ok(Self {
            vault_root,
            provider,
            schedule,
            tick_interval,
            enable_local_watcher,
            trash_mode,
            db_path,
        })
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<SyncEngine>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.vault_root)
            .await
            .with_context(|| format!("failed to create vault at {:?}", config.vault_root))?;

        let journal = match &config.db_path {
            Some(path) => ChangeJournal::open_at(path).await,
            None => ChangeJournal::new_default().await,
        }
        .context("failed to initialize change journal")?;
        let client = TodoClient::new(config.provider.clone()).context("invalid provider config")?;
        let store = FsLocalStore::new(config.vault_root.clone(), config.trash_mode);
        let engine = Arc::new(SyncEngine::new(
            Arc::new(client),
            Arc::new(store),
            Arc::new(SyncContext::new(journal)),
        ));

        Ok(Self { config, engine })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Runs one pass; a session or provider failure becomes an error.
    pub async fn run_once(&self) -> anyhow::Result<PassOutcome> {
        self.engine
            .run_pass()
            .await
            .map_err(|err| anyhow::Error::new(err).context(pass_failure_hint(&self.config)))
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            vault = %self.config.vault_root.display(),
            host = %self.config.provider.base_url,
            local_watcher = self.config.enable_local_watcher,
            sync_interval_secs = self.config.schedule.sync_interval.as_secs(),
            on_save_delay_secs = self.config.schedule.on_save_delay.as_secs(),
            "todosyncd started"
        );
        if !self.config.schedule.is_enabled() {
            tracing::warn!("no sync trigger configured, local changes are only journaled");
        }

        let (watcher, local_rx): (
            Option<notify::RecommendedWatcher>,
            Option<mpsc::UnboundedReceiver<ObservedMutation>>,
        ) = if self.config.enable_local_watcher {
            match start_notify_watcher(&self.config.vault_root) {
                Ok((watcher, rx)) => (Some(watcher), Some(rx)),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to start local watcher");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let last_change = Arc::new(AtomicI64::new(0));
        let capture_handle = local_rx.map(|mut rx| {
            let context = Arc::clone(self.engine.context());
            let last_change = Arc::clone(&last_change);
            tokio::spawn(async move {
                while let Some(observed) = rx.recv().await {
                    match context.capture(&observed).await {
                        Ok(0) => {}
                        Ok(_) => last_change.store(now_millis(), Ordering::SeqCst),
                        Err(err) => tracing::warn!(error = %err, "failed to journal local change"),
                    }
                }
            })
        });

        let engine = Arc::clone(&self.engine);
        let schedule = self.config.schedule;
        let tick_interval = self.config.tick_interval;
        let last_change_tick = Arc::clone(&last_change);
        let schedule_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_attempt = 0i64;
            loop {
                ticker.tick().await;
                if !schedule.is_enabled() {
                    continue;
                }
                let last_sync = match engine.context().journal().last_sync_time().await {
                    Ok(value) => value.unwrap_or(0),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to read last sync time");
                        continue;
                    }
                };
                let pending = Some(last_change_tick.load(Ordering::SeqCst)).filter(|at| *at > 0);
                let now = now_millis();
                let Some(reason) = schedule.due(now, last_sync.max(last_attempt), pending) else {
                    continue;
                };
                last_change_tick.store(0, Ordering::SeqCst);
                last_attempt = now;
                run_scheduled_pass(&engine, reason).await;
            }
        });

        let _watcher = watcher;
        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        tracing::info!("shutdown requested");

        schedule_handle.abort();
        if let Some(handle) = capture_handle {
            handle.abort();
        }

        Ok(())
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
