use std::sync::Arc;
use std::time::SystemTime;

use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use todosync_core::{Provider, ProviderError};

use super::events::ObservedMutation;
use super::guard::SuppressionGuard;
use super::journal::{ChangeJournal, JournalError};
use super::local_store::{LocalStore, StoreError, millis};
use super::reconcile::{KeyOutcome, apply_download, apply_upload, plan};
use super::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("provider could not be opened")]
    ProviderUnavailable,
    #[error("session expired, sign in to the todo service again")]
    SessionExpired,
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("local store error: {0}")]
    Store(#[from] StoreError),
    #[error("provider error: {0}")]
    Provider(ProviderError),
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        if err.is_auth() {
            EngineError::SessionExpired
        } else {
            EngineError::Provider(err)
        }
    }
}

/// State shared by the pass controller and the mutation capture task.
pub struct SyncContext {
    journal: ChangeJournal,
    guard: SuppressionGuard,
}

impl SyncContext {
    pub fn new(journal: ChangeJournal) -> Self {
        Self::with_guard(journal, SuppressionGuard::new())
    }

    pub fn with_guard(journal: ChangeJournal, guard: SuppressionGuard) -> Self {
        Self { journal, guard }
    }

    pub fn journal(&self) -> &ChangeJournal {
        &self.journal
    }

    pub fn guard(&self) -> &SuppressionGuard {
        &self.guard
    }

    pub async fn capture(&self, observed: &ObservedMutation) -> Result<usize, JournalError> {
        self.journal.capture(observed, &self.guard).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedKey {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedKey {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub started_at: i64,
    pub finished_at: i64,
    pub downloaded: Vec<String>,
    pub trashed: Vec<String>,
    pub uploaded: Vec<String>,
    pub deleted_remote: Vec<String>,
    pub settled: Vec<String>,
    pub skipped: Vec<SkippedKey>,
    pub failed: Vec<FailedKey>,
}

impl PassReport {
    fn record(&mut self, key: String, outcome: KeyOutcome) {
        match outcome {
            KeyOutcome::Downloaded => self.downloaded.push(key),
            KeyOutcome::Trashed => self.trashed.push(key),
            KeyOutcome::Uploaded => self.uploaded.push(key),
            KeyOutcome::RemoteDeleted => self.deleted_remote.push(key),
            KeyOutcome::InSync | KeyOutcome::AlreadyAbsent => self.settled.push(key),
            KeyOutcome::Skipped(reason) => self.skipped.push(SkippedKey {
                key,
                reason: reason.to_string(),
            }),
            KeyOutcome::Failed(err) => {
                tracing::warn!(key = %key, error = %err, "sync action failed");
                self.failed.push(FailedKey {
                    key,
                    error: err.to_string(),
                });
            }
        }
    }

    pub fn is_noop(&self) -> bool {
        self.downloaded.is_empty()
            && self.trashed.is_empty()
            && self.uploaded.is_empty()
            && self.deleted_remote.is_empty()
            && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Another pass held the single-flight flag.
    Rejected,
}

pub struct SyncEngine {
    provider: Arc<dyn Provider>,
    store: Arc<dyn LocalStore>,
    context: Arc<SyncContext>,
}

impl SyncEngine {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn LocalStore>,
        context: Arc<SyncContext>,
    ) -> Self {
        Self {
            provider,
            store,
            context,
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.context
    }

    pub async fn run_pass(&self) -> Result<PassOutcome, EngineError> {
        let Some(_permit) = self.context.guard.acquire_pass() else {
            tracing::debug!("sync pass already running, request dropped");
            return Ok(PassOutcome::Rejected);
        };
        if !self.provider.open().await {
            self.provider.close().await;
            return Err(EngineError::ProviderUnavailable);
        }
        let result = self.run_open_pass().await;
        self.provider.close().await;
        result.map(PassOutcome::Completed)
    }

    async fn run_open_pass(&self) -> Result<PassReport, EngineError> {
        let mut report = PassReport {
            started_at: now_millis(),
            ..PassReport::default()
        };
        if !self.provider.is_ready().await {
            return Err(EngineError::SessionExpired);
        }
        self.provider.fetch_group_list().await?;

        let listing = self.store.list_files().await?;
        let records = self.context.journal.list().await?;
        let mut snapshot = Snapshot::build(listing, records);
        let remote = self.provider.fetch_item_list().await?;
        let plan = plan(&snapshot, remote);
        tracing::info!(
            local = snapshot.len(),
            downloads = plan.downloads.len(),
            uploads = plan.uploads.len(),
            settled = plan.settled.len(),
            "sync pass started"
        );

        let mut applied = plan.settled.clone();
        report.settled.extend(plan.settled.iter().cloned());

        let provider = self.provider.as_ref();
        let store = self.store.as_ref();
        let guard = &self.context.guard;
        let downloads = join_all(plan.downloads.iter().map(|remote| async move {
            let outcome = apply_download(remote, provider, store, guard).await;
            (remote.key.clone(), outcome)
        }))
        .await;
        for (key, outcome) in downloads {
            tracing::debug!(key = %key, outcome = ?outcome, "download phase");
            if outcome.is_applied() {
                snapshot.remove(&key);
                applied.push(key.clone());
            }
            report.record(key, outcome);
        }

        let uploads: Vec<_> = plan
            .uploads
            .into_iter()
            .filter(|item| snapshot.get(&item.key).is_some())
            .collect();
        let uploads = join_all(uploads.iter().map(|item| async move {
            let outcome = apply_upload(item, provider, store).await;
            (item.key.clone(), outcome)
        }))
        .await;
        for (key, outcome) in uploads {
            tracing::debug!(key = %key, outcome = ?outcome, "upload phase");
            if outcome.is_applied() {
                applied.push(key.clone());
            }
            report.record(key, outcome);
        }

        let marks: Vec<_> = applied
            .iter()
            .filter_map(|key| snapshot.mark(key).map(|mark| (key.as_str(), mark)))
            .collect();
        self.context.journal.clear_settled(marks).await?;

        report.finished_at = now_millis();
        self.context
            .journal
            .set_last_sync_time(report.finished_at)
            .await?;
        tracing::info!(
            downloaded = report.downloaded.len(),
            trashed = report.trashed.len(),
            uploaded = report.uploaded.len(),
            deleted_remote = report.deleted_remote.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "sync pass finished"
        );
        Ok(report)
    }
}

pub(crate) fn now_millis() -> i64 {
    millis(SystemTime::now())
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
