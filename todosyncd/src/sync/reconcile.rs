use std::collections::HashSet;
use std::fmt;

use thiserror::Error;
use todosync_core::{Item, Provider, ProviderError, RemoteItem};

use super::guard::{Echo, SuppressionGuard};
use super::local_store::{FileTimes, LocalStore, StoreError};
use super::paths::parent_key;
use super::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("remote operation failed for {key}: {source}")]
    RemoteOperationFailed { key: String, source: ProviderError },
    #[error("local write failed for {key}: {source}")]
    LocalWriteFailed { key: String, source: StoreError },
    #[error("local read failed for {key}: {source}")]
    LocalReadFailed { key: String, source: StoreError },
}

/// Work derived from one snapshot and one remote listing.
#[derive(Debug, Default)]
pub struct Plan {
    pub downloads: Vec<RemoteItem>,
    pub uploads: Vec<Item>,
    /// Journaled keys consumed by the remote with nothing left to do locally.
    pub settled: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty() && self.uploads.is_empty() && self.settled.is_empty()
    }
}

/// Splits keys between remote-wins downloads and the local upload pool.
///
/// Equal timestamps favor the remote. A remote entry is only materialized
/// when the live file is older than it, so a converged pair plans nothing.
pub fn plan(snapshot: &Snapshot, remote: Vec<RemoteItem>) -> Plan {
    let mut consumed = HashSet::new();
    let mut out = Plan::default();

    for item in remote {
        let key = item.key.as_str();
        let Some(local) = snapshot.get(key) else {
            if !item.is_deleted() {
                out.downloads.push(item);
            }
            continue;
        };
        if local.modified_at > item.modified_at {
            continue;
        }
        if !consumed.insert(key.to_string()) {
            continue;
        }

        let live_is_fresh = snapshot
            .live(key)
            .is_some_and(|live| live.modified_at >= item.modified_at);
        if live_is_fresh || (item.is_deleted() && snapshot.live(key).is_none()) {
            if snapshot.mark(key).is_some() {
                out.settled.push(item.key);
            }
        } else {
            out.downloads.push(item);
        }
    }

    out.uploads = snapshot
        .items()
        .filter(|item| !consumed.contains(&item.key))
        .cloned()
        .collect();
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    LocalFileMissing,
    ContainerUnresolved,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LocalFileMissing => f.write_str("local file missing"),
            SkipReason::ContainerUnresolved => f.write_str("no remote group for key"),
        }
    }
}

#[derive(Debug)]
pub enum KeyOutcome {
    Downloaded,
    Trashed,
    InSync,
    AlreadyAbsent,
    Uploaded,
    RemoteDeleted,
    Skipped(SkipReason),
    Failed(ApplyError),
}

impl KeyOutcome {
    /// The key's effect is confirmed and its journal record may go.
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            KeyOutcome::Downloaded
                | KeyOutcome::Trashed
                | KeyOutcome::InSync
                | KeyOutcome::AlreadyAbsent
                | KeyOutcome::Uploaded
                | KeyOutcome::RemoteDeleted
        )
    }
}

pub async fn apply_download(
    remote: &RemoteItem,
    provider: &dyn Provider,
    store: &dyn LocalStore,
    guard: &SuppressionGuard,
) -> KeyOutcome {
    let key = remote.key.as_str();
    let live = match store.stat(key).await {
        Ok(live) => live,
        Err(source) => return read_failed(key, source),
    };
    if live
        .as_ref()
        .is_some_and(|live| live.modified_at >= remote.modified_at)
    {
        return KeyOutcome::InSync;
    }

    if remote.is_deleted() {
        if live.is_none() {
            return KeyOutcome::AlreadyAbsent;
        }
        let write = guard.suppress(key);
        write.expect(Echo::Removed);
        return match store.trash(key).await {
            Ok(()) => KeyOutcome::Trashed,
            Err(StoreError::NotFound(_)) => KeyOutcome::AlreadyAbsent,
            Err(source) => write_failed(key, source),
        };
    }

    let content = match remote.content.clone() {
        Some(bytes) => Some(bytes),
        None => match provider.download_file(key).await {
            Ok(content) => content,
            Err(source) => {
                return KeyOutcome::Failed(ApplyError::RemoteOperationFailed {
                    key: key.to_string(),
                    source,
                });
            }
        },
    };
    let times = FileTimes {
        created_at: remote.created_at,
        modified_at: remote.modified_at,
    };

    if live.is_some() {
        let Some(bytes) = content else {
            return KeyOutcome::InSync;
        };
        let write = guard.suppress(key);
        write.expect(Echo::Modified(remote.modified_at));
        return match store.write(key, &bytes, times).await {
            Ok(()) => KeyOutcome::Downloaded,
            Err(source) => write_failed(key, source),
        };
    }

    let write = guard.suppress(key);
    write.expect(Echo::Modified(remote.modified_at));
    if let Some(parent) = parent_key(key) {
        match store.create_folder(parent).await {
            Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
            Err(source) => return write_failed(key, source),
        }
    }
    match store
        .create(key, content.as_deref().unwrap_or_default(), times)
        .await
    {
        Ok(()) => KeyOutcome::Downloaded,
        Err(source) => write_failed(key, source),
    }
}

pub async fn apply_upload(
    item: &Item,
    provider: &dyn Provider,
    store: &dyn LocalStore,
) -> KeyOutcome {
    let key = item.key.as_str();
    if item.status.is_deleted() {
        return match provider.delete_file(item).await {
            Ok(true) => KeyOutcome::RemoteDeleted,
            Ok(false) => KeyOutcome::Skipped(SkipReason::ContainerUnresolved),
            Err(source) => KeyOutcome::Failed(ApplyError::RemoteOperationFailed {
                key: key.to_string(),
                source,
            }),
        };
    }

    let live = match store.stat(key).await {
        Ok(Some(live)) => live,
        Ok(None) => return KeyOutcome::Skipped(SkipReason::LocalFileMissing),
        Err(source) => return read_failed(key, source),
    };
    let bytes = match store.read(key).await {
        Ok(bytes) => bytes,
        Err(StoreError::NotFound(_)) => return KeyOutcome::Skipped(SkipReason::LocalFileMissing),
        Err(source) => return read_failed(key, source),
    };

    match provider.upload_file(&live.to_item(item.status), &bytes).await {
        Ok(true) => KeyOutcome::Uploaded,
        Ok(false) => KeyOutcome::Skipped(SkipReason::ContainerUnresolved),
        Err(source) => KeyOutcome::Failed(ApplyError::RemoteOperationFailed {
            key: key.to_string(),
            source,
        }),
    }
}

fn read_failed(key: &str, source: StoreError) -> KeyOutcome {
    KeyOutcome::Failed(ApplyError::LocalReadFailed {
        key: key.to_string(),
        source,
    })
}

fn write_failed(key: &str, source: StoreError) -> KeyOutcome {
    KeyOutcome::Failed(ApplyError::LocalWriteFailed {
        key: key.to_string(),
        source,
    })
}
