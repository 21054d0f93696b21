use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::events::{MutationEvent, ObservedMutation};
use super::local_store::{LocalFile, millis};
use super::paths::{is_hidden_key, key_for_path};

pub fn start_notify_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<ObservedMutation>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = root.to_path_buf();
    let watch_root = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let observed_at = Instant::now();
        match res {
            Ok(event) => {
                for mutation in map_event(&watch_root, event) {
                    let _ = tx.send(ObservedMutation {
                        event: mutation,
                        observed_at,
                    });
                }
            }
            Err(err) => tracing::warn!(error = %err, "file watcher error"),
        }
    })?;
    watcher.watch(root.as_path(), RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

fn map_event(root: &Path, event: Event) -> Vec<MutationEvent> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(mode)) => map_rename(root, mode, &event.paths),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter_map(|path| stat_file(root, path))
            .map(MutationEvent::Created)
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter_map(|path| stat_file(root, path))
            .map(MutationEvent::Updated)
            .collect(),
        EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter_map(|path| deleted(root, path))
            .collect(),
        _ => Vec::new(),
    }
}

fn map_rename(root: &Path, mode: RenameMode, paths: &[PathBuf]) -> Vec<MutationEvent> {
    match (mode, paths) {
        (RenameMode::Both, [from, to, ..]) => {
            let old = visible_key(root, from);
            match (old, stat_file(root, to)) {
                (Some(from), Some(to)) => vec![MutationEvent::Renamed { from, to }],
                (None, Some(to)) => vec![MutationEvent::Created(to)],
                (Some(_), None) => deleted(root, from).into_iter().collect(),
                (None, None) => Vec::new(),
            }
        }
        (RenameMode::From, [from, ..]) => deleted(root, from).into_iter().collect(),
        (RenameMode::To, [to, ..]) => stat_file(root, to)
            .map(MutationEvent::Created)
            .into_iter()
            .collect(),
        (_, [path, ..]) => match stat_file(root, path) {
            Some(file) => vec![MutationEvent::Created(file)],
            None if !path.exists() => deleted(root, path).into_iter().collect(),
            None => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn visible_key(root: &Path, path: &Path) -> Option<String> {
    key_for_path(root, path).filter(|key| !is_hidden_key(key))
}

/// Regular, visible file under `root`; directories are not synced.
fn stat_file(root: &Path, path: &Path) -> Option<LocalFile> {
    let key = visible_key(root, path)?;
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    let modified_at = metadata.modified().map(millis).unwrap_or(0);
    Some(LocalFile {
        key,
        created_at: metadata.created().map(millis).unwrap_or(modified_at),
        modified_at,
        size: metadata.len(),
    })
}

fn deleted(root: &Path, path: &Path) -> Option<MutationEvent> {
    Some(MutationEvent::Deleted {
        key: visible_key(root, path)?,
        deleted_at: millis(SystemTime::now()),
    })
}
