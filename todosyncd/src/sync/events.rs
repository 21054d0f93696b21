use std::time::Instant;

use todosync_core::{Item, ItemStatus};

use super::local_store::LocalFile;

/// A mutation the local store reported for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    Created(LocalFile),
    Updated(LocalFile),
    Deleted { key: String, deleted_at: i64 },
    Renamed { from: String, to: LocalFile },
}

impl MutationEvent {
    /// Journal records this mutation expands to. A rename becomes a deletion of
    /// the old key stamped `now` plus a creation of the new one.
    pub fn to_items(&self, now: i64) -> Vec<Item> {
        match self {
            MutationEvent::Created(file) => vec![file.to_item(ItemStatus::Created)],
            MutationEvent::Updated(file) => vec![file.to_item(ItemStatus::Updated)],
            MutationEvent::Deleted { key, deleted_at } => {
                vec![Item::new(key.clone(), ItemStatus::Deleted, *deleted_at)]
            }
            MutationEvent::Renamed { from, to } => {
                let mut removed = to.to_item(ItemStatus::Deleted);
                removed.key = from.clone();
                removed.modified_at = now;
                vec![removed, to.to_item(ItemStatus::Created)]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedMutation {
    pub event: MutationEvent,
    pub observed_at: Instant,
}

impl ObservedMutation {
    pub fn now(event: MutationEvent) -> Self {
        Self {
            event,
            observed_at: Instant::now(),
        }
    }
}
