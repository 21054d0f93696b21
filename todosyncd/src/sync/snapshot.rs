use std::collections::{BTreeMap, HashMap};

use todosync_core::{Item, ItemStatus};

use super::journal::JournalRecord;
use super::local_store::LocalFile;

/// Local view for one pass: the listing with every pending journal record on top.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    items: BTreeMap<String, Item>,
    live: HashMap<String, LocalFile>,
    marks: HashMap<String, i64>,
}

impl Snapshot {
    pub fn build(listing: Vec<LocalFile>, records: Vec<JournalRecord>) -> Self {
        let mut items = BTreeMap::new();
        let mut live = HashMap::with_capacity(listing.len());
        for file in listing {
            items.insert(file.key.clone(), file.to_item(ItemStatus::Unchanged));
            live.insert(file.key.clone(), file);
        }

        let mut marks = HashMap::with_capacity(records.len());
        for record in records {
            marks.insert(record.item.key.clone(), record.revision);
            items.insert(record.item.key.clone(), record.item);
        }

        Self { items, live, marks }
    }

    pub fn get(&self, key: &str) -> Option<&Item> {
        self.items.get(key)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// The file as listed at build time, ignoring journal overlays.
    pub fn live(&self, key: &str) -> Option<&LocalFile> {
        self.live.get(key)
    }

    /// Journal revision read for `key`, if it had a pending record.
    pub fn mark(&self, key: &str) -> Option<i64> {
        self.marks.get(key).copied()
    }

    pub fn remove(&mut self, key: &str) -> Option<Item> {
        self.items.remove(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
