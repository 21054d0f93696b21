//! In-memory provider and store for engine tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;
use todosync_core::{Group, Item, ItemStatus, Provider, ProviderError, RemoteItem, StatusCode};

use super::local_store::{FileTimes, LocalFile, LocalStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Download(String),
    Upload(String),
    Delete(String),
}

pub struct FakeProvider {
    items: Mutex<BTreeMap<String, RemoteItem>>,
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<String>>,
    pub open_ok: AtomicBool,
    pub ready: AtomicBool,
    pub closed: AtomicUsize,
    pub groups: Vec<Group>,
    /// Status `fetch_item_list` answers with instead of the listing.
    pub list_status: Mutex<Option<u16>>,
    /// When set, `fetch_item_list` signals `listing_entered` and waits on
    /// `listing_release`.
    pub hold_listing: AtomicBool,
    pub listing_entered: Notify,
    pub listing_release: Notify,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            blobs: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            open_ok: AtomicBool::new(true),
            ready: AtomicBool::new(true),
            closed: AtomicUsize::new(0),
            groups: vec![Group {
                id: "g1".into(),
                project_id: "p1".into(),
                name: "notes".into(),
            }],
            list_status: Mutex::new(None),
            hold_listing: AtomicBool::new(false),
            listing_entered: Notify::new(),
            listing_release: Notify::new(),
        }
    }

    pub fn put(&self, key: &str, status: ItemStatus, modified_at: i64, bytes: &[u8]) {
        self.items.lock().unwrap().insert(
            key.to_string(),
            RemoteItem {
                provider_id: format!("todo-{key}"),
                group_id: "g1".into(),
                key: key.to_string(),
                status,
                created_at: modified_at,
                modified_at,
                size: bytes.len() as u64,
                content: None,
            },
        );
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
    }

    pub fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn item(&self, key: &str) -> Option<RemoteItem> {
        self.items.lock().unwrap().get(key).cloned()
    }

    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(key).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, key: &str) -> Result<(), ProviderError> {
        if self.failing.lock().unwrap().contains(key) {
            return Err(ProviderError::Backend(format!("injected failure for {key}")));
        }
        Ok(())
    }

    fn has_group(&self, key: &str) -> bool {
        key.split_once('/')
            .is_some_and(|(group, _)| self.groups.iter().any(|g| g.name == group))
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn open(&self) -> bool {
        self.open_ok.load(Ordering::SeqCst)
    }

    async fn close(&self) -> bool {
        self.closed.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn fetch_group_list(&self) -> Result<Vec<Group>, ProviderError> {
        Ok(self.groups.clone())
    }

    async fn fetch_item_list(&self) -> Result<Vec<RemoteItem>, ProviderError> {
        if self.hold_listing.load(Ordering::SeqCst) {
            self.listing_entered.notify_one();
            self.listing_release.notified().await;
        }
        if let Some(status) = *self.list_status.lock().unwrap() {
            return Err(ProviderError::Api {
                status: StatusCode::from_u16(status).unwrap(),
                body: "session required".into(),
            });
        }
        Ok(self.items.lock().unwrap().values().cloned().collect())
    }

    async fn fetch_item_info(&self, key: &str) -> Result<Option<RemoteItem>, ProviderError> {
        Ok(self.item(key))
    }

    async fn download_file(&self, key: &str) -> Result<Option<Vec<u8>>, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Download(key.to_string()));
        self.check(key)?;
        Ok(self.bytes(key))
    }

    async fn upload_file(&self, item: &Item, bytes: &[u8]) -> Result<bool, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Upload(item.key.clone()));
        self.check(&item.key)?;
        if !self.has_group(&item.key) {
            return Ok(false);
        }
        self.put(&item.key, ItemStatus::Unchanged, item.modified_at, bytes);
        Ok(true)
    }

    async fn delete_file(&self, item: &Item) -> Result<bool, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Delete(item.key.clone()));
        self.check(&item.key)?;
        if !self.has_group(&item.key) {
            return Ok(false);
        }
        if let Some(existing) = self.items.lock().unwrap().get_mut(&item.key) {
            existing.status = ItemStatus::Deleted;
            existing.modified_at = item.modified_at;
        }
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, (LocalFile, Vec<u8>)>>,
    trashed: Mutex<Vec<String>>,
    folders: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, modified_at: i64, bytes: &[u8]) {
        let file = LocalFile {
            key: key.to_string(),
            created_at: modified_at,
            modified_at,
            size: bytes.len() as u64,
        };
        self.files
            .lock()
            .unwrap()
            .insert(key.to_string(), (file, bytes.to_vec()));
    }

    pub fn remove(&self, key: &str) {
        self.files.lock().unwrap().remove(key);
    }

    pub fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn file(&self, key: &str) -> Option<(LocalFile, Vec<u8>)> {
        self.files.lock().unwrap().get(key).cloned()
    }

    pub fn trashed(&self) -> Vec<String> {
        self.trashed.lock().unwrap().clone()
    }

    pub fn has_folder(&self, key: &str) -> bool {
        self.folders.lock().unwrap().contains(key)
    }

    fn check(&self, key: &str) -> Result<(), StoreError> {
        if self.failing.lock().unwrap().contains(key) {
            return Err(StoreError::Io(std::io::Error::other("injected failure")));
        }
        Ok(())
    }

    fn store(&self, key: &str, data: &[u8], times: FileTimes) {
        let file = LocalFile {
            key: key.to_string(),
            created_at: times.created_at,
            modified_at: times.modified_at,
            size: data.len() as u64,
        };
        self.files
            .lock()
            .unwrap()
            .insert(key.to_string(), (file, data.to_vec()));
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn list_files(&self) -> Result<Vec<LocalFile>, StoreError> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .values()
            .map(|(file, _)| file.clone())
            .collect())
    }

    async fn stat(&self, key: &str) -> Result<Option<LocalFile>, StoreError> {
        Ok(self.file(key).map(|(file, _)| file))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.file(key)
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &str, data: &[u8], times: FileTimes) -> Result<(), StoreError> {
        self.check(key)?;
        if self.file(key).is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        self.store(key, data, times);
        Ok(())
    }

    async fn create(&self, key: &str, data: &[u8], times: FileTimes) -> Result<(), StoreError> {
        self.check(key)?;
        if self.file(key).is_some() {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        self.store(key, data, times);
        Ok(())
    }

    async fn trash(&self, key: &str) -> Result<(), StoreError> {
        self.check(key)?;
        if self.files.lock().unwrap().remove(key).is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        self.trashed.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn create_folder(&self, key: &str) -> Result<(), StoreError> {
        if !self.folders.lock().unwrap().insert(key.to_string()) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        Ok(())
    }
}
