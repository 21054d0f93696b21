use std::sync::atomic::Ordering;
use std::time::Instant;

use sqlx::SqlitePool;
use todosync_core::{Item, ItemStatus};

use super::*;
use crate::sync::events::MutationEvent;
use crate::sync::fakes::{Call, FakeProvider, MemoryStore};
use crate::sync::local_store::LocalFile;

struct Harness {
    provider: Arc<FakeProvider>,
    store: Arc<MemoryStore>,
    engine: SyncEngine,
}

impl Harness {
    async fn new() -> Self {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let journal = ChangeJournal::from_pool(pool);
        journal.init().await.unwrap();
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(
            provider.clone(),
            store.clone(),
            Arc::new(SyncContext::new(journal)),
        );
        Self {
            provider,
            store,
            engine,
        }
    }

    fn journal(&self) -> &ChangeJournal {
        self.engine.context().journal()
    }

    async fn record(&self, key: &str, status: ItemStatus, modified_at: i64) {
        self.journal()
            .record(&Item::new(key, status, modified_at))
            .await
            .unwrap();
    }

    async fn pass(&self) -> PassReport {
        match self.engine.run_pass().await.unwrap() {
            PassOutcome::Completed(report) => report,
            PassOutcome::Rejected => panic!("pass unexpectedly rejected"),
        }
    }

    async fn journal_keys(&self) -> Vec<String> {
        self.journal()
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.item.key)
            .collect()
    }
}

#[tokio::test]
async fn new_local_file_is_uploaded_and_journal_cleared() {
    let h = Harness::new().await;
    h.store.put("notes/a.md", 100, b"hello");
    h.record("notes/a.md", ItemStatus::Created, 100).await;

    let report = h.pass().await;

    assert_eq!(report.uploaded, vec!["notes/a.md"]);
    assert_eq!(h.provider.bytes("notes/a.md").as_deref(), Some(&b"hello"[..]));
    assert_eq!(h.provider.item("notes/a.md").unwrap().modified_at, 100);
    assert!(h.journal_keys().await.is_empty());
}

#[tokio::test]
async fn newer_remote_deletion_moves_local_file_to_trash() {
    let h = Harness::new().await;
    h.store.put("notes/b.md", 100, b"old");
    h.provider.put("notes/b.md", ItemStatus::Deleted, 200, b"");

    let report = h.pass().await;

    assert_eq!(report.trashed, vec!["notes/b.md"]);
    assert_eq!(h.store.trashed(), vec!["notes/b.md"]);
    assert!(h.store.file("notes/b.md").is_none());
}

#[tokio::test]
async fn second_pass_over_converged_state_does_nothing() {
    let h = Harness::new().await;
    h.provider.put("notes/a.md", ItemStatus::Unchanged, 5, b"remote");
    h.store.put("notes/c.md", 7, b"local");

    let first = h.pass().await;
    assert_eq!(first.downloaded, vec!["notes/a.md"]);
    assert_eq!(first.uploaded, vec!["notes/c.md"]);
    let calls = h.provider.calls().len();

    let second = h.pass().await;

    assert!(second.is_noop());
    assert_eq!(h.provider.calls().len(), calls);
    let (file, bytes) = h.store.file("notes/a.md").unwrap();
    assert_eq!(file.modified_at, 5);
    assert_eq!(bytes, b"remote");
}

#[tokio::test]
async fn equal_timestamps_favor_remote() {
    let h = Harness::new().await;
    h.store.put("notes/a.md", 5, b"local");
    h.record("notes/a.md", ItemStatus::Updated, 5).await;
    h.provider.put("notes/a.md", ItemStatus::Unchanged, 5, b"remote");
    h.record("notes/gone.md", ItemStatus::Deleted, 8).await;
    h.provider.put("notes/gone.md", ItemStatus::Unchanged, 8, b"back");

    let report = h.pass().await;

    assert!(report.uploaded.is_empty());
    assert!(report.deleted_remote.is_empty());
    assert!(
        !h.provider
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Upload(_) | Call::Delete(_)))
    );
    assert_eq!(report.downloaded, vec!["notes/gone.md"]);
    assert_eq!(h.store.file("notes/gone.md").unwrap().1, b"back");
    assert!(h.journal_keys().await.is_empty());
}

#[tokio::test]
async fn newer_local_file_is_uploaded_over_remote() {
    let h = Harness::new().await;
    h.store.put("notes/a.md", 9, b"fresh");
    h.provider.put("notes/a.md", ItemStatus::Unchanged, 4, b"stale");

    let report = h.pass().await;

    assert_eq!(report.uploaded, vec!["notes/a.md"]);
    assert!(report.downloaded.is_empty());
    assert_eq!(h.provider.bytes("notes/a.md").as_deref(), Some(&b"fresh"[..]));
    assert_eq!(h.store.file("notes/a.md").unwrap().1, b"fresh");
}

#[tokio::test]
async fn newer_local_deletion_deletes_remote() {
    let h = Harness::new().await;
    h.record("notes/a.md", ItemStatus::Deleted, 10).await;
    h.provider.put("notes/a.md", ItemStatus::Unchanged, 5, b"remote");

    let report = h.pass().await;

    assert_eq!(report.deleted_remote, vec!["notes/a.md"]);
    assert!(h.provider.item("notes/a.md").unwrap().is_deleted());
    assert!(h.store.file("notes/a.md").is_none());
    assert!(h.journal_keys().await.is_empty());
}

#[tokio::test]
async fn journal_overlay_decides_over_listing() {
    let h = Harness::new().await;
    h.store.put("notes/a.md", 5, b"still here");
    h.record("notes/a.md", ItemStatus::Deleted, 9).await;
    h.provider.put("notes/a.md", ItemStatus::Unchanged, 7, b"remote");

    let report = h.pass().await;

    assert_eq!(report.deleted_remote, vec!["notes/a.md"]);
    assert_eq!(h.provider.calls(), vec![Call::Delete("notes/a.md".into())]);
    assert!(h.store.trashed().is_empty());
}

#[tokio::test]
async fn downloads_are_invisible_to_capture() {
    let h = Harness::new().await;
    h.provider.put("notes/sub/c.md", ItemStatus::Unchanged, 50, b"remote");

    let report = h.pass().await;
    assert_eq!(report.downloaded, vec!["notes/sub/c.md"]);
    assert!(h.store.has_folder("notes/sub"));

    let echo = ObservedMutation {
        event: MutationEvent::Created(LocalFile {
            key: "notes/sub/c.md".into(),
            created_at: 50,
            modified_at: 50,
            size: 6,
        }),
        observed_at: Instant::now(),
    };
    let written = h.engine.context().capture(&echo).await.unwrap();

    assert_eq!(written, 0);
    assert!(h.journal_keys().await.is_empty());
}

#[tokio::test]
async fn concurrent_pass_is_rejected() {
    let h = Harness::new().await;
    let permit = h.engine.context().guard().acquire_pass().unwrap();

    let outcome = h.engine.run_pass().await.unwrap();

    assert_eq!(outcome, PassOutcome::Rejected);
    assert_eq!(h.provider.closed.load(Ordering::SeqCst), 0);
    drop(permit);
    assert!(matches!(
        h.engine.run_pass().await.unwrap(),
        PassOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn overlapping_passes_run_once() {
    let h = Harness::new().await;
    h.provider.put("notes/a.md", ItemStatus::Unchanged, 5, b"remote");
    h.provider.hold_listing.store(true, Ordering::SeqCst);

    let first = h.engine.run_pass();
    let second = async {
        h.provider.listing_entered.notified().await;
        let outcome = h.engine.run_pass().await;
        h.provider.listing_release.notify_one();
        outcome
    };
    let (first, second) = tokio::join!(first, second);
    let outcomes = [first.unwrap(), second.unwrap()];

    let completed = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, PassOutcome::Completed(_)))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, PassOutcome::Rejected))
        .count();
    assert_eq!((completed, rejected), (1, 1));
    assert_eq!(h.provider.closed.load(Ordering::SeqCst), 1);
    assert_eq!(h.provider.calls(), vec![Call::Download("notes/a.md".into())]);
    assert!(!h.engine.context().guard().is_running());
}

#[tokio::test]
async fn session_expiring_mid_pass_is_reported_as_expired() {
    let h = Harness::new().await;
    h.store.put("notes/a.md", 9, b"fresh");
    h.record("notes/a.md", ItemStatus::Updated, 9).await;
    *h.provider.list_status.lock().unwrap() = Some(401);

    let err = h.engine.run_pass().await.unwrap_err();

    assert!(matches!(err, EngineError::SessionExpired));
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.provider.closed.load(Ordering::SeqCst), 1);
    assert_eq!(h.journal_keys().await, vec!["notes/a.md"]);
    assert!(!h.engine.context().guard().is_running());
}

#[tokio::test]
async fn server_error_while_listing_stays_a_provider_error() {
    let h = Harness::new().await;
    *h.provider.list_status.lock().unwrap() = Some(503);

    let err = h.engine.run_pass().await.unwrap_err();

    assert!(matches!(err, EngineError::Provider(_)));
}

#[tokio::test]
async fn expired_session_aborts_before_any_mutation() {
    let h = Harness::new().await;
    h.store.put("notes/a.md", 9, b"fresh");
    h.record("notes/a.md", ItemStatus::Updated, 9).await;
    h.provider.ready.store(false, Ordering::SeqCst);

    let err = h.engine.run_pass().await.unwrap_err();

    assert!(matches!(err, EngineError::SessionExpired));
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.provider.closed.load(Ordering::SeqCst), 1);
    assert_eq!(h.journal_keys().await, vec!["notes/a.md"]);
    assert!(!h.engine.context().guard().is_running());
    assert_eq!(h.journal().last_sync_time().await.unwrap(), None);
}

#[tokio::test]
async fn unavailable_provider_is_reported() {
    let h = Harness::new().await;
    h.provider.open_ok.store(false, Ordering::SeqCst);

    let err = h.engine.run_pass().await.unwrap_err();

    assert!(matches!(err, EngineError::ProviderUnavailable));
    assert_eq!(h.provider.closed.load(Ordering::SeqCst), 1);
    assert!(!h.engine.context().guard().is_running());
}

#[tokio::test]
async fn failed_key_keeps_its_journal_entry() {
    let h = Harness::new().await;
    h.store.put("notes/ok.md", 3, b"ok");
    h.store.put("notes/bad.md", 3, b"bad");
    h.record("notes/ok.md", ItemStatus::Created, 3).await;
    h.record("notes/bad.md", ItemStatus::Created, 3).await;
    h.provider.fail_key("notes/bad.md");

    let report = h.pass().await;

    assert_eq!(report.uploaded, vec!["notes/ok.md"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "notes/bad.md");
    assert_eq!(h.journal_keys().await, vec!["notes/bad.md"]);
    assert!(h.journal().last_sync_time().await.unwrap().is_some());
}

#[tokio::test]
async fn failed_local_write_keeps_journal_and_skips_upload() {
    let h = Harness::new().await;
    h.store.put("notes/a.md", 2, b"old");
    h.record("notes/a.md", ItemStatus::Updated, 2).await;
    h.provider.put("notes/a.md", ItemStatus::Unchanged, 6, b"new");
    h.store.fail_key("notes/a.md");

    let report = h.pass().await;

    assert_eq!(report.failed.len(), 1);
    assert!(report.uploaded.is_empty());
    assert_eq!(h.journal_keys().await, vec!["notes/a.md"]);
    assert!(!h.engine.context().guard().is_suppressed("notes/a.md"));
}

#[tokio::test]
async fn key_without_remote_group_is_skipped_and_kept() {
    let h = Harness::new().await;
    h.store.put("scratch/a.md", 3, b"x");
    h.record("scratch/a.md", ItemStatus::Created, 3).await;

    let report = h.pass().await;

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].key, "scratch/a.md");
    assert_eq!(h.journal_keys().await, vec!["scratch/a.md"]);
}

#[tokio::test]
async fn report_serializes_to_json() {
    let h = Harness::new().await;
    h.provider.put("notes/a.md", ItemStatus::Unchanged, 5, b"remote");

    let report = h.pass().await;
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["downloaded"][0], "notes/a.md");
    assert!(json["finished_at"].as_i64().unwrap() >= json["started_at"].as_i64().unwrap());
}
