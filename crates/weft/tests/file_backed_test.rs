//! Cross-process plumbing: file checkpoints, file signals and the sync loop
//!
//! Handles here share nothing in memory; each gets its own registry and
//! signal instance over the same directories, the way separate processes do.

use std::time::{Duration, Instant};
use tempfile::TempDir;
use weft::prelude::*;

const NOTE: ObjectKind = ObjectKind::new("note");

struct Shared {
    temp: TempDir,
}

impl Shared {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    fn config(&self) -> WeftConfig {
        WeftConfig::new(self.temp.path().join(StoreId::Main.file_name())).with_sync(
            SyncConfig::default()
                .with_poll_interval_ms(20)
                .with_prune_interval_ms(20),
        )
    }

    fn registry(&self) -> Arc<FileCheckpointRegistry> {
        Arc::new(FileCheckpointRegistry::open(self.temp.path().join("checkpoints")).unwrap())
    }

    fn open(&self, consumer: ConsumerIdentity, signal: Arc<dyn ChangeSignal>) -> Arc<WeftStore> {
        WeftStore::open(
            WeftOptions::new(StoreId::Main, consumer, self.config(), self.registry())
                .with_signal(signal),
        )
        .unwrap()
    }

    fn file_signal(&self) -> Arc<FileSignal> {
        let dir = self.temp.path().join("signals");
        Arc::new(FileSignal::open(dir, Duration::from_millis(5)).unwrap())
    }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// A commit in one process reaches another through the signal directory
#[test]
fn test_file_signal_drives_merge_in_other_process() {
    let shared = Shared::new();
    let primary = shared.open(ConsumerIdentity::Primary, shared.file_signal());
    let share = shared.open(ConsumerIdentity::ShareExtension, shared.file_signal());

    primary.upsert(NOTE, "a", b"hello".to_vec()).wait().unwrap();

    let key = ObjectKey::new(NOTE, "a");
    let arrived = wait_until(Duration::from_secs(5), || share.snapshot().contains(&key));
    assert!(arrived);
}

/// Checkpoints written by one process are read by a later one
#[test]
fn test_checkpoints_persist_across_handles() {
    let shared = Shared::new();
    let hub = Arc::new(SignalHub::new());
    hub.mute();

    let primary = shared.open(ConsumerIdentity::Primary, hub.clone());
    {
        let share = shared.open(ConsumerIdentity::ShareExtension, hub.clone());
        primary.upsert(NOTE, "a", b"1".to_vec()).wait().unwrap();
        share.merge_now().wait().unwrap();
        share.shutdown();
    }

    let checkpoint = shared
        .registry()
        .get(StoreId::Main, ConsumerIdentity::ShareExtension)
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.seq, 1);
    assert!(shared
        .temp
        .path()
        .join("checkpoints")
        .join("main")
        .join("share-extension.json")
        .exists());

    // Reopened, it resumes from its checkpoint rather than the tail
    primary.upsert(NOTE, "b", b"2".to_vec()).wait().unwrap();
    let share = shared.open(ConsumerIdentity::ShareExtension, hub);
    assert_eq!(share.snapshot().count(&NOTE), 2);
    let stats = share.merge_now().wait().unwrap();
    assert_eq!(stats.entries_applied, 1);
    assert_eq!(stats.new_checkpoint, 2);
}

/// The polling backstop merges and prunes with every signal lost
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_loop_recovers_without_signals() {
    let shared = Shared::new();
    let hub = Arc::new(SignalHub::new());
    hub.mute();

    let primary = shared.open(ConsumerIdentity::Primary, hub.clone());
    let share = shared.open(ConsumerIdentity::ShareExtension, hub.clone());
    let notification = shared.open(ConsumerIdentity::NotificationExtension, hub);

    let loops: Vec<_> = [&primary, &share, &notification]
        .into_iter()
        .map(|store| tokio::spawn(store.clone().run_sync_loop()))
        .collect();

    for i in 0..5 {
        primary
            .upsert(NOTE, format!("n{}", i), b"v".to_vec())
            .await
            .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = primary.status().await.unwrap();
        let caught_up = share.snapshot().count(&NOTE) == 5
            && notification.snapshot().count(&NOTE) == 5;
        if caught_up && status.entries == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "sync loops did not converge: {:?}",
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for store in [&primary, &share, &notification] {
        store.shutdown();
    }
    for handle in loops {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sync loop did not stop")
            .unwrap();
    }
}
