//! Sync engine tests against `MockSandbox` and `InMemoryObjectStore`.

use std::sync::Arc;
use std::time::Duration;

use gatewarden_core::{config::SyncConfig, traits::ObjectStore};
use gatewarden_sandbox::MockSandbox;
use gatewarden_store::InMemoryObjectStore;
use gatewarden_sync::SyncEngine;

const CONFIG: &str = "/root/.openclaw/openclaw.json";

// =============================================================================
// Helpers
// =============================================================================

fn engine(sandbox: &Arc<MockSandbox>, store: &Arc<InMemoryObjectStore>) -> SyncEngine {
    SyncEngine::new(sandbox.clone(), Some(store.clone()), SyncConfig::default())
}

async fn seed(store: &InMemoryObjectStore, keys: &[String]) {
    for key in keys {
        store
            .put(key, bytes::Bytes::from(format!("body of {}", key)), "text/plain")
            .await
            .unwrap();
    }
    store
        .put(".last-sync", bytes::Bytes::from("2026-01-01T00:00:00+00:00"), "text/plain")
        .await
        .unwrap();
}

fn configured() -> MockSandbox {
    MockSandbox::new().with_file(CONFIG, r#"{"gateway":{"port":18789}}"#)
}

// =============================================================================
// Sync
// =============================================================================

#[tokio::test]
async fn test_sync_without_config_writes_nothing() {
    let sandbox = Arc::new(MockSandbox::new().with_file("/root/clawd/notes.md", "hello"));
    let store = Arc::new(InMemoryObjectStore::new());

    let outcome = engine(&sandbox, &store).sync().await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("No config found"));
    assert_eq!(store.put_count(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_sync_without_store_is_unavailable() {
    let sandbox = Arc::new(configured());
    let engine = SyncEngine::new(sandbox, None, SyncConfig::default());

    let outcome = engine.sync().await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("not configured"));
}

#[tokio::test]
async fn test_sync_applies_exclusions() {
    let sandbox = Arc::new(
        configured()
            .with_file("/root/clawd/a.json", "{}")
            .with_file("/root/clawd/b.lock", "")
            .with_file("/root/clawd/c.log", "log line")
            .with_file("/root/clawd/d.bak-20240101", "old")
            .with_file("/root/clawd/node_modules/pkg/index.js", "x")
            .with_file("/root/clawd/skills/x.md", "# skill"),
    );
    let store = Arc::new(InMemoryObjectStore::new());

    let outcome = engine(&sandbox, &store).sync().await;
    assert!(outcome.success, "{:?}", outcome);

    let workspace: Vec<String> = store
        .keys()
        .into_iter()
        .filter(|k| k.starts_with("workspace/"))
        .collect();
    assert_eq!(workspace, vec!["workspace/a.json".to_string()]);

    // the nested skills directory goes through its own step
    assert!(store.keys().contains(&"skills/x.md".to_string()));
    assert!(store.keys().contains(&"openclaw/openclaw.json".to_string()));
    assert_eq!(outcome.skipped, 5);
}

#[tokio::test]
async fn test_sync_uses_legacy_config_dir() {
    let sandbox = Arc::new(MockSandbox::new().with_file("/root/.clawdbot/clawdbot.json", "{}"));
    let store = Arc::new(InMemoryObjectStore::new());

    let outcome = engine(&sandbox, &store).sync().await;
    assert!(outcome.success);
    assert!(store.keys().contains(&"openclaw/clawdbot.json".to_string()));
}

#[tokio::test]
async fn test_sync_isolates_per_file_failures() {
    let sandbox = Arc::new(
        configured()
            .with_file("/root/clawd/good.md", "ok")
            .with_file("/root/clawd/secret.md", "nope")
            .with_unreadable("/root/clawd/secret.md"),
    );
    let store = Arc::new(InMemoryObjectStore::new());

    let outcome = engine(&sandbox, &store).sync().await;

    assert!(outcome.success);
    assert_eq!(outcome.failed, 1);
    assert!(store.keys().contains(&"workspace/good.md".to_string()));
    assert!(!store.keys().contains(&"workspace/secret.md".to_string()));
    assert!(store.keys().contains(&".last-sync".to_string()));
}

#[tokio::test]
async fn test_sync_sets_content_types() {
    let sandbox = Arc::new(
        configured()
            .with_file("/root/clawd/notes.md", "text")
            .with_file("/root/clawd/avatar.png", vec![0x89, 0x50, 0xff, 0xfe]),
    );
    let store = Arc::new(InMemoryObjectStore::new());

    engine(&sandbox, &store).sync().await;

    assert_eq!(
        store.content_type("workspace/notes.md").as_deref(),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(
        store.content_type("workspace/avatar.png").as_deref(),
        Some("application/octet-stream")
    );
}

#[tokio::test]
async fn test_sync_listing_failure_keeps_previous_marker() {
    let sandbox = Arc::new(
        configured()
            .with_file("/root/clawd/notes.md", "hello")
            .with_unlistable("/root/clawd"),
    );
    let store = Arc::new(InMemoryObjectStore::new());
    store
        .put(".last-sync", bytes::Bytes::from("2026-01-01T00:00:00+00:00"), "text/plain")
        .await
        .unwrap();

    let outcome = engine(&sandbox, &store).sync().await;

    assert!(!outcome.success);
    assert!(outcome.last_sync.is_none());
    assert!(outcome.error.unwrap().contains("workspace step"));
    // the config step still uploaded
    assert!(store.keys().contains(&"openclaw/openclaw.json".to_string()));
    assert!(!store.keys().contains(&"workspace/notes.md".to_string()));
    let marker = store.get(".last-sync").await.unwrap().unwrap();
    assert_eq!(marker.text(), "2026-01-01T00:00:00+00:00");
}

// =============================================================================
// Restore
// =============================================================================

#[tokio::test]
async fn test_restore_without_backup() {
    let sandbox = Arc::new(MockSandbox::new());
    let store = Arc::new(InMemoryObjectStore::new());

    let outcome = engine(&sandbox, &store).restore().await;

    assert!(outcome.success);
    assert_eq!(outcome.details.as_deref(), Some("no backup found"));
    assert_eq!(outcome.restored, 0);
    assert!(sandbox.file_paths().is_empty());
}

#[tokio::test]
async fn test_sync_restore_round_trip() {
    let binary: Vec<u8> = (0u8..=255).collect();
    let source = Arc::new(
        configured()
            .with_file("/root/clawd/memory/today.md", "remember this")
            .with_file("/root/clawd/blob.bin", binary.clone())
            .with_file("/root/clawd/skills/weather/SKILL.md", "# weather"),
    );
    let store = Arc::new(InMemoryObjectStore::new());
    let synced = engine(&source, &store).sync().await;
    assert!(synced.success);

    let fresh = Arc::new(MockSandbox::new());
    let engine = engine(&fresh, &store);
    let restored = engine.restore().await;

    assert!(restored.success, "{:?}", restored);
    assert_eq!(restored.last_sync, synced.last_sync);
    assert_eq!(restored.failed, 0);
    assert_eq!(fresh.file(CONFIG), source.file(CONFIG));
    assert_eq!(fresh.file("/root/clawd/blob.bin"), Some(binary));
    assert_eq!(
        fresh.file("/root/clawd/memory/today.md").as_deref(),
        Some(b"remember this".as_slice())
    );
    assert!(fresh.file("/root/clawd/skills/weather/SKILL.md").is_some());
    assert!(engine.has_local_state().await.unwrap());
    assert_eq!(engine.last_backup().await.unwrap(), synced.last_sync);
}

#[tokio::test]
async fn test_restore_defers_session_transcripts() {
    let transcript = "/root/.openclaw/agents/main/sessions/abc.jsonl";
    let source = Arc::new(configured().with_file(transcript, "{\"role\":\"user\"}\n"));
    let store = Arc::new(InMemoryObjectStore::new());
    assert!(engine(&source, &store).sync().await.success);

    let fresh = Arc::new(MockSandbox::new());
    let engine = engine(&fresh, &store);
    let restored = engine.restore().await;

    assert_eq!(
        restored.deferred_keys,
        vec!["openclaw/agents/main/sessions/abc.jsonl".to_string()]
    );
    assert!(fresh.file(CONFIG).is_some());
    assert!(fresh.file(transcript).is_none());

    let deferred = engine.restore_deferred(&restored.deferred_keys).await;
    assert_eq!(deferred.restored, 1);
    assert_eq!(deferred.failed, 0);
    assert_eq!(fresh.file(transcript), source.file(transcript));
}

#[tokio::test]
async fn test_restore_deferred_reports_unmapped_keys() {
    let sandbox = Arc::new(MockSandbox::new());
    let store = Arc::new(InMemoryObjectStore::new());

    let outcome = engine(&sandbox, &store)
        .restore_deferred(&["elsewhere/file.jsonl".to_string()])
        .await;
    assert_eq!(outcome.unmapped, 1);
    assert_eq!(outcome.restored, 0);
}

#[tokio::test]
async fn test_restore_follows_pagination() {
    let store = Arc::new(InMemoryObjectStore::with_page_size(2));
    for i in 0..7 {
        store
            .put(
                &format!("workspace/notes/{}.md", i),
                bytes::Bytes::from(format!("note {}", i)),
                "text/plain",
            )
            .await
            .unwrap();
    }
    store
        .put(".last-sync", bytes::Bytes::from("2026-01-01T00:00:00+00:00"), "text/plain")
        .await
        .unwrap();

    let sandbox = Arc::new(MockSandbox::new());
    let outcome = engine(&sandbox, &store).restore().await;

    assert!(outcome.success);
    assert_eq!(outcome.restored, 7);
    assert_eq!(outcome.last_sync.as_deref(), Some("2026-01-01T00:00:00+00:00"));
    assert_eq!(
        sandbox.file("/root/clawd/notes/6.md").as_deref(),
        Some(b"note 6".as_slice())
    );
}

#[tokio::test]
async fn test_restore_skips_excluded_keys() {
    let store = Arc::new(InMemoryObjectStore::new());
    for key in ["workspace/keep.md", "workspace/stale.lock", "workspace/dir/", ".last-sync"] {
        store
            .put(key, bytes::Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
    }
    let sandbox = Arc::new(MockSandbox::new());

    let outcome = engine(&sandbox, &store).restore().await;

    assert_eq!(outcome.restored, 1);
    assert_eq!(sandbox.file_paths(), vec!["/root/clawd/keep.md".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_restore_writes_at_most_one_batch_at_a_time() {
    let store = Arc::new(InMemoryObjectStore::new());
    let keys: Vec<String> = (0..12).map(|i| format!("workspace/notes/{:02}.md", i)).collect();
    seed(&store, &keys).await;
    let sandbox = Arc::new(MockSandbox::new().with_write_delay(Duration::from_millis(50)));

    let outcome = engine(&sandbox, &store).restore().await;

    assert_eq!(outcome.restored, 12);
    assert_eq!(sandbox.max_concurrent_writes(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_restore_deferred_writes_in_smaller_batches() {
    let store = Arc::new(InMemoryObjectStore::new());
    let keys: Vec<String> = (0..7)
        .map(|i| format!("openclaw/agents/main/sessions/{}.jsonl", i))
        .collect();
    seed(&store, &keys).await;
    let sandbox = Arc::new(MockSandbox::new().with_write_delay(Duration::from_millis(50)));

    let outcome = engine(&sandbox, &store).restore_deferred(&keys).await;

    assert_eq!(outcome.restored, 7);
    assert_eq!(outcome.failed, 0);
    assert_eq!(sandbox.max_concurrent_writes(), 3);
}

#[tokio::test]
async fn test_restore_isolates_per_object_failures() {
    let store = Arc::new(InMemoryObjectStore::new());
    let keys = vec![
        "workspace/a.md".to_string(),
        "workspace/b.md".to_string(),
        "workspace/c.md".to_string(),
    ];
    seed(&store, &keys).await;
    let sandbox = Arc::new(MockSandbox::new().with_unwritable("/root/clawd/b.md"));

    let outcome = engine(&sandbox, &store).restore().await;

    assert!(outcome.success, "{:?}", outcome);
    assert_eq!(outcome.restored, 2);
    assert_eq!(outcome.failed, 1);
    assert!(sandbox.file("/root/clawd/a.md").is_some());
    assert!(sandbox.file("/root/clawd/b.md").is_none());
    assert!(sandbox.file("/root/clawd/c.md").is_some());
}

#[tokio::test]
async fn test_restore_deferred_isolates_per_object_failures() {
    let store = Arc::new(InMemoryObjectStore::new());
    let keys = vec![
        "openclaw/agents/main/sessions/one.jsonl".to_string(),
        "openclaw/agents/main/sessions/two.jsonl".to_string(),
    ];
    seed(&store, &keys).await;
    let sandbox = Arc::new(
        MockSandbox::new().with_unwritable("/root/.openclaw/agents/main/sessions/one.jsonl"),
    );

    let outcome = engine(&sandbox, &store).restore_deferred(&keys).await;

    assert_eq!(outcome.restored, 1);
    assert_eq!(outcome.failed, 1);
    assert!(sandbox
        .file("/root/.openclaw/agents/main/sessions/two.jsonl")
        .is_some());
}
