//! End-to-end refresh scenarios across core, engine and real loaders.

use allowsync_core::{ContentHasher, Identity, LocalCache, MergeMode, SourceKind, SourceResult};
use allowsync_engine::{
    CycleOutcome, EngineConfig, FsStore, HealthStatus, HttpResponse, LocalFileLoader,
    LocalSourceConfig, MemoryLockBackend, MemoryMirror, MirrorWrite, RefreshScheduler,
    RemoteAuth, RemoteLoader, RemoteSourceConfig, RetryConfig, RetryingMirrorWriter,
    MIN_REFRESH_INTERVAL,
};
use allowsync_testkit::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn a() -> Identity {
    Identity::new("111", "a@x.com")
}

fn b() -> Identity {
    Identity::new("222", "b@x.com")
}

fn fast_retry() -> RetryConfig {
    RetryConfig::new(3)
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

fn remote_loader(client: Arc<ScriptedHttpClient>) -> Arc<RemoteLoader<Arc<ScriptedHttpClient>>> {
    Arc::new(RemoteLoader::new(
        RemoteSourceConfig::new("https://idp.example.com/allowlist")
            .with_auth(RemoteAuth::Bearer("secret".into())),
        client,
    ))
}

#[test]
fn union_of_file_and_endpoint() {
    let file = IdentityFile::with_records(&[a()]);
    let client = Arc::new(ScriptedHttpClient::serving(&[a(), b()]));
    let mirror = Arc::new(MemoryMirror::new());
    let cache = Arc::new(LocalCache::new());

    let scheduler = RefreshScheduler::builder(Arc::clone(&cache))
        .with_config(EngineConfig::new().with_merge_mode(MergeMode::Union))
        .with_local(Arc::new(LocalFileLoader::new(LocalSourceConfig::new(file.path()))))
        .with_remote(remote_loader(Arc::clone(&client)))
        .with_mirror_backend(mirror.clone())
        .build();

    let outcome = scheduler.run_cycle().unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Committed {
            records: 2,
            mirror: MirrorWrite::Written { .. },
            ..
        }
    ));
    assert_eq!(cache.len(), 2);
    assert_eq!(mirror.writes(), 1);

    // The bearer token reached the endpoint.
    let requests = client.requests();
    assert!(requests[0]
        .headers
        .contains(&("Authorization".to_string(), "Bearer secret".to_string())));

    // Repeating the cycle changes nothing.
    assert!(matches!(
        scheduler.run_cycle().unwrap(),
        CycleOutcome::Unchanged { .. }
    ));
    assert_eq!(mirror.writes(), 1);
}

#[test]
fn failing_endpoint_falls_back_to_file() {
    let file = IdentityFile::with_records(&[a()]);
    let client = Arc::new(ScriptedHttpClient::always(500, "internal error"));
    let cache = Arc::new(LocalCache::new());

    let scheduler = RefreshScheduler::builder(Arc::clone(&cache))
        .with_config(EngineConfig::new().with_merge_mode(MergeMode::RemoteFirst))
        .with_local(Arc::new(LocalFileLoader::new(LocalSourceConfig::new(file.path()))))
        .with_remote(remote_loader(Arc::clone(&client)))
        .build();

    assert_eq!(scheduler.bootstrap(), Some(allowsync_engine::BootstrapOrigin::Local));
    for _ in 0..5 {
        scheduler.run_cycle().unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.is_allowed("111", "a@x.com"));
    }

    let stats = scheduler.stats();
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.committed, 0);
    assert_eq!(stats.unchanged, 5);
    assert_eq!(client.requests().len(), 5);
    assert_eq!(scheduler.health().status, HealthStatus::Ok);
}

#[test]
fn short_interval_is_clamped() {
    let config = EngineConfig::new().with_refresh_interval(Duration::from_secs(1));
    assert_eq!(config.refresh_interval(), MIN_REFRESH_INTERVAL);

    let scheduler = RefreshScheduler::builder(Arc::new(LocalCache::new()))
        .with_config(config)
        .build();
    assert_eq!(scheduler.config().refresh_interval(), MIN_REFRESH_INTERVAL);
}

#[test]
fn remote_first_follows_endpoint_changes() {
    let file = IdentityFile::with_records(&[a()]);
    let client = Arc::new(ScriptedHttpClient::serving(&[b()]));
    let cache = Arc::new(LocalCache::new());

    let scheduler = RefreshScheduler::builder(Arc::clone(&cache))
        .with_local(Arc::new(LocalFileLoader::new(LocalSourceConfig::new(file.path()))))
        .with_remote(remote_loader(Arc::clone(&client)))
        .build();

    scheduler.run_cycle().unwrap();
    assert_eq!(cache.get().records(), &[b()]);

    // Endpoint down: keep serving from the file.
    client.set(Err("timeout".into()));
    scheduler.run_cycle().unwrap();
    assert_eq!(cache.get().records(), &[a()]);

    // Endpoint back with an empty list: that is a real, empty allowlist.
    client.serve(&[]);
    scheduler.run_cycle().unwrap();
    assert!(cache.is_empty());
}

#[test]
fn malformed_file_keeps_committed_snapshot() {
    let file = IdentityFile::with_records(&sample_identities(3));
    let cache = Arc::new(LocalCache::new());
    let scheduler = RefreshScheduler::builder(Arc::clone(&cache))
        .with_config(EngineConfig::new().with_merge_mode(MergeMode::LocalOnly))
        .with_local(Arc::new(LocalFileLoader::new(LocalSourceConfig::new(file.path()))))
        .build();

    scheduler.run_cycle().unwrap();
    let committed = cache.current_hash();

    file.write_raw("{ not json");
    assert!(matches!(
        scheduler.run_cycle().unwrap(),
        CycleOutcome::Retained { .. }
    ));
    file.remove();
    assert!(matches!(
        scheduler.run_cycle().unwrap(),
        CycleOutcome::Retained { .. }
    ));
    assert_eq!(cache.current_hash(), committed);
}

#[test]
fn panicking_cycle_recovers_on_next_tick() {
    let cache = Arc::new(LocalCache::new());
    let lock = Arc::new(MemoryLockBackend::new());
    let scheduler = RefreshScheduler::builder(Arc::clone(&cache))
        .with_config(EngineConfig::new().with_merge_mode(MergeMode::RemoteOnly))
        .with_remote(Arc::new(PanickingSource::new(SourceKind::Remote, 1, vec![a()])))
        .with_lock_backend(lock.clone())
        .build();

    assert!(scheduler.run_cycle().is_err());
    assert!(cache.is_empty());

    assert!(matches!(
        scheduler.run_cycle().unwrap(),
        CycleOutcome::Committed { records: 1, .. }
    ));
    let stats = scheduler.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.committed, 1);
}

#[test]
fn failing_mirror_degrades_health_until_it_recovers() {
    let cache = Arc::new(LocalCache::new());
    let mirror = Arc::new(FailingMirror::new());
    let remote = Arc::new(allowsync_engine::StaticSource::available(
        SourceKind::Remote,
        vec![a(), b()],
    ));
    let scheduler = RefreshScheduler::builder(Arc::clone(&cache))
        .with_config(EngineConfig::new().with_retry(fast_retry()))
        .with_remote(remote.clone())
        .with_mirror_backend(mirror.clone())
        .build();

    // Bootstrap tolerates an unreadable mirror.
    assert_eq!(
        scheduler.bootstrap(),
        Some(allowsync_engine::BootstrapOrigin::Remote)
    );

    // Unchanged data still owes the mirror a write, which exhausts its retries.
    let outcome = scheduler.run_cycle().unwrap();
    assert!(matches!(outcome, CycleOutcome::Unchanged { .. }));
    assert_eq!(mirror.attempts(), 3);
    let health = scheduler.health();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(health.loaded);
    assert!(health.mirror_degraded);
    assert_eq!(scheduler.stats().mirror_failures, 1);

    // A change still commits locally while the mirror is down.
    remote.set(SourceResult::available(SourceKind::Remote, vec![a()]));
    let outcome = scheduler.run_cycle().unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Committed {
            mirror: MirrorWrite::Failed { .. },
            ..
        }
    ));
    assert_eq!(mirror.attempts(), 6);
    assert_eq!(cache.len(), 1);
    assert_eq!(scheduler.health().status, HealthStatus::Degraded);

    // Once the backend is back, the next unchanged cycle converges the mirror.
    mirror.recover();
    let outcome = scheduler.run_cycle().unwrap();
    assert!(matches!(outcome, CycleOutcome::Unchanged { .. }));
    assert_eq!(mirror.written(), 1);

    let health = scheduler.health();
    assert_eq!(health.status, HealthStatus::Ok);
    assert!(!health.mirror_degraded);
    assert_eq!(scheduler.stats().mirror_writes, 1);

    let mirrored = RetryingMirrorWriter::new(
        mirror.clone(),
        EngineConfig::new().mirror_key,
        Duration::from_secs(60),
        fast_retry(),
    )
    .read()
    .unwrap()
    .unwrap();
    assert_eq!(mirrored.hash(), cache.current_hash());

    // Converged: further unchanged cycles leave the mirror alone.
    scheduler.run_cycle().unwrap();
    assert_eq!(mirror.written(), 1);
}

#[test]
fn strict_coordination_skips_on_backend_failure() {
    let cache = Arc::new(LocalCache::new());
    let backend = Arc::new(FailingLockBackend::new());
    let strict = RefreshScheduler::builder(Arc::clone(&cache))
        .with_config(EngineConfig::new().with_require_lock(true))
        .with_remote(Arc::new(allowsync_engine::StaticSource::available(
            SourceKind::Remote,
            vec![a()],
        )))
        .with_lock_backend(backend.clone())
        .build();
    assert_eq!(strict.run_cycle().unwrap(), CycleOutcome::Skipped);
    assert!(cache.is_empty());

    let lenient = RefreshScheduler::builder(Arc::clone(&cache))
        .with_remote(Arc::new(allowsync_engine::StaticSource::available(
            SourceKind::Remote,
            vec![a()],
        )))
        .with_lock_backend(backend.clone())
        .build();
    assert!(matches!(
        lenient.run_cycle().unwrap(),
        CycleOutcome::Committed { .. }
    ));
    assert_eq!(backend.attempts(), 2);
}

#[test]
fn replicas_share_a_directory_store() {
    let dir = tempfile::tempdir().unwrap();
    let records = sample_identities(10);
    let barrier = Arc::new(Barrier::new(3));

    let replicas: Vec<_> = (0..3)
        .map(|_| {
            let store = Arc::new(FsStore::open(dir.path()).unwrap());
            let records = records.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let scheduler = RefreshScheduler::builder(Arc::new(LocalCache::new()))
                    .with_config(EngineConfig::new().with_require_lock(true))
                    .with_remote(Arc::new(allowsync_engine::StaticSource::available(
                        SourceKind::Remote,
                        records,
                    )))
                    .with_lock_backend(store.clone())
                    .with_mirror_backend(store)
                    .build();
                barrier.wait();
                scheduler.run_cycle().unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = replicas.into_iter().map(|h| h.join().unwrap()).collect();
    let committed = outcomes
        .iter()
        .filter(|o| matches!(o, CycleOutcome::Committed { .. }))
        .count();
    assert!(committed >= 1);
    assert_eq!(
        committed
            + outcomes
                .iter()
                .filter(|o| matches!(o, CycleOutcome::Skipped))
                .count(),
        3
    );

    // A replica started later boots from the mirror.
    let store = Arc::new(FsStore::open(dir.path()).unwrap());
    let late = RefreshScheduler::builder(Arc::new(LocalCache::new()))
        .with_mirror_backend(store.clone())
        .build();
    assert_eq!(late.bootstrap(), Some(allowsync_engine::BootstrapOrigin::Mirror));
    assert_eq!(late.cache().current_hash(), ContentHasher::hash(&records));

    let mirrored = RetryingMirrorWriter::new(
        store,
        EngineConfig::new().mirror_key,
        Duration::from_secs(60),
        fast_retry(),
    )
    .read()
    .unwrap()
    .unwrap();
    assert_eq!(mirrored.len(), 10);
}

#[test]
fn endpoint_document_shapes() {
    let client = Arc::new(ScriptedHttpClient::unreachable());
    let loader = remote_loader(Arc::clone(&client));
    let cache = Arc::new(LocalCache::new());
    let scheduler = RefreshScheduler::builder(Arc::clone(&cache))
        .with_config(EngineConfig::new().with_merge_mode(MergeMode::RemoteOnly))
        .with_remote(loader)
        .build();

    assert!(matches!(
        scheduler.run_cycle().unwrap(),
        CycleOutcome::Retained { .. }
    ));

    client.set(Ok(HttpResponse::new(
        200,
        r#"{"users":[{"phone":"111","mail":"a@x.com","userId":"u1","scope":null}]}"#,
    )));
    scheduler.run_cycle().unwrap();
    assert_eq!(cache.find_by_user_id("u1").map(|i| i.phone), Some("111".to_string()));
}
