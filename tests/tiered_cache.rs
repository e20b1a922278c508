//! Integration tests for the tier controller
//!
//! Exercise promotion, hit accounting and failure handling through the
//! public API with a mock origin and temporary storage directories.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::{HeaderMap, Method, StatusCode};
use proptest::prelude::*;
use tempfile::TempDir;

use tierproxy::cache::{CacheConfig, CacheKey, CacheStatus, CacheTier, TierController, TierState};
use tierproxy::proxy::{OriginForwarder, OriginRequest, OriginResponse};
use tierproxy::{Error, Result};

// =============================================================================
// Test Utilities
// =============================================================================

/// Origin that echoes the request path as the body
#[derive(Default)]
struct EchoOrigin {
    calls: AtomicUsize,
}

impl EchoOrigin {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OriginForwarder for EchoOrigin {
    async fn forward(&self, request: OriginRequest) -> Result<OriginResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OriginResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(format!("body of {}", request.path_and_query)),
        })
    }
}

struct UnreachableOrigin;

#[async_trait]
impl OriginForwarder for UnreachableOrigin {
    async fn forward(&self, _request: OriginRequest) -> Result<OriginResponse> {
        Err(Error::OriginUnavailable {
            origin: "http://unreachable".into(),
            reason: "connection refused".into(),
        })
    }
}

fn setup(threshold: u64) -> (TempDir, Arc<EchoOrigin>, TierController) {
    let dir = TempDir::new().unwrap();
    let origin = Arc::new(EchoOrigin::default());
    let controller =
        TierController::new(CacheConfig::new(dir.path(), threshold), origin.clone()).unwrap();
    (dir, origin, controller)
}

// =============================================================================
// Request Scenarios
// =============================================================================

#[tokio::test]
async fn test_request_sequence_with_default_threshold() {
    let (_dir, origin, controller) = setup(10);
    let key = CacheKey::new("/a");

    let first = controller.lookup(OriginRequest::get("/a")).await.unwrap();
    assert_eq!(first.cache, CacheStatus::Miss);
    assert_eq!(first.response.body, Bytes::from("body of /a"));
    assert_eq!(controller.state(&key), TierState::L2Resident);

    for request in 2..=12u64 {
        let served = controller.lookup(OriginRequest::get("/a")).await.unwrap();
        assert_eq!(served.cache, CacheStatus::L2Hit, "request {}", request);
        assert_eq!(served.response.body, Bytes::from("body of /a"));
    }
    assert_eq!(controller.state(&key), TierState::L1Resident);

    let served = controller.lookup(OriginRequest::get("/a")).await.unwrap();
    assert_eq!(served.cache, CacheStatus::L1Hit);
    assert_eq!(controller.hit_count(&key), Some(12));
    assert_eq!(origin.calls(), 1);

    let snapshot = controller.metrics();
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.l2_hits, 11);
    assert_eq!(snapshot.l1_hits, 1);
    assert_eq!(snapshot.promotions, 1);
    assert_eq!(snapshot.l1_entries, 1);
    assert_eq!(snapshot.l2_entries, 0);
}

#[tokio::test]
async fn test_promoted_object_removed_from_disk() {
    let (dir, _origin, controller) = setup(1);
    let key = CacheKey::new("/obj");

    controller.lookup(OriginRequest::get("/obj")).await.unwrap();
    let path = controller.l2().object_path(&key);
    assert!(path.exists());

    controller.lookup(OriginRequest::get("/obj")).await.unwrap();
    controller.lookup(OriginRequest::get("/obj")).await.unwrap();

    assert_eq!(controller.state(&key), TierState::L1Resident);
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_distinct_keys_are_independent() {
    let (_dir, origin, controller) = setup(10);

    for path in ["/a", "/A", "/a?x=1&y=2", "/a?y=2&x=1"] {
        let served = controller.lookup(OriginRequest::get(path)).await.unwrap();
        assert_eq!(served.cache, CacheStatus::Miss, "{}", path);
    }
    assert_eq!(origin.calls(), 4);
    assert_eq!(controller.l2().len(), 4);
}

#[tokio::test]
async fn test_origin_failure_not_cached() {
    let dir = TempDir::new().unwrap();
    let controller =
        TierController::new(CacheConfig::new(dir.path(), 10), Arc::new(UnreachableOrigin))
            .unwrap();

    let result = controller.lookup(OriginRequest::get("/down")).await;
    assert_matches!(result, Err(Error::OriginUnavailable { .. }));
    assert_eq!(controller.state(&CacheKey::new("/down")), TierState::Absent);
    assert_eq!(controller.metrics().origin_failures, 1);
}

#[tokio::test]
async fn test_non_get_bypasses_cache() {
    let (_dir, origin, controller) = setup(10);

    let mut request = OriginRequest::get("/submit");
    request.method = Method::POST;
    request.body = Bytes::from_static(b"form");

    let served = controller.lookup(request.clone()).await.unwrap();
    assert_eq!(served.cache, CacheStatus::Bypass);
    let served = controller.lookup(request).await.unwrap();
    assert_eq!(served.cache, CacheStatus::Bypass);

    assert_eq!(origin.calls(), 2);
    assert_eq!(controller.state(&CacheKey::new("/submit")), TierState::Absent);
}

#[tokio::test]
async fn test_vanished_object_refetched() {
    let (_dir, origin, controller) = setup(10);
    let key = CacheKey::new("/gone");

    controller.lookup(OriginRequest::get("/gone")).await.unwrap();
    std::fs::remove_file(controller.l2().object_path(&key)).unwrap();

    let served = controller.lookup(OriginRequest::get("/gone")).await.unwrap();
    assert_eq!(served.cache, CacheStatus::Miss);
    assert_eq!(served.response.body, Bytes::from("body of /gone"));
    assert_eq!(origin.calls(), 2);
    assert_eq!(controller.metrics().storage_read_failures, 1);

    // The refetch re-populated L2.
    let served = controller.lookup(OriginRequest::get("/gone")).await.unwrap();
    assert_eq!(served.cache, CacheStatus::L2Hit);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_hits_promote_exactly_once() {
    const THRESHOLD: u64 = 10;
    const PRE_RACE_HITS: u64 = 8;
    const READERS: usize = 16;

    let (_dir, _origin, controller) = setup(THRESHOLD);
    let controller = Arc::new(controller);
    let key = CacheKey::new("/hot");

    assert!(controller.admit(key.clone(), b"hot payload"));
    for _ in 0..PRE_RACE_HITS {
        let hit = controller.probe(&key).unwrap();
        assert_eq!(hit.tier, CacheTier::L2);
    }

    let barrier = Arc::new(Barrier::new(READERS));
    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let controller = controller.clone();
            let barrier = barrier.clone();
            let key = key.clone();
            thread::spawn(move || {
                barrier.wait();
                controller.probe(&key)
            })
        })
        .collect();

    let mut promoted = 0;
    for handle in handles {
        let hit = handle.join().unwrap().expect("cached key must hit");
        assert_eq!(hit.payload, Bytes::from_static(b"hot payload"));
        if hit.promoted {
            promoted += 1;
        }
    }

    assert_eq!(promoted, 1);
    assert_eq!(controller.metrics().promotions, 1);
    assert_eq!(controller.state(&key), TierState::L1Resident);
    assert_eq!(controller.hit_count(&key), Some(PRE_RACE_HITS + READERS as u64));
    assert!(controller.l2().is_empty());
}

#[test]
fn test_concurrent_hits_below_threshold_stay_in_l2() {
    let (_dir, _origin, controller) = setup(100);
    let controller = Arc::new(controller);
    let key = CacheKey::new("/warm");
    controller.admit(key.clone(), b"warm");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = controller.clone();
            let key = key.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    assert!(controller.probe(&key).is_some());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(controller.state(&key), TierState::L2Resident);
    assert_eq!(controller.hit_count(&key), Some(80));
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_hit_count_increments_by_one(threshold in 0u64..6, reads in 1u64..20) {
        let (_dir, _origin, controller) = setup(threshold);
        let key = CacheKey::new("/prop");
        prop_assert!(controller.admit(key.clone(), b"payload"));

        for expected in 1..=reads {
            let hit = controller.probe(&key).unwrap();
            prop_assert_eq!(hit.hits, expected);
            prop_assert_eq!(hit.promoted, expected == threshold + 1);
            let tier = if expected > threshold + 1 { CacheTier::L1 } else { CacheTier::L2 };
            prop_assert_eq!(hit.tier, tier);
        }

        prop_assert_eq!(controller.hit_count(&key), Some(reads));
        let state = if reads > threshold { TierState::L1Resident } else { TierState::L2Resident };
        prop_assert_eq!(controller.state(&key), state);
    }
}
