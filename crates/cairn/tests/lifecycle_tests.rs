//! Integration tests for the memory lifecycle
//!
//! Tests verify that:
//! - Drafts are validated and tenant-scoped
//! - Importance stays within [0, 1] under any mix of decay and access
//! - Decay never raises importance and access raises it by a bounded boost
//! - Expire + Prune removes stale memories and prune is idempotent
//! - Consolidation folds a session into one long-term memory

use std::sync::Arc;

use chrono::{Duration, Utc};
use proptest::prelude::*;

use cairn::config::Config;
use cairn::engine::Cairn;
use cairn::error::CairnError;
use cairn::memory::{Layer, MemoryDraft, MemoryFilter, MemoryType};
use cairn::testing::aged_memory;

fn engine() -> Cairn {
    Cairn::in_memory(Config::default()).unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Store & Query
// =============================================================================

#[tokio::test]
async fn test_store_and_query_are_tenant_scoped() {
    let cairn = engine();
    let a = cairn
        .store_memory(MemoryDraft::new("alpha", "long_term", "semantic", "Alpha prefers Rust"))
        .await
        .unwrap();
    cairn
        .store_memory(MemoryDraft::new("beta", "long_term", "semantic", "Beta prefers Go"))
        .await
        .unwrap();

    let alpha = cairn.query(&MemoryFilter::new(), "alpha").await.unwrap();
    assert_eq!(alpha.len(), 1);
    assert_eq!(alpha[0].id, a);

    assert!(cairn.get(a, "beta").await.unwrap().is_none());
    assert!(!cairn.update_access(a, "beta").await.unwrap());
}

#[tokio::test]
async fn test_store_rejects_invalid_drafts() {
    let cairn = engine();

    let result = cairn
        .store_memory(MemoryDraft::new("  ", "working", "episodic", "x"))
        .await;
    assert!(matches!(result, Err(CairnError::TenantRequired)));

    let result = cairn
        .store_memory(MemoryDraft::new("t1", "attic", "episodic", "x"))
        .await;
    assert!(matches!(result, Err(CairnError::Validation(_))));

    let result = cairn
        .store_memory(MemoryDraft::new("t1", "working", "episodic", "x").with_importance(-0.1))
        .await;
    assert!(matches!(result, Err(CairnError::Validation(_))));

    assert_eq!(cairn.store().count("t1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_query_filters_by_layer_and_tag() {
    let cairn = engine();
    cairn
        .store_memory(MemoryDraft::new("t1", "working", "episodic", "ran the migrations").with_tag("db"))
        .await
        .unwrap();
    cairn
        .store_memory(MemoryDraft::new("t1", "long_term", "semantic", "postgres is the primary store").with_tag("db"))
        .await
        .unwrap();

    let filter = MemoryFilter::new()
        .with_layers(vec![Layer::LongTerm])
        .with_tags(vec!["db".to_string()]);
    let found = cairn.query(&filter, "t1").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].memory_type, MemoryType::Semantic);
}

// =============================================================================
// Decay & Access
// =============================================================================

#[tokio::test]
async fn test_decay_is_monotone_between_accesses() {
    let cairn = engine();
    let id = cairn
        .store_memory(MemoryDraft::new("t1", "working", "episodic", "standup notes").with_importance(0.8))
        .await
        .unwrap();

    let now = Utc::now();
    let mut last = 0.8;
    for day in 1..=5 {
        cairn.store().decay("t1", now + Duration::days(day)).await.unwrap();
        let importance = cairn.get(id, "t1").await.unwrap().unwrap().importance;
        assert!(importance <= last, "day {day}: {importance} > {last}");
        last = importance;
    }
    assert!(last < 0.8);
}

#[tokio::test]
async fn test_access_boost_is_bounded() {
    let cairn = engine();
    let id = cairn
        .store_memory(MemoryDraft::new("t1", "working", "episodic", "pairing session").with_importance(0.5))
        .await
        .unwrap();

    assert!(cairn.update_access(id, "t1").await.unwrap());
    let once = cairn.get(id, "t1").await.unwrap().unwrap();
    let boost = cairn.config().lifecycle.access_boost(Layer::Working);
    assert!(once.importance > 0.5);
    assert!(once.importance <= 0.5 + boost + 1e-9);
    assert_eq!(once.usage_count, 1);

    for _ in 0..20 {
        cairn.update_access(id, "t1").await.unwrap();
    }
    let saturated = cairn.get(id, "t1").await.unwrap().unwrap();
    assert_eq!(saturated.importance, 1.0);
    assert_eq!(saturated.usage_count, 21);
}

#[tokio::test]
async fn test_access_after_long_idle_never_lowers_importance() {
    let cairn = engine();
    let idle = aged_memory(
        "t1",
        Layer::Working,
        MemoryType::Episodic,
        "retro action items",
        0.8,
        Duration::days(10),
    );
    let id = cairn.store().insert(idle).await.unwrap();

    assert!(cairn.update_access(id, "t1").await.unwrap());
    let accessed = cairn.get(id, "t1").await.unwrap().unwrap();
    let boost = cairn.config().lifecycle.access_boost(Layer::Working);
    assert!(accessed.importance > 0.8, "importance {}", accessed.importance);
    assert!((accessed.importance - (0.8 + boost).min(1.0)).abs() < 1e-9);

    // The idle stretch is still charged by the next decay pass
    cairn.store().decay("t1", Utc::now()).await.unwrap();
    let decayed = cairn.get(id, "t1").await.unwrap().unwrap();
    assert!(decayed.importance < accessed.importance);
}

#[tokio::test]
async fn test_concurrent_access_and_decay_lose_no_update() {
    let cairn = Arc::new(engine());
    let id = cairn
        .store_memory(MemoryDraft::new("t1", "long_term", "semantic", "shared fact"))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let cairn = Arc::clone(&cairn);
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                cairn.update_access(id, "t1").await.map(|_| ())
            } else {
                cairn.store().decay("t1", Utc::now()).await.map(|_| ())
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let memory = cairn.get(id, "t1").await.unwrap().unwrap();
    assert_eq!(memory.usage_count, 5);
    assert!((0.0..=1.0).contains(&memory.importance));
}

proptest! {
    /// Importance never leaves [0, 1] whatever the mix of decay and access.
    #[test]
    fn importance_stays_bounded(
        initial in 0.0f64..=1.0,
        steps in prop::collection::vec((any::<bool>(), 0i64..400), 1..20),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let cairn = engine();
            let id = cairn
                .store_memory(
                    MemoryDraft::new("t1", "sensory", "sensory", "blinking cursor")
                        .with_importance(initial),
                )
                .await
                .unwrap();

            let mut now = Utc::now();
            for (access, hours) in steps {
                if access {
                    cairn.update_access(id, "t1").await.unwrap();
                } else {
                    now += Duration::hours(hours);
                    cairn.store().decay("t1", now).await.unwrap();
                }
                let importance = cairn.get(id, "t1").await.unwrap().unwrap().importance;
                prop_assert!((0.0..=1.0).contains(&importance), "importance {}", importance);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// =============================================================================
// Expire & Prune
// =============================================================================

#[tokio::test]
async fn test_expire_then_prune_keeps_only_live_memory() {
    let cairn = engine();

    let mut stale = aged_memory("T", Layer::Sensory, MemoryType::Sensory, "flicker", 0.05, Duration::days(3));
    stale.expires_at = Some(stale.created_at + Duration::hours(24));
    let stale_id = cairn.store().insert(stale).await.unwrap();

    let fresh_id = cairn
        .store_memory(MemoryDraft::new("T", "long_term", "semantic", "the deploy key rotates monthly").with_importance(0.9))
        .await
        .unwrap();
    cairn.update_access(fresh_id, "T").await.unwrap();

    let now = Utc::now();
    let expired = cairn.store().expire("T", now).await.unwrap();
    let pruned = cairn
        .store()
        .prune("T", cairn.config().lifecycle.prune_threshold)
        .await
        .unwrap();
    assert_eq!(expired + pruned, 1);

    let left = cairn.query(&MemoryFilter::new(), "T").await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, fresh_id);
    assert!(cairn.get(stale_id, "T").await.unwrap().is_none());
}

#[tokio::test]
async fn test_prune_is_idempotent() {
    let cairn = engine();
    for (content, importance) in [("faint", 0.02), ("weak", 0.05), ("solid", 0.7), ("strong", 0.95)] {
        cairn
            .store_memory(MemoryDraft::new("t1", "long_term", "semantic", content).with_importance(importance))
            .await
            .unwrap();
    }

    assert_eq!(cairn.store().prune("t1", 0.1).await.unwrap(), 2);
    let mut after_first: Vec<_> = cairn
        .query(&MemoryFilter::new(), "t1")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();

    assert_eq!(cairn.store().prune("t1", 0.1).await.unwrap(), 0);
    let mut after_second: Vec<_> = cairn
        .query(&MemoryFilter::new(), "t1")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();

    after_first.sort();
    after_second.sort();
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn test_reflective_memories_survive_ordinary_prune() {
    let cairn = engine();
    let id = cairn
        .store_memory(MemoryDraft::new("t1", "reflective", "reflection", "retry with backoff").with_importance(0.05))
        .await
        .unwrap();
    assert_eq!(cairn.store().prune("t1", 0.1).await.unwrap(), 0);
    assert!(cairn.get(id, "t1").await.unwrap().is_some());
}

// =============================================================================
// Consolidation
// =============================================================================

#[tokio::test]
async fn test_consolidate_session_keeps_sources() {
    let cairn = engine();
    for content in [
        "Investigated the Kafka consumer lag.",
        "Kafka lag came from a slow partition rebalance.",
        "Raised the session timeout on the consumer group.",
    ] {
        cairn
            .store_memory(MemoryDraft::new("t1", "working", "episodic", content).with_session("incident-7"))
            .await
            .unwrap();
    }

    let id = cairn.consolidate("incident-7", "t1").await.unwrap();
    let summary = cairn.get(id, "t1").await.unwrap().unwrap();
    assert_eq!(summary.layer, Layer::LongTerm);
    assert_eq!(summary.source_ids.len(), 3);
    assert_eq!(cairn.store().count("t1").await.unwrap(), 4);

    let empty = cairn.consolidate("no-such-session", "t1").await;
    assert!(matches!(empty, Err(CairnError::NotFound(_))));
}
