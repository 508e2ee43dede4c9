//! Background workers
//!
//! Each worker is one pass function plus a per-tenant tokio loop that runs
//! the pass on an interval until shutdown. Workers share nothing but the
//! engine's store and ledgers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::config::WorkersConfig;
use crate::engine::Cairn;
use crate::error::{CairnError, Result};
use crate::memory::consolidation::CONSOLIDATED_TAG;
use crate::memory::{Layer, MemoryDraft, MemoryFilter, MemoryId, MemoryType};
use crate::reflection::ReflectionRecord;

pub const WARNING_TAG: &str = "warning";

/// What one snapshot pass produced
#[derive(Debug, Clone, Default)]
pub struct SnapshotReport {
    pub prune_triggered: bool,
    pub pruned: usize,
    pub warnings: Vec<MemoryId>,
}

/// Apply decay to every memory of the tenant
pub async fn run_decay_pass(cairn: &Cairn, tenant_id: &str) -> Result<usize> {
    cairn.store().decay(tenant_id, Utc::now()).await
}

/// Remove expired memories, then prune those below the importance floor.
/// Returns (expired, pruned).
pub async fn run_prune_pass(cairn: &Cairn, tenant_id: &str) -> Result<(usize, usize)> {
    let store = cairn.store();
    let expired = store.expire(tenant_id, Utc::now()).await?;
    let pruned = store
        .prune(tenant_id, store.lifecycle().prune_threshold)
        .await?;
    Ok((expired, pruned))
}

/// Consolidate sessions with no activity for `idle`. A session is skipped
/// when a consolidated memory already covers its latest source.
pub async fn run_consolidation_pass(
    cairn: &Cairn,
    tenant_id: &str,
    idle: chrono::Duration,
) -> Result<Vec<MemoryId>> {
    let now = Utc::now();
    let memories = cairn.store().query(&MemoryFilter::new(), tenant_id).await?;

    #[derive(Default)]
    struct Session {
        last_source: Option<DateTime<Utc>>,
        last_activity: Option<DateTime<Utc>>,
        last_consolidated: Option<DateTime<Utc>>,
    }

    let mut sessions: BTreeMap<String, Session> = BTreeMap::new();
    for memory in &memories {
        let Some(ref session_id) = memory.session_id else {
            continue;
        };
        let entry = sessions.entry(session_id.clone()).or_default();
        let activity = memory.created_at.max(memory.last_accessed_at);
        entry.last_activity = entry.last_activity.max(Some(activity));
        if memory.has_tag(CONSOLIDATED_TAG) {
            entry.last_consolidated = entry.last_consolidated.max(Some(memory.created_at));
        } else if memory.layer == Layer::Working || memory.memory_type == MemoryType::Episodic {
            entry.last_source = entry.last_source.max(Some(memory.created_at));
        }
    }

    let mut created = Vec::new();
    for (session_id, session) in sessions {
        let Some(last_source) = session.last_source else {
            continue;
        };
        if session.last_activity.is_some_and(|t| now - t < idle) {
            continue;
        }
        if session.last_consolidated.is_some_and(|t| t >= last_source) {
            continue;
        }
        match cairn.store().consolidate(&session_id, tenant_id).await {
            Ok(id) => created.push(id),
            Err(CairnError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(created)
}

/// Refresh the structure and dynamics snapshots, prune when the policy
/// says so, and persist each alert as a reflective warning memory.
pub async fn run_snapshot_pass(
    cairn: &Cairn,
    tenant_id: &str,
    window: chrono::Duration,
) -> Result<SnapshotReport> {
    cairn.analyze_structure(tenant_id).await?;
    let dynamics = cairn.track_dynamics(tenant_id, window).await?;

    let mut report = SnapshotReport::default();
    let (trigger, decision) = cairn.decide_prune_trigger(tenant_id);
    if trigger {
        tracing::info!(tenant_id, rationale = %decision.rationale, "Prune triggered by policy");
        report.prune_triggered = true;
        report.pruned = cairn
            .store()
            .prune(tenant_id, cairn.store().lifecycle().prune_threshold)
            .await?;
    }

    for alert in &dynamics.alerts {
        let alarm = CairnError::DriftAnomalyDetected {
            tenant_id: tenant_id.to_string(),
            detail: alert.describe(),
        };
        tracing::warn!(tenant_id, alert = %alarm, "Dynamics alert");
        let draft = MemoryDraft::new(
            tenant_id,
            Layer::Reflective.as_str(),
            MemoryType::Reflection.as_str(),
            alarm.to_string(),
        )
        .with_importance(0.8)
        .with_tag(WARNING_TAG)
        .with_metadata("alert", serde_json::to_value(alert)?)
        .with_metadata("snapshot_at", serde_json::json!(dynamics.taken_at));
        report.warnings.push(cairn.store_memory(draft).await?);
    }
    Ok(report)
}

/// Evaluate every pending outcome of the tenant, then forget settled
/// records past their retention
pub async fn run_reflection_pass(cairn: &Cairn, tenant_id: &str) -> Result<Vec<ReflectionRecord>> {
    let done = cairn.reflect_pending(tenant_id).await?;
    cairn.evict_settled_reflections(tenant_id, Utc::now());
    Ok(done)
}

/// Handle on the spawned worker loops
pub struct Workers {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Spawn every worker loop for every configured tenant
    pub fn spawn(cairn: Arc<Cairn>, config: &WorkersConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let mut workers = Self {
            shutdown_tx,
            handles: Vec::new(),
        };

        let idle = chrono::Duration::minutes(config.session_idle_minutes as i64);
        let window = chrono::Duration::seconds(config.snapshot_interval_secs as i64);

        for tenant in &config.tenants {
            workers.every(&cairn, tenant, "decay", config.decay_interval_secs, |c, t| {
                async move { run_decay_pass(&c, &t).await.map(|n| n.to_string()) }.boxed()
            });
            workers.every(&cairn, tenant, "prune", config.prune_interval_secs, |c, t| {
                async move {
                    run_prune_pass(&c, &t)
                        .await
                        .map(|(expired, pruned)| format!("expired={expired} pruned={pruned}"))
                }
                .boxed()
            });
            workers.every(
                &cairn,
                tenant,
                "consolidation",
                config.consolidation_interval_secs,
                move |c, t| {
                    async move {
                        run_consolidation_pass(&c, &t, idle)
                            .await
                            .map(|ids| ids.len().to_string())
                    }
                    .boxed()
                },
            );
            workers.every(
                &cairn,
                tenant,
                "snapshot",
                config.snapshot_interval_secs,
                move |c, t| {
                    async move {
                        run_snapshot_pass(&c, &t, window)
                            .await
                            .map(|r| format!("pruned={} warnings={}", r.pruned, r.warnings.len()))
                    }
                    .boxed()
                },
            );
            workers.every(
                &cairn,
                tenant,
                "reflection",
                config.reflection_interval_secs,
                |c, t| async move { run_reflection_pass(&c, &t).await.map(|r| r.len().to_string()) }.boxed(),
            );
        }

        tracing::info!(
            tenants = config.tenants.len(),
            loops = workers.handles.len(),
            "Workers started"
        );
        workers
    }

    fn every<F>(&mut self, cairn: &Arc<Cairn>, tenant: &str, name: &'static str, secs: u64, pass: F)
    where
        F: Fn(Arc<Cairn>, String) -> BoxFuture<'static, Result<String>>
            + Send
            + 'static,
    {
        let cairn = Arc::clone(cairn);
        let tenant = tenant.to_string();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = Duration::from_secs(secs.max(1));

        self.handles.push(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match pass(Arc::clone(&cairn), tenant.clone()).await {
                            Ok(summary) => {
                                tracing::debug!(worker = name, tenant_id = %tenant, %summary, "Worker pass done")
                            }
                            Err(e) if e.is_fatal() => {
                                tracing::error!(worker = name, tenant_id = %tenant, error = %e, "Worker pass aborted")
                            }
                            Err(e) => {
                                tracing::warn!(worker = name, tenant_id = %tenant, error = %e, "Worker pass failed")
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::debug!(worker = name, tenant_id = %tenant, "Worker stopped");
        }));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop and wait for them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::aged_memory;

    fn engine() -> Arc<Cairn> {
        Arc::new(Cairn::in_memory(Config::default()).unwrap())
    }

    mod passes {
        use super::*;

        #[tokio::test]
        async fn test_prune_pass_expires_and_prunes() {
            let cairn = engine();
            let store = cairn.store();
            let mut expired = aged_memory(
                "t1",
                Layer::Sensory,
                MemoryType::Sensory,
                "flash",
                0.9,
                chrono::Duration::days(2),
            );
            expired.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
            store.insert(expired).await.unwrap();
            let faint = aged_memory(
                "t1",
                Layer::LongTerm,
                MemoryType::Semantic,
                "barely remembered",
                0.01,
                chrono::Duration::days(1),
            );
            store.insert(faint).await.unwrap();
            let kept = aged_memory(
                "t1",
                Layer::LongTerm,
                MemoryType::Semantic,
                "rust borrow checker rules",
                0.9,
                chrono::Duration::days(1),
            );
            let kept_id = store.insert(kept).await.unwrap();

            let (expired, pruned) = run_prune_pass(&cairn, "t1").await.unwrap();
            assert_eq!((expired, pruned), (1, 1));
            assert_eq!(store.count("t1").await.unwrap(), 1);
            assert!(store.get(kept_id, "t1").await.unwrap().is_some());
        }

        #[tokio::test]
        async fn test_consolidation_pass_runs_once_per_session() {
            let cairn = engine();
            for content in ["Deployed Atlas to staging", "Atlas rollout finished"] {
                let mut m = aged_memory(
                    "t1",
                    Layer::Working,
                    MemoryType::Episodic,
                    content,
                    0.6,
                    chrono::Duration::hours(2),
                );
                m.session_id = Some("s1".to_string());
                cairn.store().insert(m).await.unwrap();
            }
            let idle = chrono::Duration::minutes(30);

            let first = run_consolidation_pass(&cairn, "t1", idle).await.unwrap();
            assert_eq!(first.len(), 1);
            let second = run_consolidation_pass(&cairn, "t1", idle).await.unwrap();
            assert!(second.is_empty());
        }

        #[tokio::test]
        async fn test_consolidation_pass_skips_active_sessions() {
            let cairn = engine();
            let draft = MemoryDraft::new("t1", "working", "episodic", "still typing").with_session("s1");
            cairn.store_memory(draft).await.unwrap();
            let created = run_consolidation_pass(&cairn, "t1", chrono::Duration::minutes(30))
                .await
                .unwrap();
            assert!(created.is_empty());
        }

        #[tokio::test]
        async fn test_snapshot_pass_on_empty_tenant() {
            let cairn = engine();
            let report = run_snapshot_pass(&cairn, "t1", chrono::Duration::hours(1))
                .await
                .unwrap();
            assert!(report.warnings.is_empty());
            assert!(cairn.structure().latest("t1").is_some());
            assert!(cairn.dynamics().latest("t1").is_some());
        }
    }

    mod loops {
        use super::*;

        #[tokio::test]
        async fn test_spawn_and_shutdown() {
            let cairn = engine();
            let config = WorkersConfig {
                tenants: vec!["t1".to_string(), "t2".to_string()],
                ..Default::default()
            };
            let workers = Workers::spawn(cairn, &config);
            assert_eq!(workers.len(), 10);
            tokio::time::timeout(Duration::from_secs(5), workers.shutdown())
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_no_tenants_no_loops() {
            let workers = Workers::spawn(engine(), &WorkersConfig::default());
            assert!(workers.is_empty());
            workers.shutdown().await;
        }
    }
}
