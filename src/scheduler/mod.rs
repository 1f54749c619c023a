//! Background driver that scans cache-enabled endpoints on a fixed tick
//! and triggers `CacheStore::refresh` when due, independently of request
//! traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::cache::CacheStore;
use crate::registry::{ConnectionRegistry, EndpointRegistry};
use crate::template::TemplateContext;

/// Runs one background task; per-endpoint refreshes it triggers are drawn
/// from a bounded pool sized to the available parallelism. Holds only
/// weak references to the registries and the cache store so a stop + drop
/// of the owning `Arc`s lets everything unwind without the scheduler
/// keeping them alive.
pub struct RefreshScheduler {
    registry: Weak<EndpointRegistry>,
    connections: Weak<ConnectionRegistry>,
    cache: Weak<CacheStore>,
    tick: Duration,
    drain_timeout: Duration,
    pool_size: usize,
    stopping: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
}

impl RefreshScheduler {
    pub fn new(
        registry: &Arc<EndpointRegistry>,
        connections: &Arc<ConnectionRegistry>,
        cache: &Arc<CacheStore>,
        tick: Duration,
        drain_timeout: Duration,
    ) -> Arc<Self> {
        let pool_size = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Arc::new(Self {
            registry: Arc::downgrade(registry),
            connections: Arc::downgrade(connections),
            cache: Arc::downgrade(cache),
            tick,
            drain_timeout,
            pool_size,
            stopping: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
        })
    }

    /// Spawns the scheduler's single driver task.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    /// Signals the driver to stop taking new ticks; in-flight refreshes
    /// run to completion (cooperative drain), not forcibly aborted.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.stop_signal.notify_one();
    }

    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    self.tick_once(&mut in_flight).await;
                }
                _ = self.stop_signal.notified() => {
                    break;
                }
            }
        }

        let _ = tokio::time::timeout(self.drain_timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
    }

    async fn tick_once(&self, in_flight: &mut JoinSet<()>) {
        let (Some(registry), Some(cache), Some(connections)) =
            (self.registry.upgrade(), self.cache.upgrade(), self.connections.upgrade())
        else {
            return;
        };

        let mut dispatched = 0usize;
        for endpoint in registry.list() {
            if dispatched >= self.pool_size {
                break;
            }
            let Some(cache_spec) = &endpoint.cache else { continue };
            if !cache_spec.enabled {
                continue;
            }
            if cache.is_refreshing(&endpoint.slug) {
                continue;
            }
            let due = match cache.last_success(&endpoint.slug) {
                None => true,
                Some(last) => {
                    let schedule = chrono::Duration::from_std(cache_spec.schedule).unwrap_or(chrono::Duration::zero());
                    chrono::Utc::now() >= last + schedule
                }
            };
            if !due {
                continue;
            }

            let mut ctx = TemplateContext::new();
            ctx.conn = connections.template_scope(&endpoint.connections);

            let cache = cache.clone();
            in_flight.spawn(async move {
                let _ = cache.refresh(endpoint, ctx).await;
            });
            dispatched += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{CacheSpec, Endpoint, EndpointKind, HttpMethod, RefreshMode, RetentionPolicy};
    use crate::engine::DataFusionEngine;
    use crate::executor::QueryExecutor;

    fn cached_endpoint(schedule: Duration) -> Endpoint {
        let mut endpoint = Endpoint::new(
            EndpointKind::Rest { method: HttpMethod::Get, path: "/customers".into() },
            "SELECT * FROM {{{ conn.main.table }}}",
        );
        endpoint.connections.push("main".into());
        endpoint.cache = Some(CacheSpec {
            enabled: true,
            table: "customers".into(),
            schema: "cache".into(),
            catalog: String::new(),
            mode: RefreshMode::Full,
            cursor: None,
            primary_key: vec![],
            schedule,
            retention: RetentionPolicy { keep_last_snapshots: Some(3), max_snapshot_age: None },
            invalidate_on_write: false,
            refresh_on_write: false,
            populate_template: "SELECT 1 AS id, 'Alice' AS name".into(),
        });
        endpoint
    }

    #[tokio::test]
    async fn tick_refreshes_due_endpoints_and_marks_them_fresh() {
        let engine = Arc::new(DataFusionEngine::new());
        let executor = Arc::new(QueryExecutor::new(engine, Duration::from_secs(5)));
        let cache = CacheStore::new(executor);
        let registry = Arc::new(EndpointRegistry::from_endpoints(vec![cached_endpoint(Duration::from_secs(3600))]).unwrap());
        let connections = Arc::new(ConnectionRegistry::new());

        let scheduler = RefreshScheduler::new(&registry, &connections, &cache, Duration::from_secs(3600), Duration::from_secs(5));
        let mut tasks = JoinSet::new();
        scheduler.tick_once(&mut tasks).await;
        while tasks.join_next().await.is_some() {}

        let slug = registry.list()[0].slug.clone();
        assert!(cache.last_success(&slug).is_some());
    }

    #[tokio::test]
    async fn tick_skips_endpoints_not_yet_due() {
        let engine = Arc::new(DataFusionEngine::new());
        let executor = Arc::new(QueryExecutor::new(engine, Duration::from_secs(5)));
        let cache = CacheStore::new(executor);
        let endpoint = Arc::new(cached_endpoint(Duration::from_secs(3600)));
        let registry = Arc::new(EndpointRegistry::from_endpoints(vec![]).unwrap());
        registry.put((*endpoint).clone());
        let connections = Arc::new(ConnectionRegistry::new());

        let mut ctx = TemplateContext::new();
        ctx.conn = connections.template_scope(&endpoint.connections);
        cache.refresh(endpoint.clone(), ctx).await.unwrap();

        let scheduler = RefreshScheduler::new(&registry, &connections, &cache, Duration::from_secs(3600), Duration::from_secs(5));
        let mut tasks = JoinSet::new();
        scheduler.tick_once(&mut tasks).await;
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn stop_prevents_further_ticks_from_being_scheduled() {
        let engine = Arc::new(DataFusionEngine::new());
        let executor = Arc::new(QueryExecutor::new(engine, Duration::from_secs(5)));
        let cache = CacheStore::new(executor);
        let registry = Arc::new(EndpointRegistry::from_endpoints(vec![]).unwrap());
        let connections = Arc::new(ConnectionRegistry::new());
        let scheduler = RefreshScheduler::new(&registry, &connections, &cache, Duration::from_millis(10), Duration::from_secs(1));

        scheduler.stop();
        assert!(scheduler.stopping.load(Ordering::SeqCst));
    }
}
