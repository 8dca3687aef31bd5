//! Autoscale scenario tests.
//!
//! One registry feeds both halves of the system, as in standalone mode:
//! the autoscaler changes the pool, and the routing sync and discovery
//! file follow it.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use ebbflow_autoscale::{Autoscaler, TickOutcome};
use ebbflow_core::{AutoscalerConfig, Instance, InstanceId};
use ebbflow_metrics::{MetricsError, MetricsSource, TargetPublisher};
use ebbflow_proxy::{RoutingTable, TableSync};
use ebbflow_runtime::{ContainerRuntime, InstanceRegistry, RuntimeResult};

/// In-memory container runtime.
#[derive(Default)]
struct Pool {
    instances: Mutex<Vec<Instance>>,
    next: AtomicU32,
}

impl Pool {
    fn with(count: u32) -> Self {
        let pool = Self::default();
        for _ in 0..count {
            pool.start();
        }
        pool
    }

    fn start(&self) -> InstanceId {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("c{n:03}");
        self.instances.lock().unwrap().push(Instance {
            id: id.clone(),
            name: format!("backend-{n}"),
            address: format!("172.18.0.{n}:5000"),
            created_at: u64::from(n),
        });
        id
    }
}

impl ContainerRuntime for Pool {
    async fn list_running(&self) -> RuntimeResult<Vec<Instance>> {
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn create_instance(&self) -> RuntimeResult<InstanceId> {
        Ok(self.start())
    }

    async fn remove_instance(&self, id: &str) -> RuntimeResult<()> {
        self.instances.lock().unwrap().retain(|i| i.id != id);
        Ok(())
    }
}

/// Utilization set by the test.
#[derive(Default)]
struct Gauge {
    value: Mutex<Option<f64>>,
}

impl Gauge {
    fn set(&self, value: Option<f64>) {
        *self.value.lock().unwrap() = value;
    }
}

impl MetricsSource for Gauge {
    async fn average_utilization(&self, _ids: &[InstanceId]) -> Result<f64, MetricsError> {
        let value = *self.value.lock().unwrap();
        value.ok_or(MetricsError::NoFreshSamples { instances: 0 })
    }
}

fn config(min: u32, max: u32) -> AutoscalerConfig {
    AutoscalerConfig {
        cpu_threshold: 0.7,
        min_instances: min,
        max_instances: max,
        cooldown_ticks: 0,
        ..AutoscalerConfig::default()
    }
}

struct Scenario {
    registry: Arc<InstanceRegistry<Pool>>,
    gauge: Arc<Gauge>,
    autoscaler: Autoscaler<Pool, Arc<Gauge>>,
    sync: TableSync<Pool>,
    _dir: tempfile::TempDir,
    discovery: std::path::PathBuf,
}

fn scenario(start: u32, min: u32, max: u32) -> Scenario {
    let registry = Arc::new(InstanceRegistry::new(Pool::with(start), Duration::from_secs(5)));
    let gauge = Arc::new(Gauge::default());
    let dir = tempfile::tempdir().unwrap();
    let discovery = dir.path().join("targets").join("backend.json");

    let autoscaler = Autoscaler::new(Arc::clone(&registry), Arc::clone(&gauge), &config(min, max))
        .with_publisher(TargetPublisher::new(&discovery, "autoscale_service", "backend"));
    let sync = TableSync::new(Arc::clone(&registry), Arc::new(RoutingTable::new(3, 0.2, 50.0)));

    Scenario {
        registry,
        gauge,
        autoscaler,
        sync,
        _dir: dir,
        discovery,
    }
}

fn published_targets(path: &std::path::Path) -> Vec<String> {
    let content = std::fs::read_to_string(path).unwrap();
    let groups: serde_json::Value = serde_json::from_str(&content).unwrap();
    groups[0]["targets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn load_spike_grows_pool_and_routing_follows() {
    let mut s = scenario(1, 1, 3);
    s.sync.refresh().await.unwrap();
    assert_eq!(s.sync.table().snapshot().len(), 1);

    s.gauge.set(Some(0.95));
    assert_eq!(s.autoscaler.tick().await, TickOutcome::Scaled { from: 1, to: 2 });
    assert_eq!(s.autoscaler.tick().await, TickOutcome::Scaled { from: 2, to: 3 });
    // At the ceiling.
    assert!(matches!(s.autoscaler.tick().await, TickOutcome::Steady { .. }));

    let stats = s.sync.refresh().await.unwrap();
    assert_eq!(stats.added, 2);
    assert_eq!(s.sync.table().snapshot().healthy().len(), 3);
    assert_eq!(published_targets(&s.discovery).len(), 3);
}

#[tokio::test]
async fn quiet_pool_shrinks_to_floor_oldest_kept() {
    let mut s = scenario(3, 1, 5);
    s.gauge.set(Some(0.05));

    assert_eq!(s.autoscaler.tick().await, TickOutcome::Scaled { from: 3, to: 2 });
    assert_eq!(s.autoscaler.tick().await, TickOutcome::Scaled { from: 2, to: 1 });
    assert!(matches!(s.autoscaler.tick().await, TickOutcome::Steady { .. }));

    let remaining = s.registry.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "c001");
    assert_eq!(published_targets(&s.discovery), ["172.18.0.1:5000"]);
}

#[tokio::test]
async fn missing_metrics_hold_the_pool() {
    let mut s = scenario(2, 1, 5);
    s.gauge.set(None);

    assert_eq!(s.autoscaler.tick().await, TickOutcome::MetricsUnavailable);
    assert_eq!(s.registry.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn pool_below_floor_is_restored_without_metrics() {
    let mut s = scenario(0, 2, 5);
    s.gauge.set(None);

    assert_eq!(s.autoscaler.tick().await, TickOutcome::Scaled { from: 0, to: 2 });
    s.sync.refresh().await.unwrap();
    assert_eq!(s.sync.table().snapshot().len(), 2);
}

#[tokio::test]
async fn resize_reaches_routing_table_without_waiting_for_interval() {
    let s = scenario(1, 1, 3);
    let scaled = Arc::new(tokio::sync::Notify::new());
    let mut autoscaler = s.autoscaler.with_scale_notify(Arc::clone(&scaled));
    let sync = Arc::new(s.sync.with_trigger(scaled));
    let (tx, rx) = tokio::sync::watch::channel(false);

    // The first tick refreshes at once; the next one is an hour away.
    let handle = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move { sync.run(Duration::from_secs(3600), rx).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sync.table().snapshot().len(), 1);

    s.gauge.set(Some(0.95));
    assert_eq!(autoscaler.tick().await, TickOutcome::Scaled { from: 1, to: 2 });

    tokio::time::timeout(Duration::from_secs(2), async {
        while sync.table().snapshot().len() != 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}
