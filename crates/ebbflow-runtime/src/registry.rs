//! Instance registry: the live, ordered set of backend instances.
//!
//! `list()` always goes to the runtime; nothing is cached, so a container
//! that died since the last call simply disappears from the next listing.
//! `scale_to()` is serialized through an async mutex: two overlapping
//! calls never both act on the same observed count.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ebbflow_core::{Instance, InstanceId, sort_by_creation};

use crate::error::{RuntimeResult, ScaleError};
use crate::runtime::ContainerRuntime;

/// What a completed `scale_to` changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleOutcome {
    pub from: u32,
    pub to: u32,
    pub created: Vec<InstanceId>,
    pub removed: Vec<InstanceId>,
}

/// Owns access to the container runtime for one managed service.
pub struct InstanceRegistry<R> {
    runtime: R,
    scale_lock: Mutex<()>,
    scale_timeout: Duration,
}

impl<R: ContainerRuntime> InstanceRegistry<R> {
    pub fn new(runtime: R, scale_timeout: Duration) -> Self {
        Self {
            runtime,
            scale_lock: Mutex::new(()),
            scale_timeout,
        }
    }

    /// Access the underlying runtime.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Running instances, oldest first.
    pub async fn list(&self) -> RuntimeResult<Vec<Instance>> {
        let mut instances = self.runtime.list_running().await?;
        sort_by_creation(&mut instances);
        Ok(instances)
    }

    /// Bring the running instance count to `target`.
    ///
    /// Scale-down evicts the most recently created instances first.
    /// Partial progress is not rolled back; the next listing reflects it.
    pub async fn scale_to(&self, target: u32) -> Result<ScaleOutcome, ScaleError> {
        let _guard = self.scale_lock.lock().await;

        match tokio::time::timeout(self.scale_timeout, self.scale_locked(target)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(target, timeout = ?self.scale_timeout, "scale call timed out");
                Err(ScaleError::Timeout {
                    target,
                    timeout: self.scale_timeout,
                })
            }
        }
    }

    async fn scale_locked(&self, target: u32) -> Result<ScaleOutcome, ScaleError> {
        let fail = |source| ScaleError::Runtime { target, source };

        let current = self.list().await.map_err(fail)?;
        let from = current.len() as u32;
        let mut outcome = ScaleOutcome {
            from,
            to: target,
            created: Vec::new(),
            removed: Vec::new(),
        };

        if target > from {
            for _ in from..target {
                let id = self.runtime.create_instance().await.map_err(fail)?;
                debug!(instance = %id, "instance created");
                outcome.created.push(id);
            }
        } else if target < from {
            let excess = (from - target) as usize;
            for inst in current.iter().rev().take(excess) {
                self.runtime.remove_instance(&inst.id).await.map_err(fail)?;
                debug!(instance = %inst.short_id(), name = %inst.name, "instance removed");
                outcome.removed.push(inst.id.clone());
            }
        }

        if from != target {
            info!(from, to = target, "instance count changed");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::*;
    use crate::error::RuntimeError;

    /// In-memory runtime: creation times increase with every create.
    #[derive(Default)]
    struct FakeRuntime {
        instances: std::sync::Mutex<Vec<Instance>>,
        clock: AtomicU64,
        fail_create: AtomicBool,
        fail_list: AtomicBool,
        slow_create: AtomicBool,
    }

    impl FakeRuntime {
        fn with_instances(n: u32) -> Self {
            let rt = Self::default();
            for _ in 0..n {
                rt.push();
            }
            rt
        }

        fn push(&self) -> InstanceId {
            let t = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("inst-{t}");
            self.instances.lock().unwrap().push(Instance {
                id: id.clone(),
                name: format!("backend-{t}"),
                address: format!("10.0.0.{t}:5000"),
                created_at: 1000 + t,
            });
            id
        }

        fn ids(&self) -> Vec<String> {
            self.instances
                .lock()
                .unwrap()
                .iter()
                .map(|i| i.id.clone())
                .collect()
        }
    }

    impl ContainerRuntime for FakeRuntime {
        async fn list_running(&self) -> RuntimeResult<Vec<Instance>> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(RuntimeError::Connect("socket closed".to_string()));
            }
            // Reverse so the registry has to do the ordering itself.
            let mut list = self.instances.lock().unwrap().clone();
            list.reverse();
            Ok(list)
        }

        async fn create_instance(&self) -> RuntimeResult<InstanceId> {
            if self.slow_create.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(RuntimeError::Api {
                    status: 404,
                    message: "no such image".to_string(),
                });
            }
            Ok(self.push())
        }

        async fn remove_instance(&self, id: &str) -> RuntimeResult<()> {
            self.instances.lock().unwrap().retain(|i| i.id != id);
            Ok(())
        }
    }

    fn registry(rt: FakeRuntime) -> InstanceRegistry<FakeRuntime> {
        InstanceRegistry::new(rt, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let reg = registry(FakeRuntime::with_instances(3));
        let ids: Vec<String> = reg.list().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["inst-1", "inst-2", "inst-3"]);
    }

    #[tokio::test]
    async fn scale_up_creates_missing_instances() {
        let reg = registry(FakeRuntime::with_instances(1));
        let outcome = reg.scale_to(3).await.unwrap();

        assert_eq!(outcome.from, 1);
        assert_eq!(outcome.to, 3);
        assert_eq!(outcome.created.len(), 2);
        assert!(outcome.removed.is_empty());
        assert_eq!(reg.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn scale_down_evicts_newest_first() {
        let reg = registry(FakeRuntime::with_instances(3));
        let outcome = reg.scale_to(1).await.unwrap();

        assert_eq!(outcome.removed, vec!["inst-3", "inst-2"]);
        assert_eq!(reg.runtime().ids(), vec!["inst-1"]);
    }

    #[tokio::test]
    async fn scale_to_current_count_is_noop() {
        let reg = registry(FakeRuntime::with_instances(2));
        let outcome = reg.scale_to(2).await.unwrap();
        assert!(outcome.created.is_empty());
        assert!(outcome.removed.is_empty());
    }

    #[tokio::test]
    async fn runtime_rejection_is_scale_error() {
        let rt = FakeRuntime::with_instances(1);
        rt.fail_create.store(true, Ordering::SeqCst);
        let reg = registry(rt);

        let err = reg.scale_to(2).await.unwrap_err();
        assert!(matches!(err, ScaleError::Runtime { target: 2, .. }));
        assert_eq!(reg.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_failure_during_scale_is_scale_error() {
        let rt = FakeRuntime::with_instances(1);
        rt.fail_list.store(true, Ordering::SeqCst);
        let reg = registry(rt);
        assert!(matches!(
            reg.scale_to(2).await,
            Err(ScaleError::Runtime { .. })
        ));
    }

    #[tokio::test]
    async fn hung_runtime_times_out() {
        let rt = FakeRuntime::with_instances(1);
        rt.slow_create.store(true, Ordering::SeqCst);
        let reg = InstanceRegistry::new(rt, Duration::from_millis(50));

        let err = reg.scale_to(2).await.unwrap_err();
        assert!(matches!(err, ScaleError::Timeout { target: 2, .. }));
    }

    #[tokio::test]
    async fn concurrent_scale_calls_do_not_double_scale() {
        let reg = Arc::new(registry(FakeRuntime::with_instances(1)));

        let a = tokio::spawn({
            let reg = reg.clone();
            async move { reg.scale_to(3).await }
        });
        let b = tokio::spawn({
            let reg = reg.clone();
            async move { reg.scale_to(3).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // Both asked for 3; serialization means the second saw 3 and did nothing.
        assert_eq!(reg.list().await.unwrap().len(), 3);
    }
}
