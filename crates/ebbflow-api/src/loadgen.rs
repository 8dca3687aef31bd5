//! Synthetic load generator.
//!
//! A fixed number of workers loop requests through the dispatcher, so the
//! load spreads across the pool exactly as client traffic would. Used to
//! drive CPU up and watch the autoscaler react.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use ebbflow_proxy::{DispatchError, Dispatcher, ForwardRequest, Upstream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Started,
    Stopped,
}

impl LoadState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadState::Started => "started",
            LoadState::Stopped => "stopped",
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

pub struct LoadGenerator {
    concurrency: u32,
    path: String,
    running: Mutex<Option<Running>>,
    sent: Arc<AtomicU64>,
}

impl LoadGenerator {
    pub fn new(concurrency: u32, path: impl Into<String>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            path: path.into(),
            running: Mutex::new(None),
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Requests issued since the process started.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Start the workers if stopped, stop them if running.
    pub fn toggle<U: Upstream>(&self, dispatcher: &Arc<Dispatcher<U>>) -> LoadState {
        let mut running = self.running.lock();
        if let Some(current) = running.take() {
            let _ = current.shutdown.send(true);
            for worker in &current.workers {
                worker.abort();
            }
            info!(sent = self.sent(), "load generator stopped");
            return LoadState::Stopped;
        }

        let (tx, rx) = watch::channel(false);
        let workers = (0..self.concurrency)
            .map(|_| {
                let dispatcher = Arc::clone(dispatcher);
                let request = ForwardRequest::get(self.path.clone());
                let sent = Arc::clone(&self.sent);
                let rx = rx.clone();
                tokio::spawn(worker(dispatcher, request, sent, rx))
            })
            .collect();
        *running = Some(Running {
            shutdown: tx,
            workers,
        });
        info!(concurrency = self.concurrency, path = %self.path, "load generator started");
        LoadState::Started
    }

    /// Stop the workers if running.
    pub fn stop(&self) {
        if let Some(current) = self.running.lock().take() {
            let _ = current.shutdown.send(true);
            for worker in &current.workers {
                worker.abort();
            }
        }
    }
}

impl Drop for LoadGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn worker<U: Upstream>(
    dispatcher: Arc<Dispatcher<U>>,
    request: ForwardRequest,
    sent: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = dispatcher.forward(&request) => {
                sent.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = result {
                    debug!(error = %e, "load request failed");
                    // Back off instead of spinning on a failing pool.
                    let pause = match e {
                        DispatchError::NoTargetsAvailable => Duration::from_millis(500),
                        DispatchError::Upstream { .. } => Duration::from_millis(100),
                    };
                    tokio::time::sleep(pause).await;
                }
                tokio::task::yield_now().await;
            }
            _ = shutdown.changed() => break,
        }
    }
}
