//! File-based service discovery for the metrics store.
//!
//! Prometheus polls a `file_sd` JSON file for scrape targets. The publisher
//! rewrites it whenever the instance set changes so new containers are
//! scraped without a reload.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use ebbflow_core::Instance;

use crate::error::PublishError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Written,
    Unchanged,
}

#[derive(Debug, Serialize)]
struct TargetGroup<'a> {
    targets: Vec<&'a str>,
    labels: std::collections::BTreeMap<&'a str, &'a str>,
}

/// Writes the instance address list for the metrics store to pick up.
pub struct TargetPublisher {
    path: PathBuf,
    label: String,
    service: String,
}

impl TargetPublisher {
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
            service: service.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the target file for `instances`. Addresses are sorted so the
    /// output depends only on the set, not the listing order.
    pub fn render(&self, instances: &[Instance]) -> Result<String, PublishError> {
        let mut targets: Vec<&str> = instances.iter().map(|i| i.address.as_str()).collect();
        targets.sort_unstable();
        targets.dedup();

        let group = TargetGroup {
            targets,
            labels: [(self.label.as_str(), self.service.as_str())].into_iter().collect(),
        };
        let mut out = serde_json::to_string_pretty(&[group])?;
        out.push('\n');
        Ok(out)
    }

    /// Publish the current instance set.
    ///
    /// The file is replaced atomically (write to a sibling temp file, then
    /// rename), so the poller never sees a partial document. Identical
    /// content is not rewritten.
    pub async fn publish(&self, instances: &[Instance]) -> Result<PublishOutcome, PublishError> {
        let rendered = self.render(instances)?;

        match tokio::fs::read_to_string(&self.path).await {
            Ok(existing) if existing == rendered => {
                debug!(path = %self.path.display(), "discovery targets unchanged");
                return Ok(PublishOutcome::Unchanged);
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, rendered.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!(
            path = %self.path.display(),
            targets = instances.len(),
            "discovery targets published"
        );
        Ok(PublishOutcome::Written)
    }
}
