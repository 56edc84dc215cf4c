//! Snapshot and baseline persistence
//!
//! Layout under the blob store root:
//!
//! ```text
//! sites/<site-key>/snapshots/<started-at-millis>-<run-id>.json   (append-only)
//! sites/<site-key>/baseline.json
//! artifacts/sha256/<xx>/<digest>
//! ```

use crate::{ArtifactStore, Baseline, BlobStore, Error, Result, Snapshot};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run history store for snapshots and baselines
#[derive(Clone)]
pub struct RunStore {
    blobs: Arc<dyn BlobStore>,
    artifacts: ArtifactStore,
}

impl RunStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            artifacts: ArtifactStore::new(blobs.clone()),
            blobs,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn snapshots_dir(site_key: &str) -> String {
        format!("sites/{}/snapshots", site_key)
    }

    fn baseline_path(site_key: &str) -> String {
        format!("sites/{}/baseline.json", site_key)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Persist a snapshot; an existing snapshot is never overwritten
    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<String> {
        let path = format!(
            "{}/{:013}-{}.json",
            Self::snapshots_dir(&snapshot.meta.site_key),
            snapshot.meta.started_at.timestamp_millis().max(0),
            snapshot.meta.run_id
        );
        let json = serde_json::to_vec_pretty(snapshot)?;
        self.blobs.write_new(&path, &json).await?;
        info!("Saved snapshot {} for {}", snapshot.meta.run_id, snapshot.meta.site_key);
        Ok(path)
    }

    /// All snapshots for a site, oldest first
    pub async fn list_snapshots(&self, site_key: &str) -> Result<Vec<Snapshot>> {
        let dir = Self::snapshots_dir(site_key);
        let mut snapshots = Vec::new();

        for name in self.blobs.list(&dir).await? {
            if !name.ends_with(".json") {
                continue;
            }
            let bytes = self.blobs.read(&format!("{}/{}", dir, name)).await?;
            match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", name, e),
            }
        }

        snapshots.sort_by(|a, b| {
            a.meta
                .started_at
                .cmp(&b.meta.started_at)
                .then_with(|| a.meta.run_id.cmp(&b.meta.run_id))
        });
        Ok(snapshots)
    }

    /// The most recent `limit` snapshots, oldest first
    pub async fn recent_snapshots(&self, site_key: &str, limit: usize) -> Result<Vec<Snapshot>> {
        let mut all = self.list_snapshots(site_key).await?;
        let skip = all.len().saturating_sub(limit);
        Ok(all.split_off(skip))
    }

    // ========================================================================
    // Baselines
    // ========================================================================

    pub async fn load_baseline(&self, site_key: &str) -> Result<Option<Baseline>> {
        match self.blobs.read(&Self::baseline_path(site_key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Save a baseline only when the site has none; returns whether it was created
    pub async fn create_baseline_if_absent(&self, baseline: &Baseline) -> Result<bool> {
        let json = serde_json::to_vec_pretty(baseline)?;
        match self
            .blobs
            .write_new(&Self::baseline_path(&baseline.site_key), &json)
            .await
        {
            Ok(()) => {
                info!(
                    "Created baseline for {} from run {}",
                    baseline.site_key, baseline.source_run_id
                );
                Ok(true)
            }
            Err(Error::AlreadyExists { .. }) => {
                debug!("Baseline already exists for {}", baseline.site_key);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the site's baseline; only reached through an explicit user action
    pub async fn update_baseline(&self, baseline: &Baseline) -> Result<()> {
        let json = serde_json::to_vec_pretty(baseline)?;
        self.blobs
            .write(&Self::baseline_path(&baseline.site_key), &json)
            .await?;
        info!(
            "Updated baseline for {} to run {}",
            baseline.site_key, baseline.source_run_id
        );
        Ok(())
    }
}
