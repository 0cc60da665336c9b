//! Scan store contract and in-memory implementation
//!
//! The orchestrator is the sole writer per scan; every other service only
//! reads. `update` takes a closure so an implementation can make the patch
//! atomic per record, which is the contract any durable backend must keep.

use crate::models::{Scan, ScanStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Storage contract for scan records
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Insert a new scan; fails with `Conflict` when the id already exists.
    async fn create(&self, scan: Scan) -> Result<()>;

    /// Fetch a scan by id.
    async fn get(&self, scan_id: &str) -> Result<Scan>;

    /// List scans, most recent first, optionally filtered by status.
    async fn list(&self, limit: usize, status: Option<ScanStatus>) -> Result<Vec<Scan>>;

    /// Apply a patch to one scan atomically and return the updated record.
    async fn update(
        &self,
        scan_id: &str,
        patch: Box<dyn for<'a> FnOnce(&'a mut Scan) + Send + 'static>,
    ) -> Result<Scan>;

    /// Remove a scan record.
    async fn delete(&self, scan_id: &str) -> Result<()>;
}

/// In-process scan store backed by a `RwLock<HashMap>`
#[derive(Clone, Default)]
pub struct MemoryScanStore {
    scans: Arc<RwLock<HashMap<String, Scan>>>,
}

impl MemoryScanStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop terminal scans older than the given horizon.
    ///
    /// Returns the number of records collected. Running and pending scans are
    /// never collected.
    pub async fn gc(&self, horizon: Duration) -> usize {
        let cutoff = Utc::now() - horizon;
        let mut scans = self.scans.write().await;
        let before = scans.len();
        scans.retain(|_, scan| {
            !(scan.status.is_terminal()
                && scan.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        let collected = before - scans.len();
        if collected > 0 {
            debug!("garbage-collected {} scan record(s)", collected);
        }
        collected
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn create(&self, scan: Scan) -> Result<()> {
        let mut scans = self.scans.write().await;
        if scans.contains_key(&scan.scan_id) {
            return Err(Error::Conflict(format!(
                "scan {} already exists",
                scan.scan_id
            )));
        }
        scans.insert(scan.scan_id.clone(), scan);
        Ok(())
    }

    async fn get(&self, scan_id: &str) -> Result<Scan> {
        let scans = self.scans.read().await;
        scans
            .get(scan_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("scan {scan_id}")))
    }

    async fn list(&self, limit: usize, status: Option<ScanStatus>) -> Result<Vec<Scan>> {
        let scans = self.scans.read().await;
        let mut out: Vec<Scan> = scans
            .values()
            .filter(|s| status.map(|f| s.status == f).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn update(
        &self,
        scan_id: &str,
        patch: Box<dyn for<'a> FnOnce(&'a mut Scan) + Send + 'static>,
    ) -> Result<Scan> {
        let mut scans = self.scans.write().await;
        let scan = scans
            .get_mut(scan_id)
            .ok_or_else(|| Error::NotFound(format!("scan {scan_id}")))?;
        patch(scan);
        Ok(scan.clone())
    }

    async fn delete(&self, scan_id: &str) -> Result<()> {
        let mut scans = self.scans.write().await;
        scans
            .remove(scan_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("scan {scan_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScanConfig, ScanTarget};

    fn scan() -> Scan {
        Scan::new(
            ScanTarget::GitUrl {
                url: "https://example.test/repos/Vault".to_string(),
            },
            None,
            ScanConfig::default(),
        )
    }

    #[tokio::test]
    async fn create_get_round_trip() -> anyhow::Result<()> {
        let store = MemoryScanStore::new();
        let s = scan();
        let id = s.scan_id.clone();
        store.create(s).await?;

        let fetched = store.get(&id).await?;
        assert_eq!(fetched.scan_id, id);
        assert_eq!(fetched.status, ScanStatus::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() -> anyhow::Result<()> {
        let store = MemoryScanStore::new();
        let s = scan();
        store.create(s.clone()).await?;
        assert!(matches!(
            store.create(s).await,
            Err(Error::Conflict(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_by_status_most_recent_first() -> anyhow::Result<()> {
        let store = MemoryScanStore::new();
        for _ in 0..3 {
            store.create(scan()).await?;
        }
        let mut failed = scan();
        failed.finish(ScanStatus::Failed, Some("boom".to_string()));
        let failed_id = failed.scan_id.clone();
        store.create(failed).await?;

        let pending = store.list(10, Some(ScanStatus::Pending)).await?;
        assert_eq!(pending.len(), 3);

        let failed = store.list(10, Some(ScanStatus::Failed)).await?;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].scan_id, failed_id);

        let capped = store.list(2, None).await?;
        assert_eq!(capped.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn update_applies_patch_atomically() -> anyhow::Result<()> {
        let store = MemoryScanStore::new();
        let s = scan();
        let id = s.scan_id.clone();
        store.create(s).await?;

        let updated = store
            .update(
                &id,
                Box::new(|scan| {
                    scan.status = ScanStatus::Running;
                    scan.progress = 10;
                }),
            )
            .await?;
        assert_eq!(updated.status, ScanStatus::Running);
        assert_eq!(updated.progress, 10);
        Ok(())
    }

    #[tokio::test]
    async fn gc_collects_only_old_terminal_scans() -> anyhow::Result<()> {
        let store = MemoryScanStore::new();
        let mut old = scan();
        old.finish(ScanStatus::Completed, None);
        old.completed_at = Some(Utc::now() - Duration::hours(48));
        store.create(old).await?;
        store.create(scan()).await?;

        let collected = store.gc(Duration::hours(24)).await;
        assert_eq!(collected, 1);
        assert_eq!(store.list(10, None).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_ids_surface_not_found() {
        let store = MemoryScanStore::new();
        assert!(matches!(store.get("nope").await, Err(Error::NotFound(_))));
        assert!(matches!(
            store.delete("nope").await,
            Err(Error::NotFound(_))
        ));
    }
}
