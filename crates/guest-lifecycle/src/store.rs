//! Persistence of status records

use async_trait::async_trait;
use dashmap::DashMap;
use guest_core::{GuestError, Result, StatusRecord};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Durable store of status records, keyed by instance id.
#[async_trait]
pub trait StatusStore: Send + Sync + std::fmt::Debug {
    /// `Ok(None)` when no record exists for the instance yet.
    async fn find_by(&self, instance_id: &str) -> Result<Option<StatusRecord>>;

    async fn save(&self, record: &StatusRecord) -> Result<()>;
}

/// In-process store. Read and write failures can be injected.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    records: Arc<DashMap<String, StatusRecord>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, instance_id: &str) -> Option<StatusRecord> {
        self.records.get(instance_id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn find_by(&self, instance_id: &str) -> Result<Option<StatusRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(GuestError::persistence(instance_id, "store unreachable"));
        }
        Ok(self.get(instance_id))
    }

    async fn save(&self, record: &StatusRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GuestError::persistence(&record.instance_id, "write rejected"));
        }
        self.records
            .insert(record.instance_id.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One JSON document per instance under a state directory.
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    dir: PathBuf,
}

impl FileStatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, instance_id: &str) -> PathBuf {
        self.dir.join(format!("{instance_id}.status.json"))
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn find_by(&self, instance_id: &str) -> Result<Option<StatusRecord>> {
        let path = self.record_path(instance_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GuestError::persistence(instance_id, e)),
        };
        let record = serde_json::from_slice(&bytes).map_err(|e| {
            GuestError::persistence(instance_id, format!("corrupt record {}: {e}", path.display()))
        })?;
        Ok(Some(record))
    }

    async fn save(&self, record: &StatusRecord) -> Result<()> {
        let instance_id = record.instance_id.as_str();
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| GuestError::persistence(instance_id, e))?;

        let path = self.record_path(instance_id);
        let staging = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;

        // Readers see either the previous record or the new one.
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| GuestError::persistence(instance_id, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| GuestError::persistence(instance_id, e))?;

        debug!(instance_id, status = %record.status, path = %path.display(), "Status record saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guest_core::ServiceStatus;

    #[tokio::test]
    async fn memory_store_round_trips_and_counts_writes() {
        let store = MemoryStatusStore::new();
        assert!(store.find_by("abc123").await.unwrap().is_none());

        store
            .save(&StatusRecord::new("abc123", ServiceStatus::Building))
            .await
            .unwrap();
        let found = store.find_by("abc123").await.unwrap().unwrap();
        assert_eq!(found.status, ServiceStatus::Building);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn memory_store_rejects_writes_when_told_to() {
        let store = MemoryStatusStore::new();
        store.fail_writes(true);
        let err = store
            .save(&StatusRecord::new("abc123", ServiceStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, GuestError::Persistence { .. }));
        assert!(store.get("abc123").is_none());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn file_store_returns_none_for_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusStore::new(dir.path());
        assert!(store.find_by("abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_persists_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusStore::new(dir.path().join("state"));

        let mut record = StatusRecord::new("abc123", ServiceStatus::Building);
        store.save(&record).await.unwrap();
        record.set_status(ServiceStatus::Running);
        store.save(&record).await.unwrap();

        let reopened = FileStatusStore::new(dir.path().join("state"));
        let found = reopened.find_by("abc123").await.unwrap().unwrap();
        assert_eq!(found, record);
        assert!(!dir.path().join("state/abc123.status.json.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc123.status.json"), b"{not json").unwrap();
        let store = FileStatusStore::new(dir.path());
        let err = store.find_by("abc123").await.unwrap_err();
        assert!(matches!(err, GuestError::Persistence { .. }));
    }

    fn any_status() -> impl proptest::strategy::Strategy<Value = ServiceStatus> {
        proptest::sample::select(vec![
            ServiceStatus::Unknown,
            ServiceStatus::Building,
            ServiceStatus::Running,
            ServiceStatus::Shutdown,
            ServiceStatus::Failed,
        ])
    }

    proptest::proptest! {
        #[test]
        fn file_store_keeps_the_last_saved_status(
            statuses in proptest::collection::vec(any_status(), 1..8),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let store = FileStatusStore::new(dir.path());
            let mut record = StatusRecord::new("abc123", statuses[0]);
            for status in &statuses {
                record.set_status(*status);
                tokio_test::block_on(store.save(&record)).unwrap();
            }
            let found = tokio_test::block_on(store.find_by("abc123")).unwrap().unwrap();
            proptest::prop_assert_eq!(found.status, *statuses.last().unwrap());
        }
    }
}
