//! Status tracking for the managed service
//!
//! The [`StatusTracker`] caches the last known [`ServiceStatus`] and writes
//! every change through to the [`StatusStore`] before the cache moves. There
//! is exactly one tracker per [`TrackerSlot`]; the agent creates one slot at
//! startup and hands the tracker to the lifecycle manager and the
//! reconciliation task.
//!
//! Read-modify-write sequences (probe, then persist) are serialized by an
//! async mutex so a reconciliation tick never interleaves with a lifecycle
//! transition.

use crate::profile::ServiceProfile;
use crate::runner::CommandRunner;
use crate::store::StatusStore;
use guest_core::{GuestError, Result, ServiceStatus, StatusRecord};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument};

pub struct StatusTracker {
    instance_id: String,
    store: Arc<dyn StatusStore>,
    runner: Arc<dyn CommandRunner>,
    profile: Arc<ServiceProfile>,
    status: RwLock<ServiceStatus>,
    /// Held across probe + persist.
    transition: Mutex<()>,
}

impl fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusTracker")
            .field("instance_id", &self.instance_id)
            .field("status", &*self.status.read())
            .finish()
    }
}

impl StatusTracker {
    /// Load the cached status from the store. Only [`TrackerSlot`] calls this.
    async fn load(
        instance_id: String,
        store: Arc<dyn StatusStore>,
        runner: Arc<dyn CommandRunner>,
        profile: Arc<ServiceProfile>,
    ) -> Result<Self> {
        let status = store
            .find_by(&instance_id)
            .await?
            .map(|record| record.status)
            .unwrap_or_default();

        info!(%instance_id, %status, "Status tracker loaded");

        Ok(Self {
            instance_id,
            store,
            runner,
            profile,
            status: RwLock::new(status),
            transition: Mutex::new(()),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Last status that was durably recorded.
    pub fn status(&self) -> ServiceStatus {
        *self.status.read()
    }

    /// False while an install is in flight or has failed.
    pub fn is_installed(&self) -> bool {
        !self.status().is_install_pending()
    }

    /// Mark the service as being built. Must precede any destructive install
    /// step so an interrupted install stays visible as `BUILDING`.
    pub async fn begin_install(&self) -> Result<()> {
        self.set_status(ServiceStatus::Building).await
    }

    /// Record the real process state once install or restart work is over.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn end_install(&self) -> Result<ServiceStatus> {
        let _guard = self.transition.lock().await;
        info!("Ending install or restart");
        let status = self.probe_actual_status().await;
        info!(%status, "Updating status from probe");
        self.write_through(status).await?;
        Ok(status)
    }

    /// Explicit install failure report. The only way to reach `FAILED`.
    pub async fn fail_install(&self) -> Result<()> {
        self.set_status(ServiceStatus::Failed).await
    }

    /// Scan the process listing for the service process.
    ///
    /// A failing listing command counts as "not running".
    pub async fn probe_actual_status(&self) -> ServiceStatus {
        let listing = self
            .runner
            .run(&self.profile.process_listing(), self.profile.command_timeout())
            .await;
        match listing {
            Ok(output) => scan_process_listing(&output.stdout, &self.profile.process_name),
            Err(e) => {
                debug!(error = %e, "Process listing failed, assuming shutdown");
                ServiceStatus::Shutdown
            }
        }
    }

    /// Persist `status`, then cache it. On a failed write the cache keeps its
    /// previous value and the error is returned.
    pub async fn set_status(&self, status: ServiceStatus) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.write_through(status).await
    }

    /// Re-probe and record the real status, unless an install is pending.
    ///
    /// Returns the recorded status, or `None` when skipped.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn reconcile(&self) -> Result<Option<ServiceStatus>> {
        let _guard = self.transition.lock().await;
        if !self.is_installed() {
            info!(status = %self.status(), "Service is not installed yet");
            return Ok(None);
        }
        debug!("Determining status of service");
        let status = self.probe_actual_status().await;
        self.write_through(status).await?;
        Ok(Some(status))
    }

    async fn write_through(&self, status: ServiceStatus) -> Result<()> {
        let mut record = self
            .store
            .find_by(&self.instance_id)
            .await?
            .unwrap_or_else(|| StatusRecord::new(self.instance_id.clone(), status));
        record.set_status(status);
        self.store.save(&record).await?;

        let previous = std::mem::replace(&mut *self.status.write(), status);
        if previous != status {
            info!(instance_id = %self.instance_id, from = %previous, to = %status, "Service status changed");
        }
        Ok(())
    }
}

/// `RUNNING` if any line of a process listing mentions `process_name`.
pub fn scan_process_listing(listing: &str, process_name: &str) -> ServiceStatus {
    if listing.lines().any(|line| line.contains(process_name)) {
        ServiceStatus::Running
    } else {
        ServiceStatus::Shutdown
    }
}

/// Holder of the one [`StatusTracker`] of a process.
///
/// [`get`](Self::get) constructs the tracker on first use;
/// [`init`](Self::init) constructs it eagerly and refuses to run twice.
pub struct TrackerSlot {
    instance_id: String,
    store: Arc<dyn StatusStore>,
    runner: Arc<dyn CommandRunner>,
    profile: Arc<ServiceProfile>,
    cell: OnceCell<Arc<StatusTracker>>,
}

impl fmt::Debug for TrackerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerSlot")
            .field("instance_id", &self.instance_id)
            .field("initialized", &self.cell.initialized())
            .finish()
    }
}

impl TrackerSlot {
    pub fn new(
        instance_id: impl Into<String>,
        store: Arc<dyn StatusStore>,
        runner: Arc<dyn CommandRunner>,
        profile: Arc<ServiceProfile>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            store,
            runner,
            profile,
            cell: OnceCell::new(),
        }
    }

    /// The tracker, loading it from the store on first access.
    ///
    /// A failed load leaves the slot empty so a later call can retry.
    pub async fn get(&self) -> Result<Arc<StatusTracker>> {
        self.cell
            .get_or_try_init(|| async { self.load().await.map(Arc::new) })
            .await
            .cloned()
    }

    /// Construct the tracker now. A second construction is a logic error.
    pub async fn init(&self) -> Result<Arc<StatusTracker>> {
        if self.cell.initialized() {
            return Err(self.already_constructed());
        }
        let tracker = Arc::new(self.load().await?);
        self.cell
            .set(Arc::clone(&tracker))
            .map_err(|_| self.already_constructed())?;
        Ok(tracker)
    }

    async fn load(&self) -> Result<StatusTracker> {
        StatusTracker::load(
            self.instance_id.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.runner),
            Arc::clone(&self.profile),
        )
        .await
    }

    fn already_constructed(&self) -> GuestError {
        GuestError::IllegalState {
            reason: format!(
                "status tracker for instance {} cannot be constructed twice",
                self.instance_id
            ),
        }
    }
}
