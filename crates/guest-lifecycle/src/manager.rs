//! Service lifecycle orchestration
//!
//! The [`LifecycleManager`] runs the install protocol and the day-two
//! operations (restart, resize, stop) against the guest, updating the
//! [`StatusTracker`] at the install checkpoints.

use crate::configuration::ConfigurationApplier;
use crate::filesystem::FilesystemInterrogator;
use crate::profile::ServiceProfile;
use crate::runner::CommandRunner;
use crate::tracker::StatusTracker;
use crate::volume::VolumeProvider;
use guest_core::{
    Capabilities, Capability, FilesystemStats, GuestError, InstallRequest, Result, ServiceStatus,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub struct LifecycleManager {
    tracker: Arc<StatusTracker>,
    runner: Arc<dyn CommandRunner>,
    profile: Arc<ServiceProfile>,
    volumes: Arc<dyn VolumeProvider>,
    configuration: ConfigurationApplier,
    interrogator: FilesystemInterrogator,
    capabilities: Capabilities,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("instance_id", &self.tracker.instance_id())
            .field("service", &self.profile.service_name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl LifecycleManager {
    pub fn new(
        tracker: Arc<StatusTracker>,
        runner: Arc<dyn CommandRunner>,
        profile: Arc<ServiceProfile>,
        volumes: Arc<dyn VolumeProvider>,
    ) -> Self {
        info!(service = %profile.service_name, "Initializing lifecycle manager");
        Self {
            configuration: ConfigurationApplier::new(Arc::clone(&runner), Arc::clone(&profile)),
            interrogator: FilesystemInterrogator::new(Arc::clone(&runner), Arc::clone(&profile)),
            tracker,
            runner,
            profile,
            volumes,
            capabilities: Capabilities::lifecycle_only(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub fn profile(&self) -> &ServiceProfile {
        &self.profile
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// `Err(Unsupported)` unless the engine has `capability`.
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.capabilities.supports(capability) {
            Ok(())
        } else {
            Err(GuestError::Unsupported { capability })
        }
    }

    /// Install, configure and start the service on a fresh guest.
    ///
    /// The status is `BUILDING` from the first step on. Any failure is
    /// returned as is and leaves it there; only a completed run records
    /// the probed status. Not safe to re-run after a failure past the
    /// volume format.
    #[instrument(
        skip(self, request),
        fields(instance_id = %self.tracker.instance_id(), memory_mb = request.memory_mb)
    )]
    pub async fn prepare(&self, request: &InstallRequest) -> Result<ServiceStatus> {
        self.tracker.begin_install().await?;

        self.run(&self.profile.create_dir(&self.profile.data_dir))
            .await?;

        if let Some(device_path) = &request.device_path {
            let device = self.volumes.device(device_path);
            device.format().await?;

            let canonical = &self.profile.canonical_data_path;
            if path_exists(canonical).await? {
                // Data must be copied before the mount hides it.
                self.stop(false).await?;
                device.migrate_data(canonical).await?;
            }

            let mount_point = request
                .mount_point
                .as_deref()
                .unwrap_or(canonical.as_path());
            device.mount(mount_point).await?;
            debug!(mount_point = %mount_point.display(), "Mounted the volume");
        }

        self.run_with(&self.profile.install_package(), self.profile.package_timeout())
            .await?;
        self.run(&self.profile.chown_data_dir()).await?;

        self.configuration
            .apply(request.memory_mb, request.password.as_deref())
            .await?;

        self.restart().await?;

        let status = self.tracker.end_install().await?;
        info!(%status, "Prepare completed");
        Ok(status)
    }

    /// Restart the service. Restarting a stopped service starts it.
    #[instrument(skip(self))]
    pub async fn restart(&self) -> Result<()> {
        self.run(&self.profile.restart_service()).await
    }

    /// Apply the profile for a new memory budget, then restart so the new
    /// limits take effect.
    #[instrument(skip(self))]
    pub async fn apply_configuration_and_restart(&self, new_memory_mb: u32) -> Result<()> {
        self.configuration.apply(new_memory_mb, None).await?;
        self.restart().await
    }

    #[instrument(skip(self))]
    pub async fn stop(&self, prevent_autostart: bool) -> Result<()> {
        self.run(&self.profile.stop_service()).await?;
        if prevent_autostart {
            self.configuration.disable_autostart().await?;
        }
        Ok(())
    }

    pub async fn get_filesystem_stats(&self, path: &Path) -> Result<FilesystemStats> {
        self.interrogator.volume_stats(path).await
    }

    /// Operator report that the install will not complete. Moves the guest
    /// to `FAILED`, which reconciliation then leaves alone.
    #[instrument(skip(self), fields(instance_id = %self.tracker.instance_id()))]
    pub async fn report_install_failure(&self) -> Result<()> {
        self.tracker.fail_install().await?;
        info!("Install marked as failed");
        Ok(())
    }

    /// Periodic status update; see [`StatusTracker::reconcile`].
    pub async fn update_status(&self) -> Result<Option<ServiceStatus>> {
        self.tracker.reconcile().await
    }

    async fn run(&self, argv: &[String]) -> Result<()> {
        self.run_with(argv, self.profile.command_timeout()).await
    }

    async fn run_with(&self, argv: &[String], timeout: Duration) -> Result<()> {
        self.runner.run(argv, timeout).await?;
        Ok(())
    }
}

async fn path_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| GuestError::filesystem(path, e))
}
