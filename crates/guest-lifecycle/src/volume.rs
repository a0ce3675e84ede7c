//! Data volume capability used by the install sequence

use crate::profile::{path_arg, ServiceProfile};
use crate::runner::CommandRunner;
use async_trait::async_trait;
use guest_core::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A block device that will hold the service data.
#[async_trait]
pub trait VolumeDevice: Send + Sync + fmt::Debug {
    /// Destroys whatever the device holds.
    async fn format(&self) -> Result<()>;

    /// Copy the contents of `source` onto the device.
    async fn migrate_data(&self, source: &Path) -> Result<()>;

    async fn mount(&self, mount_point: &Path) -> Result<()>;
}

pub trait VolumeProvider: Send + Sync + fmt::Debug {
    fn device(&self, device_path: &Path) -> Box<dyn VolumeDevice>;
}

/// Volumes managed with `mkfs`, `mount` and `rsync`.
#[derive(Debug, Clone)]
pub struct CommandVolumeProvider {
    runner: Arc<dyn CommandRunner>,
    profile: Arc<ServiceProfile>,
}

impl CommandVolumeProvider {
    pub fn new(runner: Arc<dyn CommandRunner>, profile: Arc<ServiceProfile>) -> Self {
        Self { runner, profile }
    }
}

impl VolumeProvider for CommandVolumeProvider {
    fn device(&self, device_path: &Path) -> Box<dyn VolumeDevice> {
        Box::new(CommandVolume {
            device_path: device_path.to_path_buf(),
            runner: Arc::clone(&self.runner),
            profile: Arc::clone(&self.profile),
        })
    }
}

#[derive(Debug)]
pub struct CommandVolume {
    device_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    profile: Arc<ServiceProfile>,
}

impl CommandVolume {
    async fn run<S: AsRef<str> + Sync>(&self, parts: &[S]) -> Result<()> {
        let argv = self.profile.privileged(parts);
        self.runner
            .run(&argv, self.profile.package_timeout())
            .await?;
        Ok(())
    }

    fn device(&self) -> String {
        path_arg(&self.device_path)
    }

    async fn mount_at(&self, mount_point: &Path) -> Result<()> {
        let target = path_arg(mount_point);
        self.run(&["mkdir", "-p", target.as_str()]).await?;
        self.run(&[
            "mount",
            "-t",
            self.profile.volume_fs_type.as_str(),
            self.device().as_str(),
            target.as_str(),
        ])
        .await
    }
}

#[async_trait]
impl VolumeDevice for CommandVolume {
    #[instrument(skip(self), fields(device = %self.device_path.display()))]
    async fn format(&self) -> Result<()> {
        let device = self.device();
        self.run(&[
            "mkfs",
            "-F",
            "-t",
            self.profile.volume_fs_type.as_str(),
            "-m",
            "5",
            device.as_str(),
        ])
        .await?;
        info!("Volume formatted");
        Ok(())
    }

    #[instrument(skip(self), fields(device = %self.device_path.display()))]
    async fn migrate_data(&self, source: &Path) -> Result<()> {
        let staging = &self.profile.migration_mount;
        self.mount_at(staging).await?;

        let from = format!("{}/", path_arg(source).trim_end_matches('/'));
        let to = path_arg(staging);
        self.run(&[
            "rsync",
            "--safe-links",
            "--perms",
            "--recursive",
            "--owner",
            "--group",
            "--xattrs",
            "--sparse",
            from.as_str(),
            to.as_str(),
        ])
        .await?;
        debug!(from = %from, to = %to, "Data copied to volume");

        self.run(&["umount", to.as_str()]).await?;
        info!(source = %source.display(), "Data migrated to volume");
        Ok(())
    }

    #[instrument(skip(self), fields(device = %self.device_path.display()))]
    async fn mount(&self, mount_point: &Path) -> Result<()> {
        self.mount_at(mount_point).await?;
        info!(mount_point = %mount_point.display(), "Volume mounted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;

    fn provider() -> (CommandVolumeProvider, ScriptedRunner) {
        let runner = ScriptedRunner::new();
        let provider =
            CommandVolumeProvider::new(Arc::new(runner.clone()), Arc::new(ServiceProfile::redis()));
        (provider, runner)
    }

    #[tokio::test]
    async fn format_runs_mkfs_on_the_device() {
        let (provider, runner) = provider();
        provider.device(Path::new("/dev/vdb")).format().await.unwrap();
        assert_eq!(
            runner.journal(),
            vec!["sudo mkfs -F -t ext3 -m 5 /dev/vdb".to_string()]
        );
    }

    #[tokio::test]
    async fn migrate_copies_through_a_staging_mount() {
        let (provider, runner) = provider();
        provider
            .device(Path::new("/dev/vdb"))
            .migrate_data(Path::new("/var/redis/"))
            .await
            .unwrap();

        let journal = runner.journal();
        assert_eq!(journal[0], "sudo mkdir -p /mnt/volume");
        assert_eq!(journal[1], "sudo mount -t ext3 /dev/vdb /mnt/volume");
        assert!(journal[2].starts_with("sudo rsync"));
        assert!(journal[2].ends_with("/var/redis/ /mnt/volume"));
        assert_eq!(journal[3], "sudo umount /mnt/volume");
    }

    #[tokio::test]
    async fn failed_mount_surfaces_execution_error() {
        let (provider, runner) = provider();
        runner.fail("mount -t", 32, "wrong fs type");
        let err = provider
            .device(Path::new("/dev/vdb"))
            .mount(Path::new("/var/redis"))
            .await
            .unwrap_err();
        assert!(matches!(err, guest_core::GuestError::Execution(_)));
    }
}
