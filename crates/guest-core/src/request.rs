//! Request and response payloads of the inbound lifecycle operations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Parameters of a single `prepare` call. Never persisted.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct InstallRequest {
    pub memory_mb: u32,
    #[serde(default)]
    pub device_path: Option<PathBuf>,
    #[serde(default)]
    pub mount_point: Option<PathBuf>,
    #[serde(default)]
    pub password: Option<String>,
    /// Initial users, passed through untouched.
    #[serde(default)]
    pub users: Vec<serde_json::Value>,
    /// Initial databases, passed through untouched.
    #[serde(default)]
    pub databases: Vec<serde_json::Value>,
}

impl InstallRequest {
    pub fn new(memory_mb: u32) -> Self {
        Self {
            memory_mb,
            ..Self::default()
        }
    }

    pub fn with_volume(
        mut self,
        device_path: impl Into<PathBuf>,
        mount_point: impl Into<PathBuf>,
    ) -> Self {
        self.device_path = Some(device_path.into());
        self.mount_point = Some(mount_point.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

// Keeps the admin password out of logs and traces.
impl fmt::Debug for InstallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallRequest")
            .field("memory_mb", &self.memory_mb)
            .field("device_path", &self.device_path)
            .field("mount_point", &self.mount_point)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("users", &self.users.len())
            .field("databases", &self.databases.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub prevent_autostart: bool,
}

/// Capacity of the filesystem holding a path. Sizes are in GiB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemStats {
    pub block_size: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total: f64,
    pub free: f64,
    pub used: f64,
}

impl FilesystemStats {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    pub fn from_blocks(block_size: u64, total_blocks: u64, free_blocks: u64) -> Self {
        let total = (block_size as f64 * total_blocks as f64) / Self::GIB;
        let free = (block_size as f64 * free_blocks as f64) / Self::GIB;
        Self {
            block_size,
            total_blocks,
            free_blocks,
            total,
            free,
            used: total - free,
        }
    }
}
