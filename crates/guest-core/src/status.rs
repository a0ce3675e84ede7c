//! Service status and its persisted record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the managed database service on this guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Building,
    Running,
    Shutdown,
    Failed,
    #[default]
    Unknown,
}

impl ServiceStatus {
    /// An install is in flight or has failed; reconciliation must not touch it.
    pub fn is_install_pending(self) -> bool {
        matches!(self, Self::Building | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Building => "BUILDING",
            Self::Running => "RUNNING",
            Self::Shutdown => "SHUTDOWN",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUILDING" => Ok(Self::Building),
            "RUNNING" => Ok(Self::Running),
            "SHUTDOWN" => Ok(Self::Shutdown),
            "FAILED" => Ok(Self::Failed),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown service status: {other}")),
        }
    }
}

/// Durable status of one instance, keyed by `instance_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub instance_id: String,
    pub status: ServiceStatus,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(instance_id: impl Into<String>, status: ServiceStatus) -> Self {
        Self {
            instance_id: instance_id.into(),
            status,
            updated_at: Utc::now(),
        }
    }

    pub fn set_status(&mut self, status: ServiceStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
