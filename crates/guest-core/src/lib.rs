//! # Guest Core
//!
//! Core types and errors shared by the guest agent, its lifecycle engine and
//! the command-line client.
//!
//! ## Guest Agent
//! - Drives install, configure, start and stop of the managed database service
//! - Caches the service status and writes every transition through to the store
//! - Reconciles the cached status against the real process on a fixed interval

pub mod capability;
pub mod error;
pub mod request;
pub mod status;

pub use capability::{Capabilities, Capability};
pub use error::{ExecutionError, GuestError, Result};
pub use request::{FilesystemStats, InstallRequest, ResizeRequest, StopRequest};
pub use status::{ServiceStatus, StatusRecord};

/// Current agent version for compatibility checks
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information for telemetry and debugging
pub const BUILD_INFO: &str = concat!(
    "Guest Agent ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_NAME"),
    ")"
);

/// Standard API endpoints for the guest agent
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const API_V1_STATUS: &str = "/api/v1/status";
    pub const API_V1_STATUS_UPDATE: &str = "/api/v1/status/update";
    pub const API_V1_STATUS_FAIL: &str = "/api/v1/status/fail";
    pub const API_V1_PREPARE: &str = "/api/v1/prepare";
    pub const API_V1_RESTART: &str = "/api/v1/restart";
    pub const API_V1_STOP: &str = "/api/v1/stop";
    pub const API_V1_RESIZE: &str = "/api/v1/resize";
    pub const API_V1_FILESYSTEM: &str = "/api/v1/filesystem";
    pub const API_V1_CAPABILITIES: &str = "/api/v1/capabilities";
    pub const API_V1_USERS: &str = "/api/v1/users";
    pub const API_V1_DATABASES: &str = "/api/v1/databases";
    pub const API_V1_ROOT: &str = "/api/v1/root";
}
