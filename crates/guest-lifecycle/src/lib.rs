//! Service lifecycle engine of the guest agent.
//!
//! Commands go through a [`CommandRunner`], status goes through the
//! [`StatusTracker`], and the [`LifecycleManager`] ties the two together.

pub use guest_core;

mod configuration;
mod filesystem;
mod manager;
mod profile;
mod reconcile;
mod runner;
mod store;
mod tracker;
mod volume;

pub use configuration::ConfigurationApplier;
pub use filesystem::FilesystemInterrogator;
pub use manager::LifecycleManager;
pub use profile::{ServiceProfile, MEMORY_PLACEHOLDER};
pub use reconcile::spawn_reconciler;
pub use runner::{argv, CommandOutput, CommandRunner, ScriptedRunner, ShellRunner};
pub use store::{FileStatusStore, MemoryStatusStore, StatusStore};
pub use tracker::{scan_process_listing, StatusTracker, TrackerSlot};
pub use volume::{CommandVolume, CommandVolumeProvider, VolumeDevice, VolumeProvider};

// Re-export core types for convenience
pub use guest_core::{
    Capabilities, Capability, ExecutionError, FilesystemStats, GuestError, InstallRequest,
    Result, ServiceStatus, StatusRecord,
};
