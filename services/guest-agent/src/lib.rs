//! Guest agent service: HTTP surface and configuration.

pub mod api;
pub mod config;

pub use api::{router, AgentState, ApiError};
pub use config::{parse_profile, AgentConfig};
