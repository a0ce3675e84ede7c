//! Agent configuration from flags and environment

use anyhow::Context;
use clap::Parser;
use guest_lifecycle::ServiceProfile;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "guest-agent")]
#[command(about = "Guest Agent - manages the database service on this guest")]
#[command(version = guest_core::VERSION)]
pub struct AgentConfig {
    /// Instance id assigned at provisioning
    #[arg(long, env = "GUEST_ID")]
    pub instance_id: String,

    #[arg(long, env = "GUEST_AGENT_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Directory holding the persisted status records
    #[arg(long, env = "GUEST_AGENT_STATE_DIR", default_value = "/var/lib/guest-agent")]
    pub state_dir: PathBuf,

    /// TOML file overriding the built-in redis service profile
    #[arg(long, env = "GUEST_AGENT_PROFILE")]
    pub profile: Option<PathBuf>,

    #[arg(
        long,
        env = "GUEST_AGENT_RECONCILE_INTERVAL_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub reconcile_interval_secs: u64,

    /// Record commands instead of running them
    #[arg(long, env = "GUEST_AGENT_FAKE_COMMANDS")]
    pub fake_commands: bool,
}

impl AgentConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn load_profile(&self) -> anyhow::Result<ServiceProfile> {
        let Some(path) = &self.profile else {
            return Ok(ServiceProfile::redis());
        };
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading service profile {}", path.display()))?;
        parse_profile(&source).with_context(|| format!("loading service profile {}", path.display()))
    }
}

/// Missing keys fall back to the redis defaults.
pub fn parse_profile(source: &str) -> anyhow::Result<ServiceProfile> {
    let profile: ServiceProfile = toml::from_str(source)?;
    profile.validate()?;
    Ok(profile)
}
