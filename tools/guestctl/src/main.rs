use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use guest_core::{endpoints, InstallRequest, ResizeRequest, StopRequest};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "guestctl")]
#[command(about = "Guest CLI - Drive the guest agent of a database instance")]
#[command(version = guest_core::VERSION)]
struct Cli {
    /// Base URL of the guest agent
    #[arg(long, env = "GUEST_AGENT_URL", default_value = "http://localhost:8080")]
    agent_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the cached service status
    Status,
    /// Re-probe the service and record its status
    UpdateStatus,
    /// Mark a stalled install as failed
    FailInstall,
    /// Install, configure and start the service
    Prepare {
        #[arg(long)]
        memory_mb: u32,
        /// Block device to format and mount as the data volume
        #[arg(long)]
        device: Option<PathBuf>,
        #[arg(long, requires = "device")]
        mount_point: Option<PathBuf>,
        #[arg(long, env = "GUEST_DB_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Restart the service
    Restart,
    /// Stop the service
    Stop {
        /// Also keep it from starting at boot
        #[arg(long)]
        prevent_autostart: bool,
    },
    /// Apply the configuration profile for a new memory size
    Resize {
        #[arg(long)]
        memory_mb: u32,
    },
    /// Show usage of the filesystem holding a path
    FsStats { path: Option<PathBuf> },
    /// List optional capabilities of the engine
    Capabilities,
    /// Check that the agent is up
    Health,
}

/// One HTTP call against the agent.
struct AgentCall {
    method: Method,
    path: &'static str,
    query: Vec<(&'static str, PathBuf)>,
    body: Option<Value>,
}

impl AgentCall {
    fn get(path: &'static str) -> Self {
        Self {
            method: Method::GET,
            path,
            query: Vec::new(),
            body: None,
        }
    }

    fn post(path: &'static str) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(path)
        }
    }

    fn with_body<T: Serialize>(mut self, body: &T) -> anyhow::Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    fn build(&self, client: &Client, agent_url: &str) -> RequestBuilder {
        let url = format!("{}{}", agent_url.trim_end_matches('/'), self.path);
        let mut request = client.request(self.method.clone(), url);
        if !self.query.is_empty() {
            request = request.query(&self.query);
        }
        if let Some(body) = &self.body {
            request = request.json(body);
        }
        request
    }
}

impl Commands {
    fn call(&self) -> anyhow::Result<AgentCall> {
        let call = match self {
            Commands::Status => AgentCall::get(endpoints::API_V1_STATUS),
            Commands::UpdateStatus => AgentCall::post(endpoints::API_V1_STATUS_UPDATE),
            Commands::FailInstall => AgentCall::post(endpoints::API_V1_STATUS_FAIL),
            Commands::Prepare {
                memory_mb,
                device,
                mount_point,
                password,
            } => AgentCall::post(endpoints::API_V1_PREPARE).with_body(&InstallRequest {
                device_path: device.clone(),
                mount_point: mount_point.clone(),
                password: password.clone(),
                ..InstallRequest::new(*memory_mb)
            })?,
            Commands::Restart => AgentCall::post(endpoints::API_V1_RESTART),
            Commands::Stop { prevent_autostart } => {
                AgentCall::post(endpoints::API_V1_STOP).with_body(&StopRequest {
                    prevent_autostart: *prevent_autostart,
                })?
            }
            Commands::Resize { memory_mb } => {
                AgentCall::post(endpoints::API_V1_RESIZE).with_body(&ResizeRequest {
                    memory_mb: *memory_mb,
                })?
            }
            Commands::FsStats { path } => AgentCall {
                query: path.iter().map(|path| ("path", path.clone())).collect(),
                ..AgentCall::get(endpoints::API_V1_FILESYSTEM)
            },
            Commands::Capabilities => AgentCall::get(endpoints::API_V1_CAPABILITIES),
            Commands::Health => AgentCall::get(endpoints::HEALTH),
        };
        Ok(call)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let call = cli.command.call()?;

    let response = call
        .build(&Client::new(), &cli.agent_url)
        .send()
        .await
        .with_context(|| format!("contacting guest agent at {}", cli.agent_url))?;

    let status = response.status();
    let payload: Value = response.json().await.unwrap_or(Value::Null);

    match status {
        StatusCode::ACCEPTED => {
            println!("🚀 Prepare started, operation {}", payload["operation_id"]);
            println!("   Poll `guestctl status` until the status leaves BUILDING");
        }
        s if s.is_success() => println!("{}", serde_json::to_string_pretty(&payload)?),
        StatusCode::NOT_IMPLEMENTED => bail!("❌ Not supported by this engine: {}", payload["error"]),
        _ => bail!(
            "❌ Agent answered {status}: {}",
            payload["error"].as_str().unwrap_or("no details")
        ),
    }
    Ok(())
}
