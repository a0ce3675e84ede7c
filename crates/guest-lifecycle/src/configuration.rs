//! Configuration application
//!
//! The active configuration is rendered from a pre-built profile, chosen by
//! memory size, followed by the persisted secret fragment. The fragment lives
//! outside the rendered file so that regenerating the profile on a resize
//! keeps any password set at install time.

use crate::profile::{path_arg, ServiceProfile};
use crate::runner::CommandRunner;
use guest_core::{GuestError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct ConfigurationApplier {
    runner: Arc<dyn CommandRunner>,
    profile: Arc<ServiceProfile>,
}

impl ConfigurationApplier {
    pub fn new(runner: Arc<dyn CommandRunner>, profile: Arc<ServiceProfile>) -> Self {
        Self { runner, profile }
    }

    /// Render the profile for `memory_mb` into the active configuration.
    ///
    /// A supplied password is appended to the secret fragment first; the
    /// fragment as a whole is merged into every rendering. Returns the
    /// profile file that was used.
    #[instrument(skip(self, password), fields(has_password = password.is_some()))]
    pub async fn apply(&self, memory_mb: u32, password: Option<&str>) -> Result<PathBuf> {
        if let Some(password) = password {
            validate_password(password)?;
        }

        if let Some(command) = self.profile.install_config_package() {
            self.runner
                .run(&command, self.profile.package_timeout())
                .await?;
        }

        let profile_path = self.profile.profile_path(memory_mb);
        let base = tokio::fs::read_to_string(&profile_path)
            .await
            .map_err(|e| GuestError::filesystem(&profile_path, e))?;

        if let Some(password) = password {
            self.append_secret(password).await?;
        }
        let secrets = self.read_secrets().await?;

        let mut rendered = base;
        if !secrets.is_empty() {
            if !rendered.is_empty() && !rendered.ends_with('\n') {
                rendered.push('\n');
            }
            rendered.push_str(&secrets);
        }

        self.replace_active_config(rendered.as_bytes()).await?;
        info!(
            profile = %profile_path.display(),
            active = %self.profile.active_config.display(),
            "Configuration applied"
        );
        Ok(profile_path)
    }

    /// Keep the service from starting on boot.
    pub async fn disable_autostart(&self) -> Result<()> {
        self.runner
            .run(&self.profile.disable_autostart(), self.profile.command_timeout())
            .await?;
        info!(service = %self.profile.service_name, "Autostart disabled");
        Ok(())
    }

    async fn append_secret(&self, password: &str) -> Result<()> {
        let path = &self.profile.secret_fragment;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GuestError::filesystem(parent, e))?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(path)
            .await
            .map_err(|e| GuestError::filesystem(path, e))?;
        let directive = format!("{} {}\n", self.profile.password_directive, password);
        file.write_all(directive.as_bytes())
            .await
            .map_err(|e| GuestError::filesystem(path, e))?;
        file.flush()
            .await
            .map_err(|e| GuestError::filesystem(path, e))?;

        debug!(fragment = %path.display(), "Password directive stored");
        Ok(())
    }

    /// Write an owner-only staging file, hand it to the runtime user, then
    /// rename it over the active path. A symlink there is replaced, not
    /// followed.
    async fn replace_active_config(&self, contents: &[u8]) -> Result<()> {
        let target = &self.profile.active_config;
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| GuestError::filesystem(target, "not a file path"))?;
        let staging = target.with_file_name(format!(".{file_name}.staging"));

        write_private(&staging, contents).await?;
        self.runner
            .run(&self.profile.chown_file(&staging), self.profile.command_timeout())
            .await?;
        tokio::fs::rename(&staging, target).await.map_err(|e| {
            GuestError::filesystem(target, format!("replace from {} failed: {e}", path_arg(&staging)))
        })
    }

    async fn read_secrets(&self) -> Result<String> {
        let path = &self.profile.secret_fragment;
        match tokio::fs::read_to_string(path).await {
            Ok(secrets) => Ok(secrets),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(GuestError::filesystem(path, e)),
        }
    }
}

/// A password becomes one directive line, so it must be a single token.
fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(GuestError::Configuration {
            reason: "password must not be empty".to_string(),
        });
    }
    if password.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(GuestError::Configuration {
            reason: "password must not contain whitespace or control characters".to_string(),
        });
    }
    Ok(())
}

/// Create or truncate `path` with mode 0600 and write `contents`.
async fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .map_err(|e| GuestError::filesystem(path, e))?;
    // mode() only applies on creation; a leftover staging file keeps its own.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| GuestError::filesystem(path, e))?;
    }
    file.write_all(contents)
        .await
        .map_err(|e| GuestError::filesystem(path, e))?;
    file.flush()
        .await
        .map_err(|e| GuestError::filesystem(path, e))
}
