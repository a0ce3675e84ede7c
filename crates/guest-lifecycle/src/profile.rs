//! Service layout and command policy
//!
//! A [`ServiceProfile`] describes where the managed service lives on the guest
//! and which commands manage it. Builders here only produce argv vectors;
//! running them is the [`CommandRunner`](crate::CommandRunner)'s job.

use guest_core::{GuestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder substituted with the memory size in the profile template.
pub const MEMORY_PLACEHOLDER: &str = "{memory_mb}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceProfile {
    /// Init script name passed to `service`.
    pub service_name: String,
    pub package: String,
    /// Name searched for in the process listing.
    pub process_name: String,
    /// `user:group` owning the data directory.
    pub runtime_owner: String,
    pub data_dir: PathBuf,
    /// Where an existing install keeps its data.
    pub canonical_data_path: PathBuf,
    /// Package shipping the pre-built configuration profiles.
    pub config_package: Option<String>,
    /// Path of a pre-built profile, with `{memory_mb}` in place of the size.
    pub profile_template: String,
    pub active_config: PathBuf,
    pub secret_fragment: PathBuf,
    pub password_directive: String,
    pub volume_fs_type: String,
    pub migration_mount: PathBuf,
    pub use_sudo: bool,
    pub command_timeout_secs: u64,
    pub package_timeout_secs: u64,
}

impl Default for ServiceProfile {
    fn default() -> Self {
        Self::redis()
    }
}

impl ServiceProfile {
    pub fn redis() -> Self {
        Self {
            service_name: "redis-server".to_string(),
            package: "redis-server".to_string(),
            process_name: "redis-server".to_string(),
            runtime_owner: "redis:redis".to_string(),
            data_dir: PathBuf::from("/opt/redis"),
            canonical_data_path: PathBuf::from("/var/redis"),
            config_package: Some("dbaas-rediscnf".to_string()),
            profile_template: "/etc/dbaas/redis.cnf/redis.conf.{memory_mb}M".to_string(),
            active_config: PathBuf::from("/etc/redis/redis.conf"),
            secret_fragment: PathBuf::from("/opt/redis/password.conf"),
            password_directive: "requirepass".to_string(),
            volume_fs_type: "ext3".to_string(),
            migration_mount: PathBuf::from("/mnt/volume"),
            use_sudo: true,
            command_timeout_secs: 30,
            package_timeout_secs: 600,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.profile_template.contains(MEMORY_PLACEHOLDER) {
            return Err(GuestError::Configuration {
                reason: format!(
                    "profile_template `{}` lacks the {MEMORY_PLACEHOLDER} placeholder",
                    self.profile_template
                ),
            });
        }
        if self.process_name.trim().is_empty() {
            return Err(GuestError::Configuration {
                reason: "process_name must not be empty".to_string(),
            });
        }
        if self.command_timeout_secs == 0 || self.package_timeout_secs == 0 {
            return Err(GuestError::Configuration {
                reason: "command timeouts must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn package_timeout(&self) -> Duration {
        Duration::from_secs(self.package_timeout_secs)
    }

    /// Concrete profile file for a memory size.
    pub fn profile_path(&self, memory_mb: u32) -> PathBuf {
        PathBuf::from(
            self.profile_template
                .replace(MEMORY_PLACEHOLDER, &memory_mb.to_string()),
        )
    }

    /// Prefix with `sudo` when the agent is not running as root.
    pub fn privileged<S: AsRef<str>>(&self, parts: &[S]) -> Vec<String> {
        let mut argv = Vec::with_capacity(parts.len() + 1);
        if self.use_sudo {
            argv.push("sudo".to_string());
        }
        argv.extend(parts.iter().map(|part| part.as_ref().to_string()));
        argv
    }

    pub fn process_listing(&self) -> Vec<String> {
        vec!["ps".to_string(), "aux".to_string()]
    }

    pub fn create_dir(&self, dir: &Path) -> Vec<String> {
        self.privileged(&["mkdir", "-p", path_arg(dir).as_str()])
    }

    pub fn install_package(&self) -> Vec<String> {
        self.privileged(&["apt-get", "install", "-y", self.package.as_str()])
    }

    pub fn install_config_package(&self) -> Option<Vec<String>> {
        self.config_package
            .as_ref()
            .map(|package| {
                self.privileged(&["apt-get", "--force-yes", "-y", "install", package.as_str()])
            })
    }

    pub fn chown_data_dir(&self) -> Vec<String> {
        self.privileged(&[
            "chown",
            "-R",
            self.runtime_owner.as_str(),
            path_arg(&self.data_dir).as_str(),
        ])
    }

    /// Hand a single file to the runtime user.
    pub fn chown_file(&self, path: &Path) -> Vec<String> {
        self.privileged(&["chown", self.runtime_owner.as_str(), path_arg(path).as_str()])
    }

    pub fn restart_service(&self) -> Vec<String> {
        self.privileged(&["service", self.service_name.as_str(), "restart"])
    }

    pub fn stop_service(&self) -> Vec<String> {
        self.privileged(&["service", self.service_name.as_str(), "stop"])
    }

    pub fn disable_autostart(&self) -> Vec<String> {
        self.privileged(&["update-rc.d", self.service_name.as_str(), "disable"])
    }

    pub fn filesystem_stats(&self, path: &Path) -> Vec<String> {
        vec![
            "stat".to_string(),
            "-f".to_string(),
            "-c".to_string(),
            "%S %b %f".to_string(),
            path_arg(path),
        ]
    }
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_path_substitutes_memory_size() {
        let profile = ServiceProfile::redis();
        assert_eq!(
            profile.profile_path(1024),
            PathBuf::from("/etc/dbaas/redis.cnf/redis.conf.1024M")
        );
    }

    #[test]
    fn privileged_commands_respect_sudo_flag() {
        let mut profile = ServiceProfile::redis();
        assert_eq!(
            profile.restart_service(),
            vec!["sudo", "service", "redis-server", "restart"]
        );
        profile.use_sudo = false;
        assert_eq!(profile.stop_service(), vec!["service", "redis-server", "stop"]);
        assert_eq!(profile.process_listing(), vec!["ps", "aux"]);
    }

    #[test]
    fn validate_rejects_template_without_placeholder() {
        let profile = ServiceProfile {
            profile_template: "/etc/redis/redis.conf".to_string(),
            ..ServiceProfile::redis()
        };
        assert!(matches!(
            profile.validate(),
            Err(GuestError::Configuration { .. })
        ));
    }

    #[test]
    fn config_package_is_optional() {
        let profile = ServiceProfile {
            config_package: None,
            ..ServiceProfile::redis()
        };
        assert!(profile.install_config_package().is_none());
    }

    #[test]
    fn chown_file_targets_a_single_path() {
        let profile = ServiceProfile::redis();
        assert_eq!(
            profile.chown_file(Path::new("/etc/redis/.redis.conf.staging")),
            vec!["sudo", "chown", "redis:redis", "/etc/redis/.redis.conf.staging"]
        );
    }
}
