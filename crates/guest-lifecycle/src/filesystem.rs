//! Filesystem introspection

use crate::profile::ServiceProfile;
use crate::runner::CommandRunner;
use guest_core::{FilesystemStats, GuestError, Result};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FilesystemInterrogator {
    runner: Arc<dyn CommandRunner>,
    profile: Arc<ServiceProfile>,
}

impl FilesystemInterrogator {
    pub fn new(runner: Arc<dyn CommandRunner>, profile: Arc<ServiceProfile>) -> Self {
        Self { runner, profile }
    }

    pub async fn volume_stats(&self, path: &Path) -> Result<FilesystemStats> {
        let output = self
            .runner
            .run(&self.profile.filesystem_stats(path), self.profile.command_timeout())
            .await?;
        parse_stat_output(&output.stdout).ok_or_else(|| {
            GuestError::filesystem(
                path,
                format!("unexpected stat output: {:?}", output.stdout.trim()),
            )
        })
    }
}

/// Parse `stat -f -c "%S %b %f"`: block size, total blocks, free blocks.
fn parse_stat_output(stdout: &str) -> Option<FilesystemStats> {
    let mut fields = stdout.split_whitespace().map(str::parse::<u64>);
    let block_size = fields.next()?.ok()?;
    let total_blocks = fields.next()?.ok()?;
    let free_blocks = fields.next()?.ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(FilesystemStats::from_blocks(block_size, total_blocks, free_blocks))
}
