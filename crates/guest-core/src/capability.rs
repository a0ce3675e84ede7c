//! Optional engine capabilities
//!
//! Engines differ in what they can manage beyond the service lifecycle.
//! Callers check for a capability before invoking the matching operation.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    UserManagement,
    DatabaseManagement,
    RootAccess,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::UserManagement => "user_management",
            Capability::DatabaseManagement => "database_management",
            Capability::RootAccess => "root_access",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    supported: Vec<Capability>,
}

impl Capabilities {
    /// Lifecycle only: no users, databases or root management.
    pub fn lifecycle_only() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        if !self.supported.contains(&capability) {
            self.supported.push(capability);
        }
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.supported.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.supported.iter().copied()
    }
}
