//! Shared serializable value types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task identifier.
pub type TaskId = String;

/// Task priority. Lower values are processed first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Processed before everything else.
    Critical = 0,
    /// Processed before normal work.
    High = 1,
    /// Default priority.
    #[default]
    Normal = 2,
    /// Background work.
    Low = 3,
}

impl Priority {
    /// Numeric ordering value.
    pub const fn value(self) -> u8 {
        self as u8
    }
}

/// Kind of resource a pool accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// CPU-style compute slots.
    Compute,
    /// Storage units.
    Storage,
    /// Network bandwidth units.
    Network,
    /// Database connections.
    Database,
}

impl ResourceKind {
    /// Every resource kind, in pool creation order.
    pub const ALL: [Self; 4] = [Self::Compute, Self::Storage, Self::Network, Self::Database];

    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Storage => "storage",
            Self::Network => "network",
            Self::Database => "database",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independent access-control partition of the navigation mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDomain {
    /// Wealth domain.
    Wealth,
    /// Information domain.
    Info,
    /// Myth domain.
    Myth,
}

impl ThresholdDomain {
    /// Every domain.
    pub const ALL: [Self; 3] = [Self::Wealth, Self::Info, Self::Myth];

    /// Stable lowercase name, also used inside tokens.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wealth => "wealth",
            Self::Info => "info",
            Self::Myth => "myth",
        }
    }

    /// Parse a domain from its token name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == name)
    }
}

impl fmt::Display for ThresholdDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
