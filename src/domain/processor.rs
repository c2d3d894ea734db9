use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::DomainError;

// ============================================================================
// Processor Value Objects
// ============================================================================

/// One of the two external payment processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    /// Cheaper, preferred whenever healthy.
    Default,
    /// Costlier backup.
    Fallback,
}

impl ProcessorKind {
    /// In order of preference.
    pub const ALL: [ProcessorKind; 2] = [ProcessorKind::Default, ProcessorKind::Fallback];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorKind::Default => "default",
            ProcessorKind::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(ProcessorKind::Default),
            "fallback" => Ok(ProcessorKind::Fallback),
            other => Err(DomainError::UnknownProcessor(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    Unknown,
    PreferringDefault,
    PreferringFallback,
}

/// The processor settlement should currently target.
///
/// Snapshots are immutable: the arbiter replaces them wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorDecision {
    pub service: ProcessorKind,
    pub endpoint: String,
    /// `None` until the first decision has been made or observed.
    pub decided_at: Option<DateTime<Utc>>,
}

impl ProcessorDecision {
    /// Startup snapshot: target the cheaper processor until told otherwise.
    pub fn initial(endpoint: impl Into<String>) -> Self {
        Self {
            service: ProcessorKind::Default,
            endpoint: endpoint.into(),
            decided_at: None,
        }
    }

    pub fn decided(
        service: ProcessorKind,
        endpoint: impl Into<String>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            service,
            endpoint: endpoint.into(),
            decided_at: Some(decided_at),
        }
    }

    pub fn state(&self) -> ArbiterState {
        match (self.decided_at, self.service) {
            (None, _) => ArbiterState::Unknown,
            (Some(_), ProcessorKind::Default) => ArbiterState::PreferringDefault,
            (Some(_), ProcessorKind::Fallback) => ArbiterState::PreferringFallback,
        }
    }
}
