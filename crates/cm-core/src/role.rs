// SPDX-License-Identifier: MIT OR Apache-2.0
//! The fixed set of clone roles and their default network identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the five clone roles. Fixed for a process lifetime.
///
/// Roles differ only in system prompt, one specialization endpoint, and
/// default port — see the worker runtime design note on polymorphism over
/// clone roles. `Coordinator` is the same worker type with an additional
/// capability set, not a distinct implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Omega — the delegation coordinator.
    Coordinator,
    /// Beta — static/behavioral code analysis specialist.
    Analyzer,
    /// Gamma — system design specialist.
    Architect,
    /// Delta — test generation specialist.
    Tester,
    /// Sigma — documentation specialist.
    Communicator,
}

impl Role {
    /// All roles, in the order they appear in the default port table.
    pub const ALL: [Role; 5] = [
        Role::Coordinator,
        Role::Analyzer,
        Role::Architect,
        Role::Tester,
        Role::Communicator,
    ];

    /// The default externally-exposed port for this role (§6 port table).
    #[must_use]
    pub fn default_external_port(&self) -> u16 {
        match self {
            Role::Coordinator => 3000,
            Role::Analyzer => 3002,
            Role::Architect => 3003,
            Role::Tester => 3004,
            Role::Communicator => 3005,
        }
    }

    /// The lowercase wire name for this role (`"coordinator"`, `"analyzer"`, ...).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Coordinator => "coordinator",
            Role::Analyzer => "analyzer",
            Role::Architect => "architect",
            Role::Tester => "tester",
            Role::Communicator => "communicator",
        }
    }

    /// The HTTP path segment for this role's specialization endpoint
    /// (e.g. `/analyze` for [`Role::Analyzer`]). `None` for the coordinator,
    /// which has no specialization endpoint of its own.
    #[must_use]
    pub fn specialization_path(&self) -> Option<&'static str> {
        match self {
            Role::Coordinator => None,
            Role::Analyzer => Some("/analyze"),
            Role::Architect => Some("/design"),
            Role::Tester => Some("/generate-tests"),
            Role::Communicator => Some("/document"),
        }
    }

    /// The artifact type produced by this role's specialization endpoint.
    #[must_use]
    pub fn specialization_artifact_type(&self) -> Option<crate::ArtifactType> {
        match self {
            Role::Coordinator => None,
            Role::Analyzer => Some(crate::ArtifactType::CodeAnalysis),
            Role::Architect => Some(crate::ArtifactType::ArchitectureDesign),
            Role::Tester => Some(crate::ArtifactType::TestSuite),
            Role::Communicator => Some(crate::ArtifactType::Documentation),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unrecognized role name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized role: {0}")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coordinator" | "omega" => Ok(Role::Coordinator),
            "analyzer" | "beta" => Ok(Role::Analyzer),
            "architect" | "gamma" => Ok(Role::Architect),
            "tester" | "delta" => Ok(Role::Tester),
            "communicator" | "sigma" => Ok(Role::Communicator),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}
