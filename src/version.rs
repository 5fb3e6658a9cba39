//! Version-compatibility checking for mutating RPCs.
//!
//! Every state-mutating request carries the caller's version and the minimum
//! service version it can talk to; the service enforces its own minimum caller
//! version in return.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Version of the registry service itself.
pub const SERVICE_VERSION: Version = Version::new(5, 0, 0);
/// Oldest lab agent version the service accepts.
pub const MIN_AGENT_VERSION: Version = Version::new(4, 0, 0);
/// Oldest client version the service accepts.
pub const MIN_CLIENT_VERSION: Version = Version::new(4, 0, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(|| FleetError::InvalidVersion(s.to_string()))
        };
        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(FleetError::InvalidVersion(s.to_string()));
        }
        Ok(version)
    }
}

/// Caller-side half of the version handshake, attached to mutating requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionCheckRequest {
    pub caller_version: String,
    pub min_service_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCheckResponse {
    pub service_version: String,
}

/// Service-side checker holding this service's version and the minimum caller
/// version it accepts.
#[derive(Debug, Clone)]
pub struct VersionChecker {
    service_version: Version,
    min_caller_version: Version,
}

impl VersionChecker {
    pub fn new(service_version: Version, min_caller_version: Version) -> Self {
        Self {
            service_version,
            min_caller_version,
        }
    }

    /// Checks a caller's handshake. A mismatch fails the single RPC and
    /// nothing else.
    pub fn check(&self, request: &VersionCheckRequest) -> Result<VersionCheckResponse> {
        let caller_version: Version = request.caller_version.parse()?;
        let min_service_version: Version = request.min_service_version.parse()?;

        if caller_version < self.min_caller_version || self.service_version < min_service_version {
            return Err(FleetError::VersionMismatch {
                service_version: self.service_version.to_string(),
                min_service_version: min_service_version.to_string(),
                caller_version: caller_version.to_string(),
                min_caller_version: self.min_caller_version.to_string(),
            });
        }

        Ok(VersionCheckResponse {
            service_version: self.service_version.to_string(),
        })
    }
}
