//! Job/test value objects. These are produced by clients and passed through to
//! the scheduler; the registry never interprets them beyond identity.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::device::{DeviceDimension, DeviceLocator};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobLocator {
    pub id: String,
    pub name: String,
}

impl JobLocator {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestLocator {
    pub id: String,
    pub name: String,
    pub job: JobLocator,
}

impl TestLocator {
    pub fn new(id: impl Into<String>, name: impl Into<String>, job: JobLocator) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            job,
        }
    }

    /// A test locator with a freshly generated id.
    pub fn generate(name: impl Into<String>, job: JobLocator) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), name, job)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobPriority {
    Low,
    #[default]
    Default,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTimeout {
    pub job: Duration,
    pub test: Duration,
    pub start: Duration,
}

impl Default for JobTimeout {
    fn default() -> Self {
        Self {
            job: Duration::from_secs(60 * 60),
            test: Duration::from_secs(15 * 60),
            start: Duration::from_secs(10 * 60),
        }
    }
}

/// What kind of device a test needs; matched by the scheduler, opaque here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRequirement {
    pub device_type: String,
    pub decorators: Vec<String>,
    pub dimensions: Vec<DeviceDimension>,
}

/// A job as handed to the scheduler: identity plus opaque requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUnit {
    pub locator: JobLocator,
    pub user: String,
    pub driver: String,
    pub device_requirements: Vec<DeviceRequirement>,
    pub shared_dimensions: Vec<String>,
    pub priority: JobPriority,
    pub timeout: JobTimeout,
}

/// A scheduler-owned assignment of one or more devices to a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub test: TestLocator,
    pub devices: Vec<DeviceLocator>,
}
