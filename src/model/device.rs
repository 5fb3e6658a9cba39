use serde::{Deserialize, Serialize};

use crate::model::job::Allocation;
use crate::model::lab::LabLocator;

/// Dimension name the registry fills with the lab IP when the lab did not
/// report one.
pub const HOST_IP_DIMENSION: &str = "host_ip";
/// Dimension name the registry fills with the lab host name when the lab did
/// not report one.
pub const HOST_NAME_DIMENSION: &str = "host_name";

/// Devices are indexed by (lab host name, device UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub lab_host_name: String,
    pub device_uuid: String,
}

impl DeviceKey {
    pub fn new(lab_host_name: impl Into<String>, device_uuid: impl Into<String>) -> Self {
        Self {
            lab_host_name: lab_host_name.into(),
            device_uuid: device_uuid.into(),
        }
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.lab_host_name, self.device_uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLocator {
    pub id: String,
    pub lab: LabLocator,
}

impl DeviceLocator {
    pub fn new(id: impl Into<String>, lab: LabLocator) -> Self {
        Self { id: id.into(), lab }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    Init,
    Idle,
    Busy,
    Dying,
    Prepping,
    Dirty,
    Lameduck,
    Missing,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Init => "INIT",
            DeviceStatus::Idle => "IDLE",
            DeviceStatus::Busy => "BUSY",
            DeviceStatus::Dying => "DYING",
            DeviceStatus::Prepping => "PREPPING",
            DeviceStatus::Dirty => "DIRTY",
            DeviceStatus::Lameduck => "LAMEDUCK",
            DeviceStatus::Missing => "MISSING",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dimension entry. Names may repeat (multimap semantics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDimension {
    pub name: String,
    pub value: String,
}

impl DeviceDimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Capability snapshot a lab reports for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFeature {
    pub owners: Vec<String>,
    pub types: Vec<String>,
    pub drivers: Vec<String>,
    pub decorators: Vec<String>,
    pub supported_dimensions: Vec<DeviceDimension>,
    pub required_dimensions: Vec<DeviceDimension>,
}

impl DeviceFeature {
    /// All supported and required dimension entries, unordered.
    pub fn all_dimensions(&self) -> impl Iterator<Item = &DeviceDimension> {
        self.supported_dimensions
            .iter()
            .chain(self.required_dimensions.iter())
    }

    /// Values of all dimensions with the given name, supported then required.
    pub fn dimension_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.all_dimensions()
            .filter(move |dimension| dimension.name == name)
            .map(|dimension| dimension.value.as_str())
    }

    pub fn has_dimension(&self, name: &str) -> bool {
        self.all_dimensions().any(|dimension| dimension.name == name)
    }
}

/// Read-side snapshot of a device, as served by fleet views and history
/// records. The allocation is a scheduler-owned mirror, reporting only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub locator: DeviceLocator,
    pub uuid: String,
    pub status: DeviceStatus,
    pub feature: DeviceFeature,
    pub latest_allocation: Option<Allocation>,
}
