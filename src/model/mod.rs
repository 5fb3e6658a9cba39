pub mod device;
pub mod job;
pub mod lab;

pub use device::{
    DeviceDimension, DeviceFeature, DeviceInfo, DeviceKey, DeviceLocator, DeviceStatus,
};
pub use job::{Allocation, DeviceRequirement, JobLocator, JobPriority, JobTimeout, JobUnit,
    TestLocator};
pub use lab::{HostProperty, LabInfo, LabLocator, LabServerFeature, LabServerSetting, LabStatus};
