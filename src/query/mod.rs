//! Fleet query model: filterable, sortable, groupable, pageable views over
//! the registry.

pub mod cache;
pub mod view;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DeviceInfo, LabInfo};
use crate::registry::filter::FleetFilter;

/// A page of a result list. Negative values are treated as zero; a zero limit
/// means "to the end".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    /// Clamps negative offset/limit to zero.
    pub fn normalized(&self) -> (usize, usize) {
        (self.offset.max(0) as usize, self.limit.max(0) as usize)
    }
}

/// Extracts a page from a list, clamped to its bounds.
pub fn sub_list<T: Clone>(list: &[T], page: Page) -> Vec<T> {
    let (offset, limit) = page.normalized();
    let to = if limit == 0 {
        list.len()
    } else {
        offset.saturating_add(limit).min(list.len())
    };
    let from = offset.min(to);
    list[from..to].to_vec()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabOrder {
    #[default]
    HostName,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceOrder {
    #[default]
    Uuid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryOrder {
    pub lab_order: LabOrder,
    pub device_order: DeviceOrder,
}

/// How to partition a flat device list into groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceGroupCondition {
    /// One group per distinct value of the dimension, plus a synthetic group
    /// for devices without the dimension.
    SingleDimensionValue { dimension_name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceGroupOperation {
    /// An operation without a condition is skipped.
    pub condition: Option<DeviceGroupCondition>,
    /// Maximum number of groups to keep; zero keeps all.
    pub group_limit: i64,
}

/// Requests the flattened (per-device) view instead of the per-lab view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceViewRequest {
    pub group_operations: Vec<DeviceGroupOperation>,
    /// Maximum devices kept in each leaf list; zero keeps all.
    pub device_limit: i64,
}

/// Field-masking extension point; declared but not yet applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mask {
    pub lab_field_paths: Vec<String>,
    pub device_field_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabQuery {
    pub filter: FleetFilter,
    pub order: QueryOrder,
    pub device_view: Option<DeviceViewRequest>,
    pub mask: Mask,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceList {
    pub device_total_count: usize,
    pub device_infos: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabData {
    pub lab_info: LabInfo,
    pub device_list: DeviceList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabView {
    pub lab_total_count: usize,
    pub lab_data: Vec<LabData>,
}

/// Identifies one device group within a grouping operation's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroupKey {
    pub dimension_name: String,
    /// `None` is the synthetic "no value" bucket.
    pub dimension_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub key: DeviceGroupKey,
    pub grouped_devices: GroupedDevices,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceGroupResult {
    pub operation: DeviceGroupOperation,
    /// Group count before the group limit cut.
    pub device_group_total_count: usize,
    pub groups: Vec<DeviceGroup>,
}

/// Either a flat device list or the outcome of a grouping operation, which
/// nests recursively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupedDevices {
    List(DeviceList),
    Groups(DeviceGroupResult),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceView {
    pub grouped_devices: GroupedDevices,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryView {
    Lab(LabView),
    Device(DeviceView),
}

/// Computed, unpaged query result, also the unit stored in the caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabQueryResult {
    pub timestamp: DateTime<Utc>,
    pub view: QueryView,
}
