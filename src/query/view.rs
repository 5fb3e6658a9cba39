//! Turns a raw fleet snapshot into an ordered, optionally grouped query view,
//! and pages finished views for serving.

use std::collections::BTreeMap;

use crate::model::DeviceInfo;
use crate::query::{
    sub_list, DeviceGroup, DeviceGroupCondition, DeviceGroupKey, DeviceGroupOperation,
    DeviceGroupResult, DeviceList, DeviceView, DeviceViewRequest, GroupedDevices, LabQuery,
    LabView, Page, QueryView,
};

/// Computes the full, unpaged view for a query from an unordered lab view.
pub fn build_view(query: &LabQuery, mut lab_view: LabView) -> QueryView {
    sort_lab_view(&mut lab_view);
    match &query.device_view {
        None => QueryView::Lab(lab_view),
        Some(request) => QueryView::Device(build_device_view(request, flatten(lab_view))),
    }
}

/// Applies paging to a finished view. Only the outermost list is paged: the
/// lab list, the flat device list, or the top-level group list.
pub fn page_view(view: &QueryView, page: Page) -> QueryView {
    match view {
        QueryView::Lab(lab_view) => QueryView::Lab(LabView {
            lab_total_count: lab_view.lab_total_count,
            lab_data: sub_list(&lab_view.lab_data, page),
        }),
        QueryView::Device(device_view) => {
            let grouped_devices = match &device_view.grouped_devices {
                GroupedDevices::List(list) => GroupedDevices::List(DeviceList {
                    device_total_count: list.device_total_count,
                    device_infos: sub_list(&list.device_infos, page),
                }),
                GroupedDevices::Groups(result) => GroupedDevices::Groups(DeviceGroupResult {
                    operation: result.operation.clone(),
                    device_group_total_count: result.device_group_total_count,
                    groups: sub_list(&result.groups, page),
                }),
            };
            QueryView::Device(DeviceView { grouped_devices })
        }
    }
}

fn sort_lab_view(lab_view: &mut LabView) {
    lab_view
        .lab_data
        .sort_by(|a, b| a.lab_info.locator.host_name.cmp(&b.lab_info.locator.host_name));
    for lab in &mut lab_view.lab_data {
        sort_devices(&mut lab.device_list.device_infos);
    }
}

fn sort_devices(devices: &mut [DeviceInfo]) {
    devices.sort_by(|a, b| a.uuid.cmp(&b.uuid));
}

/// Collapses the per-lab view into one flat device list. Lab ordering has
/// already been applied, so the flat list is re-sorted by UUID globally.
fn flatten(lab_view: LabView) -> Vec<DeviceInfo> {
    let mut devices: Vec<DeviceInfo> = lab_view
        .lab_data
        .into_iter()
        .flat_map(|lab| lab.device_list.device_infos)
        .collect();
    sort_devices(&mut devices);
    devices
}

fn build_device_view(request: &DeviceViewRequest, devices: Vec<DeviceInfo>) -> DeviceView {
    let operations: Vec<&DeviceGroupOperation> = request
        .group_operations
        .iter()
        .filter(|operation| operation.condition.is_some())
        .collect();
    DeviceView {
        grouped_devices: group_devices(&operations, request.device_limit, devices),
    }
}

/// Applies the remaining group operations recursively. When none are left the
/// devices land in a leaf list, cut to the device limit.
fn group_devices(
    operations: &[&DeviceGroupOperation],
    device_limit: i64,
    devices: Vec<DeviceInfo>,
) -> GroupedDevices {
    let Some((operation, rest)) = operations.split_first() else {
        return GroupedDevices::List(leaf_list(device_limit, devices));
    };
    let Some(condition) = operation.condition.as_ref() else {
        return group_devices(rest, device_limit, devices);
    };
    let DeviceGroupCondition::SingleDimensionValue { dimension_name } = condition;

    // A device appears once per distinct value of the dimension; devices
    // without it land in a synthetic bucket ordered before all values.
    let mut no_value_bucket: Vec<DeviceInfo> = Vec::new();
    let mut buckets: BTreeMap<String, Vec<DeviceInfo>> = BTreeMap::new();
    for device in devices {
        let mut values: Vec<String> = device
            .feature
            .dimension_values(dimension_name)
            .map(str::to_owned)
            .collect();
        values.sort();
        values.dedup();
        if values.is_empty() {
            no_value_bucket.push(device);
        } else {
            for value in values {
                buckets.entry(value).or_default().push(device.clone());
            }
        }
    }

    let mut groups: Vec<DeviceGroup> = Vec::new();
    if !no_value_bucket.is_empty() {
        groups.push(DeviceGroup {
            key: DeviceGroupKey {
                dimension_name: dimension_name.clone(),
                dimension_value: None,
            },
            grouped_devices: group_devices(rest, device_limit, no_value_bucket),
        });
    }
    for (value, bucket) in buckets {
        groups.push(DeviceGroup {
            key: DeviceGroupKey {
                dimension_name: dimension_name.clone(),
                dimension_value: Some(value),
            },
            grouped_devices: group_devices(rest, device_limit, bucket),
        });
    }

    let device_group_total_count = groups.len();
    if operation.group_limit > 0 {
        groups.truncate(operation.group_limit as usize);
    }

    GroupedDevices::Groups(DeviceGroupResult {
        operation: (*operation).clone(),
        device_group_total_count,
        groups,
    })
}

fn leaf_list(device_limit: i64, mut devices: Vec<DeviceInfo>) -> DeviceList {
    let device_total_count = devices.len();
    if device_limit > 0 {
        devices.truncate(device_limit as usize);
    }
    DeviceList {
        device_total_count,
        device_infos: devices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        DeviceDimension, DeviceFeature, DeviceLocator, DeviceStatus, LabInfo, LabLocator,
        LabServerFeature, LabServerSetting, LabStatus,
    };
    use crate::query::LabData;

    fn device(uuid: &str, dimensions: &[(&str, &str)]) -> DeviceInfo {
        DeviceInfo {
            locator: DeviceLocator::new(uuid, LabLocator::new("10.0.0.1", "lab1")),
            uuid: uuid.to_string(),
            status: DeviceStatus::Idle,
            feature: DeviceFeature {
                supported_dimensions: dimensions
                    .iter()
                    .map(|(name, value)| DeviceDimension::new(*name, *value))
                    .collect(),
                ..DeviceFeature::default()
            },
            latest_allocation: None,
        }
    }

    fn lab_view(labs: &[(&str, &[DeviceInfo])]) -> LabView {
        let lab_data: Vec<LabData> = labs
            .iter()
            .map(|(host, devices)| LabData {
                lab_info: LabInfo {
                    locator: LabLocator::new("10.0.0.1", *host),
                    server_setting: LabServerSetting::default(),
                    server_feature: LabServerFeature::default(),
                    status: LabStatus::Running,
                },
                device_list: DeviceList {
                    device_total_count: devices.len(),
                    device_infos: devices.to_vec(),
                },
            })
            .collect();
        LabView {
            lab_total_count: lab_data.len(),
            lab_data,
        }
    }

    #[test]
    fn lab_view_sorted_by_host_name_and_uuid() {
        let view = lab_view(&[
            ("lab2", &[device("b", &[]), device("a", &[])]),
            ("lab1", &[device("d", &[]), device("c", &[])]),
        ]);
        let QueryView::Lab(sorted) = build_view(&LabQuery::default(), view) else {
            panic!("expected lab view");
        };
        let hosts: Vec<&str> = sorted
            .lab_data
            .iter()
            .map(|lab| lab.lab_info.locator.host_name.as_str())
            .collect();
        assert_eq!(hosts, vec!["lab1", "lab2"]);
        let uuids: Vec<&str> = sorted.lab_data[0]
            .device_list
            .device_infos
            .iter()
            .map(|device| device.uuid.as_str())
            .collect();
        assert_eq!(uuids, vec!["c", "d"]);
    }

    #[test]
    fn flat_device_view_sorted_globally() {
        let view = lab_view(&[
            ("lab1", &[device("d", &[])]),
            ("lab2", &[device("a", &[])]),
        ]);
        let query = LabQuery {
            device_view: Some(DeviceViewRequest::default()),
            ..LabQuery::default()
        };
        let QueryView::Device(device_view) = build_view(&query, view) else {
            panic!("expected device view");
        };
        let GroupedDevices::List(list) = device_view.grouped_devices else {
            panic!("expected flat list");
        };
        assert_eq!(list.device_total_count, 2);
        let uuids: Vec<&str> = list
            .device_infos
            .iter()
            .map(|device| device.uuid.as_str())
            .collect();
        assert_eq!(uuids, vec!["a", "d"]);
    }

    #[test]
    fn grouping_puts_no_value_bucket_first() {
        let view = lab_view(&[(
            "lab1",
            &[
                device("a", &[("pool", "shared")]),
                device("b", &[]),
                device("c", &[("pool", "private")]),
            ],
        )]);
        let query = LabQuery {
            device_view: Some(DeviceViewRequest {
                group_operations: vec![DeviceGroupOperation {
                    condition: Some(DeviceGroupCondition::SingleDimensionValue {
                        dimension_name: "pool".to_string(),
                    }),
                    group_limit: 0,
                }],
                device_limit: 0,
            }),
            ..LabQuery::default()
        };
        let QueryView::Device(device_view) = build_view(&query, view) else {
            panic!("expected device view");
        };
        let GroupedDevices::Groups(result) = device_view.grouped_devices else {
            panic!("expected groups");
        };
        assert_eq!(result.device_group_total_count, 3);
        let keys: Vec<Option<&str>> = result
            .groups
            .iter()
            .map(|group| group.key.dimension_value.as_deref())
            .collect();
        assert_eq!(keys, vec![None, Some("private"), Some("shared")]);
    }

    #[test]
    fn device_with_repeated_dimension_lands_in_each_value_group_once() {
        let view = lab_view(&[(
            "lab1",
            &[device("a", &[("pool", "shared"), ("pool", "shared"), ("pool", "private")])],
        )]);
        let query = LabQuery {
            device_view: Some(DeviceViewRequest {
                group_operations: vec![DeviceGroupOperation {
                    condition: Some(DeviceGroupCondition::SingleDimensionValue {
                        dimension_name: "pool".to_string(),
                    }),
                    group_limit: 0,
                }],
                device_limit: 0,
            }),
            ..LabQuery::default()
        };
        let QueryView::Device(device_view) = build_view(&query, view) else {
            panic!("expected device view");
        };
        let GroupedDevices::Groups(result) = device_view.grouped_devices else {
            panic!("expected groups");
        };
        assert_eq!(result.groups.len(), 2);
        for group in &result.groups {
            let GroupedDevices::List(ref list) = group.grouped_devices else {
                panic!("expected leaf list");
            };
            assert_eq!(list.device_infos.len(), 1);
        }
    }

    #[test]
    fn group_limit_cuts_after_ordering() {
        let view = lab_view(&[(
            "lab1",
            &[
                device("a", &[("pool", "z")]),
                device("b", &[]),
                device("c", &[("pool", "a")]),
            ],
        )]);
        let query = LabQuery {
            device_view: Some(DeviceViewRequest {
                group_operations: vec![DeviceGroupOperation {
                    condition: Some(DeviceGroupCondition::SingleDimensionValue {
                        dimension_name: "pool".to_string(),
                    }),
                    group_limit: 2,
                }],
                device_limit: 0,
            }),
            ..LabQuery::default()
        };
        let QueryView::Device(device_view) = build_view(&query, view) else {
            panic!("expected device view");
        };
        let GroupedDevices::Groups(result) = device_view.grouped_devices else {
            panic!("expected groups");
        };
        assert_eq!(result.device_group_total_count, 3);
        let keys: Vec<Option<&str>> = result
            .groups
            .iter()
            .map(|group| group.key.dimension_value.as_deref())
            .collect();
        assert_eq!(keys, vec![None, Some("a")]);
    }

    #[test]
    fn device_limit_cuts_leaf_lists() {
        let view = lab_view(&[(
            "lab1",
            &[device("a", &[]), device("b", &[]), device("c", &[])],
        )]);
        let query = LabQuery {
            device_view: Some(DeviceViewRequest {
                group_operations: Vec::new(),
                device_limit: 2,
            }),
            ..LabQuery::default()
        };
        let QueryView::Device(device_view) = build_view(&query, view) else {
            panic!("expected device view");
        };
        let GroupedDevices::List(list) = device_view.grouped_devices else {
            panic!("expected flat list");
        };
        assert_eq!(list.device_total_count, 3);
        assert_eq!(list.device_infos.len(), 2);
    }

    #[test]
    fn paging_applies_to_outermost_lab_list() {
        let view = lab_view(&[
            ("lab1", &[device("a", &[])]),
            ("lab2", &[]),
            ("lab3", &[]),
        ]);
        let built = build_view(&LabQuery::default(), view);
        let QueryView::Lab(paged) = page_view(&built, Page::new(1, 1)) else {
            panic!("expected lab view");
        };
        assert_eq!(paged.lab_total_count, 3);
        assert_eq!(paged.lab_data.len(), 1);
        assert_eq!(paged.lab_data[0].lab_info.locator.host_name, "lab2");
    }
}
