
use std::collections::HashSet;
use std::time::Duration;

use labfleet::config::FleetConfig;
use labfleet::model::{DeviceDimension, DeviceStatus};
use labfleet::query::{
    DeviceGroupCondition, DeviceGroupOperation, DeviceViewRequest, GroupedDevices, LabQuery, Page,
    QueryView,
};
use labfleet::registry::filter::{
    DeviceFilter, DeviceMatchCondition, FleetFilter, LabFilter, LabMatchCondition,
    StringListMatchCondition, StringMatchCondition, StringMultimapMatchCondition,
};
use labfleet::registry::FleetRegistry;
use labfleet::service::{GetLabInfoRequest, LabInfoService};

use test_harness::{at, device_sign_up, empty_lab_data, lab_locator, registry, FakeScheduler};

async fn populate(registry: &FleetRegistry, labs: usize, devices_per_lab: usize) {
    for lab in 0..labs {
        let locator = lab_locator(&format!("lab{lab}"));
        let devices = (0..devices_per_lab)
            .map(|device| {
                device_sign_up(&format!("uuid-{lab}-{device}"), at(0), DeviceStatus::Idle)
            })
            .collect();
        let (setting, feature) = empty_lab_data();
        registry.sign_up(locator, setting, feature, devices).await;
    }
}

fn service(registry: std::sync::Arc<FleetRegistry>) -> LabInfoService {
    LabInfoService::new(registry, FleetConfig::default())
}

#[tokio::test]
async fn paged_lab_views_partition_the_fleet() {
    let (registry, _) = registry(FakeScheduler::new());
    populate(&registry, 5, 1).await;
    let service = service(registry);

    let mut seen = HashSet::new();
    for offset in (0..6).step_by(2) {
        let response = service
            .get_lab_info(GetLabInfoRequest {
                page: Page::new(offset, 2),
                ..GetLabInfoRequest::default()
            })
            .await
            .unwrap();
        let QueryView::Lab(view) = response.view else {
            panic!("expected lab view");
        };
        assert_eq!(view.lab_total_count, 5);
        for lab in view.lab_data {
            // Pages are disjoint.
            assert!(seen.insert(lab.lab_info.locator.host_name));
        }
    }
    assert_eq!(seen.len(), 5);
}

#[tokio::test]
async fn follow_up_pages_stay_on_the_session_snapshot() {
    let (registry, _) = registry(FakeScheduler::new());
    populate(&registry, 3, 0).await;
    // Expire the cross-client tier immediately so only sessions persist.
    let service = LabInfoService::new(
        registry.clone(),
        FleetConfig {
            query_cache_ttl: Duration::ZERO,
            ..FleetConfig::default()
        },
    );

    let first_page = service
        .get_lab_info(GetLabInfoRequest {
            page: Page::new(0, 2),
            client_id: "client1".to_string(),
            ..GetLabInfoRequest::default()
        })
        .await
        .unwrap();

    // The fleet changes between the two pages of the session.
    populate(&registry, 5, 0).await;

    let second_page = service
        .get_lab_info(GetLabInfoRequest {
            page: Page::new(2, 2),
            client_id: "client1".to_string(),
            ..GetLabInfoRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(second_page.timestamp, first_page.timestamp);
    let QueryView::Lab(view) = second_page.view else {
        panic!("expected lab view");
    };
    assert_eq!(view.lab_total_count, 3);

    // A fresh client sees the new fleet.
    let other_client = service
        .get_lab_info(GetLabInfoRequest {
            page: Page::new(2, 2),
            client_id: "client2".to_string(),
            ..GetLabInfoRequest::default()
        })
        .await
        .unwrap();
    let QueryView::Lab(view) = other_client.view else {
        panic!("expected lab view");
    };
    assert_eq!(view.lab_total_count, 5);
}

#[tokio::test]
async fn first_page_served_from_shared_cache_pins_the_session() {
    let (registry, _) = registry(FakeScheduler::new());
    populate(&registry, 3, 0).await;
    let service = LabInfoService::new(
        registry.clone(),
        FleetConfig {
            query_cache_ttl: Duration::from_millis(500),
            ..FleetConfig::default()
        },
    );

    // Client A computes the snapshot; client B's page zero hits the shared
    // tier, which must also create B's session.
    let computed = service
        .get_lab_info(GetLabInfoRequest {
            page: Page::new(0, 2),
            client_id: "client-a".to_string(),
            ..GetLabInfoRequest::default()
        })
        .await
        .unwrap();
    let first_page = service
        .get_lab_info(GetLabInfoRequest {
            page: Page::new(0, 2),
            client_id: "client-b".to_string(),
            ..GetLabInfoRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(first_page.timestamp, computed.timestamp);

    // The shared entry lapses and the fleet changes mid-session.
    populate(&registry, 5, 0).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    let second_page = service
        .get_lab_info(GetLabInfoRequest {
            page: Page::new(2, 2),
            client_id: "client-b".to_string(),
            ..GetLabInfoRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(second_page.timestamp, first_page.timestamp);
    let QueryView::Lab(view) = second_page.view else {
        panic!("expected lab view");
    };
    assert_eq!(view.lab_total_count, 3);
}

#[tokio::test]
async fn identical_queries_share_the_cached_snapshot() {
    let (registry, _) = registry(FakeScheduler::new());
    populate(&registry, 2, 1).await;
    let service = service(registry);

    let first = service
        .get_lab_info(GetLabInfoRequest::default())
        .await
        .unwrap();
    let second = service
        .get_lab_info(GetLabInfoRequest::default())
        .await
        .unwrap();
    assert_eq!(second.timestamp, first.timestamp);
}

#[tokio::test]
async fn host_name_filter_ignores_case() {
    let (registry, _) = registry(FakeScheduler::new());
    populate(&registry, 3, 0).await;
    let service = service(registry);

    let query = LabQuery {
        filter: FleetFilter {
            lab_filter: LabFilter {
                conditions: vec![LabMatchCondition::HostName(StringMatchCondition::Include(
                    vec!["LAB1".to_string()],
                ))],
            },
            device_filter: DeviceFilter::default(),
        },
        ..LabQuery::default()
    };
    let response = service
        .get_lab_info(GetLabInfoRequest {
            query,
            ..GetLabInfoRequest::default()
        })
        .await
        .unwrap();
    let QueryView::Lab(view) = response.view else {
        panic!("expected lab view");
    };
    assert_eq!(view.lab_total_count, 1);
    assert_eq!(view.lab_data[0].lab_info.locator.host_name, "lab1");
}

#[tokio::test]
async fn invalid_regex_matches_nothing() {
    let (registry, _) = registry(FakeScheduler::new());
    populate(&registry, 2, 0).await;
    let service = service(registry);

    let query = LabQuery {
        filter: FleetFilter {
            lab_filter: LabFilter {
                conditions: vec![LabMatchCondition::HostName(
                    StringMatchCondition::MatchesRegex("lab(".to_string()),
                )],
            },
            device_filter: DeviceFilter::default(),
        },
        ..LabQuery::default()
    };
    let response = service
        .get_lab_info(GetLabInfoRequest {
            query,
            ..GetLabInfoRequest::default()
        })
        .await
        .unwrap();
    let QueryView::Lab(view) = response.view else {
        panic!("expected lab view");
    };
    assert_eq!(view.lab_total_count, 0);
}

#[tokio::test]
async fn dimension_filter_selects_devices() {
    let (registry, _) = registry(FakeScheduler::new());
    let mut pooled = device_sign_up("uuid-pooled", at(0), DeviceStatus::Idle);
    pooled
        .feature
        .supported_dimensions
        .push(DeviceDimension::new("pool", "shared"));
    let plain = device_sign_up("uuid-plain", at(0), DeviceStatus::Idle);
    let (setting, feature) = empty_lab_data();
    registry
        .sign_up(lab_locator("lab1"), setting, feature, vec![pooled, plain])
        .await;
    let service = service(registry);

    let query = LabQuery {
        filter: FleetFilter {
            lab_filter: LabFilter::default(),
            device_filter: DeviceFilter {
                conditions: vec![DeviceMatchCondition::Dimension(
                    StringMultimapMatchCondition {
                        key: "POOL".to_string(),
                        value_condition: StringListMatchCondition::AnyMatch(
                            StringMatchCondition::Include(vec!["Shared".to_string()]),
                        ),
                    },
                )],
            },
        },
        ..LabQuery::default()
    };
    let response = service
        .get_lab_info(GetLabInfoRequest {
            query,
            ..GetLabInfoRequest::default()
        })
        .await
        .unwrap();
    let QueryView::Lab(view) = response.view else {
        panic!("expected lab view");
    };
    let devices = &view.lab_data[0].device_list;
    assert_eq!(devices.device_total_count, 1);
    assert_eq!(devices.device_infos[0].uuid, "uuid-pooled");
}

#[tokio::test]
async fn grouped_device_view_through_the_service() {
    let (registry, _) = registry(FakeScheduler::new());
    let mut shared = device_sign_up("uuid-a", at(0), DeviceStatus::Idle);
    shared
        .feature
        .supported_dimensions
        .push(DeviceDimension::new("pool", "shared"));
    let bare = device_sign_up("uuid-b", at(0), DeviceStatus::Idle);
    let (setting, feature) = empty_lab_data();
    registry
        .sign_up(lab_locator("lab1"), setting, feature, vec![shared, bare])
        .await;
    let service = service(registry);

    let query = LabQuery {
        device_view: Some(DeviceViewRequest {
            group_operations: vec![DeviceGroupOperation {
                condition: Some(DeviceGroupCondition::SingleDimensionValue {
                    dimension_name: "pool".to_string(),
                }),
                group_limit: 0,
            }],
            device_limit: 1,
        }),
        ..LabQuery::default()
    };
    let response = service
        .get_lab_info(GetLabInfoRequest {
            query,
            ..GetLabInfoRequest::default()
        })
        .await
        .unwrap();
    let QueryView::Device(device_view) = response.view else {
        panic!("expected device view");
    };
    let GroupedDevices::Groups(result) = device_view.grouped_devices else {
        panic!("expected groups");
    };
    assert_eq!(result.device_group_total_count, 2);
    assert_eq!(result.groups[0].key.dimension_value, None);
    assert_eq!(
        result.groups[1].key.dimension_value,
        Some("shared".to_string())
    );
}
