//! Authoritative in-memory registry of labs and devices.
//!
//! Lab agents sign up and heartbeat their devices; the registry reconciles
//! out-of-order reports with two independent per-field timestamp guards,
//! hands schedulable devices to the scheduler, reaps silent entities, and
//! serves filtered point-in-time fleet views.

pub mod filter;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;
use crate::history::{DeviceSnapshot, HistoryRecorder, LabSnapshot};
use crate::model::device::{HOST_IP_DIMENSION, HOST_NAME_DIMENSION};
use crate::model::{
    Allocation, DeviceDimension, DeviceFeature, DeviceInfo, DeviceKey, DeviceLocator, DeviceStatus,
    LabInfo, LabLocator, LabServerFeature, LabServerSetting, LabStatus,
};
use crate::query::{DeviceList, LabData, LabView};
use crate::registry::filter::{DevicePredicate, FleetFilter, LabPredicate};
use crate::scheduler::Scheduler;

/// One device snapshot inside a sign-up request.
#[derive(Debug, Clone)]
pub struct DeviceSignUp {
    pub uuid: String,
    /// Lab-side timestamp of this snapshot.
    pub timestamp: DateTime<Utc>,
    pub status: DeviceStatus,
    pub feature: DeviceFeature,
}

/// One device status report inside a heartbeat request.
#[derive(Debug, Clone)]
pub struct DeviceHeartbeat {
    pub id: String,
    /// Lab-side timestamp of this report.
    pub timestamp: DateTime<Utc>,
    pub status: DeviceStatus,
}

struct LabEntry {
    locator: LabLocator,
    server_setting: LabServerSetting,
    server_feature: LabServerFeature,
    /// Local timestamp of the last RPC touching this lab, accepted or not.
    /// Used only by the liveness sweep, never for reconciliation ordering.
    update_from_lab_local: Instant,
}

impl LabEntry {
    fn new(
        locator: LabLocator,
        server_setting: LabServerSetting,
        server_feature: LabServerFeature,
    ) -> Self {
        Self {
            locator,
            server_setting,
            server_feature,
            update_from_lab_local: Instant::now(),
        }
    }

    fn update_by_sign_up(
        &mut self,
        locator: LabLocator,
        server_setting: LabServerSetting,
        server_feature: LabServerFeature,
    ) {
        self.locator = locator;
        self.server_setting = server_setting;
        self.server_feature = server_feature;
        self.update_from_lab_local = Instant::now();
    }

    fn update_by_heartbeat(&mut self) {
        self.update_from_lab_local = Instant::now();
    }

    fn to_lab_info(&self) -> LabInfo {
        LabInfo {
            locator: self.locator.clone(),
            server_setting: self.server_setting.clone(),
            server_feature: self.server_feature.clone(),
            status: LabStatus::Running,
        }
    }

    fn to_snapshot(&self) -> LabSnapshot {
        LabSnapshot {
            timestamp: Utc::now(),
            info: self.to_lab_info(),
        }
    }
}

struct DeviceEntry {
    key: DeviceKey,
    locator: DeviceLocator,
    feature: DeviceFeature,
    /// Lab-side timestamp corresponding to `feature`.
    feature_from_lab_at: DateTime<Utc>,
    status: DeviceStatus,
    /// Lab-side timestamp corresponding to `status`. Independent from the
    /// feature timestamp; the two are deliberately never merged.
    status_from_lab_at: DateTime<Utc>,
    /// Local timestamp of the last RPC touching this device, accepted or not.
    update_from_lab_local: Instant,
    /// Latest allocation from the scheduler, mirrored for reporting only.
    latest_allocation: Option<Allocation>,
}

impl DeviceEntry {
    fn new(key: DeviceKey, lab_locator: &LabLocator, device: DeviceSignUp) -> Self {
        let mut entry = Self {
            locator: DeviceLocator::new(device.uuid, lab_locator.clone()),
            key,
            feature: device.feature,
            feature_from_lab_at: device.timestamp,
            status: device.status,
            status_from_lab_at: device.timestamp,
            update_from_lab_local: Instant::now(),
            latest_allocation: None,
        };
        entry.add_host_dimensions_if_missing(lab_locator);
        entry
    }

    fn add_host_dimensions_if_missing(&mut self, lab_locator: &LabLocator) {
        if !self.feature.has_dimension(HOST_IP_DIMENSION) {
            self.feature
                .supported_dimensions
                .push(DeviceDimension::new(HOST_IP_DIMENSION, &lab_locator.ip));
        }
        if !self.feature.has_dimension(HOST_NAME_DIMENSION) {
            self.feature.supported_dimensions.push(DeviceDimension::new(
                HOST_NAME_DIMENSION,
                &lab_locator.host_name,
            ));
        }
    }

    fn set_status(&mut self, status: DeviceStatus, timestamp: DateTime<Utc>) {
        if status != self.status {
            tracing::info!(
                device = %self.key,
                from = %self.status,
                to = %status,
                "Device status changed"
            );
        }
        self.status = status;
        self.status_from_lab_at = timestamp;
    }

    /// Applies a sign-up snapshot. Status and feature are accepted
    /// independently, each only when newer than the stored timestamp for that
    /// field.
    fn update_by_sign_up(&mut self, device: DeviceSignUp, lab_locator: &LabLocator) {
        self.update_from_lab_local = Instant::now();

        if self.status_from_lab_at < device.timestamp {
            self.set_status(device.status, device.timestamp);
        } else {
            tracing::warn!(
                device = %self.key,
                stored = %self.status_from_lab_at,
                reported = %device.timestamp,
                "Sign-up status timestamp not newer than stored, ignoring status"
            );
        }

        if self.feature_from_lab_at < device.timestamp {
            self.locator = DeviceLocator::new(device.uuid, lab_locator.clone());
            self.feature = device.feature;
            self.feature_from_lab_at = device.timestamp;
            self.add_host_dimensions_if_missing(lab_locator);
        } else {
            tracing::warn!(
                device = %self.key,
                stored = %self.feature_from_lab_at,
                reported = %device.timestamp,
                "Sign-up feature timestamp not newer than stored, ignoring feature"
            );
        }
    }

    /// Applies a heartbeat status report. Returns true if the lab needs to
    /// re-sign-up the device (a heartbeat may never move non-IDLE to IDLE).
    fn update_by_heartbeat(&mut self, device: &DeviceHeartbeat) -> bool {
        self.update_from_lab_local = Instant::now();

        if self.status_from_lab_at < device.timestamp {
            if self.status != DeviceStatus::Idle && device.status == DeviceStatus::Idle {
                tracing::info!(
                    device = %self.key,
                    stored = %self.status,
                    "Heartbeat tried to set device back to IDLE, requiring a re-sign-up"
                );
                return true;
            }
            self.set_status(device.status, device.timestamp);
        } else {
            tracing::warn!(
                device = %self.key,
                stored = %self.status_from_lab_at,
                reported = %device.timestamp,
                "Heartbeat timestamp not newer than stored, ignoring it"
            );
        }

        false
    }

    fn to_device_info(&self) -> DeviceInfo {
        DeviceInfo {
            locator: self.locator.clone(),
            uuid: self.key.device_uuid.clone(),
            status: self.status,
            feature: self.feature.clone(),
            // Allocation is only meaningful while the device is held.
            latest_allocation: if self.status == DeviceStatus::Busy {
                self.latest_allocation.clone()
            } else {
                None
            },
        }
    }

    fn to_snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            timestamp: Utc::now(),
            info: self.to_device_info(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    labs: HashMap<String, LabEntry>,
    devices: HashMap<DeviceKey, DeviceEntry>,
    /// Global UUID index enforcing fleet-wide UUID uniqueness.
    device_uuids: HashMap<String, DeviceKey>,
}

/// The fleet registry. One coarse lock guards all maps; every operation and
/// the liveness sweep take it for their whole critical section.
pub struct FleetRegistry {
    state: Mutex<RegistryState>,
    scheduler: Arc<dyn Scheduler>,
    history: Arc<HistoryRecorder>,
    config: FleetConfig,
    first_device_tx: watch::Sender<bool>,
    first_device_rx: watch::Receiver<bool>,
}

impl FleetRegistry {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        history: Arc<HistoryRecorder>,
        config: FleetConfig,
    ) -> Self {
        let (first_device_tx, first_device_rx) = watch::channel(false);
        Self {
            state: Mutex::new(RegistryState::default()),
            scheduler,
            history,
            config,
            first_device_tx,
            first_device_rx,
        }
    }

    /// Registers or refreshes a lab and its devices. Returns the UUIDs that
    /// were rejected (empty, or already claimed under a different key).
    pub async fn sign_up(
        &self,
        locator: LabLocator,
        server_setting: LabServerSetting,
        server_feature: LabServerFeature,
        devices: Vec<DeviceSignUp>,
    ) -> Vec<String> {
        tracing::info!(lab = %locator.host_name, devices = devices.len(), "Sign up lab");

        let mut duplicated_uuids = Vec::new();
        let mut state = self.state.lock().await;
        let state = &mut *state;

        match state.labs.entry(locator.host_name.clone()) {
            Entry::Occupied(mut occupied) => {
                let lab = occupied.get_mut();
                if lab.locator != locator {
                    tracing::warn!(
                        lab = %locator.host_name,
                        old_ip = %lab.locator.ip,
                        new_ip = %locator.ip,
                        "Lab locator changed"
                    );
                }
                lab.update_by_sign_up(locator.clone(), server_setting, server_feature);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LabEntry::new(locator.clone(), server_setting, server_feature));
            }
        }

        for device in devices {
            let key = DeviceKey::new(&locator.host_name, &device.uuid);

            if device.uuid.is_empty() {
                tracing::warn!(lab = %locator.host_name, "Empty device UUID, rejecting");
                duplicated_uuids.push(device.uuid);
                continue;
            }
            if let Some(other_key) = state.device_uuids.get(&device.uuid) {
                if *other_key != key {
                    tracing::warn!(
                        uuid = %device.uuid,
                        new_device = %key,
                        existing_device = %other_key,
                        "Duplicated device UUID, rejecting"
                    );
                    duplicated_uuids.push(device.uuid);
                    continue;
                }
            }

            match state.devices.entry(key.clone()) {
                Entry::Occupied(mut occupied) => {
                    occupied.get_mut().update_by_sign_up(device, &locator);
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(DeviceEntry::new(key.clone(), &locator, device));
                    state.device_uuids.insert(key.device_uuid.clone(), key.clone());
                    let _ = self.first_device_tx.send(true);
                }
            }

            let entry = &state.devices[&key];
            self.update_scheduler(entry);
            self.history.add_device_record_if_changed(entry.to_snapshot());
        }

        let lab = &state.labs[&locator.host_name];
        self.history.add_lab_record_if_changed(lab.to_snapshot());

        duplicated_uuids
    }

    /// Applies a lab heartbeat. Returns the device ids the lab must re-sign-up
    /// (unknown here, or attempting a forbidden non-IDLE to IDLE transition).
    pub async fn heartbeat(
        &self,
        lab_host_name: &str,
        lab_ip: &str,
        devices: Vec<DeviceHeartbeat>,
    ) -> Vec<String> {
        tracing::info!(lab = lab_host_name, devices = devices.len(), "Heartbeat lab");

        let mut outdated_device_ids = Vec::new();
        let mut state = self.state.lock().await;

        match state.labs.get_mut(lab_host_name) {
            Some(lab) => {
                lab.update_by_heartbeat();
                if lab.locator.ip != lab_ip {
                    tracing::warn!(
                        lab = lab_host_name,
                        existing_ip = %lab.locator.ip,
                        reported_ip = lab_ip,
                        "Lab reports a different IP"
                    );
                }
                self.history.add_lab_record_if_changed(lab.to_snapshot());
            }
            None => {
                tracing::warn!(lab = lab_host_name, "Lab hasn't been signed up yet");
            }
        }

        for device in devices {
            let key = DeviceKey::new(lab_host_name, &device.id);

            let Some(entry) = state.devices.get_mut(&key) else {
                tracing::info!(device = %key, "Device hasn't been signed up yet");
                outdated_device_ids.push(device.id);
                continue;
            };

            if entry.update_by_heartbeat(&device) {
                outdated_device_ids.push(device.id);
            }

            let entry = &state.devices[&key];
            self.update_scheduler(entry);
            self.history.add_device_record_if_changed(entry.to_snapshot());
        }

        outdated_device_ids
    }

    /// Unregisters a device and releases it from the scheduler.
    pub async fn sign_out(&self, lab_host_name: &str, device_id: &str) {
        tracing::info!(lab = lab_host_name, device = device_id, "Sign out device");

        let mut state = self.state.lock().await;
        let key = DeviceKey::new(lab_host_name, device_id);
        if let Some(entry) = state.devices.remove(&key) {
            self.scheduler
                .unallocate_device(&entry.locator, /* remove_device= */ true);
            state.device_uuids.remove(device_id);
        } else {
            tracing::warn!(device = %key, "Device to sign out not found");
        }
    }

    /// Read-only filtered snapshot of the fleet. Devices are filtered
    /// independently of labs and attached to surviving parent labs.
    pub async fn fleet_view(&self, fleet_filter: &FleetFilter) -> LabView {
        let started = Instant::now();
        let lab_predicate = LabPredicate::compile(&fleet_filter.lab_filter);
        let device_predicate = DevicePredicate::compile(&fleet_filter.device_filter);

        let view = {
            let state = self.state.lock().await;

            let mut filtered_labs: HashMap<&str, LabData> = state
                .labs
                .iter()
                .filter(|(host_name, lab)| lab_predicate.matches(host_name, &lab.server_feature))
                .map(|(host_name, lab)| {
                    (
                        host_name.as_str(),
                        LabData {
                            lab_info: lab.to_lab_info(),
                            device_list: DeviceList::default(),
                        },
                    )
                })
                .collect();

            for entry in state.devices.values() {
                let Some(lab_data) = filtered_labs.get_mut(entry.key.lab_host_name.as_str())
                else {
                    continue;
                };
                if device_predicate.matches(&entry.key.device_uuid, entry.status, &entry.feature) {
                    lab_data.device_list.device_infos.push(entry.to_device_info());
                }
            }

            let mut lab_data: Vec<LabData> = filtered_labs.into_values().collect();
            for lab in &mut lab_data {
                lab.device_list.device_total_count = lab.device_list.device_infos.len();
            }
            LabView {
                lab_total_count: lab_data.len(),
                lab_data,
            }
        };

        tracing::info!(
            labs = view.lab_total_count,
            time_used = ?started.elapsed(),
            "Get fleet view"
        );
        view
    }

    /// All device snapshots, unfiltered.
    pub async fn device_infos(&self) -> Vec<DeviceInfo> {
        let state = self.state.lock().await;
        state.devices.values().map(DeviceEntry::to_device_info).collect()
    }

    /// Hand-off rule: IDLE devices enter the scheduler pool, BUSY devices are
    /// left alone (already allocated), anything else is pulled out.
    fn update_scheduler(&self, entry: &DeviceEntry) {
        match entry.status {
            DeviceStatus::Idle => self.scheduler.upsert_device(&entry.to_device_info()),
            DeviceStatus::Busy => {}
            _ => self
                .scheduler
                .unallocate_device(&entry.locator, /* remove_device= */ true),
        }
    }

    /// Removes devices and labs that have been silent beyond their removal
    /// thresholds. Runs under the same lock as the RPC handlers.
    pub async fn clean_up_labs_and_devices(&self) {
        let started = Instant::now();
        let mut state = self.state.lock().await;

        let expired_devices: Vec<DeviceKey> = state
            .devices
            .iter()
            .filter(|(_, entry)| {
                entry.update_from_lab_local.elapsed() > self.config.device_removal_time
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired_devices {
            if let Some(entry) = state.devices.remove(&key) {
                tracing::info!(device = %key, "Removing silent device");
                self.scheduler
                    .unallocate_device(&entry.locator, /* remove_device= */ true);
                state.device_uuids.remove(&key.device_uuid);
            }
        }

        let lab_removal_time = self.config.lab_removal_time;
        state.labs.retain(|host_name, lab| {
            let keep = lab.update_from_lab_local.elapsed() <= lab_removal_time;
            if !keep {
                tracing::info!(lab = host_name, "Removing silent lab");
            }
            keep
        });

        tracing::info!(time_used = ?started.elapsed(), "Labs/devices cleanup finished");
    }

    /// Mirrors the latest allocation onto the allocated devices, for
    /// reporting only.
    pub async fn apply_allocation(&self, allocation: &Allocation) {
        let mut state = self.state.lock().await;
        for device_locator in &allocation.devices {
            let key = DeviceKey::new(&device_locator.lab.host_name, &device_locator.id);
            if let Some(entry) = state.devices.get_mut(&key) {
                entry.latest_allocation = Some(allocation.clone());
            }
        }
    }

    /// Resolves when the first device registers or after a fixed timeout,
    /// whichever comes first. Never fails; a non-blocking readiness signal.
    pub async fn first_device_or_timeout(&self) {
        let mut rx = self.first_device_rx.clone();
        // wait_for returns immediately if the value is already true. The wait
        // is bounded here as well, so the call resolves even before start().
        let _ = tokio::time::timeout(
            self.config.first_device_timeout,
            rx.wait_for(|ready| *ready),
        )
        .await;
    }

    /// Spawns the liveness sweep, the first-device timeout marker and the
    /// allocation-event consumer. Tasks stop when the token cancels.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) {
        let registry = self.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.config.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => registry.clean_up_labs_and_devices().await,
                }
            }
        });

        let first_device_tx = self.first_device_tx.clone();
        let timeout = self.config.first_device_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = first_device_tx.send(true);
        });

        let registry = self.clone();
        let mut events = self.scheduler.subscribe_allocations();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => registry.apply_allocation(&event.allocation).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "Allocation event consumer lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }
}
