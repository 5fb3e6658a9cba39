//! Bounded per-entity change history for labs and devices.
//!
//! Each entity keeps the last 100 meaningful snapshots. Unchanged heartbeats
//! do not grow history; entities that stop reporting get a synthetic
//! "missing" entry from a periodic sweep.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;
use crate::model::{DeviceInfo, DeviceStatus, LabInfo, LabStatus};

const HISTORY_MAX_SIZE: usize = 100;

/// A timestamped entity snapshot that can be recorded and flagged missing.
pub trait EntitySnapshot: Clone + Send + Sync + 'static {
    fn is_missing(&self) -> bool;

    /// Whether the fields worth recording (status, important features) are
    /// unchanged relative to another snapshot.
    fn important_info_eq(&self, other: &Self) -> bool;

    /// A copy of this snapshot with status forced to missing.
    fn to_missing(&self, timestamp: DateTime<Utc>) -> Self;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabSnapshot {
    pub timestamp: DateTime<Utc>,
    pub info: LabInfo,
}

impl EntitySnapshot for LabSnapshot {
    fn is_missing(&self) -> bool {
        self.info.status == LabStatus::Missing
    }

    fn important_info_eq(&self, other: &Self) -> bool {
        self.info.status == other.info.status
            && self.info.server_feature == other.info.server_feature
    }

    fn to_missing(&self, timestamp: DateTime<Utc>) -> Self {
        let mut snapshot = self.clone();
        snapshot.timestamp = timestamp;
        snapshot.info.status = LabStatus::Missing;
        snapshot
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub info: DeviceInfo,
}

impl EntitySnapshot for DeviceSnapshot {
    fn is_missing(&self) -> bool {
        self.info.status == DeviceStatus::Missing
    }

    fn important_info_eq(&self, other: &Self) -> bool {
        self.info.status == other.info.status && self.info.feature.owners == other.info.feature.owners
    }

    fn to_missing(&self, timestamp: DateTime<Utc>) -> Self {
        let mut snapshot = self.clone();
        snapshot.timestamp = timestamp;
        snapshot.info.status = DeviceStatus::Missing;
        snapshot
    }
}

/// Bounded FIFO of snapshots for one entity.
struct HistoryLog<T> {
    queue: VecDeque<T>,
    last_update: Instant,
}

impl<T: EntitySnapshot> HistoryLog<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(HISTORY_MAX_SIZE),
            last_update: Instant::now(),
        }
    }

    fn push(&mut self, snapshot: T) {
        if self.queue.len() == HISTORY_MAX_SIZE {
            self.queue.pop_front();
        }
        self.queue.push_back(snapshot);
    }

    fn record_if_changed(&mut self, snapshot: T) {
        self.last_update = Instant::now();
        let changed = match self.queue.back() {
            Some(last) => !snapshot.important_info_eq(last),
            None => true,
        };
        if changed {
            self.push(snapshot);
        }
    }

    fn record_if_missing(&mut self, missing_delay: std::time::Duration) {
        let Some(last) = self.queue.back() else {
            return;
        };
        if self.last_update.elapsed() > missing_delay && !last.is_missing() {
            let missing = last.to_missing(Utc::now());
            self.push(missing);
        }
    }
}

struct EntityHistories<T> {
    by_key: DashMap<String, HistoryLog<T>>,
}

impl<T: EntitySnapshot> EntityHistories<T> {
    fn new() -> Self {
        Self {
            by_key: DashMap::new(),
        }
    }

    fn record_if_changed(&self, key: &str, snapshot: T) {
        self.by_key
            .entry(key.to_string())
            .or_insert_with(HistoryLog::new)
            .record_if_changed(snapshot);
    }

    fn record_missing(&self, missing_delay: std::time::Duration) {
        for mut entry in self.by_key.iter_mut() {
            entry.value_mut().record_if_missing(missing_delay);
        }
    }

    /// Records for one entity, or all entities concatenated when the key is
    /// empty.
    fn records(&self, key: &str) -> Vec<T> {
        if key.is_empty() {
            self.by_key
                .iter()
                .flat_map(|entry| entry.value().queue.iter().cloned().collect::<Vec<_>>())
                .collect()
        } else {
            self.by_key
                .get(key)
                .map(|log| log.queue.iter().cloned().collect())
                .unwrap_or_default()
        }
    }
}

/// Records lab histories keyed by host name and device histories keyed by
/// UUID. Fed by the registry; owns its data.
pub struct HistoryRecorder {
    labs: EntityHistories<LabSnapshot>,
    devices: EntityHistories<DeviceSnapshot>,
    config: FleetConfig,
}

impl HistoryRecorder {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            labs: EntityHistories::new(),
            devices: EntityHistories::new(),
            config,
        }
    }

    pub fn add_lab_record_if_changed(&self, snapshot: LabSnapshot) {
        let host_name = snapshot.info.locator.host_name.clone();
        self.labs.record_if_changed(&host_name, snapshot);
    }

    pub fn add_device_record_if_changed(&self, snapshot: DeviceSnapshot) {
        let uuid = snapshot.info.uuid.clone();
        self.devices.record_if_changed(&uuid, snapshot);
    }

    /// Lab records of the given host, or all labs when the host name is empty.
    pub fn lab_records(&self, host_name: &str) -> Vec<LabSnapshot> {
        self.labs.records(host_name)
    }

    /// Device records of the given UUID, or all devices when it is empty.
    pub fn device_records(&self, device_uuid: &str) -> Vec<DeviceSnapshot> {
        self.devices.records(device_uuid)
    }

    pub fn record_missing_labs(&self) {
        self.labs.record_missing(self.config.missing_delay);
    }

    pub fn record_missing_devices(&self) {
        self.devices.record_missing(self.config.missing_delay);
    }

    /// Spawns the periodic missing-detection sweep until the token cancels.
    pub fn start(self: &std::sync::Arc<Self>, shutdown: CancellationToken) {
        let recorder = self.clone();
        let interval = self.config.missing_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        recorder.record_missing_labs();
                        recorder.record_missing_devices();
                    }
                }
            }
        });
    }
}
