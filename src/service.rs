//! RPC surface of the control plane, one facade struct per service. Each
//! method takes a request struct and returns `Result<Response>`; mutating
//! methods run the version handshake first.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::FleetConfig;
use crate::error::Result;
use crate::history::{DeviceSnapshot, HistoryRecorder, LabSnapshot};
use crate::ledger::{Allocations, JobLedger};
use crate::model::{JobUnit, LabLocator, LabServerFeature, LabServerSetting, TestLocator};
use crate::query::cache::QueryCache;
use crate::query::view::{build_view, page_view};
use crate::query::{sub_list, LabQuery, LabQueryResult, Page, QueryView};
use crate::registry::{DeviceHeartbeat, DeviceSignUp, FleetRegistry};
use crate::version::{
    VersionCheckRequest, VersionCheckResponse, VersionChecker, MIN_AGENT_VERSION,
    MIN_CLIENT_VERSION, SERVICE_VERSION,
};

#[derive(Debug, Clone)]
pub struct SignUpLabRequest {
    pub version_check: VersionCheckRequest,
    pub lab_locator: LabLocator,
    pub server_setting: LabServerSetting,
    pub server_feature: LabServerFeature,
    pub devices: Vec<DeviceSignUp>,
}

#[derive(Debug, Clone)]
pub struct SignUpLabResponse {
    pub version: VersionCheckResponse,
    /// UUIDs the registry refused; the lab should stop reporting them.
    pub duplicated_device_uuids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatLabRequest {
    pub version_check: VersionCheckRequest,
    pub lab_host_name: String,
    pub lab_ip: String,
    pub devices: Vec<DeviceHeartbeat>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatLabResponse {
    pub version: VersionCheckResponse,
    /// Device ids the lab must sign up again before further heartbeats.
    pub outdated_device_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SignOutDeviceRequest {
    pub version_check: VersionCheckRequest,
    pub lab_host_name: String,
    pub device_id: String,
}

/// Lab-agent-facing service: device registration and liveness.
pub struct LabSyncService {
    registry: Arc<FleetRegistry>,
    version_checker: VersionChecker,
}

impl LabSyncService {
    pub fn new(registry: Arc<FleetRegistry>) -> Self {
        Self {
            registry,
            version_checker: VersionChecker::new(SERVICE_VERSION, MIN_AGENT_VERSION),
        }
    }

    pub async fn sign_up_lab(&self, request: SignUpLabRequest) -> Result<SignUpLabResponse> {
        let version = self.version_checker.check(&request.version_check)?;
        let duplicated_device_uuids = self
            .registry
            .sign_up(
                request.lab_locator,
                request.server_setting,
                request.server_feature,
                request.devices,
            )
            .await;
        Ok(SignUpLabResponse {
            version,
            duplicated_device_uuids,
        })
    }

    pub async fn heartbeat_lab(&self, request: HeartbeatLabRequest) -> Result<HeartbeatLabResponse> {
        let version = self.version_checker.check(&request.version_check)?;
        let outdated_device_ids = self
            .registry
            .heartbeat(&request.lab_host_name, &request.lab_ip, request.devices)
            .await;
        Ok(HeartbeatLabResponse {
            version,
            outdated_device_ids,
        })
    }

    pub async fn sign_out_device(&self, request: SignOutDeviceRequest) -> Result<()> {
        self.version_checker.check(&request.version_check)?;
        self.registry
            .sign_out(&request.lab_host_name, &request.device_id)
            .await;
        Ok(())
    }

    /// Declared capability gap; callers must fall back to the liveness sweep.
    pub fn remove_missing_devices(&self, _device_uuids: &[String]) -> Result<()> {
        Err(crate::error::FleetError::Unsupported("remove_missing_devices"))
    }

    /// Declared capability gap; callers must fall back to the liveness sweep.
    pub fn remove_missing_hosts(&self, _host_names: &[String]) -> Result<()> {
        Err(crate::error::FleetError::Unsupported("remove_missing_hosts"))
    }
}

#[derive(Debug, Clone)]
pub struct OpenJobRequest {
    pub version_check: VersionCheckRequest,
    pub job: JobUnit,
    pub tests: Vec<TestLocator>,
    pub keep_alive: Duration,
}

#[derive(Debug, Clone)]
pub struct AddExtraTestsRequest {
    pub version_check: VersionCheckRequest,
    pub job_id: String,
    pub tests: Vec<TestLocator>,
}

#[derive(Debug, Clone)]
pub struct GetAllocationsRequest {
    pub job_id: String,
    pub test_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CloseTestRequest {
    pub version_check: VersionCheckRequest,
    pub job_id: String,
    pub test_id: String,
}

#[derive(Debug, Clone)]
pub struct CloseJobRequest {
    pub version_check: VersionCheckRequest,
    pub job_id: String,
}

/// Client-facing service: the open-job/test lifecycle.
pub struct JobSyncService {
    ledger: Arc<JobLedger>,
    registry: Arc<FleetRegistry>,
    version_checker: VersionChecker,
}

impl JobSyncService {
    pub fn new(ledger: Arc<JobLedger>, registry: Arc<FleetRegistry>) -> Self {
        Self {
            ledger,
            registry,
            version_checker: VersionChecker::new(SERVICE_VERSION, MIN_CLIENT_VERSION),
        }
    }

    /// Opens a job. Waits for the first registered device (or the startup
    /// timeout) so a job opened right after service start is not starved.
    pub async fn open_job(&self, request: OpenJobRequest) -> Result<VersionCheckResponse> {
        let version = self.version_checker.check(&request.version_check)?;
        self.registry.first_device_or_timeout().await;
        self.ledger
            .open_job(request.job, request.tests, request.keep_alive);
        Ok(version)
    }

    pub fn add_extra_tests(&self, request: AddExtraTestsRequest) -> Result<VersionCheckResponse> {
        let version = self.version_checker.check(&request.version_check)?;
        self.ledger.add_extra_tests(&request.job_id, request.tests);
        Ok(version)
    }

    pub fn get_allocations(&self, request: GetAllocationsRequest) -> Result<Allocations> {
        self.ledger
            .get_allocations(&request.job_id, &request.test_ids)
    }

    pub fn close_test(&self, request: CloseTestRequest) -> Result<()> {
        self.version_checker.check(&request.version_check)?;
        self.ledger.close_test(&request.test_id);
        Ok(())
    }

    pub fn close_job(&self, request: CloseJobRequest) -> Result<()> {
        self.version_checker.check(&request.version_check)?;
        self.ledger.close_job(&request.job_id);
        Ok(())
    }

    /// Which of the given jobs are still open.
    pub fn check_jobs(&self, job_ids: &[String]) -> Result<Vec<String>> {
        Ok(self.ledger.check_jobs(job_ids))
    }

    /// Declared capability gap; clients close jobs instead.
    pub fn kill_job(&self, _job_id: &str) -> Result<()> {
        Err(crate::error::FleetError::Unsupported("kill_job"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetLabInfoRequest {
    pub query: LabQuery,
    pub page: Page,
    /// Identifies a paging session; empty for single-shot queries.
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct GetLabInfoResponse {
    /// When the underlying snapshot was computed; pages of one session share
    /// it.
    pub timestamp: DateTime<Utc>,
    pub view: QueryView,
}

/// Read-side query service over the two-tier cache.
pub struct LabInfoService {
    registry: Arc<FleetRegistry>,
    cache: QueryCache,
}

impl LabInfoService {
    pub fn new(registry: Arc<FleetRegistry>, config: FleetConfig) -> Self {
        Self {
            registry,
            cache: QueryCache::new(config),
        }
    }

    pub async fn get_lab_info(&self, request: GetLabInfoRequest) -> Result<GetLabInfoResponse> {
        let follow_up_page = request.page.offset > 0;
        let result = match self
            .cache
            .get(&request.query, &request.client_id, follow_up_page)
        {
            Some(result) => result,
            None => {
                let lab_view = self.registry.fleet_view(&request.query.filter).await;
                let result = Arc::new(LabQueryResult {
                    timestamp: Utc::now(),
                    view: build_view(&request.query, lab_view),
                });
                self.cache
                    .put(&request.query, &request.client_id, result.clone());
                result
            }
        };
        Ok(GetLabInfoResponse {
            timestamp: result.timestamp,
            view: page_view(&result.view, request.page),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GetLabRecordResponse {
    pub lab_record_total_count: usize,
    pub lab_records: Vec<LabSnapshot>,
}

#[derive(Debug, Clone)]
pub struct GetDeviceRecordResponse {
    pub device_record_total_count: usize,
    pub device_records: Vec<DeviceSnapshot>,
}

/// Read-side history service. An empty key returns records of all entities.
pub struct LabRecordService {
    history: Arc<HistoryRecorder>,
}

impl LabRecordService {
    pub fn new(history: Arc<HistoryRecorder>) -> Self {
        Self { history }
    }

    pub fn get_lab_record(&self, lab_host_name: &str, page: Page) -> Result<GetLabRecordResponse> {
        let records = self.history.lab_records(lab_host_name);
        Ok(GetLabRecordResponse {
            lab_record_total_count: records.len(),
            lab_records: sub_list(&records, page),
        })
    }

    pub fn get_device_record(
        &self,
        device_uuid: &str,
        page: Page,
    ) -> Result<GetDeviceRecordResponse> {
        let records = self.history.device_records(device_uuid);
        Ok(GetDeviceRecordResponse {
            device_record_total_count: records.len(),
            device_records: sub_list(&records, page),
        })
    }
}
