//! Open-job ledger: tracks which jobs clients are still interested in and
//! expires the ones whose clients went away.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::model::{Allocation, JobUnit, TestLocator};
use crate::scheduler::Scheduler;

/// Allocation state of the tests a client asked about.
#[derive(Debug, Clone, Default)]
pub struct Allocations {
    /// Tests that have devices assigned.
    pub allocations: Vec<Allocation>,
    /// Known tests still waiting for devices.
    pub allocating_test_ids: Vec<String>,
    /// Test ids the client asked about that the scheduler does not know.
    pub bad_test_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct JobExpiry {
    keep_alive: Duration,
    expires_at: Instant,
}

/// Tracks open jobs and forwards them to the scheduler. Expirations live in
/// their own concurrent map, refreshed on every job-touching call and swept
/// periodically.
pub struct JobLedger {
    scheduler: Arc<dyn Scheduler>,
    expirations: DashMap<String, JobExpiry>,
    config: FleetConfig,
}

impl JobLedger {
    pub fn new(scheduler: Arc<dyn Scheduler>, config: FleetConfig) -> Self {
        Self {
            scheduler,
            expirations: DashMap::new(),
            config,
        }
    }

    /// Opens a job with its tests, or refreshes it if already open. The
    /// keep-alive is floored so a buggy client cannot expire its job between
    /// two sweeps.
    pub fn open_job(
        &self,
        job: JobUnit,
        tests: Vec<TestLocator>,
        keep_alive: Duration,
    ) {
        let job_id = job.locator.id.clone();
        if self.scheduler.add_job(job) {
            tracing::info!(job_id = %job_id, "Job opened");
        }
        self.add_tests(&job_id, tests);
        let keep_alive = keep_alive.max(self.config.min_job_expiration);
        self.expirations.insert(
            job_id,
            JobExpiry {
                keep_alive,
                expires_at: Instant::now() + keep_alive,
            },
        );
    }

    /// Adds tests to an already open job; already-known tests are no-ops.
    /// Counts as a job heartbeat.
    pub fn add_extra_tests(&self, job_id: &str, tests: Vec<TestLocator>) {
        self.heartbeat_job(job_id);
        self.add_tests(job_id, tests);
    }

    fn add_tests(&self, job_id: &str, tests: Vec<TestLocator>) {
        for test in tests {
            if self.scheduler.add_test(test.clone()) {
                tracing::info!(job_id, test_id = %test.id, "Test added");
            }
        }
    }

    fn heartbeat_job(&self, job_id: &str) {
        if let Some(mut expiry) = self.expirations.get_mut(job_id) {
            expiry.expires_at = Instant::now() + expiry.keep_alive;
        }
    }

    /// Reports the allocation state of the given tests of an open job.
    /// Counts as a job heartbeat.
    pub fn get_allocations(&self, job_id: &str, test_ids: &[String]) -> Result<Allocations> {
        self.heartbeat_job(job_id);
        let snapshot = self.scheduler.jobs_and_allocations();
        let job = snapshot
            .jobs
            .get(job_id)
            .ok_or_else(|| FleetError::JobNotFound(job_id.to_string()))?;

        let mut result = Allocations::default();
        for test_id in test_ids {
            if let Some(allocation) = snapshot.test_allocations.get(test_id) {
                result.allocations.push(allocation.clone());
            } else if job.tests.contains_key(test_id) {
                result.allocating_test_ids.push(test_id.clone());
            } else {
                result.bad_test_ids.push(test_id.clone());
            }
        }
        Ok(result)
    }

    /// Closes one test, releasing its allocation.
    pub fn close_test(&self, test_id: &str) {
        tracing::info!(test_id, "Closing test");
        self.scheduler.unallocate_test(test_id);
    }

    /// Closes a job, releasing all its tests and devices.
    pub fn close_job(&self, job_id: &str) {
        tracing::info!(job_id, "Closing job");
        self.scheduler.remove_job(job_id, /* remove_devices= */ true);
        self.expirations.remove(job_id);
    }

    /// Returns which of the given job ids are still open.
    pub fn check_jobs(&self, job_ids: &[String]) -> Vec<String> {
        let snapshot = self.scheduler.jobs_and_allocations();
        job_ids
            .iter()
            .filter(|id| snapshot.jobs.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Closes every job whose keep-alive has lapsed.
    pub fn close_expired_jobs(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .expirations
            .iter()
            .filter(|entry| entry.value().expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for job_id in expired {
            tracing::info!(job_id = %job_id, "Closing expired job");
            self.close_job(&job_id);
        }
    }

    /// Spawns the expiry sweep. Stops when the token cancels.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) {
        let ledger = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ledger.config.job_expiry_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => ledger.close_expired_jobs(),
                }
            }
        });
    }
}
