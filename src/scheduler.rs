//! Interface to the allocation scheduler. The matching algorithm itself lives
//! behind this trait; the registry only feeds it devices and consumes its
//! allocation events.

use std::collections::HashMap;

use tokio::sync::broadcast;

use crate::model::{Allocation, DeviceInfo, DeviceLocator, JobUnit, TestLocator};

/// A job known to the scheduler together with its tests, keyed by test id.
#[derive(Debug, Clone)]
pub struct JobWithTests {
    pub job: JobUnit,
    pub tests: HashMap<String, TestLocator>,
}

/// Point-in-time snapshot of the scheduler's job and allocation state.
#[derive(Debug, Clone, Default)]
pub struct JobsAndAllocations {
    /// Jobs keyed by job id.
    pub jobs: HashMap<String, JobWithTests>,
    /// Current allocations keyed by test id.
    pub test_allocations: HashMap<String, Allocation>,
}

/// Emitted by the scheduler whenever it allocates devices to a test.
#[derive(Debug, Clone)]
pub struct AllocationEvent {
    pub allocation: Allocation,
}

/// The allocation scheduler, consumed as an external collaborator.
///
/// Implementations must be safe to call while the registry holds its own
/// lock; none of these methods may call back into the registry.
pub trait Scheduler: Send + Sync {
    /// Adds a job. Returns false if the job id is already known (no-op).
    fn add_job(&self, job: JobUnit) -> bool;

    /// Adds a test to its job. Returns false if the test is already known or
    /// the job is unknown (no-op either way).
    fn add_test(&self, test: TestLocator) -> bool;

    /// Removes a job and all its tests. Devices held by its allocations are
    /// released when `remove_devices` is set.
    fn remove_job(&self, job_id: &str, remove_devices: bool);

    /// Releases the allocation of a single test, closing the test.
    fn unallocate_test(&self, test_id: &str);

    /// Releases any allocation on the device; removes the device from the
    /// scheduler's pool when `remove_device` is set.
    fn unallocate_device(&self, device: &DeviceLocator, remove_device: bool);

    /// Adds or refreshes a schedulable device in the pool.
    fn upsert_device(&self, device: &DeviceInfo);

    /// Snapshots jobs, tests and current allocations.
    fn jobs_and_allocations(&self) -> JobsAndAllocations;

    /// Subscribes to allocation events. Delivery is best-effort; a lagging
    /// subscriber misses events rather than blocking the scheduler.
    fn subscribe_allocations(&self) -> broadcast::Receiver<AllocationEvent>;
}
