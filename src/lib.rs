//! Fleet registry and synchronization subsystem of a device-testing lab
//! control plane: labs sign up and heartbeat their devices, clients open jobs
//! against the fleet and poll for allocations, and read services expose
//! cached fleet views and entity history.

pub mod config;
pub mod error;
pub mod history;
pub mod ledger;
pub mod model;
pub mod proxy;
pub mod query;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod version;
