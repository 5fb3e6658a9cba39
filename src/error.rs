use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error(
        "Incompatible versions: service={service_version}, \
         required_min_service={min_service_version}, \
         caller={caller_version}, required_min_caller={min_caller_version}"
    )]
    VersionMismatch {
        service_version: String,
        min_service_version: String,
        caller_version: String,
        min_caller_version: String,
    },

    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FleetError>;
