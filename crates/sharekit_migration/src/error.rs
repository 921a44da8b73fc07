//! Migration failure taxonomy.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use sharekit_io_fs::CopyError;
use thiserror::Error;

use crate::backend::{BackendError, ExecutionError};
use crate::share::{EnumInstanceStatus, EnumShareProtocol};

/// Failures surfaced by the orchestrator, the registry and their helpers.
///
/// Cancellation is an outcome, never one of these.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("No data access is configured for protocol {0}")]
    AccessNotConfigured(EnumShareProtocol),

    #[error("Failed to grant access to instance {instance_id}: {source}")]
    AccessGrant {
        instance_id: String,
        #[source]
        source: BackendError,
    },

    #[error("Access rules of instance {instance_id} did not become active within {timeout:?}")]
    AccessRuleTimeout {
        instance_id: String,
        timeout: Duration,
    },

    #[error("Access rules of instance {instance_id} are in error state")]
    AccessRuleError { instance_id: String },

    #[error("Failed to mount instance {instance_id}: {source}")]
    Mount {
        instance_id: String,
        #[source]
        source: ExecutionError,
    },

    #[error("Not enough space to copy into {}: required={required}, available={available}", .path.display())]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("Failed to probe capacity: {0}")]
    CapacityProbe(String),

    #[error("Copying data of {unit_id} did not succeed: {source}")]
    CopyFailed {
        unit_id: String,
        #[source]
        source: CopyError,
    },

    #[error("Data copy of {0} cannot be cancelled or inspected at this moment")]
    NoActiveTask(String),

    #[error("A copy task is already registered for {0}")]
    TaskAlreadyRegistered(String),

    #[error("Instance {instance_id} did not reach {expected} within {timeout:?}")]
    InstanceTimeout {
        instance_id: String,
        expected: &'static str,
        timeout: Duration,
    },

    #[error("Instance {instance_id} entered status {status}")]
    InstanceError {
        instance_id: String,
        status: EnumInstanceStatus,
    },

    #[error("Deleting data from instance {instance_id} did not succeed: {source}")]
    DeleteFailed {
        instance_id: String,
        #[source]
        source: ExecutionError,
    },

    #[error("Path must stay inside the share: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read configuration {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
