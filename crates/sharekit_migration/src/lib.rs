//! `sharekit_migration` v1:
//! Share data migration around the `sharekit_io_fs` copy engine.
//!
//! Modules:
//! - `orchestrator` : grant, mount, copy, teardown, terminal state, notification
//! - `registry`     : live copy tasks by unit id
//! - `access`       : typed access rules and grant/revoke helpers
//! - `mount`        : temporary mount points and mount templates
//! - `poll`         : bounded status polls with quadratic backoff
//! - `backend`      : collaborator traits and the local command executor
//! - `share`        : instance records and persisted state labels
//! - `conf`         : service configuration
//! - `error`        : failure taxonomy

pub mod access;
pub mod backend;
pub mod conf;
pub mod error;
pub mod mount;
pub mod orchestrator;
pub mod poll;
pub mod registry;
pub mod share;

#[cfg(test)]
mod testing;

pub use access::{
    AccessController, EnumAccessLevel, EnumAccessType, SpecAccessHandle, SpecAccessRule,
    SpecSuspendedAccess, resolve_data_access_rule,
};
pub use backend::{
    AccessBackend, BackendError, CommandExecutor, CompletionNotifier, ExecutionError,
    LocalCommandExecutor, ShareStore, SpecCommandOutput,
};
pub use conf::SpecMigrationConf;
pub use error::MigrationError;
pub use mount::{MountManager, SpecMountTemplates};
pub use orchestrator::{
    EnumMigrationOutcome, MigrationOrchestrator, SpecDeleteRequest, SpecMigrationRequest,
};
pub use poll::{
    SpecPollPolicy, wait_for_access_update, wait_for_instance_available,
    wait_for_instance_deleted,
};
pub use registry::{MigrationTaskRegistry, RegistrationGuard};
pub use share::{
    EnumAccessRulesStatus, EnumInstanceStatus, EnumShareProtocol, EnumTaskState,
    SpecShareInstance,
};
