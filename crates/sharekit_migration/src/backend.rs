//! Collaborator seams: state store, access control, command execution, notifications.

use std::io;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::access::{SpecAccessHandle, SpecAccessRule};
use crate::share::{EnumAccessRulesStatus, EnumTaskState, SpecShareInstance};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Persistent record store holding task labels and instance records.
pub trait ShareStore: Send + Sync {
    fn update_task_state(&self, unit_id: &str, state: EnumTaskState) -> Result<(), BackendError>;

    /// Every unit that carries a task label.
    fn list_task_states(&self) -> Result<Vec<(String, EnumTaskState)>, BackendError>;

    /// `BackendError::NotFound` once the instance is gone.
    fn get_instance(&self, instance_id: &str) -> Result<SpecShareInstance, BackendError>;

    fn update_access_rules_status(
        &self,
        instance_id: &str,
        status: EnumAccessRulesStatus,
    ) -> Result<(), BackendError>;
}

/// Driver-side access list manipulation.
///
/// Calls only request the change; the store's `access_rules_status` reports
/// when it has been applied.
pub trait AccessBackend: Send + Sync {
    fn allow_access(
        &self,
        instance: &SpecShareInstance,
        rule: &SpecAccessRule,
    ) -> Result<SpecAccessHandle, BackendError>;

    fn deny_access(
        &self,
        instance: &SpecShareInstance,
        handle: &SpecAccessHandle,
    ) -> Result<(), BackendError>;

    fn list_access(&self, instance: &SpecShareInstance) -> Result<Vec<SpecAccessHandle>, BackendError>;
}

/// One-way "unit reached a terminal state" message to the source backend.
pub trait CompletionNotifier: Send + Sync {
    fn migration_complete(
        &self,
        unit_id: &str,
        instance_id_src: &str,
        instance_id_dst: &str,
        state: EnumTaskState,
    ) -> Result<(), BackendError>;
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecCommandOutput {
    pub stdout: String,
    pub stderr: String,
}

pub trait CommandExecutor: Send + Sync {
    /// Run `argv`; a non-zero exit is `ExecutionError::NonZeroExit`.
    fn execute(&self, argv: &[String], if_run_as_root: bool)
    -> Result<SpecCommandOutput, ExecutionError>;
}

/// Runs commands on this host, prefixing `root_helper` for privileged calls.
#[derive(Debug, Clone)]
pub struct LocalCommandExecutor {
    root_helper: Vec<String>,
}

impl LocalCommandExecutor {
    pub fn new(root_helper: Vec<String>) -> Self {
        Self { root_helper }
    }

    fn derive_argv(&self, argv: &[String], if_run_as_root: bool) -> Vec<String> {
        if if_run_as_root {
            self.root_helper.iter().chain(argv.iter()).cloned().collect()
        } else {
            argv.to_vec()
        }
    }
}

impl CommandExecutor for LocalCommandExecutor {
    fn execute(
        &self,
        argv: &[String],
        if_run_as_root: bool,
    ) -> Result<SpecCommandOutput, ExecutionError> {
        let l_argv = self.derive_argv(argv, if_run_as_root);
        let Some((program, l_args)) = l_argv.split_first() else {
            return Err(ExecutionError::EmptyCommand);
        };

        debug!(command = %l_argv.join(" "), "executing");
        let output = Command::new(program)
            .args(l_args)
            .output()
            .map_err(|e| ExecutionError::Spawn {
                program: program.clone(),
                source: e,
            })?;

        let spec_output = SpecCommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !output.status.success() {
            return Err(ExecutionError::NonZeroExit {
                program: program.clone(),
                code: output.status.code(),
                stderr: spec_output.stderr.trim().to_string(),
            });
        }
        Ok(spec_output)
    }
}
