//! Migration state machine around one copy task.
//!
//! Every acquired resource pushes its undo step; the stack is unwound in
//! reverse order whatever the outcome, and each undo failure is only logged.

use std::path::PathBuf;
use std::sync::Arc;

use sharekit_io_fs::{
    CopyTask, EnumCopyFileConflictStrategy, EnumCopyOutcome, ReportCopy, SpecCopyOptions,
    SpecCopyProgress,
};
use tracing::{debug, error, info, warn};

use crate::access::{AccessController, SpecAccessHandle, SpecAccessRule, resolve_data_access_rule};
use crate::backend::{AccessBackend, CommandExecutor, CompletionNotifier, ShareStore};
use crate::conf::SpecMigrationConf;
use crate::error::MigrationError;
use crate::mount::{MountManager, SpecMountTemplates, join_inside};
use crate::registry::{MigrationTaskRegistry, RegistrationGuard};
use crate::share::{EnumTaskState, SpecShareInstance};

/// One data copy between two share instances.
#[derive(Debug, Clone, Default)]
pub struct SpecMigrationRequest {
    /// Key of the persisted task label and of the registry entry.
    pub unit_id: String,
    pub instance_id_src: String,
    pub instance_id_dst: String,
    pub mount_src: SpecMountTemplates,
    pub mount_dst: SpecMountTemplates,
    /// Base names left out of the copy.
    pub names_ignore: Vec<String>,
    /// Copy only this sub-tree of the source share.
    pub path_src_sub: Option<PathBuf>,
    /// Copy into this sub-tree of the destination share.
    pub path_dst_sub: Option<PathBuf>,
    /// Skip the free-space check.
    pub if_force_copy: bool,
    /// Two-phase migration: a successful copy does not notify the source backend.
    pub if_defer_completion: bool,
    pub rule_conflict_file: EnumCopyFileConflictStrategy,
}

/// Removal of data below a path inside one share instance.
#[derive(Debug, Clone, Default)]
pub struct SpecDeleteRequest {
    pub unit_id: String,
    pub instance_id: String,
    pub mount: SpecMountTemplates,
    pub path_sub: PathBuf,
}

#[derive(Debug)]
pub enum EnumMigrationOutcome {
    Completed(ReportCopy),
    Cancelled,
}

impl EnumMigrationOutcome {
    fn task_state(&self) -> EnumTaskState {
        match self {
            Self::Completed(_) => EnumTaskState::Completed,
            Self::Cancelled => EnumTaskState::Cancelled,
        }
    }
}

enum EnumTeardownStep {
    RevokeAccess {
        instance: SpecShareInstance,
        handle: SpecAccessHandle,
    },
    RemoveMountPoint {
        instance_id: String,
    },
    Unmount {
        instance_id: String,
        template: Vec<String>,
    },
}

pub struct MigrationOrchestrator {
    cfg: SpecMigrationConf,
    registry: Arc<MigrationTaskRegistry>,
    store: Arc<dyn ShareStore>,
    access: AccessController,
    mounts: MountManager,
    notifier: Arc<dyn CompletionNotifier>,
}

impl MigrationOrchestrator {
    pub fn new(
        cfg: SpecMigrationConf,
        registry: Arc<MigrationTaskRegistry>,
        store: Arc<dyn ShareStore>,
        access_backend: Arc<dyn AccessBackend>,
        executor: Arc<dyn CommandExecutor>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        let access = AccessController::new(
            Arc::clone(&store),
            access_backend,
            cfg.access_rules_poll_policy(),
        );
        let mounts = MountManager::new(executor, cfg.mount_tmp_location.clone());
        Self {
            cfg,
            registry,
            store,
            access,
            mounts,
            notifier,
        }
    }

    pub fn registry(&self) -> &Arc<MigrationTaskRegistry> {
        &self.registry
    }

    pub fn access(&self) -> &AccessController {
        &self.access
    }

    pub fn cancel(&self, unit_id: &str) -> Result<(), MigrationError> {
        self.registry.cancel_request(unit_id)
    }

    pub fn progress(&self, unit_id: &str) -> Result<SpecCopyProgress, MigrationError> {
        self.registry.progress_request(unit_id)
    }

    /// Move units left in a busy label by a previous process to `Error`.
    ///
    /// No copy survives a restart, so nothing can still own them.
    pub fn recover_interrupted(&self) -> Result<usize, MigrationError> {
        let mut cnt_recovered = 0;
        for (unit_id, state) in self.store.list_task_states()? {
            if !state.is_busy() {
                continue;
            }
            warn!(unit_id = %unit_id, state = %state, "data copy interrupted by restart");
            self.persist_state(&unit_id, EnumTaskState::Error);
            cnt_recovered += 1;
        }
        Ok(cnt_recovered)
    }

    /// Copy the source instance's data into the destination instance.
    ///
    /// Cancellation is `Ok(EnumMigrationOutcome::Cancelled)`. On error the
    /// returned cause is the one that stopped the flow, never a teardown failure.
    /// A unit that is already live is rejected with `TaskAlreadyRegistered`
    /// before anything is persisted, acquired or notified.
    pub fn migrate(
        &self,
        request: &SpecMigrationRequest,
    ) -> Result<EnumMigrationOutcome, MigrationError> {
        let unit_id = request.unit_id.as_str();
        info!(
            unit_id,
            src = %request.instance_id_src,
            dst = %request.instance_id_dst,
            "received request to migrate share data"
        );
        let guard_registration = match self.registry.reserve(unit_id) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(unit_id, "rejecting migration request: {e}");
                return Err(e);
            }
        };
        self.persist_state(unit_id, EnumTaskState::Starting);

        let res = self.execute_migration(request, &guard_registration);
        let state = match &res {
            Ok(outcome) => outcome.task_state(),
            Err(_) => EnumTaskState::Error,
        };
        self.persist_state(unit_id, state);

        match &res {
            Ok(EnumMigrationOutcome::Completed(report)) => info!(unit_id, "{report}"),
            Ok(EnumMigrationOutcome::Cancelled) => warn!(
                unit_id,
                src = %request.instance_id_src,
                dst = %request.instance_id_dst,
                "data copy was cancelled"
            ),
            Err(e) => error!(unit_id, "data copy failed: {e}"),
        }

        if state != EnumTaskState::Completed || !request.if_defer_completion {
            self.notify(request, state);
        }
        drop(guard_registration);
        res
    }

    fn execute_migration(
        &self,
        request: &SpecMigrationRequest,
        guard_registration: &RegistrationGuard<'_>,
    ) -> Result<EnumMigrationOutcome, MigrationError> {
        let instance_src = self.store.get_instance(&request.instance_id_src)?;
        let instance_dst = self.store.get_instance(&request.instance_id_dst)?;
        let rule = resolve_data_access_rule(instance_src.protocol, &self.cfg)?;

        let mut l_teardown = Vec::new();
        let res = self.acquire_and_copy(
            request,
            [&instance_src, &instance_dst],
            &rule,
            &mut l_teardown,
            guard_registration,
        );
        self.run_teardown(&request.unit_id, l_teardown);
        res
    }

    fn acquire_and_copy(
        &self,
        request: &SpecMigrationRequest,
        l_instances: [&SpecShareInstance; 2],
        rule: &SpecAccessRule,
        l_teardown: &mut Vec<EnumTeardownStep>,
        guard_registration: &RegistrationGuard<'_>,
    ) -> Result<EnumMigrationOutcome, MigrationError> {
        for instance in l_instances {
            self.grant_access(instance, rule, l_teardown)?;
        }

        let [instance_src, instance_dst] = l_instances;
        let path_mount_src = self.mount_instance(&instance_src.id, &request.mount_src, l_teardown)?;
        let path_mount_dst = self.mount_instance(&instance_dst.id, &request.mount_dst, l_teardown)?;

        let path_copy_src = match &request.path_src_sub {
            Some(path_sub) => join_inside(&path_mount_src, path_sub)?,
            None => path_mount_src,
        };
        let path_copy_dst = match &request.path_dst_sub {
            Some(path_sub) => join_inside(&path_mount_dst, path_sub)?,
            None => path_mount_dst,
        };
        if !request.if_force_copy {
            self.mounts.check_capacity(&path_copy_src, &path_copy_dst)?;
        }

        let spec_cp_options = SpecCopyOptions {
            names_ignore: request.names_ignore.clone(),
            rule_conflict_file: request.rule_conflict_file,
            ..SpecCopyOptions::default()
        };
        let task = Arc::new(CopyTask::new(&path_copy_src, &path_copy_dst, spec_cp_options));
        guard_registration.attach(Arc::clone(&task));
        self.persist_state(&request.unit_id, EnumTaskState::InProgress);

        let outcome = task.run();
        self.persist_state(&request.unit_id, EnumTaskState::Completing);

        match outcome {
            EnumCopyOutcome::Completed(report) => Ok(EnumMigrationOutcome::Completed(report)),
            EnumCopyOutcome::Cancelled => Ok(EnumMigrationOutcome::Cancelled),
            EnumCopyOutcome::Failed(e) => Err(MigrationError::CopyFailed {
                unit_id: request.unit_id.clone(),
                source: e,
            }),
        }
    }

    /// Remove data below `path_sub` inside one instance.
    pub fn delete_data(&self, request: &SpecDeleteRequest) -> Result<(), MigrationError> {
        let unit_id = request.unit_id.as_str();
        info!(
            unit_id,
            instance_id = %request.instance_id,
            path = %request.path_sub.display(),
            "received request to delete share data"
        );

        let res = self.execute_delete(request);
        match &res {
            Ok(()) => {
                self.persist_state(unit_id, EnumTaskState::Completed);
                debug!(unit_id, "data deletion succeeded");
            }
            Err(e) => {
                self.persist_state(unit_id, EnumTaskState::Error);
                error!(unit_id, "data deletion failed: {e}");
            }
        }
        res
    }

    fn execute_delete(&self, request: &SpecDeleteRequest) -> Result<(), MigrationError> {
        let instance = self.store.get_instance(&request.instance_id)?;
        let rule = resolve_data_access_rule(instance.protocol, &self.cfg)?;

        let mut l_teardown = Vec::new();
        let res = (|| -> Result<(), MigrationError> {
            self.grant_access(&instance, &rule, &mut l_teardown)?;
            let path_mount = self.mount_instance(&instance.id, &request.mount, &mut l_teardown)?;
            let path_delete = join_inside(&path_mount, &request.path_sub)?;
            self.mounts
                .remove_tree(&path_delete)
                .map_err(|e| MigrationError::DeleteFailed {
                    instance_id: instance.id.clone(),
                    source: e,
                })
        })();
        self.run_teardown(&request.unit_id, l_teardown);
        res
    }

    fn grant_access(
        &self,
        instance: &SpecShareInstance,
        rule: &SpecAccessRule,
        l_teardown: &mut Vec<EnumTeardownStep>,
    ) -> Result<(), MigrationError> {
        let handle = self.access.request_allow(instance, rule)?;
        l_teardown.push(EnumTeardownStep::RevokeAccess {
            instance: instance.clone(),
            handle,
        });
        self.access.wait_settled(&instance.id)
    }

    fn mount_instance(
        &self,
        instance_id: &str,
        spec_templates: &SpecMountTemplates,
        l_teardown: &mut Vec<EnumTeardownStep>,
    ) -> Result<PathBuf, MigrationError> {
        let path_mount = self.mounts.create_mount_point(instance_id)?;
        l_teardown.push(EnumTeardownStep::RemoveMountPoint {
            instance_id: instance_id.to_string(),
        });
        self.mounts.mount(&spec_templates.mount, instance_id)?;
        l_teardown.push(EnumTeardownStep::Unmount {
            instance_id: instance_id.to_string(),
            template: spec_templates.unmount.clone(),
        });
        Ok(path_mount)
    }

    fn run_teardown(&self, unit_id: &str, l_teardown: Vec<EnumTeardownStep>) {
        for step in l_teardown.into_iter().rev() {
            match step {
                EnumTeardownStep::Unmount {
                    instance_id,
                    template,
                } => {
                    if let Err(e) = self.mounts.unmount(&template, &instance_id) {
                        error!(unit_id, instance_id = %instance_id, "could not unmount instance: {e}");
                    }
                }
                EnumTeardownStep::RemoveMountPoint { instance_id } => {
                    if let Err(e) = self.mounts.remove_mount_point(&instance_id) {
                        error!(unit_id, instance_id = %instance_id, "could not remove mount point: {e}");
                    }
                }
                EnumTeardownStep::RevokeAccess { instance, handle } => {
                    if let Err(e) = self.access.revoke(&instance, &handle) {
                        error!(unit_id, instance_id = %instance.id, "could not deny access: {e}");
                    }
                }
            }
        }
    }

    fn persist_state(&self, unit_id: &str, state: EnumTaskState) {
        match self.store.update_task_state(unit_id, state) {
            Ok(()) => debug!(unit_id, state = %state, "task state updated"),
            Err(e) => error!(unit_id, state = %state, "could not persist task state: {e}"),
        }
    }

    fn notify(&self, request: &SpecMigrationRequest, state: EnumTaskState) {
        info!(unit_id = %request.unit_id, state = %state, "notifying source backend");
        if let Err(e) = self.notifier.migration_complete(
            &request.unit_id,
            &request.instance_id_src,
            &request.instance_id_dst,
            state,
        ) {
            error!(unit_id = %request.unit_id, "could not notify source backend: {e}");
        }
    }
}
