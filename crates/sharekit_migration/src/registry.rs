//! Live copy tasks by unit id, for out-of-band cancel and progress requests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sharekit_io_fs::{CopyTask, SpecCopyProgress};
use tracing::{error, info};

use crate::error::MigrationError;

/// At most one live unit per id. Owned explicitly and shared by `Arc`.
///
/// A unit is reserved before any side effect of its flow and gets its copy
/// task attached once the copy is about to start. Cancel and progress
/// requests only see attached tasks.
#[derive(Debug, Default)]
pub struct MigrationTaskRegistry {
    map_tasks: Mutex<HashMap<String, Option<Arc<CopyTask>>>>,
}

/// Keeps a task registered; dropping it unregisters, whichever way the owner exits.
#[must_use = "the task is unregistered when the guard is dropped"]
#[derive(Debug)]
pub struct RegistrationGuard<'a> {
    registry: &'a MigrationTaskRegistry,
    unit_id: String,
}

impl RegistrationGuard<'_> {
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// Expose `task` to cancel and progress requests for this unit.
    pub fn attach(&self, task: Arc<CopyTask>) {
        self.registry
            .map_tasks
            .lock()
            .insert(self.unit_id.clone(), Some(task));
    }
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister(&self.unit_id);
    }
}

impl MigrationTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `unit_id` without a task yet; a second live claim is rejected.
    pub fn reserve(&self, unit_id: &str) -> Result<RegistrationGuard<'_>, MigrationError> {
        let mut map_tasks = self.map_tasks.lock();
        if map_tasks.contains_key(unit_id) {
            return Err(MigrationError::TaskAlreadyRegistered(unit_id.to_string()));
        }
        map_tasks.insert(unit_id.to_string(), None);
        Ok(RegistrationGuard {
            registry: self,
            unit_id: unit_id.to_string(),
        })
    }

    /// Reserve `unit_id` and attach `task` in one step.
    pub fn register(
        &self,
        unit_id: &str,
        task: Arc<CopyTask>,
    ) -> Result<RegistrationGuard<'_>, MigrationError> {
        let guard = self.reserve(unit_id)?;
        guard.attach(task);
        Ok(guard)
    }

    pub fn get(&self, unit_id: &str) -> Option<Arc<CopyTask>> {
        self.map_tasks.lock().get(unit_id).cloned().flatten()
    }

    pub fn unregister(&self, unit_id: &str) -> Option<Arc<CopyTask>> {
        self.map_tasks.lock().remove(unit_id).flatten()
    }

    pub fn contains(&self, unit_id: &str) -> bool {
        self.map_tasks.lock().contains_key(unit_id)
    }

    pub fn len(&self) -> usize {
        self.map_tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flag the task for cancellation and return without waiting for it to stop.
    pub fn cancel_request(&self, unit_id: &str) -> Result<(), MigrationError> {
        info!(unit_id, "received request to cancel data copy");
        let Some(task) = self.get(unit_id) else {
            let err = MigrationError::NoActiveTask(unit_id.to_string());
            error!("{err}");
            return Err(err);
        };
        task.cancel();
        Ok(())
    }

    pub fn progress_request(&self, unit_id: &str) -> Result<SpecCopyProgress, MigrationError> {
        let Some(task) = self.get(unit_id) else {
            let err = MigrationError::NoActiveTask(unit_id.to_string());
            error!("{err}");
            return Err(err);
        };
        let progress = task.get_progress();
        info!(unit_id, total_progress = progress.total_progress, "obtained data copy progress");
        Ok(progress)
    }
}
