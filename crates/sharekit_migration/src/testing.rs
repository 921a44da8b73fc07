//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::access::{SpecAccessHandle, SpecAccessRule};
use crate::backend::{
    AccessBackend, BackendError, CommandExecutor, CompletionNotifier, ExecutionError,
    SpecCommandOutput, ShareStore,
};
use crate::share::{
    EnumAccessRulesStatus, EnumInstanceStatus, EnumShareProtocol, EnumTaskState,
    SpecShareInstance,
};

/// Ordered record of every side effect, shared by the fakes of one test.
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub(crate) fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

type TaskStateHook = Box<dyn Fn(&str, EnumTaskState) + Send + Sync>;

#[derive(Default)]
pub(crate) struct FakeShareStore {
    map_instances: Mutex<HashMap<String, SpecShareInstance>>,
    map_access_scripted: Mutex<HashMap<String, VecDeque<EnumAccessRulesStatus>>>,
    map_access_pinned: Mutex<HashMap<String, EnumAccessRulesStatus>>,
    map_task_states: Mutex<HashMap<String, EnumTaskState>>,
    l_task_history: Mutex<Vec<(String, EnumTaskState)>>,
    hook_task_state: Mutex<Option<TaskStateHook>>,
}

impl FakeShareStore {
    pub(crate) fn add_instance(&self, instance_id: &str) -> SpecShareInstance {
        let instance = SpecShareInstance {
            id: instance_id.to_string(),
            share_id: format!("share-of-{instance_id}"),
            protocol: EnumShareProtocol::Nfs,
            status: EnumInstanceStatus::Available,
            access_rules_status: EnumAccessRulesStatus::Active,
        };
        self.map_instances
            .lock()
            .insert(instance_id.to_string(), instance.clone());
        instance
    }

    pub(crate) fn set_instance_status(&self, instance_id: &str, status: EnumInstanceStatus) {
        if let Some(instance) = self.map_instances.lock().get_mut(instance_id) {
            instance.status = status;
        }
    }

    /// Statuses returned by successive reads; the last one sticks.
    pub(crate) fn script_access_statuses(&self, instance_id: &str, l_statuses: &[EnumAccessRulesStatus]) {
        self.map_access_scripted
            .lock()
            .insert(instance_id.to_string(), l_statuses.iter().copied().collect());
    }

    /// Status reported regardless of later updates.
    pub(crate) fn set_access_rules_status_pinned(&self, instance_id: &str, status: EnumAccessRulesStatus) {
        self.map_access_pinned
            .lock()
            .insert(instance_id.to_string(), status);
    }

    pub(crate) fn seed_task_state(&self, unit_id: &str, state: EnumTaskState) {
        self.map_task_states.lock().insert(unit_id.to_string(), state);
    }

    pub(crate) fn task_state(&self, unit_id: &str) -> Option<EnumTaskState> {
        self.map_task_states.lock().get(unit_id).copied()
    }

    pub(crate) fn task_state_history(&self, unit_id: &str) -> Vec<EnumTaskState> {
        self.l_task_history
            .lock()
            .iter()
            .filter(|(id, _)| id == unit_id)
            .map(|(_, state)| *state)
            .collect()
    }

    pub(crate) fn on_task_state<F>(&self, hook: F)
    where
        F: Fn(&str, EnumTaskState) + Send + Sync + 'static,
    {
        *self.hook_task_state.lock() = Some(Box::new(hook));
    }
}

impl ShareStore for FakeShareStore {
    fn update_task_state(&self, unit_id: &str, state: EnumTaskState) -> Result<(), BackendError> {
        self.map_task_states.lock().insert(unit_id.to_string(), state);
        self.l_task_history.lock().push((unit_id.to_string(), state));
        if let Some(hook) = self.hook_task_state.lock().as_ref() {
            hook(unit_id, state);
        }
        Ok(())
    }

    fn list_task_states(&self) -> Result<Vec<(String, EnumTaskState)>, BackendError> {
        let mut l_states: Vec<_> = self
            .map_task_states
            .lock()
            .iter()
            .map(|(id, state)| (id.clone(), *state))
            .collect();
        l_states.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(l_states)
    }

    fn get_instance(&self, instance_id: &str) -> Result<SpecShareInstance, BackendError> {
        let mut instance = self
            .map_instances
            .lock()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(instance_id.to_string()))?;

        if let Some(status) = self.map_access_pinned.lock().get(instance_id) {
            instance.access_rules_status = *status;
        } else if let Some(l_scripted) = self.map_access_scripted.lock().get_mut(instance_id) {
            let status = if l_scripted.len() > 1 {
                l_scripted.pop_front()
            } else {
                l_scripted.front().copied()
            };
            if let Some(status) = status {
                instance.access_rules_status = status;
            }
        }
        Ok(instance)
    }

    fn update_access_rules_status(
        &self,
        instance_id: &str,
        status: EnumAccessRulesStatus,
    ) -> Result<(), BackendError> {
        let mut map_instances = self.map_instances.lock();
        let instance = map_instances
            .get_mut(instance_id)
            .ok_or_else(|| BackendError::NotFound(instance_id.to_string()))?;
        instance.access_rules_status = status;
        Ok(())
    }
}

/// Applies rules instantly and flips the store back to `active`.
pub(crate) struct FakeAccessBackend {
    store: Arc<FakeShareStore>,
    journal: Journal,
    map_rules: Mutex<HashMap<String, Vec<SpecAccessHandle>>>,
    set_fail_allow: Mutex<HashSet<String>>,
    if_fail_deny: AtomicBool,
    cnt_handles: AtomicUsize,
}

impl FakeAccessBackend {
    pub(crate) fn new(store: Arc<FakeShareStore>, journal: Journal) -> Self {
        Self {
            store,
            journal,
            map_rules: Mutex::new(HashMap::new()),
            set_fail_allow: Mutex::new(HashSet::new()),
            if_fail_deny: AtomicBool::new(false),
            cnt_handles: AtomicUsize::new(0),
        }
    }

    fn next_handle(&self, rule: SpecAccessRule) -> SpecAccessHandle {
        let n_handle = self.cnt_handles.fetch_add(1, Ordering::Relaxed);
        SpecAccessHandle {
            id: format!("access-{n_handle}"),
            rule,
        }
    }

    pub(crate) fn seed_rule(&self, instance_id: &str, rule: SpecAccessRule) {
        let handle = self.next_handle(rule);
        self.map_rules
            .lock()
            .entry(instance_id.to_string())
            .or_default()
            .push(handle);
    }

    pub(crate) fn rules_of(&self, instance_id: &str) -> Vec<SpecAccessRule> {
        self.map_rules
            .lock()
            .get(instance_id)
            .map(|l| l.iter().map(|h| h.rule.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn fail_allow_on(&self, instance_id: &str) {
        self.set_fail_allow.lock().insert(instance_id.to_string());
    }

    pub(crate) fn fail_deny(&self) {
        self.if_fail_deny.store(true, Ordering::Relaxed);
    }
}

impl AccessBackend for FakeAccessBackend {
    fn allow_access(
        &self,
        instance: &SpecShareInstance,
        rule: &SpecAccessRule,
    ) -> Result<SpecAccessHandle, BackendError> {
        self.journal.push(format!("allow {} {rule}", instance.id));
        if self.set_fail_allow.lock().contains(&instance.id) {
            return Err(BackendError::Rejected(format!("allow on {}", instance.id)));
        }
        let handle = self.next_handle(rule.clone());
        self.map_rules
            .lock()
            .entry(instance.id.clone())
            .or_default()
            .push(handle.clone());
        self.store
            .update_access_rules_status(&instance.id, EnumAccessRulesStatus::Active)?;
        Ok(handle)
    }

    fn deny_access(
        &self,
        instance: &SpecShareInstance,
        handle: &SpecAccessHandle,
    ) -> Result<(), BackendError> {
        self.journal.push(format!("deny {}", instance.id));
        if let Some(l_handles) = self.map_rules.lock().get_mut(&instance.id) {
            l_handles.retain(|h| h.id != handle.id);
        }
        if self.if_fail_deny.load(Ordering::Relaxed) {
            return Err(BackendError::Unavailable("deny failed".to_string()));
        }
        self.store
            .update_access_rules_status(&instance.id, EnumAccessRulesStatus::Active)
    }

    fn list_access(&self, instance: &SpecShareInstance) -> Result<Vec<SpecAccessHandle>, BackendError> {
        Ok(self
            .map_rules
            .lock()
            .get(&instance.id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Journals every command; fails or answers by substring of the joined argv.
pub(crate) struct FakeExecutor {
    journal: Journal,
    l_failures: Mutex<Vec<String>>,
    l_responses: Mutex<Vec<(String, String)>>,
}

impl FakeExecutor {
    pub(crate) fn new(journal: Journal) -> Self {
        Self {
            journal,
            l_failures: Mutex::new(Vec::new()),
            l_responses: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail_on(&self, pattern: &str) {
        self.l_failures.lock().push(pattern.to_string());
    }

    /// Later responses for the same pattern win.
    pub(crate) fn respond(&self, pattern: &str, stdout: &str) {
        self.l_responses
            .lock()
            .push((pattern.to_string(), stdout.to_string()));
    }
}

impl CommandExecutor for FakeExecutor {
    fn execute(
        &self,
        argv: &[String],
        if_run_as_root: bool,
    ) -> Result<SpecCommandOutput, ExecutionError> {
        let c_command = argv.join(" ");
        let c_tag = if if_run_as_root { "exec[root]" } else { "exec" };
        self.journal.push(format!("{c_tag} {c_command}"));

        if self.l_failures.lock().iter().any(|p| c_command.contains(p.as_str())) {
            return Err(ExecutionError::NonZeroExit {
                program: argv.first().cloned().unwrap_or_default(),
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        let stdout = self
            .l_responses
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| c_command.contains(p.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        Ok(SpecCommandOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

pub(crate) struct FakeNotifier {
    journal: Journal,
    l_calls: Mutex<Vec<(String, EnumTaskState)>>,
}

impl FakeNotifier {
    pub(crate) fn new(journal: Journal) -> Self {
        Self {
            journal,
            l_calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, EnumTaskState)> {
        self.l_calls.lock().clone()
    }
}

impl CompletionNotifier for FakeNotifier {
    fn migration_complete(
        &self,
        unit_id: &str,
        _instance_id_src: &str,
        _instance_id_dst: &str,
        state: EnumTaskState,
    ) -> Result<(), BackendError> {
        self.journal.push(format!("notify {unit_id} {state}"));
        self.l_calls.lock().push((unit_id.to_string(), state));
        Ok(())
    }
}
