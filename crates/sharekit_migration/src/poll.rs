//! Blocking status polls with quadratic backoff.

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::backend::{BackendError, ShareStore};
use crate::error::MigrationError;
use crate::share::{EnumAccessRulesStatus, EnumInstanceStatus, SpecShareInstance};

/// Deadline and sleep unit of one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecPollPolicy {
    pub timeout: Duration,
    pub backoff_unit: Duration,
}

impl SpecPollPolicy {
    /// Sleep after the `n_tries`-th failed check: `backoff_unit * n_tries²`.
    pub fn delay_for(&self, n_tries: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(n_tries.saturating_mul(n_tries))
    }
}

/// Call `check` until it yields a value, errors, or the deadline passes (`Ok(None)`).
pub(crate) fn poll_until<T, F>(
    spec_policy: SpecPollPolicy,
    mut check: F,
) -> Result<Option<T>, MigrationError>
where
    F: FnMut() -> Result<Option<T>, MigrationError>,
{
    let instant_deadline = Instant::now() + spec_policy.timeout;
    let mut n_tries: u32 = 0;
    loop {
        if let Some(value) = check()? {
            return Ok(Some(value));
        }
        n_tries = n_tries.saturating_add(1);
        let instant_now = Instant::now();
        if instant_now > instant_deadline {
            return Ok(None);
        }
        let duration_sleep = spec_policy
            .delay_for(n_tries)
            .min(instant_deadline - instant_now);
        thread::sleep(duration_sleep);
    }
}

/// Wait until the instance's access rules are `active`.
pub fn wait_for_access_update(
    store: &dyn ShareStore,
    instance_id: &str,
    spec_policy: SpecPollPolicy,
) -> Result<(), MigrationError> {
    let res = poll_until(spec_policy, || {
        let instance = store.get_instance(instance_id)?;
        match instance.access_rules_status {
            EnumAccessRulesStatus::Active => Ok(Some(())),
            EnumAccessRulesStatus::Error => Err(MigrationError::AccessRuleError {
                instance_id: instance_id.to_string(),
            }),
            EnumAccessRulesStatus::OutOfSync => {
                debug!(instance_id, "access rules still out of sync");
                Ok(None)
            }
        }
    })?;
    res.ok_or_else(|| MigrationError::AccessRuleTimeout {
        instance_id: instance_id.to_string(),
        timeout: spec_policy.timeout,
    })
}

/// Wait until a freshly created instance becomes `available`.
pub fn wait_for_instance_available(
    store: &dyn ShareStore,
    instance_id: &str,
    spec_policy: SpecPollPolicy,
) -> Result<SpecShareInstance, MigrationError> {
    let res = poll_until(spec_policy, || {
        let instance = store.get_instance(instance_id)?;
        match instance.status {
            EnumInstanceStatus::Available => Ok(Some(instance)),
            EnumInstanceStatus::Error | EnumInstanceStatus::ErrorDeleting => {
                Err(MigrationError::InstanceError {
                    instance_id: instance_id.to_string(),
                    status: instance.status,
                })
            }
            _ => Ok(None),
        }
    })?;
    res.ok_or_else(|| MigrationError::InstanceTimeout {
        instance_id: instance_id.to_string(),
        expected: "available",
        timeout: spec_policy.timeout,
    })
}

/// Wait until the store no longer knows the instance.
pub fn wait_for_instance_deleted(
    store: &dyn ShareStore,
    instance_id: &str,
    spec_policy: SpecPollPolicy,
) -> Result<(), MigrationError> {
    let res = poll_until(spec_policy, || match store.get_instance(instance_id) {
        Err(BackendError::NotFound(_)) => Ok(Some(())),
        Err(e) => Err(e.into()),
        Ok(instance) if instance.status == EnumInstanceStatus::ErrorDeleting => {
            Err(MigrationError::InstanceError {
                instance_id: instance_id.to_string(),
                status: instance.status,
            })
        }
        Ok(_) => Ok(None),
    })?;
    res.ok_or_else(|| MigrationError::InstanceTimeout {
        instance_id: instance_id.to_string(),
        expected: "deleted",
        timeout: spec_policy.timeout,
    })
}
