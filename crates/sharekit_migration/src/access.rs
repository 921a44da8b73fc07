//! Typed access rules, the data node's rule lookup and grant/revoke helpers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{AccessBackend, ShareStore};
use crate::conf::SpecMigrationConf;
use crate::error::MigrationError;
use crate::poll::{SpecPollPolicy, wait_for_access_update};
use crate::share::{EnumAccessRulesStatus, EnumShareProtocol, SpecShareInstance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumAccessType {
    Ip,
    Cert,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumAccessLevel {
    Ro,
    Rw,
}

/// Access descriptor: who (`access_to`) gets which level, identified how.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpecAccessRule {
    pub access_type: EnumAccessType,
    pub access_level: EnumAccessLevel,
    pub access_to: String,
}

impl SpecAccessRule {
    pub fn with_level(&self, access_level: EnumAccessLevel) -> Self {
        Self {
            access_level,
            ..self.clone()
        }
    }
}

impl fmt::Display for SpecAccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}:{:?}:{}",
            self.access_type, self.access_level, self.access_to
        )
    }
}

/// Rule as applied on one instance; `id` is assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecAccessHandle {
    pub id: String,
    pub rule: SpecAccessRule,
}

/// Access types a protocol accepts, in order of preference.
const L_PROTOCOL_ACCESS_TYPES: &[(EnumShareProtocol, &[EnumAccessType])] = &[
    (EnumShareProtocol::Nfs, &[EnumAccessType::Ip]),
    (EnumShareProtocol::Cifs, &[EnumAccessType::Ip, EnumAccessType::User]),
    (EnumShareProtocol::Glusterfs, &[EnumAccessType::Cert, EnumAccessType::Ip]),
    (EnumShareProtocol::Cephfs, &[EnumAccessType::Cert]),
    (EnumShareProtocol::Hdfs, &[EnumAccessType::User]),
    (EnumShareProtocol::Maprfs, &[EnumAccessType::User]),
];

/// Pick the first access type the protocol accepts that this node has configured.
pub fn resolve_data_access_rule(
    protocol: EnumShareProtocol,
    cfg: &SpecMigrationConf,
) -> Result<SpecAccessRule, MigrationError> {
    let l_access_types = L_PROTOCOL_ACCESS_TYPES
        .iter()
        .find(|(p, _)| *p == protocol)
        .map(|(_, l)| *l)
        .unwrap_or(&[]);

    l_access_types
        .iter()
        .find_map(|access_type| {
            let access_to = match access_type {
                EnumAccessType::Ip => cfg.data_node_access_ip.as_ref(),
                EnumAccessType::Cert => cfg.data_node_access_cert.as_ref(),
                EnumAccessType::User => cfg.data_node_access_admin_user.as_ref(),
            }?;
            Some(SpecAccessRule {
                access_type: *access_type,
                access_level: EnumAccessLevel::Rw,
                access_to: access_to.clone(),
            })
        })
        .ok_or(MigrationError::AccessNotConfigured(protocol))
}

/// Rules taken off an instance by [`AccessController::change_to_read_only`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecSuspendedAccess {
    pub rules_saved: Vec<SpecAccessRule>,
    pub handles_readonly: Vec<SpecAccessHandle>,
}

/// Grants and revokes rules, waiting for the store to report them applied.
#[derive(Clone)]
pub struct AccessController {
    store: Arc<dyn ShareStore>,
    backend: Arc<dyn AccessBackend>,
    spec_policy: SpecPollPolicy,
}

impl AccessController {
    pub fn new(
        store: Arc<dyn ShareStore>,
        backend: Arc<dyn AccessBackend>,
        spec_policy: SpecPollPolicy,
    ) -> Self {
        Self {
            store,
            backend,
            spec_policy,
        }
    }

    /// Mark the instance out of sync and ask the backend to add `rule`.
    ///
    /// Returns as soon as the request is accepted; see [`Self::wait_settled`].
    pub fn request_allow(
        &self,
        instance: &SpecShareInstance,
        rule: &SpecAccessRule,
    ) -> Result<SpecAccessHandle, MigrationError> {
        let map_grant_err = |e| MigrationError::AccessGrant {
            instance_id: instance.id.clone(),
            source: e,
        };
        self.store
            .update_access_rules_status(&instance.id, EnumAccessRulesStatus::OutOfSync)
            .map_err(map_grant_err)?;
        let handle = self
            .backend
            .allow_access(instance, rule)
            .map_err(map_grant_err)?;
        debug!(instance_id = %instance.id, rule = %rule, handle = %handle.id, "access requested");
        Ok(handle)
    }

    pub fn request_deny(
        &self,
        instance: &SpecShareInstance,
        handle: &SpecAccessHandle,
    ) -> Result<(), MigrationError> {
        self.store
            .update_access_rules_status(&instance.id, EnumAccessRulesStatus::OutOfSync)?;
        self.backend.deny_access(instance, handle)?;
        debug!(instance_id = %instance.id, handle = %handle.id, "access revocation requested");
        Ok(())
    }

    pub fn wait_settled(&self, instance_id: &str) -> Result<(), MigrationError> {
        wait_for_access_update(self.store.as_ref(), instance_id, self.spec_policy)
    }

    pub fn grant(
        &self,
        instance: &SpecShareInstance,
        rule: &SpecAccessRule,
    ) -> Result<SpecAccessHandle, MigrationError> {
        let handle = self.request_allow(instance, rule)?;
        self.wait_settled(&instance.id)?;
        Ok(handle)
    }

    pub fn revoke(
        &self,
        instance: &SpecShareInstance,
        handle: &SpecAccessHandle,
    ) -> Result<(), MigrationError> {
        self.request_deny(instance, handle)?;
        self.wait_settled(&instance.id)
    }

    /// Remove every rule of `instance`; with `if_readonly_support`, re-add each as read-only.
    ///
    /// Keeps clients from writing to the source while its data is copied.
    pub fn change_to_read_only(
        &self,
        instance: &SpecShareInstance,
        if_readonly_support: bool,
    ) -> Result<SpecSuspendedAccess, MigrationError> {
        let l_handles = self.backend.list_access(instance)?;
        let mut spec_suspended = SpecSuspendedAccess::default();

        for handle in &l_handles {
            self.revoke(instance, handle)?;
            spec_suspended.rules_saved.push(handle.rule.clone());
        }
        if if_readonly_support {
            for rule in &spec_suspended.rules_saved {
                let handle = self.grant(instance, &rule.with_level(EnumAccessLevel::Ro))?;
                spec_suspended.handles_readonly.push(handle);
            }
        }
        info!(
            instance_id = %instance.id,
            rules = spec_suspended.rules_saved.len(),
            readonly = if_readonly_support,
            "access rules suspended"
        );
        Ok(spec_suspended)
    }

    /// Undo [`Self::change_to_read_only`]: drop the read-only copies from
    /// `instance_readonly`, then apply the saved rules to `instance_target`.
    pub fn revert_access_rules(
        &self,
        spec_suspended: &SpecSuspendedAccess,
        instance_readonly: &SpecShareInstance,
        instance_target: &SpecShareInstance,
    ) -> Result<(), MigrationError> {
        for handle in &spec_suspended.handles_readonly {
            self.revoke(instance_readonly, handle)?;
        }
        for rule in &spec_suspended.rules_saved {
            self.grant(instance_target, rule)?;
        }
        info!(
            instance_id = %instance_target.id,
            rules = spec_suspended.rules_saved.len(),
            "access rules restored"
        );
        Ok(())
    }
}
