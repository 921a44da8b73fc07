//! Share instance records and persisted state labels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Export protocol of a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumShareProtocol {
    Nfs,
    Cifs,
    Glusterfs,
    Cephfs,
    Hdfs,
    Maprfs,
}

impl fmt::Display for EnumShareProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Nfs => "NFS",
            Self::Cifs => "CIFS",
            Self::Glusterfs => "GLUSTERFS",
            Self::Cephfs => "CEPHFS",
            Self::Hdfs => "HDFS",
            Self::Maprfs => "MAPRFS",
        };
        f.write_str(label)
    }
}

/// Lifecycle status of a share instance as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumInstanceStatus {
    Creating,
    Available,
    Deleting,
    Error,
    ErrorDeleting,
}

impl fmt::Display for EnumInstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::ErrorDeleting => "error_deleting",
        };
        f.write_str(label)
    }
}

/// Convergence status of an instance's access rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumAccessRulesStatus {
    Active,
    OutOfSync,
    Error,
}

/// Data copy phase label persisted per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumTaskState {
    Starting,
    InProgress,
    Completing,
    Completed,
    Cancelled,
    Error,
}

impl EnumTaskState {
    /// A worker owns the unit while it carries one of these labels.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Starting | Self::InProgress | Self::Completing)
    }
}

impl fmt::Display for EnumTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "data_copying_starting",
            Self::InProgress => "data_copying_in_progress",
            Self::Completing => "data_copying_completing",
            Self::Completed => "data_copying_completed",
            Self::Cancelled => "data_copying_cancelled",
            Self::Error => "data_copying_error",
        };
        f.write_str(label)
    }
}

/// Instance record fields the migration flow reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecShareInstance {
    pub id: String,
    pub share_id: String,
    pub protocol: EnumShareProtocol,
    pub status: EnumInstanceStatus,
    pub access_rules_status: EnumAccessRulesStatus,
}
