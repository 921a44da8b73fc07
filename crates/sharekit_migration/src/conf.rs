//! Migration service configuration.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;
use crate::poll::SpecPollPolicy;

/// Settings of the data service, usually loaded from a TOML file.
///
/// Every field has a default, so an empty document is valid:
///
/// ```toml
/// mount_tmp_location = "/var/lib/sharekit/mnt"
/// data_node_access_ip = "10.0.0.15"
/// wait_access_rules_timeout = "3m"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecMigrationConf {
    /// Directory under which instances are mounted, one sub-directory per instance id.
    pub mount_tmp_location: PathBuf,
    /// Address of this node, granted as an `ip` rule.
    pub data_node_access_ip: Option<String>,
    /// Certificate identity of this node, granted as a `cert` rule.
    pub data_node_access_cert: Option<String>,
    /// Admin user name, granted as a `user` rule.
    pub data_node_access_admin_user: Option<String>,
    #[serde(with = "humantime_serde")]
    pub wait_access_rules_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub create_delete_share_timeout: Duration,
    /// Poll sleep after the n-th check is `poll_backoff_unit * n²`.
    #[serde(with = "humantime_serde")]
    pub poll_backoff_unit: Duration,
    /// Prefix for commands that must run as root.
    pub root_helper: Vec<String>,
}

impl Default for SpecMigrationConf {
    fn default() -> Self {
        Self {
            mount_tmp_location: PathBuf::from("/tmp/"),
            data_node_access_ip: None,
            data_node_access_cert: None,
            data_node_access_admin_user: None,
            wait_access_rules_timeout: Duration::from_secs(180),
            create_delete_share_timeout: Duration::from_secs(300),
            poll_backoff_unit: Duration::from_secs(1),
            root_helper: vec!["sudo".to_string()],
        }
    }
}

impl SpecMigrationConf {
    pub fn from_toml_str(txt: &str) -> Result<Self, MigrationError> {
        let cfg: Self = toml::from_str(txt).map_err(|e| MigrationError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, MigrationError> {
        let txt = fs::read_to_string(path).map_err(|e| MigrationError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&txt)
    }

    pub fn validate(&self) -> Result<(), MigrationError> {
        if !self.mount_tmp_location.is_absolute() {
            return Err(MigrationError::Config(format!(
                "mount_tmp_location must be absolute: {}",
                self.mount_tmp_location.display()
            )));
        }
        if let Some(c_ip) = &self.data_node_access_ip {
            // CIDR notation is accepted; only the address part is checked.
            let c_addr = c_ip.split('/').next().unwrap_or_default();
            if c_addr.parse::<IpAddr>().is_err() {
                return Err(MigrationError::Config(format!(
                    "data_node_access_ip is not an IP address: {c_ip}"
                )));
            }
        }
        for (c_name, value) in [
            ("data_node_access_cert", &self.data_node_access_cert),
            ("data_node_access_admin_user", &self.data_node_access_admin_user),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(MigrationError::Config(format!("{c_name} must not be blank")));
            }
        }
        if self.wait_access_rules_timeout.is_zero() || self.create_delete_share_timeout.is_zero() {
            return Err(MigrationError::Config("timeouts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn access_rules_poll_policy(&self) -> SpecPollPolicy {
        SpecPollPolicy {
            timeout: self.wait_access_rules_timeout,
            backoff_unit: self.poll_backoff_unit,
        }
    }

    pub fn instance_poll_policy(&self) -> SpecPollPolicy {
        SpecPollPolicy {
            timeout: self.create_delete_share_timeout,
            backoff_unit: self.poll_backoff_unit,
        }
    }
}
