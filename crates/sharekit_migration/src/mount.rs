//! Temporary mount points, mount templates and the free-space probe.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{CommandExecutor, ExecutionError};
use crate::error::MigrationError;

/// Placeholder replaced with the mount point in a template argument.
pub const C_PATH_PLACEHOLDER: &str = "{path}";

/// Caller-supplied commands that mount and unmount one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecMountTemplates {
    pub mount: Vec<String>,
    pub unmount: Vec<String>,
}

/// Substitute `{path}` in every argument; without a placeholder the path is appended.
pub fn render_template(template: &[String], path_mount: &Path) -> Vec<String> {
    let c_path = path_mount.to_string_lossy();
    if template.iter().any(|arg| arg.contains(C_PATH_PLACEHOLDER)) {
        return template
            .iter()
            .map(|arg| arg.replace(C_PATH_PLACEHOLDER, &c_path))
            .collect();
    }
    let mut l_argv = template.to_vec();
    l_argv.push(c_path.into_owned());
    l_argv
}

/// Join `path_sub` under `path_root`, refusing anything that could leave it.
pub fn join_inside(path_root: &Path, path_sub: &Path) -> Result<PathBuf, MigrationError> {
    let mut path_joined = path_root.to_path_buf();
    for component in path_sub.components() {
        match component {
            Component::Normal(part) => path_joined.push(part),
            Component::CurDir => {}
            _ => return Err(MigrationError::InvalidPath(path_sub.to_path_buf())),
        }
    }
    Ok(path_joined)
}

fn to_argv(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Creates, mounts, unmounts and removes `<mount_tmp_location>/<instance_id>`.
#[derive(Clone)]
pub struct MountManager {
    executor: Arc<dyn CommandExecutor>,
    path_mount_root: PathBuf,
}

impl MountManager {
    pub fn new(executor: Arc<dyn CommandExecutor>, path_mount_root: PathBuf) -> Self {
        Self {
            executor,
            path_mount_root,
        }
    }

    /// `<mount_tmp_location>/<instance_id>`; the id must be one plain path component.
    pub fn mount_point(&self, instance_id: &str) -> Result<PathBuf, MigrationError> {
        let path_id = Path::new(instance_id);
        let mut iter_components = path_id.components();
        match (iter_components.next(), iter_components.next()) {
            (Some(Component::Normal(_)), None) => join_inside(&self.path_mount_root, path_id),
            _ => Err(MigrationError::InvalidPath(path_id.to_path_buf())),
        }
    }

    pub fn create_mount_point(&self, instance_id: &str) -> Result<PathBuf, MigrationError> {
        let path_mount = self.mount_point(instance_id)?;
        let c_path = path_mount.to_string_lossy().into_owned();
        self.executor
            .execute(&to_argv(&["mkdir", "-p", &c_path]), false)
            .map_err(|e| MigrationError::Mount {
                instance_id: instance_id.to_string(),
                source: e,
            })?;
        Ok(path_mount)
    }

    pub fn remove_mount_point(&self, instance_id: &str) -> Result<(), MigrationError> {
        let c_path = self.mount_point(instance_id)?.to_string_lossy().into_owned();
        self.executor.execute(&to_argv(&["rmdir", &c_path]), false)?;
        Ok(())
    }

    pub fn mount(&self, template: &[String], instance_id: &str) -> Result<(), MigrationError> {
        let path_mount = self.mount_point(instance_id)?;
        let l_argv = render_template(template, &path_mount);
        self.executor
            .execute(&l_argv, true)
            .map_err(|e| MigrationError::Mount {
                instance_id: instance_id.to_string(),
                source: e,
            })?;
        info!(instance_id, path = %path_mount.display(), "instance mounted");
        Ok(())
    }

    pub fn unmount(&self, template: &[String], instance_id: &str) -> Result<(), MigrationError> {
        let l_argv = render_template(template, &self.mount_point(instance_id)?);
        self.executor.execute(&l_argv, true)?;
        debug!(instance_id, "instance unmounted");
        Ok(())
    }

    /// `rm -rf` as root; used to wipe data inside a mounted instance.
    pub fn remove_tree(&self, path: &Path) -> Result<(), ExecutionError> {
        let c_path = path.to_string_lossy().into_owned();
        self.executor.execute(&to_argv(&["rm", "-rf", &c_path]), true)?;
        Ok(())
    }

    /// Fail with `InsufficientSpace` when `path_src` needs more bytes than `path_dst` has free.
    pub fn check_capacity(&self, path_src: &Path, path_dst: &Path) -> Result<(), MigrationError> {
        let c_path_dst = path_dst.to_string_lossy().into_owned();
        let c_path_src = path_src.to_string_lossy().into_owned();

        let output_df = self.executor.execute(&to_argv(&["df", "-B1", &c_path_dst]), true)?;
        let n_available = parse_df_available(&output_df.stdout)?;
        let output_du = self
            .executor
            .execute(&to_argv(&["du", "-bslLB1", &c_path_src]), true)?;
        let n_required = parse_du_total(&output_du.stdout)?;

        debug!(required = n_required, available = n_available, "capacity probed");
        if n_required > n_available {
            return Err(MigrationError::InsufficientSpace {
                path: path_dst.to_path_buf(),
                required: n_required,
                available: n_available,
            });
        }
        Ok(())
    }
}

/// Fourth column of the first data row of `df -B1`.
fn parse_df_available(stdout: &str) -> Result<u64, MigrationError> {
    stdout
        .lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().nth(3))
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| MigrationError::CapacityProbe(format!("unexpected df output: {stdout:?}")))
}

/// First column of `du -bslLB1`.
fn parse_du_total(stdout: &str) -> Result<u64, MigrationError> {
    stdout
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| MigrationError::CapacityProbe(format!("unexpected du output: {stdout:?}")))
}
