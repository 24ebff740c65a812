//! Derived Kubernetes resource names and canonical labels.
//!
//! Every resource the engine creates for a task is named by a fixed prefix
//! plus the task UUID; executor jobs additionally carry a zero-based index.
//! Log writers recover `(task_id, index)` from the executor name, so the
//! codec lives here and rejects anything that does not match
//! `te-<uuid>-<int>`.

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

pub const TORC_PREFIX: &str = "torc";
pub const TIF_PREFIX: &str = "tif";
pub const TEXAM_PREFIX: &str = "texam";
pub const TE_PREFIX: &str = "te";
pub const TOF_PREFIX: &str = "tof";
pub const PVC_PREFIX: &str = "pvc";
pub const TASK_CONFIGMAP_PREFIX: &str = "tes-task";

/// Label key identifying the owning task on every derived resource.
pub const TASK_ID_LABEL: &str = "tes-task-id";

pub fn torc_job_name(task_id: &str) -> String {
    format!("{TORC_PREFIX}-{task_id}")
}

pub fn tif_job_name(task_id: &str) -> String {
    format!("{TIF_PREFIX}-{task_id}")
}

pub fn texam_job_name(task_id: &str) -> String {
    format!("{TEXAM_PREFIX}-{task_id}")
}

pub fn tof_job_name(task_id: &str) -> String {
    format!("{TOF_PREFIX}-{task_id}")
}

pub fn pvc_name(task_id: &str) -> String {
    format!("{PVC_PREFIX}-{task_id}")
}

pub fn task_config_map_name(task_id: &str) -> String {
    format!("{TASK_CONFIGMAP_PREFIX}-{task_id}")
}

/// Canonical labels for a derived resource.
///
/// `component` is the resource's role (`torc`, `tif`, ...); `part_of` ties
/// children to the resource that owns their lifetime.
pub fn labels(component: &str, task_id: &str, part_of: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("component".to_owned(), component.to_owned()),
        (TASK_ID_LABEL.to_owned(), task_id.to_owned()),
        ("part-of".to_owned(), part_of.to_owned()),
    ])
}

/// Label selector matching every resource of a task.
pub fn task_selector(task_id: &str) -> String {
    format!("{TASK_ID_LABEL}={task_id}")
}

/// The name of an executor job: `te-<uuid>-<idx>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorName {
    pub task_id: Uuid,
    pub index: usize,
}

impl ExecutorName {
    pub fn new(task_id: Uuid, index: usize) -> Self {
        Self { task_id, index }
    }

    /// Parse an executor job name, rejecting anything that is not exactly
    /// `te-<uuid>-<int>`.
    pub fn parse(name: &str) -> Result<Self, ExecutorNameError> {
        let rest = name
            .strip_prefix("te-")
            .ok_or_else(|| ExecutorNameError(name.to_owned()))?;
        // The UUID is 36 chars with hyphens; the index follows the next '-'.
        let (uuid_part, idx_part) = rest
            .rsplit_once('-')
            .ok_or_else(|| ExecutorNameError(name.to_owned()))?;
        let task_id =
            Uuid::parse_str(uuid_part).map_err(|_| ExecutorNameError(name.to_owned()))?;
        let index: usize = idx_part
            .parse()
            .map_err(|_| ExecutorNameError(name.to_owned()))?;
        Ok(Self { task_id, index })
    }
}

impl fmt::Display for ExecutorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TE_PREFIX}-{}-{}", self.task_id, self.index)
    }
}

/// Error returned for names that do not match `te-<uuid>-<int>`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid executor name: {0:?}")]
pub struct ExecutorNameError(pub String);
