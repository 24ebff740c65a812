//! TES task model, mirroring the GA4GH TES v1.1.0 schema.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// Transitions follow `INITIALIZING -> QUEUED -> RUNNING -> {COMPLETE,
/// EXECUTOR_ERROR, SYSTEM_ERROR, CANCELED}`; `CANCELING` may be entered
/// from any non-terminal state. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TesState {
    #[default]
    Unknown,
    Initializing,
    Queued,
    Running,
    Paused,
    Complete,
    ExecutorError,
    SystemError,
    Canceling,
    Canceled,
    Preempted,
}

impl TesState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete
                | Self::ExecutorError
                | Self::SystemError
                | Self::Canceled
                | Self::Preempted
        )
    }

    /// Whether `self -> to` is an edge of the task state machine.
    pub fn can_transition_to(self, to: TesState) -> bool {
        if self == to {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match to {
            TesState::Canceling => true,
            TesState::Queued => self == TesState::Initializing,
            TesState::Running => matches!(self, TesState::Initializing | TesState::Queued),
            TesState::Complete | TesState::ExecutorError | TesState::SystemError => {
                self == TesState::Running
            }
            TesState::Canceled => self == TesState::Canceling,
            _ => false,
        }
    }
}

impl fmt::Display for TesState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Initializing => "INITIALIZING",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Complete => "COMPLETE",
            Self::ExecutorError => "EXECUTOR_ERROR",
            Self::SystemError => "SYSTEM_ERROR",
            Self::Canceling => "CANCELING",
            Self::Canceled => "CANCELED",
            Self::Preempted => "PREEMPTED",
        };
        f.write_str(s)
    }
}

impl FromStr for TesState {
    type Err = TesStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNKNOWN" => Ok(Self::Unknown),
            "INITIALIZING" => Ok(Self::Initializing),
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETE" => Ok(Self::Complete),
            "EXECUTOR_ERROR" => Ok(Self::ExecutorError),
            "SYSTEM_ERROR" => Ok(Self::SystemError),
            "CANCELING" => Ok(Self::Canceling),
            "CANCELED" => Ok(Self::Canceled),
            "PREEMPTED" => Ok(Self::Preempted),
            other => Err(TesStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TesState`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid task state: {0:?}")]
pub struct TesStateParseError(pub String);

/// Kind of a staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TesFileType {
    #[default]
    File,
    Directory,
}

/// A file or directory to stage into the task's shared volume before the
/// executors run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Source URL; absent when `content` carries the bytes inline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Absolute path at which the executor expects to see the input.
    pub path: String,
    #[serde(rename = "type", default)]
    pub r#type: TesFileType,
    /// Inline UTF-8 content; mutually exclusive with `url` per TES.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streamable: Option<bool>,
}

/// A file or directory to upload from the shared volume after the
/// executors finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Destination URL.
    pub url: String,
    /// Absolute path produced by the executors; may contain glob
    /// metacharacters for wildcard outputs.
    pub path: String,
    /// Directory under which glob matches are rooted when computing
    /// relative upload keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(rename = "type", default)]
    pub r#type: TesFileType,
}

/// Resource requests for the executor containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preemptible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_parameters: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_parameters_strict: Option<bool>,
}

/// A single container invocation within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesExecutor {
    pub image: String,
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Path redirected into the command's stdin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// Path the command's stdout is redirected to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Path the command's stderr is redirected to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// When set, a non-zero exit does not fail the chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_error: Option<bool>,
}

/// Log of one executor within one attempt.
///
/// `exit_code` starts at the sentinel 0 and reflects the terminal
/// container state once `end_time` is set (0 iff SUCCEEDED).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesExecutorLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub exit_code: i32,
}

/// Log entry for a single uploaded output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesOutputFileLog {
    pub url: String,
    pub path: String,
    pub size_bytes: String,
}

/// Log of one execution attempt of the whole pipeline.
///
/// A fresh entry is appended every time the pipeline begins, on the first
/// attempt and on each retry; `logs` holds exactly one [`TesExecutorLog`]
/// per task executor, in executor order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesTaskLog {
    pub logs: Vec<TesExecutorLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub outputs: Vec<TesOutputFileLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_logs: Option<Vec<String>>,
}

/// A TES task as submitted and tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TesTask {
    /// Engine-assigned v4 UUID; immutable once set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TesState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<TesInput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<TesOutput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<TesResources>,
    pub executors: Vec<TesExecutor>,
    /// Empty scratch directories made available to all executors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<TesTaskLog>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
}

impl TesTask {
    /// Inputs, or an empty slice when none were declared.
    pub fn inputs(&self) -> &[TesInput] {
        self.inputs.as_deref().unwrap_or_default()
    }

    /// Outputs, or an empty slice when none were declared.
    pub fn outputs(&self) -> &[TesOutput] {
        self.outputs.as_deref().unwrap_or_default()
    }

    /// Scratch volumes, or an empty slice when none were declared.
    pub fn volumes(&self) -> &[String] {
        self.volumes.as_deref().unwrap_or_default()
    }
}
