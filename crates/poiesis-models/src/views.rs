//! MINIMAL / BASIC / FULL task projections for the list/get endpoints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tes::TesTask;

/// How much of a task document an endpoint returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TesView {
    #[default]
    Minimal,
    Basic,
    Full,
}

impl fmt::Display for TesView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Minimal => "MINIMAL",
            Self::Basic => "BASIC",
            Self::Full => "FULL",
        };
        f.write_str(s)
    }
}

impl FromStr for TesView {
    type Err = TesViewParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINIMAL" => Ok(Self::Minimal),
            "BASIC" => Ok(Self::Basic),
            "FULL" => Ok(Self::Full),
            other => Err(TesViewParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TesView`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid task view: {0:?}")]
pub struct TesViewParseError(pub String);

/// Apply a view to a task, dropping the fields the view excludes.
pub fn project(task: TesTask, view: TesView) -> TesTask {
    match view {
        TesView::Full => task,
        TesView::Minimal => minimal(task),
        TesView::Basic => basic(task),
    }
}

/// MINIMAL: only `id` and `state`; `executors` is kept (required by the
/// TES schema) but emptied of everything the view hides.
fn minimal(task: TesTask) -> TesTask {
    TesTask {
        id: task.id,
        state: task.state,
        executors: Vec::new(),
        ..TesTask::default()
    }
}

/// BASIC: strip executor stdout/stderr, inline input content, and system
/// logs; everything else is kept.
fn basic(mut task: TesTask) -> TesTask {
    if let Some(inputs) = task.inputs.as_mut() {
        for input in inputs {
            input.content = None;
        }
    }
    if let Some(logs) = task.logs.as_mut() {
        for attempt in logs {
            attempt.system_logs = None;
            for exec_log in &mut attempt.logs {
                exec_log.stdout = None;
                exec_log.stderr = None;
            }
        }
    }
    task
}
