//! Pod and container security contexts.
//!
//! Two independently toggleable sets, infrastructure (Torc/Tif/Texam/Tof
//! pods) and executor, each loaded at startup from a JSON document the
//! security ConfigMap mounts into the pod, and validated by typed
//! deserialization into the platform's schema.

use std::path::Path;

use k8s_openapi::api::core::v1::{PodSecurityContext, SecurityContext};
use serde::Deserialize;

use crate::config::Config;
use crate::error::CoreError;

/// File name of the infrastructure security-context document.
pub const INFRASTRUCTURE_FILE: &str = "infrastructure.json";
/// File name of the executor security-context document.
pub const EXECUTOR_FILE: &str = "executor.json";

/// One set of security contexts, applied to a pod and its container.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityContextSet {
    #[serde(default)]
    pub pod: Option<PodSecurityContext>,
    #[serde(default)]
    pub container: Option<SecurityContext>,
}

/// The loaded security-context configuration.
#[derive(Debug, Clone, Default)]
pub struct SecurityContexts {
    pub infrastructure: SecurityContextSet,
    pub executor: SecurityContextSet,
}

impl SecurityContexts {
    /// Load the enabled sets from the mounted ConfigMap path.
    ///
    /// A disabled set stays empty; an enabled set whose file is missing
    /// or malformed is a configuration error.
    pub fn load(config: &Config) -> Result<Self, CoreError> {
        let mut contexts = Self::default();
        if config.infrastructure_security_context_enabled {
            contexts.infrastructure =
                load_set(&config.security_context_path.join(INFRASTRUCTURE_FILE))?;
        }
        if config.executor_security_context_enabled {
            contexts.executor = load_set(&config.security_context_path.join(EXECUTOR_FILE))?;
        }
        Ok(contexts)
    }
}

fn load_set(path: &Path) -> Result<SecurityContextSet, CoreError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Config(format!(
            "cannot read security context {}: {e}",
            path.display()
        ))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        CoreError::Config(format!(
            "invalid security context {}: {e}",
            path.display()
        ))
    })
}
