//! Engine configuration.
//!
//! The environment is read exactly once, at process start, into an
//! explicit [`Config`] that is passed through constructors.

use std::env;
use std::path::PathBuf;

/// Environment variable names recognized by the engine.
pub mod env_vars {
    pub const NAMESPACE: &str = "POIESIS_K8S_NAMESPACE";
    pub const IMAGE: &str = "POIESIS_IMAGE";
    pub const SERVICE_ACCOUNT_NAME: &str = "POIESIS_SERVICE_ACCOUNT_NAME";
    pub const RESTART_POLICY: &str = "POIESIS_RESTART_POLICY";
    pub const IMAGE_PULL_POLICY: &str = "POIESIS_IMAGE_PULL_POLICY";
    pub const JOB_TTL: &str = "POIESIS_JOB_TTL";
    pub const PVC_ACCESS_MODE: &str = "POIESIS_PVC_ACCESS_MODE";
    pub const PVC_STORAGE_CLASS: &str = "POIESIS_PVC_STORAGE_CLASS";
    pub const REDIS_SECRET_NAME: &str = "POIESIS_REDIS_SECRET_NAME";
    pub const MONGO_SECRET_NAME: &str = "POIESIS_MONGO_SECRET_NAME";
    pub const S3_SECRET_NAME: &str = "POIESIS_S3_SECRET_NAME";
    pub const MONGODB_URI_SECRET_KEY: &str = "POIESIS_MONGODB_URI_SECRET_KEY";
    pub const INFRA_SECURITY_CONTEXT_ENABLED: &str = "POIESIS_INFRASTRUCTURE_SECURITY_CONTEXT_ENABLED";
    pub const EXECUTOR_SECURITY_CONTEXT_ENABLED: &str = "POIESIS_EXECUTOR_SECURITY_CONTEXT_ENABLED";
    pub const SECURITY_CONTEXT_PATH: &str = "POIESIS_SECURITY_CONTEXT_PATH";
    pub const SECURITY_CONTEXT_CONFIGMAP_NAME: &str = "POIESIS_SECURITY_CONTEXT_CONFIGMAP_NAME";
    pub const TASK_REQUEST_PATH: &str = "POIESIS_TASK_REQUEST_PATH";
    pub const MONITOR_TIMEOUT_SECONDS: &str = "MONITOR_TIMEOUT_SECONDS";
    pub const BROKER_HOST: &str = "MESSAGE_BROKER_HOST";
    pub const BROKER_PORT: &str = "MESSAGE_BROKER_PORT";
    pub const BROKER_PASSWORD: &str = "MESSAGE_BROKER_PASSWORD";
    pub const MONGODB_CONNECTION_STRING: &str = "MONGODB_CONNECTION_STRING";
    pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
    pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
    pub const AWS_REGION: &str = "AWS_REGION";
    pub const S3_URL: &str = "S3_URL";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
}

/// Message broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

/// Object-store settings for the S3 filer strategy.
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
    /// Endpoint for S3-compatible stores, used when the object URL does
    /// not carry a host of its own.
    pub endpoint: Option<String>,
}

/// Engine configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: String,
    /// Image running the Torc/Tif/Texam/Tof containers.
    pub image: String,
    pub service_account_name: Option<String>,
    pub restart_policy: String,
    pub image_pull_policy: String,
    /// `ttl_seconds_after_finished` applied to derived Jobs.
    pub job_ttl_seconds: Option<i32>,
    pub pvc_access_mode: String,
    pub pvc_storage_class: Option<String>,
    pub infrastructure_security_context_enabled: bool,
    pub executor_security_context_enabled: bool,
    /// Directory the security-context ConfigMap is mounted at.
    pub security_context_path: PathBuf,
    pub security_context_configmap_name: Option<String>,
    pub redis_secret_name: Option<String>,
    pub mongo_secret_name: Option<String>,
    pub s3_secret_name: Option<String>,
    /// Key within the Mongo secret holding the connection URI.
    pub mongodb_uri_secret_key: String,
    /// File the stage containers read the serialized task from.
    pub task_request_path: PathBuf,
    /// Bound on each executor watch; 0 means unbounded.
    pub monitor_timeout_seconds: u64,
    pub broker: BrokerConfig,
    pub s3: S3Config,
    pub log_level: String,
}

impl Config {
    pub const DEFAULT_NAMESPACE: &str = "poiesis";
    pub const DEFAULT_IMAGE: &str = "docker.io/elixircloud/poiesis:latest";
    pub const DEFAULT_PVC_SIZE: &str = "1Gi";
    pub const DEFAULT_PVC_ACCESS_MODE: &str = "ReadWriteOnce";
    pub const DEFAULT_TASK_REQUEST_PATH: &str = "/poiesis/task.json";
    pub const DEFAULT_SECURITY_CONTEXT_PATH: &str = "/poiesis/security";

    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self {
            namespace: var_or(env_vars::NAMESPACE, Self::DEFAULT_NAMESPACE),
            image: var_or(env_vars::IMAGE, Self::DEFAULT_IMAGE),
            service_account_name: var_opt(env_vars::SERVICE_ACCOUNT_NAME),
            restart_policy: var_or(env_vars::RESTART_POLICY, "Never"),
            image_pull_policy: var_or(env_vars::IMAGE_PULL_POLICY, "IfNotPresent"),
            job_ttl_seconds: var_opt(env_vars::JOB_TTL).and_then(|v| v.parse().ok()),
            pvc_access_mode: var_or(env_vars::PVC_ACCESS_MODE, Self::DEFAULT_PVC_ACCESS_MODE),
            pvc_storage_class: var_opt(env_vars::PVC_STORAGE_CLASS),
            infrastructure_security_context_enabled: var_bool(
                env_vars::INFRA_SECURITY_CONTEXT_ENABLED,
            ),
            executor_security_context_enabled: var_bool(
                env_vars::EXECUTOR_SECURITY_CONTEXT_ENABLED,
            ),
            security_context_path: var_or(
                env_vars::SECURITY_CONTEXT_PATH,
                Self::DEFAULT_SECURITY_CONTEXT_PATH,
            )
            .into(),
            security_context_configmap_name: var_opt(env_vars::SECURITY_CONTEXT_CONFIGMAP_NAME),
            redis_secret_name: var_opt(env_vars::REDIS_SECRET_NAME),
            mongo_secret_name: var_opt(env_vars::MONGO_SECRET_NAME),
            s3_secret_name: var_opt(env_vars::S3_SECRET_NAME),
            mongodb_uri_secret_key: var_or(env_vars::MONGODB_URI_SECRET_KEY, "uri"),
            task_request_path: var_or(
                env_vars::TASK_REQUEST_PATH,
                Self::DEFAULT_TASK_REQUEST_PATH,
            )
            .into(),
            monitor_timeout_seconds: var_opt(env_vars::MONITOR_TIMEOUT_SECONDS)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            broker: BrokerConfig {
                host: var_or(env_vars::BROKER_HOST, "redis"),
                port: var_opt(env_vars::BROKER_PORT)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(6379),
                password: var_opt(env_vars::BROKER_PASSWORD),
            },
            s3: S3Config {
                access_key_id: var_opt(env_vars::AWS_ACCESS_KEY_ID),
                secret_access_key: var_opt(env_vars::AWS_SECRET_ACCESS_KEY),
                region: var_opt(env_vars::AWS_REGION),
                endpoint: var_opt(env_vars::S3_URL),
            },
            log_level: var_or(env_vars::LOG_LEVEL, "info"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn var_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    var_opt(name).unwrap_or_else(|| default.to_owned())
}

fn var_bool(name: &str) -> bool {
    var_opt(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
