use std::time::Duration;

use starling_api::address::ADDRESS_SEPARATOR;
use starling_api::errors::NodeError;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_NAMESPACE: &str = "starling";
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 100;
pub const DEFAULT_TASKS_PER_INTERVAL: usize = 100;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STATUS_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Errors found while validating configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{field} '{value}' must not contain ':'")]
    ReservedSeparator { field: &'static str, value: String },
}

impl From<ConfigError> for NodeError {
    fn from(err: ConfigError) -> Self {
        NodeError::InvalidConfig(err.to_string())
    }
}

// --- Scheduler Configuration ---

/// Admission limits of a [`TaskScheduler`](crate::scheduler::TaskScheduler).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of units executing at the same time.
    pub concurrency_limit: usize,

    /// Maximum number of units initiated within one window.
    pub tasks_per_interval: usize,

    /// Length of the fixed rate-limiting window.
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            tasks_per_interval: DEFAULT_TASKS_PER_INTERVAL,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl SchedulerConfig {
    pub fn new(concurrency_limit: usize, tasks_per_interval: usize, interval: Duration) -> Self {
        Self {
            concurrency_limit,
            tasks_per_interval,
            interval,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Zero("concurrency_limit"));
        }
        if self.tasks_per_interval == 0 {
            return Err(ConfigError::Zero("tasks_per_interval"));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Zero("interval"));
        }
        Ok(())
    }
}

// --- Node Configuration ---

/// Configuration of one node instance.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Namespace shared by every node that should be able to reach each other.
    pub namespace: String,

    /// Logical service name this instance serves.
    pub service_id: String,

    /// Unique id of this instance. Defaults to a random UUID.
    pub instance_id: String,

    /// Admission limits for inbound requests.
    pub scheduler: SchedulerConfig,

    /// How long an outbound request waits for a response or a status update.
    pub request_callback_timeout: Duration,

    /// Period of load reports to service discovery.
    pub status_update_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            service_id: String::new(),
            instance_id: Uuid::new_v4().to_string(),
            scheduler: SchedulerConfig::default(),
            request_callback_timeout: DEFAULT_REQUEST_CALLBACK_TIMEOUT,
            status_update_interval: DEFAULT_STATUS_UPDATE_INTERVAL,
        }
    }
}

impl NodeConfig {
    pub fn new(namespace: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service_id: service_id.into(),
            ..Default::default()
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_request_callback_timeout(mut self, timeout: Duration) -> Self {
        self.request_callback_timeout = timeout;
        self
    }

    pub fn with_status_update_interval(mut self, interval: Duration) -> Self {
        self.status_update_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("namespace", &self.namespace)?;
        validate_name("service_id", &self.service_id)?;
        validate_name("instance_id", &self.instance_id)?;
        if self.request_callback_timeout.is_zero() {
            return Err(ConfigError::Zero("request_callback_timeout"));
        }
        if self.status_update_interval.is_zero() {
            return Err(ConfigError::Zero("status_update_interval"));
        }
        self.scheduler.validate()
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Empty(field));
    }
    if value.contains(ADDRESS_SEPARATOR) {
        return Err(ConfigError::ReservedSeparator {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
