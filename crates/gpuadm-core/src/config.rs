//! Configuration types for gpuadm

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::annotations::{AnnotationKeys, DEFAULT_ANNOTATION_DOMAIN};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Annotation and resource naming
    pub admission: AdmissionSettings,
    /// Commit retry policy
    pub commit: CommitConfig,
    /// Workload store client configuration
    pub store: StoreConfig,
    /// API server configuration
    pub api: ApiConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AdmissionConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::GpuadmError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GpuadmError::Config(format!("Failed to read config file: {}", e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, crate::GpuadmError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| crate::GpuadmError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), crate::GpuadmError> {
        if self.commit.retry_interval_ms == 0 {
            return Err(crate::GpuadmError::Config(
                "commit.retry_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.commit.retry_timeout_ms < self.commit.retry_interval_ms {
            return Err(crate::GpuadmError::Config(
                "commit.retry_timeout_ms must not be shorter than commit.retry_interval_ms"
                    .to_string(),
            ));
        }
        if self.admission.annotation_domain.is_empty() {
            return Err(crate::GpuadmError::Config(
                "admission.annotation_domain must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Annotation domain and device resource names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// Domain prefix of the decision annotations
    pub annotation_domain: String,
    /// Resource name carrying core units in container limits
    pub core_resource: String,
    /// Resource name carrying memory units in container limits
    pub memory_resource: String,
}

impl AdmissionSettings {
    pub fn annotation_keys(&self) -> AnnotationKeys {
        AnnotationKeys::new(&self.annotation_domain)
    }
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            annotation_domain: DEFAULT_ANNOTATION_DOMAIN.to_string(),
            core_resource: "tencent.com/vcuda-core".to_string(),
            memory_resource: "tencent.com/vcuda-memory".to_string(),
        }
    }
}

/// Commit retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// Delay between attempts after a retryable failure, in milliseconds
    pub retry_interval_ms: u64,
    /// Deadline measured from the first attempt, in milliseconds
    pub retry_timeout_ms: u64,
}

impl CommitConfig {
    pub fn new(retry_interval: Duration, retry_timeout: Duration) -> Self {
        Self {
            retry_interval_ms: retry_interval.as_millis() as u64,
            retry_timeout_ms: retry_timeout.as_millis() as u64,
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1_000,
            retry_timeout_ms: 10_000,
        }
    }
}

/// Workload store client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the cluster API server
    pub api_url: String,
    /// Bearer token, if the API server requires one
    pub token: Option<String>,
    /// Path to a file holding the bearer token
    pub token_file: Option<PathBuf>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8001".to_string(),
            token: None,
            token_file: None,
            request_timeout_secs: 5,
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 3456,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}
