//! Engine-wide settings: defaults, limits, retry and provider capabilities.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::DeployError;
use crate::retry::RetryConfig;

/// Defaults and limits applied to the compute function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefaults {
    /// Memory when the desired config omits it.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    /// Timeout when the desired config omits it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
    /// Largest timeout the routing API can wait for.
    #[serde(default = "default_timeout_ceiling_secs")]
    pub timeout_ceiling_secs: u32,
    /// Smallest allowed memory.
    #[serde(default = "default_min_memory_mb")]
    pub min_memory_mb: u32,
    /// Largest allowed memory.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u32,
    /// Runtime when the desired config omits it.
    #[serde(default = "default_runtime")]
    pub runtime: String,
}

fn default_memory_mb() -> u32 {
    1536
}

fn default_timeout_secs() -> u32 {
    29
}

fn default_timeout_ceiling_secs() -> u32 {
    30
}

fn default_min_memory_mb() -> u32 {
    128
}

fn default_max_memory_mb() -> u32 {
    10240
}

fn default_runtime() -> String {
    "nodejs12.x".to_string()
}

impl Default for FunctionDefaults {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            timeout_secs: default_timeout_secs(),
            timeout_ceiling_secs: default_timeout_ceiling_secs(),
            min_memory_mb: default_min_memory_mb(),
            max_memory_mb: default_max_memory_mb(),
            runtime: default_runtime(),
        }
    }
}

/// How long to wait for a requested certificate to be issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePolling {
    /// Number of status checks.
    #[serde(default = "default_poll_attempts")]
    pub attempts: usize,
    /// Delay between checks in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

fn default_poll_attempts() -> usize {
    12
}

fn default_poll_interval_ms() -> u64 {
    5000
}

impl Default for CertificatePolling {
    fn default() -> Self {
        Self {
            attempts: default_poll_attempts(),
            interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Features the gateway provider supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCapabilities {
    /// Regional custom domains with API mappings. When false, custom domains
    /// are edge-optimized.
    #[serde(default = "default_true")]
    pub custom_domain_v2: bool,
    /// Explicit REST resources, methods and authorizers.
    #[serde(default = "default_true")]
    pub explicit_endpoints: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GatewayCapabilities {
    fn default() -> Self {
        Self {
            custom_domain_v2: true,
            explicit_endpoints: true,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Region used when the desired config does not name one.
    #[serde(default = "default_region")]
    pub region: String,
    /// Function defaults and limits.
    #[serde(default)]
    pub function: FunctionDefaults,
    /// Retry policy for provider calls.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Fixed delay between integration attempts that hit a conflict.
    #[serde(default = "default_integration_conflict_delay_ms")]
    pub integration_conflict_delay_ms: u64,
    /// Attempts for integrations that hit a conflict.
    #[serde(default = "default_integration_conflict_attempts")]
    pub integration_conflict_attempts: usize,
    /// Certificate polling.
    #[serde(default)]
    pub certificate: CertificatePolling,
    /// Managed policy attached to the default execution role.
    #[serde(default = "default_execution_policy_arn")]
    pub execution_policy_arn: String,
    /// Account trusted to assume the meta role. Defaults to the instance's
    /// own account.
    #[serde(default)]
    pub metrics_principal_account: Option<String>,
    /// Session length when assuming the meta role.
    #[serde(default = "default_assume_role_duration_secs")]
    pub assume_role_duration_secs: u32,
    /// Longest metrics range.
    #[serde(default = "default_metrics_max_range_days")]
    pub metrics_max_range_days: i64,
    /// Stage explicit endpoints are deployed to.
    #[serde(default = "default_rest_stage")]
    pub rest_stage: String,
    /// Gateway provider capabilities.
    #[serde(default)]
    pub gateway: GatewayCapabilities,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_integration_conflict_delay_ms() -> u64 {
    2000
}

fn default_integration_conflict_attempts() -> usize {
    5
}

fn default_execution_policy_arn() -> String {
    "arn:aws:iam::aws:policy/AWSLambdaFullAccess".to_string()
}

fn default_assume_role_duration_secs() -> u32 {
    900
}

fn default_metrics_max_range_days() -> i64 {
    32
}

fn default_rest_stage() -> String {
    "dev".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            function: FunctionDefaults::default(),
            retry: RetryConfig::default(),
            integration_conflict_delay_ms: default_integration_conflict_delay_ms(),
            integration_conflict_attempts: default_integration_conflict_attempts(),
            certificate: CertificatePolling::default(),
            execution_policy_arn: default_execution_policy_arn(),
            metrics_principal_account: None,
            assume_role_duration_secs: default_assume_role_duration_secs(),
            metrics_max_range_days: default_metrics_max_range_days(),
            rest_stage: default_rest_stage(),
            gateway: GatewayCapabilities::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, DeployError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON config file.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DeployError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&content)
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sets the retry config.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the integration conflict delay.
    #[must_use]
    pub fn with_integration_conflict_delay_ms(mut self, delay: u64) -> Self {
        self.integration_conflict_delay_ms = delay;
        self
    }

    /// Sets certificate polling.
    #[must_use]
    pub fn with_certificate_polling(mut self, attempts: usize, interval_ms: u64) -> Self {
        self.certificate = CertificatePolling {
            attempts,
            interval_ms,
        };
        self
    }

    /// Sets the gateway capabilities.
    #[must_use]
    pub fn with_gateway(mut self, gateway: GatewayCapabilities) -> Self {
        self.gateway = gateway;
        self
    }

    /// Sets the account trusted by the meta role.
    #[must_use]
    pub fn with_metrics_principal_account(mut self, account: impl Into<String>) -> Self {
        self.metrics_principal_account = Some(account.into());
        self
    }

    /// Retry config used for integrations that report a conflict.
    #[must_use]
    pub fn integration_retry(&self) -> RetryConfig {
        RetryConfig::fixed(
            self.integration_conflict_delay_ms,
            self.integration_conflict_attempts,
        )
    }
}
