//! Metrics service and scoped credentials for reading it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RemoteError;

/// Temporary credentials obtained by assuming a role.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// When the credentials expire.
    pub expiration: DateTime<Utc>,
}

impl std::fmt::Debug for ScopedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// One metric statistic query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    /// Query id, echoed back in the result.
    pub id: String,
    /// Metric namespace.
    pub namespace: String,
    /// Metric name.
    pub metric_name: String,
    /// Dimension name/value pairs.
    pub dimensions: Vec<(String, String)>,
    /// Statistic, e.g. `Sum` or `Average`.
    pub stat: String,
    /// Bucket width in seconds.
    pub period_secs: u32,
}

/// Request for several queries over one time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDataRequest {
    /// Range start.
    pub start: DateTime<Utc>,
    /// Range end.
    pub end: DateTime<Utc>,
    /// Queries.
    pub queries: Vec<MetricQuery>,
}

/// Datapoints for one query. Empty buckets are omitted by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDataResult {
    /// Query id.
    pub id: String,
    /// Bucket start timestamps.
    pub timestamps: Vec<DateTime<Utc>>,
    /// Values, parallel to `timestamps`.
    pub values: Vec<f64>,
}

/// Metrics client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsClient: Send + Sync {
    /// Assumes a role and returns temporary credentials.
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration_secs: u32,
    ) -> Result<ScopedCredentials, RemoteError>;

    /// Runs metric queries with the given credentials.
    async fn get_metric_data(
        &self,
        credentials: &ScopedCredentials,
        request: &MetricDataRequest,
    ) -> Result<Vec<MetricDataResult>, RemoteError>;
}
