//! The metrics path.

use super::Deployer;
use crate::errors::DeployError;
use crate::metrics::{collect, MetricsRange, MetricsReport};

impl Deployer {
    /// Reads request, error and latency series for `range_start..range_end`
    /// (RFC 3339 timestamps).
    ///
    /// The range is validated before any state is read or remote call made.
    pub async fn metrics(
        &self,
        range_start: &str,
        range_end: &str,
    ) -> Result<MetricsReport, DeployError> {
        let range = MetricsRange::parse(range_start, range_end, self.config.metrics_max_range_days)?;
        self.cancel.check()?;
        let state = self.load().await?;
        let region = state.region.clone().unwrap_or_else(|| self.config.region.clone());
        collect(&self.context(&region), &state, &range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DesiredConfig;
    use crate::errors::ErrorCategory;
    use crate::provider::{MetricDataResult, MockMetricsClient};
    use crate::state::InMemoryStateStore;
    use crate::testing::{FakeCloud, StaticPackager};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn deployer(cloud: &FakeCloud, clients: crate::provider::ProviderClients) -> Deployer {
        Deployer::new(
            clients,
            Arc::new(InMemoryStateStore::new()),
            Arc::new(StaticPackager::default()),
        )
        .with_config(cloud.engine_config())
    }

    #[tokio::test]
    async fn test_range_too_long_is_rejected_before_any_remote_call() {
        let cloud = FakeCloud::new();
        let mut mock = MockMetricsClient::new();
        mock.expect_assume_role().never();
        mock.expect_get_metric_data().never();
        let deployer = deployer(&cloud, cloud.clients_with_metrics(Arc::new(mock)));

        let err = deployer
            .metrics("2024-01-01T00:00:00Z", "2024-02-10T00:00:00Z")
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(err.to_string().contains("cannot be longer than 32 days"));
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_require_a_deployed_instance() {
        let cloud = FakeCloud::new();
        let deployer = deployer(&cloud, cloud.clients());
        let err = deployer
            .metrics("2024-01-01T00:00:00Z", "2024-01-01T01:00:00Z")
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(cloud.count_calls("assume_role"), 0);
    }

    #[tokio::test]
    async fn test_metrics_after_deploy() {
        let cloud = FakeCloud::new();
        let deployer = deployer(&cloud, cloud.clients());
        deployer.deploy(&DesiredConfig::new()).await.unwrap();

        let bucket = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        cloud.set_metric_data(vec![MetricDataResult {
            id: "requests".to_string(),
            timestamps: vec![bucket],
            values: vec![42.0],
        }]);

        let report = deployer
            .metrics("2024-01-01T00:00:00Z", "2024-01-01T01:00:00Z")
            .await
            .unwrap();
        assert_eq!(report.period_secs, 60);
        assert_eq!(report.metrics.len(), 4);
        let requests = &report.metrics[0];
        assert_eq!(requests.values.len(), 61);
        assert_eq!(requests.values[5], 42.0);
        assert_eq!(requests.stat, 42.0);
        assert_eq!(cloud.count_calls("assume_role"), 1);
    }
}
