//! Request, error and latency series for a deployed API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::range::MetricsRange;
use crate::domain::DEFAULT_STAGE;
use crate::drivers::DriverContext;
use crate::errors::DeployError;
use crate::provider::{MetricDataRequest, MetricDataResult, MetricQuery};
use crate::retry::RetryOn;
use crate::state::{ApiProtocol, ApiRecord, InstanceState};

const NAMESPACE: &str = "AWS/ApiGateway";

/// One chart's worth of data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeries {
    /// Chart title.
    pub title: String,
    /// Headline number for the range.
    pub stat: f64,
    /// Unit of the headline number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_text: Option<String>,
    /// Bucket starts.
    pub timestamps: Vec<DateTime<Utc>>,
    /// One value per bucket, zero where the provider had no data.
    pub values: Vec<f64>,
}

/// Metrics for a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    /// Range start.
    pub range_start: DateTime<Utc>,
    /// Range end.
    pub range_end: DateTime<Utc>,
    /// Bucket size.
    pub period_secs: u32,
    /// Requests, 5xx errors, 4xx errors, latency.
    pub metrics: Vec<MetricSeries>,
}

#[derive(Debug, Clone, Copy)]
struct SeriesSpec {
    id: &'static str,
    title: &'static str,
    metric: &'static str,
    stat: &'static str,
}

const SERIES: [SeriesSpec; 4] = [
    SeriesSpec { id: "requests", title: "Requests", metric: "Count", stat: "Sum" },
    SeriesSpec { id: "errors5xx", title: "Errors - 5xx", metric: "5XXError", stat: "Sum" },
    SeriesSpec { id: "errors4xx", title: "Errors - 4xx", metric: "4XXError", stat: "Sum" },
    SeriesSpec { id: "latency", title: "Latency", metric: "Latency", stat: "Average" },
];

fn dimensions(api: &ApiRecord, rest_stage: &str) -> Vec<(String, String)> {
    match api.protocol {
        ApiProtocol::Http => vec![
            ("ApiId".to_string(), api.id.clone()),
            ("Stage".to_string(), DEFAULT_STAGE.to_string()),
        ],
        ApiProtocol::Rest => vec![
            ("ApiName".to_string(), api.name.clone()),
            ("Stage".to_string(), rest_stage.to_string()),
        ],
    }
}

/// Builds the four metric queries for `api`.
#[must_use]
pub fn queries(api: &ApiRecord, rest_stage: &str, period_secs: u32) -> Vec<MetricQuery> {
    SERIES
        .iter()
        .map(|spec| MetricQuery {
            id: spec.id.to_string(),
            namespace: NAMESPACE.to_string(),
            metric_name: spec.metric.to_string(),
            dimensions: dimensions(api, rest_stage),
            stat: spec.stat.to_string(),
            period_secs,
        })
        .collect()
}

/// Places provider data points into zero-filled buckets.
fn fill(buckets: &[DateTime<Utc>], result: Option<&MetricDataResult>) -> Vec<f64> {
    let mut values = vec![0.0; buckets.len()];
    let Some(result) = result else {
        return values;
    };
    let index: HashMap<i64, usize> = buckets
        .iter()
        .enumerate()
        .map(|(i, ts)| (ts.timestamp(), i))
        .collect();
    for (ts, value) in result.timestamps.iter().zip(&result.values) {
        if let Some(&i) = index.get(&ts.timestamp()) {
            values[i] = *value;
        }
    }
    values
}

/// Turns raw provider results into the report's series.
#[must_use]
pub fn build_series(range: &MetricsRange, results: &[MetricDataResult]) -> Vec<MetricSeries> {
    let buckets = range.buckets();
    SERIES
        .iter()
        .map(|spec| {
            let mut values = fill(&buckets, results.iter().find(|r| r.id == spec.id));
            let (stat, stat_text) = if spec.id == "latency" {
                for value in &mut values {
                    *value = value.ceil();
                }
                let nonzero: Vec<f64> = values.iter().copied().filter(|v| *v > 0.0).collect();
                let average = if nonzero.is_empty() {
                    0.0
                } else {
                    (nonzero.iter().sum::<f64>() / nonzero.len() as f64).ceil()
                };
                (average, Some("ms".to_string()))
            } else {
                (values.iter().sum(), None)
            };
            MetricSeries {
                title: spec.title.to_string(),
                stat,
                stat_text,
                timestamps: buckets.clone(),
                values,
            }
        })
        .collect()
}

/// Reads metrics for the instance's API through its meta role.
pub async fn collect(
    ctx: &DriverContext,
    state: &InstanceState,
    range: &MetricsRange,
) -> Result<MetricsReport, DeployError> {
    let meta_role = state.meta_role.as_ref().ok_or_else(|| {
        DeployError::validation(
            "Metrics require the meta role. Deploy with monitoring enabled first.",
        )
    })?;
    let api = state
        .api
        .as_ref()
        .ok_or_else(|| DeployError::validation("Metrics require a deployed API"))?;

    let metrics = &ctx.clients.metrics;
    let session = format!("lambdaform-metrics-{}", Uuid::new_v4().simple());
    let duration = ctx.config.assume_role_duration_secs;
    let credentials = ctx
        .call("assume_role", RetryOn::Throttling, || {
            metrics.assume_role(&meta_role.arn, &session, duration)
        })
        .await?;

    let period_secs = range.period_secs();
    let request = MetricDataRequest {
        start: range.aligned_start(),
        end: range.end,
        queries: queries(api, &ctx.config.rest_stage, period_secs),
    };
    let results = ctx
        .call("get_metric_data", RetryOn::Throttling, || {
            metrics.get_metric_data(&credentials, &request)
        })
        .await?;
    debug!(api = %api.id, period_secs, results = results.len(), "Fetched metric data");
    ctx.emit(
        "metrics.collected",
        json!({ "api": api.id, "periodSecs": period_secs }),
    );

    Ok(MetricsReport {
        range_start: range.start,
        range_end: range.end,
        period_secs,
        metrics: build_series(range, &results),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn range() -> MetricsRange {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        MetricsRange::new(start, start + chrono::Duration::minutes(3), 32).unwrap()
    }

    #[test]
    fn test_series_zero_fill_and_stats() {
        let range = range();
        let buckets = range.buckets();
        let results = vec![
            MetricDataResult {
                id: "requests".into(),
                timestamps: vec![buckets[1], buckets[3]],
                values: vec![5.0, 7.0],
            },
            MetricDataResult {
                id: "latency".into(),
                timestamps: vec![buckets[0], buckets[2]],
                values: vec![10.2, 20.0],
            },
        ];
        let series = build_series(&range, &results);
        assert_eq!(series.len(), 4);
        assert_eq!(series[0].title, "Requests");
        assert_eq!(series[0].values, vec![0.0, 5.0, 0.0, 7.0]);
        assert_eq!(series[0].stat, 12.0);
        assert_eq!(series[1].values, vec![0.0; 4]);
        assert_eq!(series[3].values, vec![11.0, 0.0, 20.0, 0.0]);
        assert_eq!(series[3].stat, 16.0);
        assert_eq!(series[3].stat_text.as_deref(), Some("ms"));
    }

    #[test]
    fn test_http_api_queries_default_stage() {
        let api = ApiRecord {
            id: "abc123".into(),
            name: "app-api".into(),
            url: String::new(),
            protocol: ApiProtocol::Http,
            created: true,
            endpoints: Vec::new(),
        };
        let queries = queries(&api, "dev", 60);
        assert_eq!(queries.len(), 4);
        assert_eq!(queries[1].metric_name, "5XXError");
        assert_eq!(queries[3].stat, "Average");
        assert_eq!(
            queries[0].dimensions,
            vec![
                ("ApiId".to_string(), "abc123".to_string()),
                ("Stage".to_string(), "$default".to_string())
            ]
        );
    }
}
