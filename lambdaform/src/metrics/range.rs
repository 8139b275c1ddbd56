//! Metric time ranges and bucketing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// A validated metrics time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRange {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Inclusive end.
    pub end: DateTime<Utc>,
}

impl MetricsRange {
    /// Validates a range: start must not be after end, and the span must not
    /// exceed `max_days`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, max_days: i64) -> Result<Self, DeployError> {
        if start > end {
            return Err(DeployError::validation(
                "The rangeStart must not be after the rangeEnd",
            ));
        }
        if end - start > Duration::days(max_days) {
            return Err(DeployError::validation(format!(
                "The range cannot be longer than {max_days} days"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parses RFC 3339 timestamps, then validates like [`MetricsRange::new`].
    pub fn parse(start: &str, end: &str, max_days: i64) -> Result<Self, DeployError> {
        let parse = |field: &str, value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    DeployError::validation(format!("Invalid {field} \"{value}\": {e}"))
                })
        };
        Self::new(parse("rangeStart", start)?, parse("rangeEnd", end)?, max_days)
    }

    /// Bucket size: one minute up to 2 hours, one hour up to 48 hours,
    /// otherwise one day.
    #[must_use]
    pub fn period_secs(&self) -> u32 {
        let minutes = (self.end - self.start).num_minutes();
        if minutes <= 120 {
            60
        } else if minutes <= 48 * 60 {
            3600
        } else {
            86_400
        }
    }

    /// Start truncated to the bucket boundary.
    #[must_use]
    pub fn aligned_start(&self) -> DateTime<Utc> {
        let period = i64::from(self.period_secs());
        let secs = self.start.timestamp();
        DateTime::from_timestamp(secs - secs.rem_euclid(period), 0).unwrap_or(self.start)
    }

    /// Every bucket start from the aligned start through the end.
    #[must_use]
    pub fn buckets(&self) -> Vec<DateTime<Utc>> {
        let step = Duration::seconds(i64::from(self.period_secs()));
        let mut buckets = Vec::new();
        let mut at = self.aligned_start();
        while at <= self.end {
            buckets.push(at);
            at += step;
        }
        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 30).unwrap()
    }

    #[test]
    fn test_period_selection() {
        assert_eq!(MetricsRange::new(at(0, 0), at(2, 0), 32).unwrap().period_secs(), 60);
        assert_eq!(MetricsRange::new(at(0, 0), at(2, 1), 32).unwrap().period_secs(), 3600);
        let start = at(0, 0);
        let two_days = MetricsRange::new(start, start + Duration::hours(48), 32).unwrap();
        assert_eq!(two_days.period_secs(), 3600);
        let week = MetricsRange::new(start, start + Duration::days(7), 32).unwrap();
        assert_eq!(week.period_secs(), 86_400);
    }

    #[test]
    fn test_rejects_long_and_inverted_ranges() {
        let start = at(0, 0);
        let err = MetricsRange::new(start, start + Duration::days(40), 32).unwrap_err();
        assert_eq!(err.to_string(), "The range cannot be longer than 32 days");
        assert!(MetricsRange::new(at(2, 0), at(1, 0), 32).is_err());
        assert!(MetricsRange::new(start, start + Duration::days(32), 32).is_ok());
    }

    #[test]
    fn test_parse_rfc3339() {
        let range =
            MetricsRange::parse("2024-03-01T00:00:00Z", "2024-03-01T01:00:00+00:00", 32).unwrap();
        assert_eq!(range.period_secs(), 60);
        assert!(MetricsRange::parse("yesterday", "2024-03-01T01:00:00Z", 32).is_err());
    }

    #[test]
    fn test_buckets_are_aligned() {
        let range = MetricsRange::new(at(0, 0), at(0, 5), 32).unwrap();
        let buckets = range.buckets();
        assert_eq!(buckets.first(), Some(&Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(buckets.len(), 6);
    }
}
