//! Certificate lookup, request, DNS validation and polling.

use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::drivers::DriverContext;
use crate::errors::{DeployError, ErrorInfo};
use crate::provider::{
    CertificateDetail, CertificateStatus, ChangeAction, RecordChange, RecordSet,
};
use crate::retry::RetryOn;

/// TTL of the validation CNAME.
pub const VALIDATION_RECORD_TTL: u32 = 300;

/// Outcome of waiting for a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateReadiness {
    /// Issued and usable.
    Issued {
        /// Certificate ARN.
        arn: String,
    },
    /// Still validating after the polling budget ran out.
    Pending {
        /// Certificate ARN.
        arn: String,
    },
}

/// Finds or requests the apex certificate and waits for it.
#[derive(Debug, Clone)]
pub struct CertificateManager {
    ctx: DriverContext,
}

impl CertificateManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }

    /// Returns the ARN of the certificate covering `apex` and `*.apex`,
    /// requesting one when the account has none.
    pub async fn ensure(&self, apex: &str) -> Result<String, DeployError> {
        let certificates = &self.ctx.clients.certificates;
        let listed = self
            .ctx
            .call("list_certificates", RetryOn::Throttling, || {
                certificates.list_certificates()
            })
            .await?;
        if let Some(existing) = listed.into_iter().find(|c| c.domain == apex) {
            debug!(domain = %apex, arn = %existing.arn, "Found certificate");
            return Ok(existing.arn);
        }

        let alternative_names = vec![apex.to_string(), format!("*.{apex}")];
        let arn = self
            .ctx
            .call("request_certificate", RetryOn::Throttling, || {
                certificates.request_certificate(apex, &alternative_names)
            })
            .await?;
        info!(domain = %apex, arn = %arn, "Requested certificate");
        self.ctx.emit("certificate.requested", json!({ "domain": apex, "arn": arn }));
        Ok(arn)
    }

    async fn describe(&self, arn: &str) -> Result<CertificateDetail, DeployError> {
        let certificates = &self.ctx.clients.certificates;
        self.ctx
            .call("describe_certificate", RetryOn::Throttling, || {
                certificates.describe_certificate(arn)
            })
            .await
    }

    /// Polls until the certificate is issued or the polling budget is spent.
    ///
    /// The validation record is written to `zone_id` as soon as the
    /// provider reports it.
    pub async fn wait_until_issued(
        &self,
        arn: &str,
        zone_id: &str,
    ) -> Result<CertificateReadiness, DeployError> {
        let polling = self.ctx.config.certificate.clone();
        let interval = Duration::from_millis(polling.interval_ms);
        let mut validation_written = false;

        for attempt in 1..=polling.attempts.max(1) {
            let detail = self.describe(arn).await?;
            match &detail.status {
                CertificateStatus::Issued => {
                    return Ok(CertificateReadiness::Issued { arn: arn.to_string() });
                }
                CertificateStatus::PendingValidation | CertificateStatus::Success => {
                    if !validation_written {
                        if let Some(record) = &detail.validation_record {
                            self.write_validation_record(zone_id, &record.name, &record.value)
                                .await?;
                            validation_written = true;
                        }
                    }
                }
                status @ (CertificateStatus::ValidationTimedOut | CertificateStatus::Other(_)) => {
                    return Err(DeployError::terminal(
                        format!(
                            "Certificate {arn} for {} cannot be used: status {}",
                            detail.domain,
                            status.as_str()
                        ),
                        ErrorInfo::new("CERT-UNUSABLE", "Certificate validation failed")
                            .with_fix_hint("Delete the certificate and deploy again")
                            .with_context_entry("status", status.as_str()),
                    ));
                }
            }

            if attempt < polling.attempts {
                debug!(arn = %arn, attempt, "Certificate not issued yet");
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = self.ctx.cancel.cancelled() => {
                        return Err(DeployError::Cancelled(
                            self.ctx.cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                        ));
                    }
                }
            }
        }
        Ok(CertificateReadiness::Pending { arn: arn.to_string() })
    }

    async fn write_validation_record(
        &self,
        zone_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), DeployError> {
        let changes = [RecordChange {
            action: ChangeAction::Upsert,
            record: RecordSet {
                name: name.to_string(),
                record_type: "CNAME".to_string(),
                ttl: Some(VALIDATION_RECORD_TTL),
                values: vec![value.to_string()],
                alias_target: None,
            },
        }];
        let dns = &self.ctx.clients.dns;
        self.ctx
            .call("change_record_sets", RetryOn::Throttling, || {
                dns.change_record_sets(zone_id, &changes)
            })
            .await?;
        info!(record = %name, "Wrote certificate validation record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCloud;

    #[tokio::test]
    async fn test_reuses_existing_certificate() {
        let cloud = FakeCloud::new();
        let arn = cloud.seed_certificate("example.com", CertificateStatus::Issued);
        let manager = CertificateManager::new(cloud.driver_context());
        assert_eq!(manager.ensure("example.com").await.unwrap(), arn);
        assert_eq!(cloud.count_calls("request_certificate"), 0);
    }

    #[tokio::test]
    async fn test_requests_apex_and_wildcard() {
        let cloud = FakeCloud::new();
        let manager = CertificateManager::new(cloud.driver_context());
        manager.ensure("example.com").await.unwrap();
        assert_eq!(
            cloud.requested_certificate_names(),
            vec!["example.com".to_string(), "*.example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_success_keeps_polling_until_budget_spent() {
        let cloud = FakeCloud::new();
        let arn = cloud.seed_certificate("example.com", CertificateStatus::Success);
        let zone = cloud.seed_hosted_zone("example.com");
        let manager = CertificateManager::new(cloud.driver_context());

        let readiness = manager.wait_until_issued(&arn, &zone).await.unwrap();
        assert_eq!(readiness, CertificateReadiness::Pending { arn });
        assert_eq!(
            cloud.count_calls("describe_certificate"),
            cloud.engine_config().certificate.attempts
        );
    }

    #[tokio::test]
    async fn test_pending_writes_validation_record_once() {
        let cloud = FakeCloud::new();
        let arn = cloud.seed_certificate("example.com", CertificateStatus::PendingValidation);
        let zone = cloud.seed_hosted_zone("example.com");
        let manager = CertificateManager::new(cloud.driver_context());

        manager.wait_until_issued(&arn, &zone).await.unwrap();
        let cname = cloud.record(&zone, "_validation.example.com.").unwrap();
        assert_eq!(cname.record_type, "CNAME");
        assert_eq!(cname.ttl, Some(VALIDATION_RECORD_TTL));
        assert_eq!(cloud.count_calls("change_record_sets"), 1);
    }

    #[tokio::test]
    async fn test_timed_out_certificate_is_terminal() {
        let cloud = FakeCloud::new();
        let arn = cloud.seed_certificate("example.com", CertificateStatus::ValidationTimedOut);
        let zone = cloud.seed_hosted_zone("example.com");
        let manager = CertificateManager::new(cloud.driver_context());
        let err = manager.wait_until_issued(&arn, &zone).await.unwrap_err();
        assert_eq!(err.category(), crate::errors::ErrorCategory::Terminal);
    }
}
