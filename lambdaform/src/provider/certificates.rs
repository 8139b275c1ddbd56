//! Certificate service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RemoteError;

/// Certificate lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    /// Waiting for DNS validation.
    PendingValidation,
    /// Usable.
    Issued,
    /// Validated, issuance in progress.
    Success,
    /// Validation was not completed in time.
    ValidationTimedOut,
    /// Anything else the provider reports.
    Other(String),
}

impl CertificateStatus {
    /// Parses the provider's status string.
    #[must_use]
    pub fn parse(status: &str) -> Self {
        match status {
            "PENDING_VALIDATION" => Self::PendingValidation,
            "ISSUED" => Self::Issued,
            "SUCCESS" => Self::Success,
            "VALIDATION_TIMED_OUT" => Self::ValidationTimedOut,
            other => Self::Other(other.to_string()),
        }
    }

    /// The provider's status string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PendingValidation => "PENDING_VALIDATION",
            Self::Issued => "ISSUED",
            Self::Success => "SUCCESS",
            Self::ValidationTimedOut => "VALIDATION_TIMED_OUT",
            Self::Other(other) => other,
        }
    }
}

/// A certificate listed for the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSummary {
    /// Certificate ARN.
    pub arn: String,
    /// Primary domain.
    pub domain: String,
}

/// A DNS record proving control of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Record name.
    pub name: String,
    /// Record type, usually `CNAME`.
    pub record_type: String,
    /// Record value.
    pub value: String,
}

/// A certificate's full description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDetail {
    /// Certificate ARN.
    pub arn: String,
    /// Primary domain.
    pub domain: String,
    /// Status.
    pub status: CertificateStatus,
    /// Validation record, once the provider has generated it.
    pub validation_record: Option<ValidationRecord>,
}

/// Certificate client.
#[async_trait]
pub trait CertificateClient: Send + Sync {
    /// Lists certificates.
    async fn list_certificates(&self) -> Result<Vec<CertificateSummary>, RemoteError>;

    /// Requests a DNS-validated certificate and returns its ARN.
    async fn request_certificate(
        &self,
        domain: &str,
        alternative_names: &[String],
    ) -> Result<String, RemoteError>;

    /// Describes a certificate.
    async fn describe_certificate(&self, arn: &str) -> Result<CertificateDetail, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(CertificateStatus::parse("ISSUED"), CertificateStatus::Issued);
        assert_eq!(
            CertificateStatus::parse("REVOKED"),
            CertificateStatus::Other("REVOKED".to_string())
        );
        assert_eq!(CertificateStatus::parse("PENDING_VALIDATION").as_str(), "PENDING_VALIDATION");
    }
}
