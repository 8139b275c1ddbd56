//! Custom domains, certificates and DNS.

mod certificate;
mod workflow;

pub use certificate::{CertificateManager, CertificateReadiness, VALIDATION_RECORD_TTL};
pub use workflow::{
    check_domain_change, DomainDesired, DomainStatus, DomainWorkflow, DEFAULT_STAGE,
    SECURITY_POLICY,
};
