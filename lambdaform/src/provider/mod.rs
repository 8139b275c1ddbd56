//! Interfaces to the cloud control plane.
//!
//! One trait per service. Every call returns a [`RemoteError`](crate::errors::RemoteError)
//! carrying the provider's error code; classification into not-found,
//! conflict and rate-limit happens in the drivers.

mod certificates;
mod compute;
mod dns;
mod domains;
mod gateway;
mod identity;
mod metrics;
mod packager;

use std::sync::Arc;

pub use certificates::{
    CertificateClient, CertificateDetail, CertificateStatus, CertificateSummary, ValidationRecord,
};
pub use compute::{
    AliasInfo, AliasRequest, ComputeClient, CreateFunctionRequest, FunctionConfiguration,
    FunctionInfo, PermissionRequest, UpdateCodeRequest,
};
pub use dns::{AliasTarget, ChangeAction, DnsClient, HostedZone, RecordChange, RecordSet};
pub use domains::{ApiMapping, CreateDomainRequest, DomainClient, DomainEndpointType, DomainInfo};
pub use gateway::{
    ApiInfo, AuthorizerInfo, AuthorizerRequest, CreateApiRequest, GatewayClient,
    IntegrationRequest, IntegrationType, MethodAuthorization, MethodRequest, PathResource,
};
pub use identity::{CreateRoleRequest, IdentityClient, RoleInfo};
pub use metrics::{
    MetricDataRequest, MetricDataResult, MetricQuery, MetricsClient, ScopedCredentials,
};
#[cfg(test)]
pub use metrics::MockMetricsClient;
pub use packager::{ArtifactPackager, PackagedArtifact};

/// The full set of provider clients an engine talks to.
#[derive(Clone)]
pub struct ProviderClients {
    /// Roles and policies.
    pub identity: Arc<dyn IdentityClient>,
    /// Functions and aliases.
    pub compute: Arc<dyn ComputeClient>,
    /// Routing APIs.
    pub gateway: Arc<dyn GatewayClient>,
    /// Custom domains.
    pub domains: Arc<dyn DomainClient>,
    /// Certificates.
    pub certificates: Arc<dyn CertificateClient>,
    /// DNS.
    pub dns: Arc<dyn DnsClient>,
    /// Metrics.
    pub metrics: Arc<dyn MetricsClient>,
}

impl std::fmt::Debug for ProviderClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClients").finish_non_exhaustive()
    }
}
