//! Custom domains and API mappings of the routing service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RemoteError;

/// Where a custom domain terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEndpointType {
    /// Regional endpoint, mapped to an API with an API mapping.
    Regional,
    /// Edge-optimized endpoint.
    Edge,
}

/// A custom domain as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    /// Domain name.
    pub name: String,
    /// Hostname DNS should alias the domain to.
    pub target_domain: String,
    /// Hosted zone of `target_domain`.
    pub target_hosted_zone_id: String,
}

/// Request to create a custom domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDomainRequest {
    /// Domain name.
    pub name: String,
    /// Certificate ARN.
    pub certificate_arn: String,
    /// Endpoint type.
    pub endpoint_type: DomainEndpointType,
    /// Minimum TLS version, e.g. `TLS_1_2`.
    pub security_policy: String,
}

/// An API mapping on a custom domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMapping {
    /// Mapping id.
    pub id: String,
    /// Mapped API.
    pub api_id: String,
    /// Mapped stage.
    pub stage: String,
}

/// Custom domain client.
#[async_trait]
pub trait DomainClient: Send + Sync {
    /// Fetches a custom domain; `NotFoundException` when absent.
    async fn get_domain(&self, name: &str) -> Result<DomainInfo, RemoteError>;

    /// Creates a custom domain.
    async fn create_domain(&self, request: &CreateDomainRequest) -> Result<DomainInfo, RemoteError>;

    /// Deletes a custom domain.
    async fn delete_domain(&self, name: &str) -> Result<(), RemoteError>;

    /// Lists the API mappings of a domain.
    async fn get_api_mappings(&self, domain: &str) -> Result<Vec<ApiMapping>, RemoteError>;

    /// Maps an API stage onto a domain; `ConflictException` if the domain is taken.
    async fn create_api_mapping(
        &self,
        domain: &str,
        api_id: &str,
        stage: &str,
    ) -> Result<ApiMapping, RemoteError>;

    /// Deletes an API mapping.
    async fn delete_api_mapping(&self, domain: &str, mapping_id: &str) -> Result<(), RemoteError>;
}
