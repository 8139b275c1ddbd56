//! Routing API service: APIs, path resources, methods, integrations,
//! authorizers and deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RemoteError;
use crate::state::ApiProtocol;

/// An API as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiInfo {
    /// API id.
    pub id: String,
    /// API name.
    pub name: String,
    /// Protocol.
    pub protocol: ApiProtocol,
    /// Catch-all target, for HTTP APIs.
    pub target: Option<String>,
}

/// Request to create an API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateApiRequest {
    /// API name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Protocol.
    pub protocol: ApiProtocol,
    /// Catch-all target, for HTTP APIs.
    pub target: Option<String>,
}

/// A path resource of a REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathResource {
    /// Resource id.
    pub id: String,
    /// Parent resource id; `None` for the root.
    pub parent_id: Option<String>,
    /// Full path.
    pub path: String,
    /// Last path segment.
    pub path_part: String,
    /// Methods defined on the resource.
    pub methods: Vec<String>,
}

/// Method authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MethodAuthorization {
    /// Open.
    None,
    /// Token authorizer.
    Custom {
        /// Authorizer id.
        authorizer_id: String,
    },
}

/// Request to define a method on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRequest {
    /// API id.
    pub api_id: String,
    /// Resource id.
    pub resource_id: String,
    /// HTTP method.
    pub method: String,
    /// Authorization.
    pub authorization: MethodAuthorization,
    /// Whether an API key is required.
    pub api_key_required: bool,
}

/// Integration type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationType {
    /// Proxy to a function.
    AwsProxy,
    /// Proxy to an HTTP backend.
    HttpProxy,
}

/// Request to attach an integration to a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationRequest {
    /// API id.
    pub api_id: String,
    /// Resource id.
    pub resource_id: String,
    /// HTTP method of the endpoint.
    pub method: String,
    /// Integration type.
    pub integration_type: IntegrationType,
    /// Method used to call the backend.
    pub integration_method: String,
    /// Backend URI.
    pub uri: String,
}

/// An authorizer as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerInfo {
    /// Authorizer id.
    pub id: String,
    /// Authorizer name.
    pub name: String,
}

/// Request to create a token authorizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerRequest {
    /// API id.
    pub api_id: String,
    /// Authorizer name.
    pub name: String,
    /// Invocation URI of the authorizer function.
    pub uri: String,
    /// Where the token is read from.
    pub identity_source: String,
}

/// Routing API client.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Fetches an API; `NotFoundException` when absent.
    async fn get_api(&self, api_id: &str) -> Result<ApiInfo, RemoteError>;

    /// Creates an API.
    async fn create_api(&self, request: &CreateApiRequest) -> Result<ApiInfo, RemoteError>;

    /// Points a catch-all API at a new target.
    async fn update_api(&self, api_id: &str, description: &str, target: Option<&str>)
        -> Result<ApiInfo, RemoteError>;

    /// Deletes an API.
    async fn delete_api(&self, api_id: &str) -> Result<(), RemoteError>;

    /// Lists every path resource of a REST API.
    async fn get_resources(&self, api_id: &str) -> Result<Vec<PathResource>, RemoteError>;

    /// Creates a child path resource.
    async fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<PathResource, RemoteError>;

    /// Deletes a path resource.
    async fn delete_resource(&self, api_id: &str, resource_id: &str) -> Result<(), RemoteError>;

    /// Defines a method; `ConflictException` if it already exists.
    async fn put_method(&self, request: &MethodRequest) -> Result<(), RemoteError>;

    /// Patches an existing method's authorization type, authorizer and
    /// API-key requirement to match `request`.
    async fn update_method(&self, request: &MethodRequest) -> Result<(), RemoteError>;

    /// Deletes a method.
    async fn delete_method(&self, api_id: &str, resource_id: &str, method: &str)
        -> Result<(), RemoteError>;

    /// Attaches or replaces a method's integration.
    async fn put_integration(&self, request: &IntegrationRequest) -> Result<(), RemoteError>;

    /// Lists authorizers.
    async fn get_authorizers(&self, api_id: &str) -> Result<Vec<AuthorizerInfo>, RemoteError>;

    /// Creates an authorizer.
    async fn create_authorizer(&self, request: &AuthorizerRequest) -> Result<AuthorizerInfo, RemoteError>;

    /// Deletes an authorizer.
    async fn delete_authorizer(&self, api_id: &str, authorizer_id: &str) -> Result<(), RemoteError>;

    /// Publishes the API's current definition to a stage.
    async fn create_deployment(&self, api_id: &str, stage: &str) -> Result<String, RemoteError>;
}
