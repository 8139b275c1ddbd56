//! Compute service: functions, versions, aliases and invoke permissions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::RemoteError;

/// Function configuration, as sent on create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfiguration {
    /// Function name.
    pub name: String,
    /// Execution role ARN.
    pub role_arn: String,
    /// Entry point inside the artifact.
    pub handler: String,
    /// Runtime identifier.
    pub runtime: String,
    /// Memory in MB.
    pub memory_mb: u32,
    /// Timeout in seconds.
    pub timeout_secs: u32,
    /// Description.
    pub description: String,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Layer ARNs.
    pub layers: Vec<String>,
}

/// A function as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Current configuration.
    pub configuration: FunctionConfiguration,
    /// Unqualified ARN.
    pub arn: String,
    /// Version returned by the last publish, `0` for an unpublished function.
    pub version: u64,
    /// Hash of the deployed code.
    pub code_sha256: String,
}

/// Request to create a function from an artifact; always publishes version 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFunctionRequest {
    /// Configuration.
    pub configuration: FunctionConfiguration,
    /// Artifact path.
    pub artifact: PathBuf,
    /// Hash of the artifact.
    pub code_sha256: String,
}

/// Request to replace a function's code and publish a new version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCodeRequest {
    /// Function name.
    pub name: String,
    /// Artifact path.
    pub artifact: PathBuf,
    /// Hash of the artifact.
    pub code_sha256: String,
}

/// An alias as the provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasInfo {
    /// Alias name.
    pub name: String,
    /// Alias ARN.
    pub arn: String,
    /// Primary version.
    pub function_version: u64,
    /// Additional version weights.
    pub routing: BTreeMap<String, f64>,
}

/// Request to create or update an alias.
///
/// An empty `routing` removes the routing table entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasRequest {
    /// Function name.
    pub function_name: String,
    /// Alias name.
    pub name: String,
    /// Primary version.
    pub function_version: u64,
    /// Additional version weights.
    pub routing: BTreeMap<String, f64>,
}

/// Grants a service principal permission to invoke a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Function name or ARN, optionally alias-qualified.
    pub function: String,
    /// Statement id; a duplicate reports a conflict.
    pub statement_id: String,
    /// Principal, e.g. `apigateway.amazonaws.com`.
    pub principal: String,
    /// Restricts the grant to this source ARN.
    pub source_arn: Option<String>,
}

/// Compute client.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Fetches a function; `ResourceNotFoundException` when absent.
    async fn get_function(&self, name: &str) -> Result<FunctionInfo, RemoteError>;

    /// Creates and publishes a function.
    async fn create_function(&self, request: &CreateFunctionRequest) -> Result<FunctionInfo, RemoteError>;

    /// Replaces a function's configuration.
    async fn update_function_configuration(
        &self,
        configuration: &FunctionConfiguration,
    ) -> Result<FunctionInfo, RemoteError>;

    /// Replaces a function's code and publishes a new version.
    async fn update_function_code(&self, request: &UpdateCodeRequest) -> Result<FunctionInfo, RemoteError>;

    /// Deletes a function with all its versions and aliases.
    async fn delete_function(&self, name: &str) -> Result<(), RemoteError>;

    /// Fetches an alias.
    async fn get_alias(&self, function_name: &str, alias: &str) -> Result<AliasInfo, RemoteError>;

    /// Creates an alias.
    async fn create_alias(&self, request: &AliasRequest) -> Result<AliasInfo, RemoteError>;

    /// Updates an alias.
    async fn update_alias(&self, request: &AliasRequest) -> Result<AliasInfo, RemoteError>;

    /// Deletes an alias.
    async fn delete_alias(&self, function_name: &str, alias: &str) -> Result<(), RemoteError>;

    /// Adds an invoke permission.
    async fn add_permission(&self, request: &PermissionRequest) -> Result<(), RemoteError>;
}
