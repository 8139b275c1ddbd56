//! Identity service: roles and policies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RemoteError;

/// A role as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    /// Role name.
    pub name: String,
    /// Role ARN.
    pub arn: String,
}

/// Request to create a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRoleRequest {
    /// Role name.
    pub name: String,
    /// Trust policy document.
    pub assume_role_policy: serde_json::Value,
    /// Description.
    pub description: Option<String>,
}

/// Identity client.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Fetches a role; `NoSuchEntity` when absent.
    async fn get_role(&self, name: &str) -> Result<RoleInfo, RemoteError>;

    /// Creates a role.
    async fn create_role(&self, request: &CreateRoleRequest) -> Result<RoleInfo, RemoteError>;

    /// Deletes a role.
    async fn delete_role(&self, name: &str) -> Result<(), RemoteError>;

    /// Attaches a managed policy to a role.
    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<(), RemoteError>;

    /// Detaches a managed policy from a role.
    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<(), RemoteError>;

    /// Creates a managed policy and returns its ARN.
    async fn create_policy(
        &self,
        name: &str,
        document: &serde_json::Value,
        description: &str,
    ) -> Result<String, RemoteError>;

    /// Deletes a managed policy.
    async fn delete_policy(&self, arn: &str) -> Result<(), RemoteError>;
}
