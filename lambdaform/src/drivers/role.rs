//! Execution role driver.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::{
    lookup, removal_outcome, DriverCapabilities, DriverContext, Reconciled, Removal,
    ResourceDriver, ResourceKind,
};
use crate::errors::DeployError;
use crate::provider::CreateRoleRequest;
use crate::retry::RetryOn;
use crate::state::RoleRecord;
use crate::utils::naming;

/// Desired execution role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDesired {
    /// Instance name the role is named after.
    pub instance: String,
    /// User-supplied role, used as-is and never deleted.
    pub role_name: Option<String>,
}

/// Trust policy letting the compute service assume a role.
fn lambda_trust_policy() -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": {
            "Effect": "Allow",
            "Principal": { "Service": ["lambda.amazonaws.com"] },
            "Action": "sts:AssumeRole"
        }
    })
}

/// Creates or adopts the role the function executes as.
#[derive(Debug, Clone)]
pub struct RoleDriver {
    ctx: DriverContext,
}

impl RoleDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }

    async fn create(&self, name: &str) -> Result<RoleRecord, DeployError> {
        let request = CreateRoleRequest {
            name: name.to_string(),
            assume_role_policy: lambda_trust_policy(),
            description: Some("Execution role created by lambdaform".to_string()),
        };
        let identity = &self.ctx.clients.identity;
        let role = self
            .ctx
            .call("create_role", RetryOn::Throttling, || identity.create_role(&request))
            .await?;

        let policy = self.ctx.config.execution_policy_arn.clone();
        self.ctx
            .call("attach_role_policy", RetryOn::Throttling, || {
                identity.attach_role_policy(name, &policy)
            })
            .await?;

        info!(role = %role.name, "Created execution role");
        self.ctx.emit("role.created", json!({ "name": role.name, "arn": role.arn }));
        Ok(RoleRecord {
            name: role.name,
            arn: role.arn,
            created: true,
        })
    }
}

#[async_trait]
impl ResourceDriver for RoleDriver {
    type Id = str;
    type Desired = RoleDesired;
    type Record = RoleRecord;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Role
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            removes_only_owned: true,
            ..DriverCapabilities::default()
        }
    }

    async fn get(&self, id: &str) -> Result<Option<RoleRecord>, DeployError> {
        let identity = &self.ctx.clients.identity;
        let role = lookup(
            self.ctx
                .call("get_role", RetryOn::Throttling, || identity.get_role(id))
                .await,
        )?;
        Ok(role.map(|role| RoleRecord {
            name: role.name,
            arn: role.arn,
            created: false,
        }))
    }

    async fn create_or_update(
        &self,
        desired: &RoleDesired,
        prior: Option<&RoleRecord>,
    ) -> Result<Reconciled<RoleRecord>, DeployError> {
        if let Some(user_role) = &desired.role_name {
            return match self.get(user_role).await? {
                Some(role) => {
                    debug!(role = %role.name, "Using provided role");
                    Ok(Reconciled::unchanged(role))
                }
                None => Err(DeployError::not_found("IAM Role", user_role.clone())),
            };
        }

        let name = prior
            .filter(|record| record.created)
            .map_or_else(|| naming::role_name(&desired.instance), |record| record.name.clone());

        match self.get(&name).await? {
            Some(mut role) => {
                role.created = true;
                Ok(Reconciled::unchanged(role))
            }
            None => Ok(Reconciled::created(self.create(&name).await?)),
        }
    }

    async fn remove(&self, record: &RoleRecord) -> Result<Removal, DeployError> {
        if !record.created {
            return Ok(Removal::Skipped);
        }
        let identity = &self.ctx.clients.identity;
        let policy = self.ctx.config.execution_policy_arn.clone();
        removal_outcome(
            self.ctx
                .call("detach_role_policy", RetryOn::Throttling, || {
                    identity.detach_role_policy(&record.name, &policy)
                })
                .await,
        )?;
        let outcome = removal_outcome(
            self.ctx
                .call("delete_role", RetryOn::Throttling, || identity.delete_role(&record.name))
                .await,
        )?;
        self.ctx.emit("role.removed", json!({ "name": record.name }));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCloud;

    fn driver(cloud: &FakeCloud) -> RoleDriver {
        RoleDriver::new(cloud.driver_context())
    }

    #[tokio::test]
    async fn test_creates_role_with_stable_name() {
        let cloud = FakeCloud::new();
        let desired = RoleDesired { instance: "app-abcd1234".into(), role_name: None };

        let first = driver(&cloud).create_or_update(&desired, None).await.unwrap();
        assert_eq!(first.action, super::super::ReconcileAction::Created);
        assert_eq!(first.record.name, "app-abcd1234-lambda-role");
        assert!(first.record.created);

        let second = driver(&cloud)
            .create_or_update(&desired, Some(&first.record))
            .await
            .unwrap();
        assert_eq!(second.action, super::super::ReconcileAction::Unchanged);
        assert_eq!(cloud.count_calls("create_role"), 1);
    }

    #[tokio::test]
    async fn test_user_role_must_exist() {
        let cloud = FakeCloud::new();
        let desired = RoleDesired {
            instance: "app-abcd1234".into(),
            role_name: Some("missing-role".into()),
        };
        let err = driver(&cloud).create_or_update(&desired, None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "The provided IAM Role with the name: missing-role could not be found."
        );
    }

    #[tokio::test]
    async fn test_user_role_is_never_removed() {
        let cloud = FakeCloud::new();
        cloud.seed_role("shared-role");
        let desired = RoleDesired {
            instance: "app-abcd1234".into(),
            role_name: Some("shared-role".into()),
        };
        let role = driver(&cloud).create_or_update(&desired, None).await.unwrap().record;
        assert!(!role.created);
        assert_eq!(driver(&cloud).remove(&role).await.unwrap(), Removal::Skipped);
        assert_eq!(cloud.count_calls("delete_role"), 0);
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_role() {
        let cloud = FakeCloud::new();
        let record = RoleRecord {
            name: "app-abcd1234-lambda-role".into(),
            arn: "arn:aws:iam::123456789012:role/app-abcd1234-lambda-role".into(),
            created: true,
        };
        assert_eq!(driver(&cloud).remove(&record).await.unwrap(), Removal::AlreadyAbsent);
    }
}
