//! Metrics reader ("meta") role driver.
//!
//! The meta role lets the metrics operation read observability data without
//! the deployer's own credentials. It trusts a configurable principal account
//! (the instance's own account when unset) and carries a read-only policy.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{
    lookup, removal_outcome, tolerate_conflict, DriverCapabilities, DriverContext, Reconciled,
    Removal, ResourceDriver, ResourceKind,
};
use crate::errors::DeployError;
use crate::provider::CreateRoleRequest;
use crate::retry::RetryOn;
use crate::state::MetaRoleRecord;
use crate::utils::naming;

/// Desired meta role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRoleDesired {
    /// Instance name the role is named after.
    pub instance: String,
    /// Account trusted to assume the role.
    pub principal_account: String,
}

/// Read-only observability policy.
#[must_use]
pub fn meta_policy_document() -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["cloudwatch:Describe*", "cloudwatch:Get*", "cloudwatch:List*"],
                "Resource": "*"
            },
            {
                "Effect": "Allow",
                "Action": [
                    "logs:Get*",
                    "logs:List*",
                    "logs:Describe*",
                    "logs:StartQuery",
                    "logs:StopQuery",
                    "logs:TestMetricFilter",
                    "logs:FilterLogEvents"
                ],
                "Resource": "*"
            }
        ]
    })
}

fn account_trust_policy(account: &str) -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": {
            "Effect": "Allow",
            "Principal": { "AWS": format!("arn:aws:iam::{account}:root") },
            "Action": "sts:AssumeRole"
        }
    })
}

fn policy_arn(role_arn: &str, policy_name: &str) -> String {
    let account = naming::account_id_from_arn(role_arn).unwrap_or_default();
    format!("arn:aws:iam::{account}:policy/{policy_name}")
}

/// Creates the meta role and its policy.
#[derive(Debug, Clone)]
pub struct MetaRoleDriver {
    ctx: DriverContext,
}

impl MetaRoleDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }

    async fn ensure_policy(&self, role_arn: &str, policy_name: &str) -> Result<String, DeployError> {
        let identity = &self.ctx.clients.identity;
        let document = meta_policy_document();
        let created = self
            .ctx
            .call("create_policy", RetryOn::Throttling, || {
                identity.create_policy(policy_name, &document, "Read-only access to metrics and logs")
            })
            .await;
        match created {
            Ok(arn) => Ok(arn),
            Err(e) if e.is_remote_conflict() => Ok(policy_arn(role_arn, policy_name)),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ResourceDriver for MetaRoleDriver {
    type Id = str;
    type Desired = MetaRoleDesired;
    type Record = MetaRoleRecord;

    fn kind(&self) -> ResourceKind {
        ResourceKind::MetaRole
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            removes_only_owned: true,
            ..DriverCapabilities::default()
        }
    }

    async fn get(&self, id: &str) -> Result<Option<MetaRoleRecord>, DeployError> {
        let identity = &self.ctx.clients.identity;
        let role = lookup(
            self.ctx
                .call("get_role", RetryOn::Throttling, || identity.get_role(id))
                .await,
        )?;
        Ok(role.map(|role| {
            let instance = role.name.trim_end_matches("-meta-role");
            MetaRoleRecord {
                policy_arn: policy_arn(&role.arn, &naming::meta_policy_name(instance)),
                name: role.name,
                arn: role.arn,
                created: true,
            }
        }))
    }

    async fn create_or_update(
        &self,
        desired: &MetaRoleDesired,
        prior: Option<&MetaRoleRecord>,
    ) -> Result<Reconciled<MetaRoleRecord>, DeployError> {
        let name = prior.map_or_else(
            || naming::meta_role_name(&desired.instance),
            |record| record.name.clone(),
        );
        let policy_name = naming::meta_policy_name(&desired.instance);

        if let Some(existing) = self.get(&name).await? {
            let record = MetaRoleRecord {
                policy_arn: prior.map_or(existing.policy_arn, |p| p.policy_arn.clone()),
                ..existing
            };
            return Ok(Reconciled::unchanged(record));
        }

        let identity = &self.ctx.clients.identity;
        let request = CreateRoleRequest {
            name: name.clone(),
            assume_role_policy: account_trust_policy(&desired.principal_account),
            description: Some("Metrics reader role created by lambdaform".to_string()),
        };
        let role = self
            .ctx
            .call("create_role", RetryOn::Throttling, || identity.create_role(&request))
            .await?;

        let policy_arn = self.ensure_policy(&role.arn, &policy_name).await?;
        tolerate_conflict(
            self.ctx
                .call("attach_role_policy", RetryOn::Throttling, || {
                    identity.attach_role_policy(&name, &policy_arn)
                })
                .await,
        )?;

        info!(role = %role.name, "Created meta role");
        self.ctx.emit("meta_role.created", json!({ "name": role.name, "arn": role.arn }));
        Ok(Reconciled::created(MetaRoleRecord {
            name: role.name,
            arn: role.arn,
            policy_arn,
            created: true,
        }))
    }

    async fn remove(&self, record: &MetaRoleRecord) -> Result<Removal, DeployError> {
        if !record.created {
            return Ok(Removal::Skipped);
        }
        let identity = &self.ctx.clients.identity;
        removal_outcome(
            self.ctx
                .call("detach_role_policy", RetryOn::Throttling, || {
                    identity.detach_role_policy(&record.name, &record.policy_arn)
                })
                .await,
        )?;
        let outcome = removal_outcome(
            self.ctx
                .call("delete_role", RetryOn::Throttling, || identity.delete_role(&record.name))
                .await,
        )?;
        removal_outcome(
            self.ctx
                .call("delete_policy", RetryOn::Throttling, || {
                    identity.delete_policy(&record.policy_arn)
                })
                .await,
        )?;
        self.ctx.emit("meta_role.removed", json!({ "name": record.name }));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCloud;

    #[test]
    fn test_policy_is_read_only() {
        let document = meta_policy_document();
        let actions: Vec<String> = document["Statement"]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|s| s["Action"].as_array().unwrap().clone())
            .map(|a| a.as_str().unwrap().to_string())
            .collect();
        assert!(actions.contains(&"cloudwatch:Get*".to_string()));
        assert!(actions.iter().all(|a| !a.contains("Put") && !a.contains("Delete")));
    }

    #[tokio::test]
    async fn test_trusts_principal_account() {
        let cloud = FakeCloud::new();
        let driver = MetaRoleDriver::new(cloud.driver_context());
        let desired = MetaRoleDesired {
            instance: "app-abcd1234".into(),
            principal_account: "999999999999".into(),
        };
        let record = driver.create_or_update(&desired, None).await.unwrap().record;
        assert_eq!(record.name, "app-abcd1234-meta-role");
        assert!(record.policy_arn.ends_with(":policy/app-abcd1234-meta-policy"));

        let trust = cloud.role_trust_policy("app-abcd1234-meta-role").unwrap();
        assert_eq!(
            trust["Statement"]["Principal"]["AWS"],
            "arn:aws:iam::999999999999:root"
        );
    }

    #[tokio::test]
    async fn test_remove_deletes_role_and_policy() {
        let cloud = FakeCloud::new();
        let driver = MetaRoleDriver::new(cloud.driver_context());
        let desired = MetaRoleDesired {
            instance: "app-abcd1234".into(),
            principal_account: "123456789012".into(),
        };
        let record = driver.create_or_update(&desired, None).await.unwrap().record;
        assert_eq!(driver.remove(&record).await.unwrap(), Removal::Removed);
        assert_eq!(cloud.count_calls("delete_policy"), 1);
        assert!(driver.get(&record.name).await.unwrap().is_none());
    }
}
