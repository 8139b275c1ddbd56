//! Compute function driver.
//!
//! A function is only touched when its configuration or code hash differs
//! from the provider's. Configuration and code are updated with separate
//! calls, configuration first.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{
    lookup, removal_outcome, DriverCapabilities, DriverContext, Reconciled, Removal,
    ResourceDriver, ResourceKind,
};
use crate::config::{DesiredConfig, FunctionDefaults};
use crate::errors::DeployError;
use crate::provider::{
    CreateFunctionRequest, FunctionConfiguration, FunctionInfo, PackagedArtifact,
    UpdateCodeRequest,
};
use crate::retry::RetryOn;
use crate::state::FunctionRecord;
use crate::utils::naming;

/// Environment key carrying the instance name.
pub const SHIM_INSTANCE_ENV: &str = "COMPONENT_INSTANCE_ID";
/// Environment key carrying the region.
pub const SHIM_REGION_ENV: &str = "COMPONENT_REGION";

/// Desired function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDesired {
    /// Instance name the function is named after.
    pub instance: String,
    /// Packaged code.
    pub artifact: PackagedArtifact,
    /// Role the function executes as.
    pub role_arn: String,
    /// Memory size in MB.
    pub memory_mb: u32,
    /// Timeout in seconds.
    pub timeout_secs: u32,
    /// Runtime identifier.
    pub runtime: String,
    /// Description.
    pub description: String,
    /// Environment, including the shim keys.
    pub env: BTreeMap<String, String>,
    /// Layer ARNs.
    pub layers: Vec<String>,
}

impl FunctionDesired {
    /// Resolves the desired function from validated inputs.
    ///
    /// The shim keys are always set and win over user values of the same name.
    #[must_use]
    pub fn from_config(
        instance: &str,
        region: &str,
        role_arn: &str,
        artifact: PackagedArtifact,
        desired: &DesiredConfig,
        defaults: &FunctionDefaults,
    ) -> Self {
        let mut env = desired.env.clone();
        env.insert(SHIM_INSTANCE_ENV.to_string(), instance.to_string());
        env.insert(SHIM_REGION_ENV.to_string(), region.to_string());

        Self {
            instance: instance.to_string(),
            artifact,
            role_arn: role_arn.to_string(),
            memory_mb: desired.memory.unwrap_or(defaults.memory_mb),
            timeout_secs: desired.timeout.unwrap_or(defaults.timeout_secs),
            runtime: desired.runtime.clone().unwrap_or_else(|| defaults.runtime.clone()),
            description: desired
                .description
                .clone()
                .unwrap_or_else(|| format!("Web application {instance}")),
            env,
            layers: desired.layers.clone(),
        }
    }

    fn configuration(&self, name: &str) -> FunctionConfiguration {
        FunctionConfiguration {
            name: name.to_string(),
            role_arn: self.role_arn.clone(),
            handler: self.artifact.handler.clone(),
            runtime: self.runtime.clone(),
            memory_mb: self.memory_mb,
            timeout_secs: self.timeout_secs,
            description: self.description.clone(),
            env: self.env.clone(),
            layers: self.layers.clone(),
        }
    }
}

fn record_of(info: FunctionInfo) -> FunctionRecord {
    FunctionRecord {
        name: info.configuration.name,
        arn: info.arn,
        version: info.version,
        code_sha256: info.code_sha256,
    }
}

/// Creates and updates the compute function.
#[derive(Debug, Clone)]
pub struct FunctionDriver {
    ctx: DriverContext,
}

impl FunctionDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }

    async fn fetch(&self, name: &str) -> Result<Option<FunctionInfo>, DeployError> {
        let compute = &self.ctx.clients.compute;
        lookup(
            self.ctx
                .call("get_function", RetryOn::Throttling, || compute.get_function(name))
                .await,
        )
    }
}

#[async_trait]
impl ResourceDriver for FunctionDriver {
    type Id = str;
    type Desired = FunctionDesired;
    type Record = FunctionRecord;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Function
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            updates_in_place: true,
            removes_only_owned: true,
            ..DriverCapabilities::default()
        }
    }

    async fn get(&self, id: &str) -> Result<Option<FunctionRecord>, DeployError> {
        Ok(self.fetch(id).await?.map(record_of))
    }

    async fn create_or_update(
        &self,
        desired: &FunctionDesired,
        prior: Option<&FunctionRecord>,
    ) -> Result<Reconciled<FunctionRecord>, DeployError> {
        let name = prior.map_or_else(
            || naming::function_name(&desired.instance),
            |record| record.name.clone(),
        );
        let configuration = desired.configuration(&name);
        let compute = &self.ctx.clients.compute;

        let Some(existing) = self.fetch(&name).await? else {
            let request = CreateFunctionRequest {
                configuration,
                artifact: desired.artifact.path.clone(),
                code_sha256: desired.artifact.code_sha256.clone(),
            };
            // A freshly created role may not be assumable yet.
            let created = self
                .ctx
                .call("create_function", RetryOn::RolePropagation, || {
                    compute.create_function(&request)
                })
                .await?;
            info!(function = %name, version = created.version, "Created function");
            self.ctx.emit(
                "function.created",
                json!({ "name": name, "version": created.version }),
            );
            return Ok(Reconciled::created(record_of(created)));
        };

        let config_matches = existing.configuration == configuration;
        let code_matches = existing.code_sha256 == desired.artifact.code_sha256;
        if config_matches && code_matches {
            debug!(function = %name, "Function unchanged");
            return Ok(Reconciled::unchanged(record_of(existing)));
        }

        if !config_matches {
            self.ctx
                .call("update_function_configuration", RetryOn::RolePropagation, || {
                    compute.update_function_configuration(&configuration)
                })
                .await?;
        }
        let request = UpdateCodeRequest {
            name: name.clone(),
            artifact: desired.artifact.path.clone(),
            code_sha256: desired.artifact.code_sha256.clone(),
        };
        let updated = self
            .ctx
            .call("update_function_code", RetryOn::Throttling, || {
                compute.update_function_code(&request)
            })
            .await?;

        info!(function = %name, version = updated.version, "Updated function");
        self.ctx.emit(
            "function.updated",
            json!({ "name": name, "version": updated.version }),
        );
        Ok(Reconciled::updated(record_of(updated)))
    }

    async fn remove(&self, record: &FunctionRecord) -> Result<Removal, DeployError> {
        let compute = &self.ctx.clients.compute;
        let outcome = removal_outcome(
            self.ctx
                .call("delete_function", RetryOn::Throttling, || {
                    compute.delete_function(&record.name)
                })
                .await,
        )?;
        self.ctx.emit("function.removed", json!({ "name": record.name }));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ReconcileAction;
    use crate::testing::{FakeCloud, StaticPackager};

    fn desired(cloud_env: &[(&str, &str)], code: &[u8]) -> FunctionDesired {
        let mut config = DesiredConfig::new().with_src("./app");
        for (k, v) in cloud_env {
            config = config.with_env(*k, *v);
        }
        FunctionDesired::from_config(
            "app-abcd1234",
            "us-east-1",
            "arn:aws:iam::123456789012:role/app-abcd1234-lambda-role",
            StaticPackager::artifact_for(code),
            &config,
            &FunctionDefaults::default(),
        )
    }

    #[test]
    fn test_shim_keys_win_over_user_env() {
        let desired = desired(&[("COMPONENT_REGION", "mars-1"), ("LOG", "debug")], b"code");
        assert_eq!(desired.env["COMPONENT_REGION"], "us-east-1");
        assert_eq!(desired.env["COMPONENT_INSTANCE_ID"], "app-abcd1234");
        assert_eq!(desired.env["LOG"], "debug");
        assert_eq!(desired.memory_mb, 1536);
        assert_eq!(desired.timeout_secs, 29);
    }

    #[tokio::test]
    async fn test_skips_update_when_hash_and_config_match() {
        let cloud = FakeCloud::new();
        let driver = FunctionDriver::new(cloud.driver_context());
        let want = desired(&[], b"code");

        let first = driver.create_or_update(&want, None).await.unwrap();
        assert_eq!(first.action, ReconcileAction::Created);
        assert_eq!(first.record.name, "app-abcd1234-function");

        let second = driver.create_or_update(&want, Some(&first.record)).await.unwrap();
        assert_eq!(second.action, ReconcileAction::Unchanged);
        assert_eq!(second.record.version, first.record.version);
        assert_eq!(cloud.count_calls("update_function_code"), 0);
        assert_eq!(cloud.count_calls("update_function_configuration"), 0);
    }

    #[tokio::test]
    async fn test_code_change_publishes_new_version() {
        let cloud = FakeCloud::new();
        let driver = FunctionDriver::new(cloud.driver_context());
        let first = driver.create_or_update(&desired(&[], b"v1"), None).await.unwrap();

        let second = driver
            .create_or_update(&desired(&[], b"v2"), Some(&first.record))
            .await
            .unwrap();
        assert_eq!(second.action, ReconcileAction::Updated);
        assert_eq!(second.record.version, first.record.version + 1);
        assert_eq!(cloud.count_calls("update_function_configuration"), 0);
        assert_eq!(cloud.count_calls("update_function_code"), 1);
    }

    #[tokio::test]
    async fn test_config_change_updates_config_before_code() {
        let cloud = FakeCloud::new();
        let driver = FunctionDriver::new(cloud.driver_context());
        let first = driver.create_or_update(&desired(&[], b"v1"), None).await.unwrap();

        driver
            .create_or_update(&desired(&[("LOG", "info")], b"v1"), Some(&first.record))
            .await
            .unwrap();
        let calls = cloud.calls();
        let config_at = calls.iter().position(|c| c == "update_function_configuration").unwrap();
        let code_at = calls.iter().position(|c| c == "update_function_code").unwrap();
        assert!(config_at < code_at);
    }

    #[tokio::test]
    async fn test_create_retries_while_role_propagates() {
        let cloud = FakeCloud::new();
        cloud.fail_next(
            "create_function",
            crate::errors::RemoteError::new(
                "InvalidParameterValueException",
                "The role defined for the function cannot be assumed by Lambda.",
            ),
            2,
        );
        let driver = FunctionDriver::new(cloud.driver_context());
        let created = driver.create_or_update(&desired(&[], b"v1"), None).await.unwrap();
        assert_eq!(created.action, ReconcileAction::Created);
        assert_eq!(cloud.count_calls("create_function"), 3);
    }
}
