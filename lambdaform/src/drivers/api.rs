//! Routing API driver.
//!
//! A catch-all API is an HTTP API whose default route proxies to the alias.
//! Explicit endpoints live on a REST API, either one this instance created or
//! an existing one named by `apiId`. External APIs are never deleted; removal
//! only unwinds the endpoints this instance added to them.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::{
    lookup, removal_outcome, tolerate_conflict, DriverCapabilities, DriverContext, Reconciled,
    Removal, ResourceDriver, ResourceKind,
};
use crate::config::RoutingStyle;
use crate::endpoints::EndpointReconciler;
use crate::errors::DeployError;
use crate::provider::{ApiInfo, CreateApiRequest, PermissionRequest};
use crate::retry::RetryOn;
use crate::state::{ApiProtocol, ApiRecord, EndpointRecord, IntegrationTarget};
use crate::utils::naming;

/// Desired routing API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiDesired {
    /// Instance name the API is named after.
    pub instance: String,
    /// Alias every default route proxies to.
    pub alias_arn: String,
    /// Name of that alias.
    pub alias_name: String,
    /// Catch-all or explicit endpoints.
    pub routing: RoutingStyle,
    /// Existing REST API to attach endpoints to.
    pub api_id: Option<String>,
}

impl ApiDesired {
    fn protocol(&self) -> ApiProtocol {
        match self.routing {
            RoutingStyle::CatchAll => ApiProtocol::Http,
            RoutingStyle::Endpoints { .. } => ApiProtocol::Rest,
        }
    }
}

/// Creates the API and keeps its routes pointed at the alias.
#[derive(Debug, Clone)]
pub struct ApiDriver {
    ctx: DriverContext,
}

impl ApiDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }

    fn url_for(&self, id: &str, protocol: ApiProtocol) -> String {
        let base = naming::api_base_url(id, &self.ctx.region);
        match protocol {
            ApiProtocol::Http => base,
            ApiProtocol::Rest => format!("{base}/{}", self.ctx.config.rest_stage),
        }
    }

    async fn fetch(&self, id: &str) -> Result<Option<ApiInfo>, DeployError> {
        let gateway = &self.ctx.clients.gateway;
        lookup(
            self.ctx
                .call("get_api", RetryOn::Throttling, || gateway.get_api(id))
                .await,
        )
    }

    async fn create(&self, desired: &ApiDesired, name: &str) -> Result<ApiInfo, DeployError> {
        let protocol = desired.protocol();
        let request = CreateApiRequest {
            name: name.to_string(),
            description: format!("Routing API of {}", desired.instance),
            protocol,
            target: match protocol {
                ApiProtocol::Http => Some(desired.alias_arn.clone()),
                ApiProtocol::Rest => None,
            },
        };
        let gateway = &self.ctx.clients.gateway;
        let api = self
            .ctx
            .call("create_api", RetryOn::Throttling, || gateway.create_api(&request))
            .await?;
        info!(api = %api.id, name = %api.name, "Created routing API");
        self.ctx.emit("api.created", json!({ "id": api.id, "name": api.name }));
        Ok(api)
    }

    async fn deploy_stage(&self, api_id: &str) -> Result<(), DeployError> {
        let gateway = &self.ctx.clients.gateway;
        let stage = self.ctx.config.rest_stage.clone();
        let deployment = self
            .ctx
            .call("create_deployment", RetryOn::Throttling, || {
                gateway.create_deployment(api_id, &stage)
            })
            .await?;
        debug!(api = %api_id, deployment = %deployment, stage = %stage, "Deployed stage");
        Ok(())
    }

    /// Lets the API invoke the alias.
    async fn grant_alias(&self, api_id: &str, desired: &ApiDesired) -> Result<(), DeployError> {
        let account = naming::account_id_from_arn(&desired.alias_arn).unwrap_or_default();
        let request = PermissionRequest {
            function: desired.alias_arn.clone(),
            statement_id: naming::api_permission_statement(api_id, &desired.alias_name),
            principal: "apigateway.amazonaws.com".to_string(),
            source_arn: Some(format!(
                "arn:aws:execute-api:{}:{account}:{api_id}/*",
                self.ctx.region
            )),
        };
        let compute = &self.ctx.clients.compute;
        tolerate_conflict(
            self.ctx
                .call("add_permission", RetryOn::Throttling, || compute.add_permission(&request))
                .await,
        )
    }

    /// Removes this instance's endpoints from an API it does not own.
    async fn detach(&self, record: &ApiRecord) -> Result<Removal, DeployError> {
        if record.endpoints.is_empty() {
            return Ok(Removal::Skipped);
        }
        if self.fetch(&record.id).await?.is_none() {
            return Ok(Removal::AlreadyAbsent);
        }
        let placeholder = IntegrationTarget::Http { uri: String::new() };
        let outcome = EndpointReconciler::new(self.ctx.clone())
            .reconcile(&record.id, &[], &record.endpoints, &placeholder)
            .await?;
        if outcome.changed {
            self.deploy_stage(&record.id).await?;
        }
        info!(api = %record.id, "Detached endpoints from external API");
        Ok(Removal::Removed)
    }
}

#[async_trait]
impl ResourceDriver for ApiDriver {
    type Id = str;
    type Desired = ApiDesired;
    type Record = ApiRecord;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Api
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            updates_in_place: true,
            traffic_split: false,
            explicit_endpoints: self.ctx.config.gateway.explicit_endpoints,
            custom_domain_v2: self.ctx.config.gateway.custom_domain_v2,
            removes_only_owned: true,
        }
    }

    async fn get(&self, id: &str) -> Result<Option<ApiRecord>, DeployError> {
        Ok(self.fetch(id).await?.map(|api| ApiRecord {
            url: self.url_for(&api.id, api.protocol),
            id: api.id,
            name: api.name,
            protocol: api.protocol,
            created: false,
            endpoints: Vec::new(),
        }))
    }

    async fn create_or_update(
        &self,
        desired: &ApiDesired,
        prior: Option<&ApiRecord>,
    ) -> Result<Reconciled<ApiRecord>, DeployError> {
        let protocol = desired.protocol();
        if protocol == ApiProtocol::Rest && !self.capabilities().explicit_endpoints {
            return Err(DeployError::validation(
                "Explicit endpoints are not supported by the configured routing service",
            ));
        }
        if let Some(prior) = prior.filter(|p| p.created && p.protocol != protocol) {
            return Err(DeployError::validation(format!(
                "Changing the routing style of API {} is not supported. \
                 Remove this instance and deploy it again.",
                prior.id
            )));
        }

        // Endpoints left on an external API that is no longer used.
        if let Some(prior) = prior.filter(|p| !p.created && desired.api_id.as_ref() != Some(&p.id)) {
            self.detach(prior).await?;
        }

        let (api, created, owned) = if let Some(external) = &desired.api_id {
            let api = self
                .fetch(external)
                .await?
                .ok_or_else(|| DeployError::not_found("Routing API", external.clone()))?;
            (api, false, false)
        } else {
            let reusable = match prior.filter(|p| p.created) {
                Some(p) => self.fetch(&p.id).await?,
                None => None,
            };
            match reusable {
                Some(api) => (api, false, true),
                None => {
                    let name = prior
                        .filter(|p| p.created)
                        .map_or_else(|| naming::api_name(&desired.instance), |p| p.name.clone());
                    (self.create(desired, &name).await?, true, true)
                }
            }
        };

        let recorded: &[EndpointRecord] = prior
            .filter(|p| p.id == api.id)
            .map(|p| p.endpoints.as_slice())
            .unwrap_or_default();

        let (endpoints, changed) = match &desired.routing {
            RoutingStyle::CatchAll => {
                let retarget = api.target.as_deref() != Some(desired.alias_arn.as_str());
                if retarget && !created {
                    let gateway = &self.ctx.clients.gateway;
                    let description = format!("Routing API of {}", desired.instance);
                    self.ctx
                        .call("update_api", RetryOn::Throttling, || {
                            gateway.update_api(&api.id, &description, Some(desired.alias_arn.as_str()))
                        })
                        .await?;
                    info!(api = %api.id, alias = %desired.alias_name, "Retargeted routing API");
                }
                if retarget || created {
                    self.grant_alias(&api.id, desired).await?;
                }
                (Vec::new(), retarget)
            }
            RoutingStyle::Endpoints { endpoints } => {
                let default_target = IntegrationTarget::Function {
                    arn: desired.alias_arn.clone(),
                };
                let outcome = EndpointReconciler::new(self.ctx.clone())
                    .reconcile(&api.id, endpoints, recorded, &default_target)
                    .await?;
                if outcome.changed || created {
                    self.deploy_stage(&api.id).await?;
                }
                (outcome.endpoints, outcome.changed)
            }
        };

        let record = ApiRecord {
            url: self.url_for(&api.id, protocol),
            id: api.id,
            name: api.name,
            protocol,
            created: owned,
            endpoints,
        };
        Ok(if created {
            Reconciled::created(record)
        } else if changed {
            self.ctx.emit("api.updated", json!({ "id": record.id }));
            Reconciled::updated(record)
        } else {
            Reconciled::unchanged(record)
        })
    }

    async fn remove(&self, record: &ApiRecord) -> Result<Removal, DeployError> {
        if !record.created {
            return self.detach(record).await;
        }
        let gateway = &self.ctx.clients.gateway;
        let outcome = removal_outcome(
            self.ctx
                .call("delete_api", RetryOn::Throttling, || gateway.delete_api(&record.id))
                .await,
        )?;
        self.ctx.emit("api.removed", json!({ "id": record.id }));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointSpec;
    use crate::drivers::ReconcileAction;
    use crate::testing::FakeCloud;

    const ALIAS_ARN: &str = "arn:aws:lambda:us-east-1:123456789012:function:app-abcd1234-function:default";

    fn catch_all() -> ApiDesired {
        ApiDesired {
            instance: "app-abcd1234".into(),
            alias_arn: ALIAS_ARN.into(),
            alias_name: "default".into(),
            routing: RoutingStyle::CatchAll,
            api_id: None,
        }
    }

    fn with_endpoints(endpoints: Vec<EndpointSpec>) -> ApiDesired {
        ApiDesired {
            routing: RoutingStyle::Endpoints { endpoints },
            ..catch_all()
        }
    }

    #[tokio::test]
    async fn test_catch_all_api_is_created_once() {
        let cloud = FakeCloud::new();
        let driver = ApiDriver::new(cloud.driver_context());

        let first = driver.create_or_update(&catch_all(), None).await.unwrap();
        assert_eq!(first.action, ReconcileAction::Created);
        assert_eq!(first.record.name, "app-abcd1234-api");
        assert_eq!(
            first.record.url,
            format!("https://{}.execute-api.us-east-1.amazonaws.com", first.record.id)
        );

        let second = driver.create_or_update(&catch_all(), Some(&first.record)).await.unwrap();
        assert_eq!(second.action, ReconcileAction::Unchanged);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(cloud.count_calls("create_api"), 1);
    }

    #[tokio::test]
    async fn test_catch_all_retargets_to_new_alias() {
        let cloud = FakeCloud::new();
        let driver = ApiDriver::new(cloud.driver_context());
        let first = driver.create_or_update(&catch_all(), None).await.unwrap();

        let feature = ApiDesired {
            alias_arn: ALIAS_ARN.replace(":default", ":feature"),
            alias_name: "feature".into(),
            ..catch_all()
        };
        let second = driver.create_or_update(&feature, Some(&first.record)).await.unwrap();
        assert_eq!(second.action, ReconcileAction::Updated);
        assert_eq!(cloud.count_calls("update_api"), 1);
    }

    #[tokio::test]
    async fn test_rest_api_deploys_stage_on_change_only() {
        let cloud = FakeCloud::new();
        let driver = ApiDriver::new(cloud.driver_context());
        let desired = with_endpoints(vec![EndpointSpec::new("GET", "/users")]);

        let first = driver.create_or_update(&desired, None).await.unwrap();
        assert_eq!(first.record.protocol, ApiProtocol::Rest);
        assert!(first.record.url.ends_with("/dev"));
        assert_eq!(cloud.count_calls("create_deployment"), 1);

        let second = driver.create_or_update(&desired, Some(&first.record)).await.unwrap();
        assert_eq!(second.action, ReconcileAction::Unchanged);
        assert_eq!(cloud.count_calls("create_deployment"), 1);
    }

    #[tokio::test]
    async fn test_external_api_is_never_deleted() {
        let cloud = FakeCloud::new();
        let external = cloud.seed_rest_api("shared-api");
        let driver = ApiDriver::new(cloud.driver_context());
        let desired = ApiDesired {
            api_id: Some(external.clone()),
            ..with_endpoints(vec![EndpointSpec::new("GET", "/orders")])
        };

        let record = driver.create_or_update(&desired, None).await.unwrap().record;
        assert!(!record.created);
        assert_eq!(driver.remove(&record).await.unwrap(), Removal::Removed);
        assert_eq!(cloud.count_calls("delete_api"), 0);
        assert!(driver.get(&external).await.unwrap().is_some());
        assert!(!cloud.resource_paths(&external).contains(&"/orders".to_string()));
    }

    #[tokio::test]
    async fn test_missing_external_api_is_not_found() {
        let cloud = FakeCloud::new();
        let driver = ApiDriver::new(cloud.driver_context());
        let desired = ApiDesired {
            api_id: Some("nope".into()),
            ..with_endpoints(vec![EndpointSpec::new("GET", "/orders")])
        };
        let err = driver.create_or_update(&desired, None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "The provided Routing API with the name: nope could not be found."
        );
    }

    #[tokio::test]
    async fn test_routing_style_change_is_rejected() {
        let cloud = FakeCloud::new();
        let driver = ApiDriver::new(cloud.driver_context());
        let first = driver.create_or_update(&catch_all(), None).await.unwrap();
        let err = driver
            .create_or_update(
                &with_endpoints(vec![EndpointSpec::new("GET", "/users")]),
                Some(&first.record),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("routing style"));
    }
}
