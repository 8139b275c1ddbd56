//! Alias driver and traffic splitting.
//!
//! Without a traffic weight the `default` alias points at the newest version.
//! With a weight `w`, the `feature` alias points at the newest version and
//! routes `1 - w` of its traffic to the version `default` still serves.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

use super::{
    lookup, removal_outcome, DriverCapabilities, DriverContext, Reconciled, Removal,
    ResourceDriver, ResourceKind,
};
use crate::errors::DeployError;
use crate::provider::{AliasInfo, AliasRequest};
use crate::retry::RetryOn;
use crate::state::AliasRecord;
use crate::utils::naming;

/// Alias serving stable traffic.
pub const DEFAULT_ALIAS: &str = "default";
/// Alias used while traffic is split.
pub const FEATURE_ALIAS: &str = "feature";

/// Identifies an alias of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasId {
    /// Function name.
    pub function_name: String,
    /// Alias name.
    pub alias: String,
}

/// Desired alias state.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasDesired {
    /// Function name.
    pub function_name: String,
    /// Newest published version.
    pub version: u64,
    /// Share of traffic for the newest version, in `(0, 1]`.
    pub traffic_weight: Option<f64>,
}

fn record_of(info: AliasInfo) -> AliasRecord {
    AliasRecord {
        name: info.name,
        arn: info.arn,
        function_version: info.function_version,
        routing: info.routing,
    }
}

fn stable_share(weight: f64) -> f64 {
    ((1.0 - weight) * 1_000_000.0).round() / 1_000_000.0
}

/// Points aliases at function versions.
#[derive(Debug, Clone)]
pub struct AliasDriver {
    ctx: DriverContext,
}

impl AliasDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }

    async fn upsert(&self, request: AliasRequest) -> Result<Reconciled<AliasRecord>, DeployError> {
        let id = AliasId {
            function_name: request.function_name.clone(),
            alias: request.name.clone(),
        };
        let compute = &self.ctx.clients.compute;
        let reconciled = match self.get(&id).await? {
            Some(current)
                if current.function_version == request.function_version
                    && current.routing == request.routing =>
            {
                return Ok(Reconciled::unchanged(current));
            }
            Some(_) => Reconciled::updated(record_of(
                self.ctx
                    .call("update_alias", RetryOn::Throttling, || compute.update_alias(&request))
                    .await?,
            )),
            None => Reconciled::created(record_of(
                self.ctx
                    .call("create_alias", RetryOn::Throttling, || compute.create_alias(&request))
                    .await?,
            )),
        };
        info!(
            alias = %request.name,
            version = request.function_version,
            "Pointed alias at version"
        );
        self.ctx.emit(
            "alias.updated",
            json!({
                "name": request.name,
                "version": request.function_version,
                "routing": request.routing,
            }),
        );
        Ok(reconciled)
    }
}

#[async_trait]
impl ResourceDriver for AliasDriver {
    type Id = AliasId;
    type Desired = AliasDesired;
    type Record = AliasRecord;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Alias
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            updates_in_place: true,
            traffic_split: true,
            removes_only_owned: true,
            ..DriverCapabilities::default()
        }
    }

    async fn get(&self, id: &AliasId) -> Result<Option<AliasRecord>, DeployError> {
        let compute = &self.ctx.clients.compute;
        let alias = lookup(
            self.ctx
                .call("get_alias", RetryOn::Throttling, || {
                    compute.get_alias(&id.function_name, &id.alias)
                })
                .await,
        )?;
        Ok(alias.map(record_of))
    }

    async fn create_or_update(
        &self,
        desired: &AliasDesired,
        prior: Option<&AliasRecord>,
    ) -> Result<Reconciled<AliasRecord>, DeployError> {
        if let Some(weight) = desired.traffic_weight.filter(|_| desired.version > 1) {
            let stable_id = AliasId {
                function_name: desired.function_name.clone(),
                alias: DEFAULT_ALIAS.to_string(),
            };
            let stable = self.get(&stable_id).await?.ok_or_else(|| {
                DeployError::validation(
                    "Cannot split traffic: no stable version to split away from. \
                     Deploy once without trafficWeight first.",
                )
            })?;

            let mut routing = BTreeMap::new();
            if weight < 1.0 && stable.function_version != desired.version {
                routing.insert(stable.function_version.to_string(), stable_share(weight));
            }
            return self
                .upsert(AliasRequest {
                    function_name: desired.function_name.clone(),
                    name: FEATURE_ALIAS.to_string(),
                    function_version: desired.version,
                    routing,
                })
                .await;
        }

        let reconciled = self
            .upsert(AliasRequest {
                function_name: desired.function_name.clone(),
                name: DEFAULT_ALIAS.to_string(),
                function_version: desired.version,
                routing: BTreeMap::new(),
            })
            .await?;

        if prior.is_some_and(|record| record.name == FEATURE_ALIAS) {
            let compute = &self.ctx.clients.compute;
            removal_outcome(
                self.ctx
                    .call("delete_alias", RetryOn::Throttling, || {
                        compute.delete_alias(&desired.function_name, FEATURE_ALIAS)
                    })
                    .await,
            )?;
            self.ctx.emit("alias.removed", json!({ "name": FEATURE_ALIAS }));
        }
        Ok(reconciled)
    }

    async fn remove(&self, record: &AliasRecord) -> Result<Removal, DeployError> {
        let compute = &self.ctx.clients.compute;
        let function_name = naming::function_name_from_arn(&record.arn)
            .ok_or_else(|| {
                DeployError::validation(format!(
                    "Cannot read the function name from alias ARN \"{}\"",
                    record.arn
                ))
            })?
            .to_string();
        removal_outcome(
            self.ctx
                .call("delete_alias", RetryOn::Throttling, || {
                    compute.delete_alias(&function_name, &record.name)
                })
                .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ReconcileAction;
    use crate::testing::FakeCloud;

    const FUNCTION: &str = "app-abcd1234-function";

    #[test]
    fn test_stable_share_rounding() {
        assert_eq!(stable_share(0.2), 0.8);
        assert_eq!(stable_share(0.9), 0.1);
    }

    #[tokio::test]
    async fn test_remove_rejects_unreadable_alias_arn() {
        let cloud = FakeCloud::new();
        let driver = AliasDriver::new(cloud.driver_context());
        let record = AliasRecord {
            name: DEFAULT_ALIAS.into(),
            arn: "not-an-arn".into(),
            function_version: 1,
            routing: BTreeMap::new(),
        };

        let err = driver.remove(&record).await.unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
        assert!(err.to_string().contains("not-an-arn"));
        assert_eq!(cloud.count_calls("delete_alias"), 0);
    }

    #[tokio::test]
    async fn test_default_alias_follows_latest_version() {
        let cloud = FakeCloud::new();
        cloud.seed_function(FUNCTION, 3);
        let driver = AliasDriver::new(cloud.driver_context());
        let desired = AliasDesired { function_name: FUNCTION.into(), version: 3, traffic_weight: None };

        let first = driver.create_or_update(&desired, None).await.unwrap();
        assert_eq!(first.action, ReconcileAction::Created);
        assert_eq!(first.record.name, DEFAULT_ALIAS);
        assert!(first.record.routing.is_empty());

        let again = driver.create_or_update(&desired, Some(&first.record)).await.unwrap();
        assert_eq!(again.action, ReconcileAction::Unchanged);
    }

    #[tokio::test]
    async fn test_weight_splits_against_stable_version() {
        let cloud = FakeCloud::new();
        cloud.seed_function(FUNCTION, 4);
        let driver = AliasDriver::new(cloud.driver_context());
        driver
            .create_or_update(
                &AliasDesired { function_name: FUNCTION.into(), version: 3, traffic_weight: None },
                None,
            )
            .await
            .unwrap();

        let split = driver
            .create_or_update(
                &AliasDesired { function_name: FUNCTION.into(), version: 4, traffic_weight: Some(0.2) },
                None,
            )
            .await
            .unwrap()
            .record;
        assert_eq!(split.name, FEATURE_ALIAS);
        assert_eq!(split.function_version, 4);
        assert_eq!(split.routing.get("3"), Some(&0.8));
    }

    #[tokio::test]
    async fn test_full_weight_has_no_routing_table() {
        let cloud = FakeCloud::new();
        cloud.seed_function(FUNCTION, 4);
        let driver = AliasDriver::new(cloud.driver_context());
        driver
            .create_or_update(
                &AliasDesired { function_name: FUNCTION.into(), version: 3, traffic_weight: None },
                None,
            )
            .await
            .unwrap();
        let split = driver
            .create_or_update(
                &AliasDesired { function_name: FUNCTION.into(), version: 4, traffic_weight: Some(1.0) },
                None,
            )
            .await
            .unwrap()
            .record;
        assert!(split.routing.is_empty());
    }

    #[tokio::test]
    async fn test_weight_without_stable_alias_is_rejected() {
        let cloud = FakeCloud::new();
        cloud.seed_function(FUNCTION, 2);
        let driver = AliasDriver::new(cloud.driver_context());
        let err = driver
            .create_or_update(
                &AliasDesired { function_name: FUNCTION.into(), version: 2, traffic_weight: Some(0.5) },
                None,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no stable version to split away from"));
    }

    #[tokio::test]
    async fn test_dropping_weight_removes_feature_alias() {
        let cloud = FakeCloud::new();
        cloud.seed_function(FUNCTION, 4);
        let driver = AliasDriver::new(cloud.driver_context());
        driver
            .create_or_update(
                &AliasDesired { function_name: FUNCTION.into(), version: 3, traffic_weight: None },
                None,
            )
            .await
            .unwrap();
        let feature = driver
            .create_or_update(
                &AliasDesired { function_name: FUNCTION.into(), version: 4, traffic_weight: Some(0.5) },
                None,
            )
            .await
            .unwrap()
            .record;

        let promoted = driver
            .create_or_update(
                &AliasDesired { function_name: FUNCTION.into(), version: 4, traffic_weight: None },
                Some(&feature),
            )
            .await
            .unwrap()
            .record;
        assert_eq!(promoted.name, DEFAULT_ALIAS);
        assert_eq!(promoted.function_version, 4);
        let feature_id = AliasId { function_name: FUNCTION.into(), alias: FEATURE_ALIAS.into() };
        assert!(driver.get(&feature_id).await.unwrap().is_none());
    }
}
