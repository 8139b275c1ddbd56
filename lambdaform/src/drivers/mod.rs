//! Resource drivers.
//!
//! Every resource type goes through one interface, [`ResourceDriver`]:
//! `get` reads the provider, `create_or_update` converges it on the desired
//! shape, `remove` deletes what this instance owns. A missing resource during
//! removal counts as success, so removal can be resumed after a partial run.

mod alias;
mod api;
mod function;
mod meta_role;
mod role;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::errors::{DeployError, RemoteError};
use crate::events::EventSink;
use crate::provider::ProviderClients;
use crate::retry::{RetryOn, RetryPolicy};

pub use alias::{AliasDesired, AliasDriver, AliasId, DEFAULT_ALIAS, FEATURE_ALIAS};
pub use api::{ApiDesired, ApiDriver};
pub use function::{FunctionDesired, FunctionDriver, SHIM_INSTANCE_ENV, SHIM_REGION_ENV};
pub use meta_role::{meta_policy_document, MetaRoleDesired, MetaRoleDriver};
pub use role::{RoleDesired, RoleDriver};

/// The kinds of resource an instance is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Execution role.
    Role,
    /// Metrics reader role.
    MetaRole,
    /// Compute function.
    Function,
    /// Function alias.
    Alias,
    /// Routing API.
    Api,
    /// Custom domain.
    Domain,
}

impl ResourceKind {
    /// Event prefix for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::MetaRole => "meta_role",
            Self::Function => "function",
            Self::Alias => "alias",
            Self::Api => "api",
            Self::Domain => "domain",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a driver can do, so the orchestrator never has to guess from the
/// provider's API version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCapabilities {
    /// Existing resources are updated in place.
    pub updates_in_place: bool,
    /// Traffic can be split between versions.
    pub traffic_split: bool,
    /// Explicit endpoints are supported.
    pub explicit_endpoints: bool,
    /// Regional custom domains with API mappings are supported.
    pub custom_domain_v2: bool,
    /// Only resources this instance created are ever deleted.
    pub removes_only_owned: bool,
}

/// What `create_or_update` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// The resource did not exist.
    Created,
    /// The resource existed and was changed.
    Updated,
    /// The resource already matched.
    Unchanged,
}

/// A reconciled record and the action taken.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<T> {
    /// The resulting record.
    pub record: T,
    /// What was done.
    pub action: ReconcileAction,
}

impl<T> Reconciled<T> {
    /// A newly created resource.
    pub fn created(record: T) -> Self {
        Self { record, action: ReconcileAction::Created }
    }

    /// An updated resource.
    pub fn updated(record: T) -> Self {
        Self { record, action: ReconcileAction::Updated }
    }

    /// A resource that already matched.
    pub fn unchanged(record: T) -> Self {
        Self { record, action: ReconcileAction::Unchanged }
    }
}

/// What `remove` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    /// The resource was deleted.
    Removed,
    /// The resource was already gone.
    AlreadyAbsent,
    /// The resource is not owned by this instance and was left alone.
    Skipped,
}

/// One versioned interface per resource type.
#[async_trait]
pub trait ResourceDriver: Send + Sync {
    /// Identifier accepted by [`ResourceDriver::get`].
    type Id: ?Sized + Sync;
    /// Desired shape.
    type Desired: Send + Sync;
    /// Persisted record.
    type Record: Send + Sync;

    /// The resource kind.
    fn kind(&self) -> ResourceKind;

    /// What this driver supports.
    fn capabilities(&self) -> DriverCapabilities;

    /// Reads the resource, `None` when absent.
    async fn get(&self, id: &Self::Id) -> Result<Option<Self::Record>, DeployError>;

    /// Converges the resource on `desired`.
    async fn create_or_update(
        &self,
        desired: &Self::Desired,
        prior: Option<&Self::Record>,
    ) -> Result<Reconciled<Self::Record>, DeployError>;

    /// Deletes the resource if this instance owns it.
    async fn remove(&self, record: &Self::Record) -> Result<Removal, DeployError>;
}

/// Everything a driver needs to talk to the provider.
#[derive(Clone)]
pub struct DriverContext {
    /// Provider clients.
    pub clients: ProviderClients,
    /// Engine settings.
    pub config: Arc<EngineConfig>,
    /// Region of the instance.
    pub region: String,
    /// Retry policy for provider calls.
    pub retry: RetryPolicy,
    /// Cancellation for the current stage.
    pub cancel: Arc<CancellationToken>,
    /// Progress events.
    pub sink: Arc<dyn EventSink>,
}

impl DriverContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        clients: ProviderClients,
        config: Arc<EngineConfig>,
        region: impl Into<String>,
        cancel: Arc<CancellationToken>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            clients,
            config,
            region: region.into(),
            retry,
            cancel,
            sink,
        }
    }

    /// The same context under another cancellation token.
    #[must_use]
    pub fn with_cancel(&self, cancel: Arc<CancellationToken>) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Runs one provider call under the retry policy.
    pub async fn call<T, F, Fut>(&self, name: &str, retry_on: RetryOn, operation: F) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.retry.run(name, retry_on, &self.cancel, operation).await
    }

    /// Emits a progress event.
    pub fn emit(&self, event_type: &str, data: serde_json::Value) {
        self.sink.try_emit(event_type, Some(data));
    }
}

impl std::fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverContext")
            .field("region", &self.region)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Maps a removal call's result: not-found is success.
pub(crate) fn removal_outcome(result: Result<(), DeployError>) -> Result<Removal, DeployError> {
    match result {
        Ok(()) => Ok(Removal::Removed),
        Err(e) if e.is_remote_not_found() => Ok(Removal::AlreadyAbsent),
        Err(e) => Err(e),
    }
}

/// Maps a lookup call's result: not-found is `None`.
pub(crate) fn lookup<T>(result: Result<T, DeployError>) -> Result<Option<T>, DeployError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_remote_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Maps a grant call's result: an existing grant is success.
pub(crate) fn tolerate_conflict(result: Result<(), DeployError>) -> Result<(), DeployError> {
    match result {
        Err(e) if e.is_remote_conflict() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_outcome_mapping() {
        assert_eq!(removal_outcome(Ok(())).unwrap(), Removal::Removed);
        let gone = DeployError::remote("delete", RemoteError::not_found("gone"));
        assert_eq!(removal_outcome(Err(gone)).unwrap(), Removal::AlreadyAbsent);
        let denied = DeployError::remote("delete", RemoteError::new("AccessDenied", "no"));
        assert!(removal_outcome(Err(denied)).is_err());
    }

    #[test]
    fn test_lookup_and_conflict_mapping() {
        let gone: Result<u8, _> = Err(DeployError::remote("get", RemoteError::not_found("gone")));
        assert_eq!(lookup(gone).unwrap(), None);
        assert_eq!(lookup(Ok(1)).unwrap(), Some(1));

        let exists = DeployError::remote("grant", RemoteError::conflict("already exists"));
        assert!(tolerate_conflict(Err(exists)).is_ok());
    }

    #[test]
    fn test_resource_kind_display() {
        assert_eq!(ResourceKind::MetaRole.to_string(), "meta_role");
    }
}
