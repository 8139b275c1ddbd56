//! Deployment, removal and metrics orchestration.
//!
//! This module provides:
//! - [`Deployer`], the entry point for `deploy`, `remove` and `metrics`
//! - Dependency-ordered stages with independent resources joined per stage
//! - Incremental persistence of [`InstanceState`] after every milestone

mod deploy;
mod metrics;
mod remove;


use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::drivers::{DriverContext, ReconcileAction, Removal, ResourceDriver};
use crate::errors::DeployError;
use crate::events::{EventSink, NoOpEventSink};
use crate::provider::{ArtifactPackager, ProviderClients};
use crate::state::{InstanceState, StateStore};

/// Key instance state is stored under when none is configured.
pub const DEFAULT_STATE_KEY: &str = "default";

/// Component name instance names are derived from.
pub const DEFAULT_COMPONENT: &str = "lambdaform";

/// What a deploy hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutputs {
    /// Invoke URL of the routing API.
    pub url: String,
    /// Custom domain URL, once the domain serves traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Hostname to point the domain at when DNS is managed elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regional_hostname: Option<String>,
}

/// Sequences resource drivers for one instance.
#[derive(Clone)]
pub struct Deployer {
    clients: ProviderClients,
    config: Arc<EngineConfig>,
    store: Arc<dyn StateStore>,
    packager: Arc<dyn ArtifactPackager>,
    sink: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
    state_key: String,
    component: String,
}

impl Deployer {
    /// Creates a deployer with default engine settings.
    #[must_use]
    pub fn new(
        clients: ProviderClients,
        store: Arc<dyn StateStore>,
        packager: Arc<dyn ArtifactPackager>,
    ) -> Self {
        Self {
            clients,
            config: Arc::new(EngineConfig::default()),
            store,
            packager,
            sink: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
            state_key: DEFAULT_STATE_KEY.to_string(),
            component: DEFAULT_COMPONENT.to_string(),
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Sets the sink progress events are sent to.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the token that aborts in-flight runs.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the key instance state is stored under.
    #[must_use]
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = key.into();
        self
    }

    /// Sets the component name new instance names start with.
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    /// The token that aborts in-flight runs.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn context(&self, region: &str) -> DriverContext {
        DriverContext::new(
            self.clients.clone(),
            self.config.clone(),
            region,
            self.cancel.clone(),
            self.sink.clone(),
        )
    }

    async fn load(&self) -> Result<InstanceState, DeployError> {
        self.store.load(&self.state_key).await
    }

    /// Saves a milestone.
    async fn persist(&self, state: &mut InstanceState) -> Result<(), DeployError> {
        state.touch();
        self.store.save(&self.state_key, state).await?;
        debug!(key = %self.state_key, "Persisted instance state");
        Ok(())
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        self.sink.try_emit(event_type, Some(data));
    }
}

impl std::fmt::Debug for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("state_key", &self.state_key)
            .field("component", &self.component)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Converges one resource and reports what happened.
async fn reconcile<D>(
    driver: &D,
    ctx: &DriverContext,
    desired: &D::Desired,
    prior: Option<&D::Record>,
) -> Result<D::Record, DeployError>
where
    D: ResourceDriver,
{
    ctx.cancel.check()?;
    let kind = driver.kind();
    let reconciled = driver.create_or_update(desired, prior).await?;
    let action = match reconciled.action {
        ReconcileAction::Created => "created",
        ReconcileAction::Updated => "updated",
        ReconcileAction::Unchanged => "unchanged",
    };
    info!(resource = %kind, action, "Reconciled resource");
    ctx.emit(&format!("{kind}.reconciled"), json!({ "action": action }));
    Ok(reconciled.record)
}

/// Removes one resource; absent resources count as removed.
async fn unwind<D>(driver: &D, ctx: &DriverContext, record: &D::Record) -> Result<Removal, DeployError>
where
    D: ResourceDriver,
{
    ctx.cancel.check()?;
    let kind = driver.kind();
    let removal = driver.remove(record).await?;
    info!(resource = %kind, outcome = ?removal, "Removed resource");
    Ok(removal)
}
