//! The removal path: domain, then API and function, then identities.

use serde_json::json;
use tracing::info;

use super::{unwind, Deployer};
use crate::cancellation::TaskGroup;
use crate::domain::DomainWorkflow;
use crate::drivers::{AliasDriver, ApiDriver, FunctionDriver, MetaRoleDriver, Removal, RoleDriver};
use crate::errors::DeployError;

impl Deployer {
    /// Removes everything the instance created, then clears its state.
    ///
    /// Resources that are already gone count as removed. Resources the
    /// instance only referenced are left in place.
    pub async fn remove(&self) -> Result<(), DeployError> {
        self.cancel.check()?;
        let mut state = self.load().await?;
        if state.is_empty() {
            info!(key = %self.state_key, "Nothing to remove");
            self.emit("remove.completed", json!({ "instance": null }));
            return Ok(());
        }

        let instance = state.name.clone().unwrap_or_default();
        let region = state.region.clone().unwrap_or_else(|| self.config.region.clone());
        let ctx = self.context(&region);
        self.emit("remove.started", json!({ "instance": instance }));

        // The provider refuses to delete a domain that is still mapped, so the
        // domain goes before the API it maps to.
        if let Some(domain) = state.domain.clone() {
            unwind(&DomainWorkflow::new(ctx.clone()), &ctx, &domain).await?;
            state.domain = None;
            self.persist(&mut state).await?;
        }

        let compute_stage = TaskGroup::new(&self.cancel);
        if let Some(api) = state.api.clone() {
            let api_ctx = ctx.clone();
            compute_stage.spawn("api", move |token| async move {
                let ctx = api_ctx.with_cancel(token);
                unwind(&ApiDriver::new(ctx.clone()), &ctx, &api).await
            });
        }
        let alias = state.alias.clone();
        let function = state.function.clone();
        if alias.is_some() || function.is_some() {
            let function_ctx = ctx.clone();
            compute_stage.spawn("function", move |token| async move {
                let ctx = function_ctx.with_cancel(token);
                if let Some(alias) = &alias {
                    unwind(&AliasDriver::new(ctx.clone()), &ctx, alias).await?;
                }
                match &function {
                    Some(function) => unwind(&FunctionDriver::new(ctx.clone()), &ctx, function).await,
                    None => Ok(Removal::AlreadyAbsent),
                }
            });
        }
        compute_stage.wait().await?;
        state.api = None;
        state.alias = None;
        state.function = None;
        self.persist(&mut state).await?;

        let identity_stage = TaskGroup::new(&self.cancel);
        if let Some(role) = state.role.clone() {
            let role_ctx = ctx.clone();
            identity_stage.spawn("role", move |token| async move {
                let ctx = role_ctx.with_cancel(token);
                unwind(&RoleDriver::new(ctx.clone()), &ctx, &role).await
            });
        }
        if let Some(role) = state.default_role.clone() {
            let role_ctx = ctx.clone();
            identity_stage.spawn("default_role", move |token| async move {
                let ctx = role_ctx.with_cancel(token);
                unwind(&RoleDriver::new(ctx.clone()), &ctx, &role).await
            });
        }
        if let Some(meta) = state.meta_role.clone() {
            let meta_ctx = ctx.clone();
            identity_stage.spawn("meta_role", move |token| async move {
                let ctx = meta_ctx.with_cancel(token);
                unwind(&MetaRoleDriver::new(ctx.clone()), &ctx, &meta).await
            });
        }
        identity_stage.wait().await?;

        self.store.clear(&self.state_key).await?;
        info!(instance = %instance, "Removal completed");
        self.emit("remove.completed", json!({ "instance": instance }));
        Ok(())
    }
}
