//! The deploy path: identities, function, alias, API, then the domain.

use serde_json::json;
use tracing::{debug, info};

use super::{reconcile, unwind, DeployOutputs, Deployer};
use crate::cancellation::TaskGroup;
use crate::config::{DesiredConfig, EngineConfig};
use crate::domain::{check_domain_change, DomainDesired, DomainStatus, DomainWorkflow};
use crate::drivers::{
    AliasDesired, AliasDriver, ApiDesired, ApiDriver, DriverContext, FunctionDesired,
    FunctionDriver, MetaRoleDesired, MetaRoleDriver, RoleDesired, RoleDriver,
};
use crate::errors::{DeployError, ErrorInfo};
use crate::state::{ApiRecord, DomainRecord, InstanceState, MetaRoleRecord, RoleRecord};
use crate::utils::naming;

/// Result of one task in the identity stage.
enum Identity {
    Role(RoleRecord),
    MetaRole(MetaRoleRecord),
}

/// Region for this run. A deployed instance never moves.
fn resolve_region(
    state: &InstanceState,
    desired: &DesiredConfig,
    config: &EngineConfig,
) -> Result<String, DeployError> {
    match (&state.region, &desired.region) {
        (Some(recorded), Some(wanted)) if recorded != wanted => Err(DeployError::validation(format!(
            "Changing the region from {recorded} to {wanted} is not supported. \
             Remove this instance, then deploy it to the new region."
        ))),
        (Some(recorded), _) => Ok(recorded.clone()),
        (None, Some(wanted)) => Ok(wanted.clone()),
        (None, None) => Ok(config.region.clone()),
    }
}

/// Keeps track of the role this instance created while a user role is in use.
///
/// The created role stays in place so the function keeps a valid role until
/// it is updated, and so removal can still delete it.
fn retain_default_role(state: &mut InstanceState, current: &RoleRecord) {
    if current.created {
        state.default_role = None;
    } else if let Some(prior) = state.role.take().filter(|role| role.created) {
        state.default_role = Some(prior);
    }
}

fn hostname_of(url: &str) -> String {
    url.trim_start_matches("https://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

impl Deployer {
    /// Converges the instance on `desired` and returns its public outputs.
    ///
    /// State is persisted after every stage, so a failed deploy resumes from
    /// the last completed stage when run again.
    pub async fn deploy(&self, desired: &DesiredConfig) -> Result<DeployOutputs, DeployError> {
        self.cancel.check()?;
        let desired = desired.validate(&self.config)?;
        let mut state = self.load().await?;

        let region = resolve_region(&state, &desired, &self.config)?;
        check_domain_change(state.domain.as_ref(), desired.domain.as_deref())?;

        let instance = match &state.name {
            Some(name) => name.clone(),
            None => {
                let name = naming::instance_name(&self.component);
                info!(instance = %name, "Generated instance name");
                name
            }
        };
        state.name = Some(instance.clone());
        state.region = Some(region.clone());
        self.persist(&mut state).await?;
        self.emit("deploy.started", json!({ "instance": instance, "region": region }));

        let ctx = self.context(&region);
        let artifact = self
            .packager
            .package(desired.src.as_deref(), &desired.extra_files)
            .await?;
        debug!(handler = %artifact.handler, hash = %artifact.code_sha256, "Packaged artifact");

        let role = self.reconcile_identities(&ctx, &instance, &desired, &mut state).await?;

        let function_desired = FunctionDesired::from_config(
            &instance,
            &region,
            &role.arn,
            artifact,
            &desired,
            &self.config.function,
        );
        let function = reconcile(
            &FunctionDriver::new(ctx.clone()),
            &ctx,
            &function_desired,
            state.function.as_ref(),
        )
        .await?;
        state.function = Some(function.clone());
        self.persist(&mut state).await?;

        let alias_desired = AliasDesired {
            function_name: function.name.clone(),
            version: function.version,
            traffic_weight: desired.effective_traffic_weight(),
        };
        let alias = reconcile(
            &AliasDriver::new(ctx.clone()),
            &ctx,
            &alias_desired,
            state.alias.as_ref(),
        )
        .await?;
        state.alias = Some(alias.clone());
        self.persist(&mut state).await?;

        let api_desired = ApiDesired {
            instance: instance.clone(),
            alias_arn: alias.arn.clone(),
            alias_name: alias.name.clone(),
            routing: desired.routing.clone(),
            api_id: desired.api_id.clone(),
        };
        let api = reconcile(&ApiDriver::new(ctx.clone()), &ctx, &api_desired, state.api.as_ref())
            .await?;
        state.api = Some(api.clone());
        self.persist(&mut state).await?;

        let domain = self
            .reconcile_domain(&ctx, desired.domain.as_deref(), &api, &mut state)
            .await?;

        let mut outputs = DeployOutputs {
            url: api.url.clone(),
            ..DeployOutputs::default()
        };
        if let Some(record) = &domain {
            match DomainStatus::of(record) {
                DomainStatus::Active => outputs.domain = Some(format!("https://{}", record.name)),
                DomainStatus::ManualSetup => outputs.regional_hostname = Some(hostname_of(&api.url)),
                DomainStatus::CertificatePending => {}
            }
        }

        info!(instance = %instance, url = %outputs.url, "Deploy completed");
        self.emit("deploy.completed", json!(outputs));
        Ok(outputs)
    }

    /// Reconciles the execution role and, when monitoring is on, the meta role.
    ///
    /// Both run concurrently when the meta role's trusted account is already
    /// known. On a first deploy without a configured account it is read from
    /// the new role's ARN, so the meta role follows the role.
    async fn reconcile_identities(
        &self,
        ctx: &DriverContext,
        instance: &str,
        desired: &DesiredConfig,
        state: &mut InstanceState,
    ) -> Result<RoleRecord, DeployError> {
        let principal = self
            .config
            .metrics_principal_account
            .clone()
            .or_else(|| state.account_id().map(str::to_string))
            .filter(|_| desired.monitoring);
        let meta_concurrent = principal.is_some();

        let group = TaskGroup::new(&self.cancel);
        let role_desired = RoleDesired {
            instance: instance.to_string(),
            role_name: desired.role_name.clone(),
        };
        let prior_role = state
            .role
            .clone()
            .filter(|role| role.created)
            .or_else(|| state.default_role.clone());
        let role_ctx = ctx.clone();
        group.spawn("role", move |token| async move {
            let ctx = role_ctx.with_cancel(token);
            let role = reconcile(&RoleDriver::new(ctx.clone()), &ctx, &role_desired, prior_role.as_ref())
                .await?;
            Ok(Identity::Role(role))
        });

        if let Some(account) = principal {
            let meta_desired = MetaRoleDesired {
                instance: instance.to_string(),
                principal_account: account,
            };
            let prior_meta = state.meta_role.clone();
            let meta_ctx = ctx.clone();
            group.spawn("meta_role", move |token| async move {
                let ctx = meta_ctx.with_cancel(token);
                let meta = reconcile(
                    &MetaRoleDriver::new(ctx.clone()),
                    &ctx,
                    &meta_desired,
                    prior_meta.as_ref(),
                )
                .await?;
                Ok(Identity::MetaRole(meta))
            });
        }

        let mut role = None;
        for identity in group.wait().await? {
            match identity {
                Identity::Role(record) => role = Some(record),
                Identity::MetaRole(record) => state.meta_role = Some(record),
            }
        }
        let role = role.ok_or_else(|| {
            DeployError::terminal(
                "The role stage finished without a role",
                ErrorInfo::new("ROLE-MISSING", "Role stage returned no record"),
            )
        })?;
        retain_default_role(state, &role);
        state.role = Some(role.clone());
        self.persist(state).await?;

        if desired.monitoring && !meta_concurrent {
            let account = naming::account_id_from_arn(&role.arn).ok_or_else(|| {
                DeployError::validation(format!("Cannot read the account id from role {}", role.arn))
            })?;
            let meta_desired = MetaRoleDesired {
                instance: instance.to_string(),
                principal_account: account.to_string(),
            };
            let meta = reconcile(
                &MetaRoleDriver::new(ctx.clone()),
                ctx,
                &meta_desired,
                state.meta_role.as_ref(),
            )
            .await?;
            state.meta_role = Some(meta);
            self.persist(state).await?;
        } else if !desired.monitoring {
            if let Some(meta) = state.meta_role.clone() {
                unwind(&MetaRoleDriver::new(ctx.clone()), ctx, &meta).await?;
                state.meta_role = None;
                self.persist(state).await?;
            }
        }
        Ok(role)
    }

    /// Sets up the desired domain, or unwinds one that is no longer desired.
    async fn reconcile_domain(
        &self,
        ctx: &DriverContext,
        desired: Option<&str>,
        api: &ApiRecord,
        state: &mut InstanceState,
    ) -> Result<Option<DomainRecord>, DeployError> {
        let workflow = DomainWorkflow::new(ctx.clone());
        match (desired, state.domain.clone()) {
            (Some(name), prior) => {
                let record = reconcile(
                    &workflow,
                    ctx,
                    &DomainDesired::for_api(name, api),
                    prior.as_ref(),
                )
                .await?;
                state.domain = Some(record.clone());
                self.persist(state).await?;
                Ok(Some(record))
            }
            (None, Some(prior)) => {
                info!(domain = %prior.name, "Domain no longer configured, removing it");
                unwind(&workflow, ctx, &prior).await?;
                state.domain = None;
                self.persist(state).await?;
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_region_is_pinned_once_recorded() {
        let config = EngineConfig::default();
        let state = InstanceState {
            region: Some("eu-west-1".to_string()),
            ..InstanceState::default()
        };
        assert_eq!(
            resolve_region(&state, &DesiredConfig::new(), &config).unwrap(),
            "eu-west-1"
        );
        let err = resolve_region(
            &state,
            &DesiredConfig::new().with_region("us-west-2"),
            &config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("from eu-west-1 to us-west-2"));
        assert_eq!(
            resolve_region(&InstanceState::default(), &DesiredConfig::new(), &config).unwrap(),
            "us-east-1"
        );
    }

    fn role(name: &str, created: bool) -> RoleRecord {
        RoleRecord {
            name: name.to_string(),
            arn: format!("arn:aws:iam::123456789012:role/{name}"),
            created,
        }
    }

    #[test]
    fn test_created_role_is_retained_while_user_role_is_used() {
        let mut state = InstanceState {
            role: Some(role("app-lambda-role", true)),
            ..InstanceState::default()
        };
        retain_default_role(&mut state, &role("my-role", false));
        assert_eq!(state.default_role, Some(role("app-lambda-role", true)));

        state.role = Some(role("my-role", false));
        retain_default_role(&mut state, &role("my-role", false));
        assert_eq!(state.default_role, Some(role("app-lambda-role", true)));

        retain_default_role(&mut state, &role("app-lambda-role", true));
        assert_eq!(state.default_role, None);
    }

    #[test]
    fn test_hostname_of_strips_scheme_and_stage() {
        assert_eq!(
            hostname_of("https://abc.execute-api.us-east-1.amazonaws.com/dev"),
            "abc.execute-api.us-east-1.amazonaws.com"
        );
    }
}
