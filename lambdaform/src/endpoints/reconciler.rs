//! Applies an [`EndpointPlan`] to a REST API.
//!
//! Order matters here:
//!
//! 1. Refuse to touch endpoints this instance does not own.
//! 2. Resolve authorizers, create missing path resources.
//! 3. Put methods and integrations, grant invoke permissions.
//! 4. Delete stale methods, then authorizers nothing references.
//! 5. Prune path resources left without methods or children.
//!
//! Path creation and pruning walk explicit worklists, so arbitrarily deep
//! paths never recurse.

use futures::future::try_join_all;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

use super::plan::{path_depth, path_prefixes, plan, ResolvedEndpoint};
use crate::config::EndpointSpec;
use crate::drivers::{removal_outcome, tolerate_conflict, DriverContext};
use crate::errors::{DeployError, ErrorInfo};
use crate::provider::{
    AuthorizerInfo, AuthorizerRequest, IntegrationRequest, IntegrationType, MethodAuthorization,
    MethodRequest, PathResource, PermissionRequest,
};
use crate::retry::{RetryOn, RetryPolicy};
use crate::state::{AuthorizerRecord, EndpointRecord, IntegrationTarget};
use crate::utils::naming;

/// Header the token authorizer reads.
pub const AUTHORIZER_IDENTITY_SOURCE: &str = "method.request.header.Authorization";

const GATEWAY_PRINCIPAL: &str = "apigateway.amazonaws.com";

/// Result of a reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOutcome {
    /// Endpoints this instance now owns, sorted by method then path.
    pub endpoints: Vec<EndpointRecord>,
    /// Whether anything was changed and a new deployment is due.
    pub changed: bool,
}

/// Path resources of an API keyed by full path.
#[derive(Debug, Default)]
struct PathIndex {
    by_path: HashMap<String, PathResource>,
}

impl PathIndex {
    fn new(resources: Vec<PathResource>) -> Self {
        Self {
            by_path: resources.into_iter().map(|r| (r.path.clone(), r)).collect(),
        }
    }

    fn get(&self, path: &str) -> Option<&PathResource> {
        self.by_path.get(path)
    }

    fn has_method(&self, path: &str, method: &str) -> bool {
        self.get(path).is_some_and(|r| r.methods.iter().any(|m| m == method))
    }

    fn child_count(&self, id: &str) -> usize {
        self.by_path
            .values()
            .filter(|r| r.parent_id.as_deref() == Some(id))
            .count()
    }

    fn insert(&mut self, path: String, resource: PathResource) {
        self.by_path.insert(path, resource);
    }

    fn remove(&mut self, path: &str) {
        self.by_path.remove(path);
    }
}

/// Authorizers resolved during one pass, keyed by function ARN.
#[derive(Debug, Default)]
struct AuthorizerCache {
    known: HashMap<String, AuthorizerRecord>,
    listed: Option<Vec<AuthorizerInfo>>,
}

/// An endpoint ready for its method and integration.
#[derive(Debug)]
struct PreparedEndpoint {
    endpoint: ResolvedEndpoint,
    resource_id: String,
    authorizer: Option<AuthorizerRecord>,
    existed: bool,
}

fn statement_id(parts: &[&str]) -> String {
    parts
        .join("-")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// Reconciles the explicit endpoints of one REST API.
#[derive(Debug, Clone)]
pub struct EndpointReconciler {
    ctx: DriverContext,
    integration_retry: RetryPolicy,
}

impl EndpointReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(ctx: DriverContext) -> Self {
        let integration_retry = RetryPolicy::new(ctx.config.integration_retry());
        Self { ctx, integration_retry }
    }

    /// Converges the API's endpoints on `desired`.
    ///
    /// Only endpoints in `recorded` are ever modified or deleted.
    pub async fn reconcile(
        &self,
        api_id: &str,
        desired: &[EndpointSpec],
        recorded: &[EndpointRecord],
        default_target: &IntegrationTarget,
    ) -> Result<EndpointOutcome, DeployError> {
        let mut plan = plan(desired, recorded, default_target);
        let mut index = PathIndex::new(self.fetch_resources(api_id).await?);

        // Recorded endpoints deleted out of band are re-applied.
        let (present, drifted): (Vec<_>, Vec<_>) = std::mem::take(&mut plan.keep)
            .into_iter()
            .partition(|r| index.has_method(&r.path, &r.method));
        plan.keep = present;
        for record in drifted {
            debug!(method = %record.method, path = %record.path, "Endpoint drifted, re-applying");
            plan.update.push((ResolvedEndpoint::from_record(&record), record));
        }

        for endpoint in &plan.create {
            if index.has_method(&endpoint.path, &endpoint.method) {
                return Err(DeployError::conflict(format!(
                    "endpoint {} {} already exists in provider",
                    endpoint.method, endpoint.path
                )));
            }
        }

        let changed = !plan.is_noop();
        let mut authorizers = AuthorizerCache::default();
        for record in recorded {
            if let Some(authorizer) = &record.authorizer {
                authorizers
                    .known
                    .entry(authorizer.function_arn.clone())
                    .or_insert_with(|| authorizer.clone());
            }
        }

        let work = plan
            .create
            .iter()
            .map(|e| (e, false))
            .chain(plan.update.iter().map(|(e, _)| (e, true)));
        let mut prepared = Vec::new();
        for (endpoint, existed) in work {
            self.ctx.cancel.check()?;
            let authorizer = match &endpoint.authorizer_arn {
                Some(arn) => Some(self.ensure_authorizer(api_id, arn, &mut authorizers).await?),
                None => None,
            };
            let resource_id = self.ensure_path(api_id, &endpoint.path, &mut index).await?;
            prepared.push(PreparedEndpoint {
                endpoint: endpoint.clone(),
                resource_id,
                authorizer,
                existed,
            });
        }

        let applied = try_join_all(prepared.iter().map(|p| self.apply(api_id, p))).await?;
        let mut endpoints = plan.keep.clone();
        endpoints.extend(applied);

        for record in &plan.remove {
            self.ctx.cancel.check()?;
            let gateway = &self.ctx.clients.gateway;
            removal_outcome(
                self.ctx
                    .call("delete_method", RetryOn::Throttling, || {
                        gateway.delete_method(api_id, &record.resource_id, &record.method)
                    })
                    .await,
            )?;
            info!(method = %record.method, path = %record.path, "Removed endpoint");
            self.ctx.emit(
                "endpoint.removed",
                json!({ "method": record.method, "path": record.path }),
            );
        }

        self.remove_unused_authorizers(api_id, recorded, &endpoints).await?;

        if !plan.remove.is_empty() {
            let mut keep_paths: HashSet<String> = HashSet::new();
            for endpoint in &endpoints {
                keep_paths.extend(path_prefixes(&endpoint.path));
            }
            self.prune_paths(api_id, &plan.remove, &keep_paths).await?;
        }

        endpoints.sort_by_key(EndpointRecord::key);
        Ok(EndpointOutcome { endpoints, changed })
    }

    async fn fetch_resources(&self, api_id: &str) -> Result<Vec<PathResource>, DeployError> {
        let gateway = &self.ctx.clients.gateway;
        self.ctx
            .call("get_resources", RetryOn::Throttling, || gateway.get_resources(api_id))
            .await
    }

    /// Creates every missing segment of `path`, parent first.
    async fn ensure_path(
        &self,
        api_id: &str,
        path: &str,
        index: &mut PathIndex,
    ) -> Result<String, DeployError> {
        let Some(root) = index.get("/") else {
            return Err(DeployError::terminal(
                format!("API {api_id} has no root resource"),
                ErrorInfo::new("API-NO-ROOT", "The routing API has no root path resource"),
            ));
        };
        let mut parent = root.id.clone();

        for prefix in path_prefixes(path) {
            if let Some(existing) = index.get(&prefix) {
                parent = existing.id.clone();
                continue;
            }
            self.ctx.cancel.check()?;
            let segment = prefix.rsplit('/').next().unwrap_or_default().to_string();
            let gateway = &self.ctx.clients.gateway;
            let created = self
                .ctx
                .call("create_resource", RetryOn::Throttling, || {
                    gateway.create_resource(api_id, &parent, &segment)
                })
                .await;
            let resource = match created {
                Ok(resource) => resource,
                Err(e) if e.is_remote_conflict() => {
                    // Created concurrently; pick up the provider's copy.
                    *index = PathIndex::new(self.fetch_resources(api_id).await?);
                    index.get(&prefix).cloned().ok_or(e)?
                }
                Err(e) => return Err(e),
            };
            debug!(path = %prefix, id = %resource.id, "Created path resource");
            parent = resource.id.clone();
            index.insert(prefix, resource);
        }
        Ok(parent)
    }

    async fn ensure_authorizer(
        &self,
        api_id: &str,
        function_arn: &str,
        cache: &mut AuthorizerCache,
    ) -> Result<AuthorizerRecord, DeployError> {
        if let Some(known) = cache.known.get(function_arn) {
            return Ok(known.clone());
        }
        let name = naming::function_name_from_arn(function_arn)
            .ok_or_else(|| {
                DeployError::validation(format!("Invalid authorizer ARN \"{function_arn}\""))
            })?
            .to_string();

        let gateway = &self.ctx.clients.gateway;
        if cache.listed.is_none() {
            cache.listed = Some(
                self.ctx
                    .call("get_authorizers", RetryOn::Throttling, || {
                        gateway.get_authorizers(api_id)
                    })
                    .await?,
            );
        }
        let existing = cache
            .listed
            .as_ref()
            .and_then(|listed| listed.iter().find(|a| a.name == name).cloned());

        let record = match existing {
            Some(found) => AuthorizerRecord {
                id: found.id,
                name: found.name,
                function_arn: function_arn.to_string(),
                created: false,
            },
            None => {
                let request = AuthorizerRequest {
                    api_id: api_id.to_string(),
                    name: name.clone(),
                    uri: naming::invocation_uri(&self.ctx.region, function_arn),
                    identity_source: AUTHORIZER_IDENTITY_SOURCE.to_string(),
                };
                let created = self
                    .ctx
                    .call("create_authorizer", RetryOn::Throttling, || {
                        gateway.create_authorizer(&request)
                    })
                    .await?;
                let account = naming::account_id_from_arn(function_arn).unwrap_or_default();
                self.grant_invoke(PermissionRequest {
                    function: function_arn.to_string(),
                    statement_id: statement_id(&[api_id, "authorizer", &name]),
                    principal: GATEWAY_PRINCIPAL.to_string(),
                    source_arn: Some(format!(
                        "arn:aws:execute-api:{}:{account}:{api_id}/authorizers/{}",
                        self.ctx.region, created.id
                    )),
                })
                .await?;
                info!(authorizer = %name, "Created authorizer");
                self.ctx.emit("authorizer.created", json!({ "name": name, "id": created.id }));
                AuthorizerRecord {
                    id: created.id,
                    name: created.name,
                    function_arn: function_arn.to_string(),
                    created: true,
                }
            }
        };
        cache.known.insert(function_arn.to_string(), record.clone());
        Ok(record)
    }

    async fn grant_invoke(&self, request: PermissionRequest) -> Result<(), DeployError> {
        let compute = &self.ctx.clients.compute;
        tolerate_conflict(
            self.ctx
                .call("add_permission", RetryOn::Throttling, || compute.add_permission(&request))
                .await,
        )
    }

    async fn apply(
        &self,
        api_id: &str,
        prepared: &PreparedEndpoint,
    ) -> Result<EndpointRecord, DeployError> {
        let endpoint = &prepared.endpoint;
        let gateway = &self.ctx.clients.gateway;
        let authorization = prepared
            .authorizer
            .as_ref()
            .map_or(MethodAuthorization::None, |a| MethodAuthorization::Custom {
                authorizer_id: a.id.clone(),
            });

        let method = MethodRequest {
            api_id: api_id.to_string(),
            resource_id: prepared.resource_id.clone(),
            method: endpoint.method.clone(),
            authorization: authorization.clone(),
            api_key_required: endpoint.api_key_required,
        };
        let put = self
            .ctx
            .call("put_method", RetryOn::Throttling, || gateway.put_method(&method))
            .await;
        match put {
            Ok(()) => {}
            Err(e) if e.is_remote_conflict() => {
                self.ctx
                    .call("update_method", RetryOn::Throttling, || gateway.update_method(&method))
                    .await?;
            }
            Err(e) => return Err(e),
        }

        let (integration_type, integration_method, uri) = match &endpoint.target {
            IntegrationTarget::Function { arn } => (
                IntegrationType::AwsProxy,
                "POST".to_string(),
                naming::invocation_uri(&self.ctx.region, arn),
            ),
            IntegrationTarget::Http { uri } => {
                (IntegrationType::HttpProxy, endpoint.method.clone(), uri.clone())
            }
        };
        let integration = IntegrationRequest {
            api_id: api_id.to_string(),
            resource_id: prepared.resource_id.clone(),
            method: endpoint.method.clone(),
            integration_type,
            integration_method,
            uri,
        };
        // The gateway rejects integrations while a previous change is settling.
        self.integration_retry
            .run("put_integration", RetryOn::Conflict, &self.ctx.cancel, || {
                gateway.put_integration(&integration)
            })
            .await?;

        if let IntegrationTarget::Function { arn } = &endpoint.target {
            let account = naming::account_id_from_arn(arn).unwrap_or_default();
            let source_method = if endpoint.method == "ANY" { "*" } else { endpoint.method.as_str() };
            self.grant_invoke(PermissionRequest {
                function: arn.clone(),
                statement_id: statement_id(&[api_id, &endpoint.method, &endpoint.path]),
                principal: GATEWAY_PRINCIPAL.to_string(),
                source_arn: Some(format!(
                    "arn:aws:execute-api:{}:{account}:{api_id}/*/{source_method}{}",
                    self.ctx.region, endpoint.path
                )),
            })
            .await?;
        }

        let event = if prepared.existed { "endpoint.updated" } else { "endpoint.created" };
        info!(method = %endpoint.method, path = %endpoint.path, "Applied endpoint");
        self.ctx.emit(event, json!({ "method": endpoint.method, "path": endpoint.path }));

        Ok(EndpointRecord {
            path: endpoint.path.clone(),
            method: endpoint.method.clone(),
            resource_id: prepared.resource_id.clone(),
            target: endpoint.target.clone(),
            authorizer: prepared.authorizer.clone(),
            api_key_required: endpoint.api_key_required,
            usage_plan_id: endpoint.usage_plan_id.clone(),
            url: naming::endpoint_url(
                api_id,
                &self.ctx.region,
                &self.ctx.config.rest_stage,
                &endpoint.path,
            ),
        })
    }

    async fn remove_unused_authorizers(
        &self,
        api_id: &str,
        previous: &[EndpointRecord],
        current: &[EndpointRecord],
    ) -> Result<(), DeployError> {
        let in_use: HashSet<&str> = current
            .iter()
            .filter_map(|e| e.authorizer.as_ref().map(|a| a.id.as_str()))
            .collect();
        let mut stale: Vec<&AuthorizerRecord> = previous
            .iter()
            .filter_map(|e| e.authorizer.as_ref())
            .filter(|a| a.created && !in_use.contains(a.id.as_str()))
            .collect();
        stale.sort_by(|a, b| a.id.cmp(&b.id));
        stale.dedup_by(|a, b| a.id == b.id);

        let gateway = &self.ctx.clients.gateway;
        for authorizer in stale {
            self.ctx.cancel.check()?;
            let deleted = self
                .ctx
                .call("delete_authorizer", RetryOn::Throttling, || {
                    gateway.delete_authorizer(api_id, &authorizer.id)
                })
                .await;
            match deleted {
                Err(e) if e.is_remote_conflict() => {
                    warn!(authorizer = %authorizer.name, "Authorizer still referenced, keeping it");
                }
                other => {
                    removal_outcome(other)?;
                    self.ctx.emit("authorizer.removed", json!({ "name": authorizer.name }));
                }
            }
        }
        Ok(())
    }

    /// Deletes path resources that no longer carry methods or children.
    ///
    /// Candidates are the removed endpoints' paths and their ancestors, minus
    /// anything a surviving endpoint still lives under. Each pass re-reads
    /// the API; the number of passes is bounded by the deepest candidate.
    async fn prune_paths(
        &self,
        api_id: &str,
        removed: &[EndpointRecord],
        keep: &HashSet<String>,
    ) -> Result<(), DeployError> {
        let mut candidates: BTreeSet<String> = removed
            .iter()
            .flat_map(|r| path_prefixes(&r.path))
            .filter(|p| !keep.contains(p))
            .collect();
        let max_passes = candidates.iter().map(|p| path_depth(p)).max().unwrap_or(0);
        let gateway = &self.ctx.clients.gateway;

        for _ in 0..max_passes {
            if candidates.is_empty() {
                break;
            }
            self.ctx.cancel.check()?;
            let mut index = PathIndex::new(self.fetch_resources(api_id).await?);
            candidates.retain(|p| index.get(p).is_some());

            let mut deepest_first: Vec<String> = candidates.iter().cloned().collect();
            deepest_first.sort_by_key(|p| std::cmp::Reverse(path_depth(p)));

            let mut deleted = 0;
            for path in deepest_first {
                let Some(resource) = index.get(&path) else { continue };
                if !resource.methods.is_empty() || index.child_count(&resource.id) > 0 {
                    continue;
                }
                let id = resource.id.clone();
                removal_outcome(
                    self.ctx
                        .call("delete_resource", RetryOn::Throttling, || {
                            gateway.delete_resource(api_id, &id)
                        })
                        .await,
                )?;
                debug!(path = %path, "Pruned path resource");
                index.remove(&path);
                candidates.remove(&path);
                deleted += 1;
            }
            if deleted == 0 {
                break;
            }
        }
        Ok(())
    }
}
