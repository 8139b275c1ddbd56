//! In-memory control plane for tests.
//!
//! [`FakeCloud`] implements every provider trait against shared in-memory
//! state. Every call is journaled by operation name, and failures can be
//! injected per operation.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::drivers::DriverContext;
use crate::errors::{codes, RemoteError};
use crate::events::{EventSink, NoOpEventSink};
use crate::provider::{
    AliasInfo, AliasRequest, ApiInfo, ApiMapping, AuthorizerInfo, AuthorizerRequest,
    CertificateClient, CertificateDetail, CertificateStatus, CertificateSummary, ChangeAction,
    ComputeClient, CreateApiRequest, CreateDomainRequest, CreateFunctionRequest, CreateRoleRequest,
    DnsClient, DomainClient, DomainInfo, FunctionConfiguration, FunctionInfo, GatewayClient,
    HostedZone, IdentityClient, IntegrationRequest, MethodRequest, MetricDataRequest,
    MetricDataResult, MetricsClient, PathResource, PermissionRequest,
    ProviderClients, RecordChange, RecordSet, RoleInfo, ScopedCredentials, UpdateCodeRequest,
    ValidationRecord,
};
use crate::retry::RetryConfig;
use crate::state::ApiProtocol;

/// Account every fake ARN belongs to.
pub const FAKE_ACCOUNT: &str = "123456789012";
/// Region every fake ARN belongs to.
pub const FAKE_REGION: &str = "us-east-1";
/// Hosted zone of every regional domain target.
pub const FAKE_TARGET_ZONE: &str = "Z1UJRXOUMOOFQ8";

#[derive(Debug, Clone)]
struct FakeCertificate {
    arn: String,
    domain: String,
    status: CertificateStatus,
    sticky: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    journal: Vec<String>,
    failures: HashMap<String, VecDeque<RemoteError>>,
    next_id: u64,

    roles: HashMap<String, (RoleInfo, serde_json::Value)>,
    attached: HashMap<String, HashSet<String>>,
    policies: HashMap<String, String>,

    functions: HashMap<String, FunctionInfo>,
    aliases: HashMap<(String, String), AliasInfo>,
    permissions: HashSet<(String, String)>,

    apis: HashMap<String, ApiInfo>,
    resources: HashMap<String, Vec<PathResource>>,
    integrations: Vec<IntegrationRequest>,
    method_settings: HashMap<(String, String, String), MethodRequest>,
    racing_paths: Vec<(String, String)>,
    authorizers: HashMap<String, Vec<AuthorizerInfo>>,

    domains: HashMap<String, DomainInfo>,
    mappings: HashMap<String, Vec<ApiMapping>>,

    certificates: Vec<FakeCertificate>,
    requested_names: Vec<String>,
    zones: Vec<HostedZone>,
    records: HashMap<(String, String), RecordSet>,

    metric_data: Vec<MetricDataResult>,
}

impl FakeState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:06}", self.next_id)
    }

    fn validation_record_name(domain: &str) -> String {
        format!("_validation.{domain}.")
    }

    fn has_record(&self, name: &str) -> bool {
        self.records.keys().any(|(_, n)| n == name)
    }
}

fn method_key(request: &MethodRequest) -> (String, String, String) {
    (request.api_id.clone(), request.resource_id.clone(), request.method.clone())
}

fn not_found(what: &str) -> RemoteError {
    RemoteError::new(codes::NOT_FOUND, format!("{what} not found")).with_status(404)
}

fn conflict(what: &str) -> RemoteError {
    RemoteError::new(codes::CONFLICT, format!("{what} already exists")).with_status(409)
}

/// Shared in-memory control plane.
#[derive(Debug, Clone, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Journals `operation` and returns an injected failure, if any.
    fn enter(&self, operation: &str) -> Result<parking_lot::MutexGuard<'_, FakeState>, RemoteError> {
        let mut state = self.state.lock();
        state.journal.push(operation.to_string());
        if let Some(queue) = state.failures.get_mut(operation) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        Ok(state)
    }

    /// Fails the next `times` calls of `operation` with `error`.
    pub fn fail_next(&self, operation: &str, error: RemoteError, times: usize) {
        let mut state = self.state.lock();
        let queue = state.failures.entry(operation.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Every call so far, by operation name.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().journal.clone()
    }

    /// Number of calls of `operation`.
    #[must_use]
    pub fn count_calls(&self, operation: &str) -> usize {
        self.state.lock().journal.iter().filter(|c| *c == operation).count()
    }

    /// Forgets the journal.
    pub fn clear_calls(&self) {
        self.state.lock().journal.clear();
    }

    /// Engine settings with millisecond delays.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_retry(RetryConfig::fixed(1, 5))
            .with_integration_conflict_delay_ms(1)
            .with_certificate_polling(3, 1)
    }

    /// Client handles backed by this cloud.
    #[must_use]
    pub fn clients(&self) -> ProviderClients {
        let shared = Arc::new(self.clone());
        ProviderClients {
            identity: shared.clone(),
            compute: shared.clone(),
            gateway: shared.clone(),
            domains: shared.clone(),
            certificates: shared.clone(),
            dns: shared.clone(),
            metrics: shared,
        }
    }

    /// Client handles backed by this cloud, except for `metrics`.
    #[must_use]
    pub fn clients_with_metrics(&self, metrics: Arc<dyn MetricsClient>) -> ProviderClients {
        ProviderClients {
            metrics,
            ..self.clients()
        }
    }

    /// Driver context backed by this cloud.
    #[must_use]
    pub fn driver_context(&self) -> DriverContext {
        let sink: Arc<dyn EventSink> = Arc::new(NoOpEventSink);
        DriverContext::new(
            self.clients(),
            Arc::new(self.engine_config()),
            FAKE_REGION,
            Arc::new(CancellationToken::new()),
            sink,
        )
    }

    /// Adds a role not owned by any instance.
    pub fn seed_role(&self, name: &str) {
        let role = RoleInfo {
            name: name.to_string(),
            arn: format!("arn:aws:iam::{FAKE_ACCOUNT}:role/{name}"),
        };
        self.state
            .lock()
            .roles
            .insert(name.to_string(), (role, serde_json::Value::Null));
    }

    /// Trust policy of a role.
    #[must_use]
    pub fn role_trust_policy(&self, name: &str) -> Option<serde_json::Value> {
        self.state.lock().roles.get(name).map(|(_, trust)| trust.clone())
    }

    /// Whether a role exists.
    #[must_use]
    pub fn has_role(&self, name: &str) -> bool {
        self.state.lock().roles.contains_key(name)
    }

    /// Adds a function whose latest published version is `version`.
    pub fn seed_function(&self, name: &str, version: u64) {
        let info = FunctionInfo {
            configuration: FunctionConfiguration {
                name: name.to_string(),
                role_arn: format!("arn:aws:iam::{FAKE_ACCOUNT}:role/seeded"),
                handler: "index.handler".to_string(),
                runtime: "nodejs12.x".to_string(),
                memory_mb: 128,
                timeout_secs: 3,
                description: String::new(),
                env: BTreeMap::new(),
                layers: Vec::new(),
            },
            arn: format!("arn:aws:lambda:{FAKE_REGION}:{FAKE_ACCOUNT}:function:{name}"),
            version,
            code_sha256: String::new(),
        };
        self.state.lock().functions.insert(name.to_string(), info);
    }

    /// Function as the provider sees it.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<FunctionInfo> {
        self.state.lock().functions.get(name).cloned()
    }

    /// Alias as the provider sees it.
    #[must_use]
    pub fn alias(&self, function_name: &str, alias: &str) -> Option<AliasInfo> {
        self.state
            .lock()
            .aliases
            .get(&(function_name.to_string(), alias.to_string()))
            .cloned()
    }

    fn seed_api(&self, name: &str, protocol: ApiProtocol) -> String {
        let mut state = self.state.lock();
        let id = state.id("api");
        state.apis.insert(
            id.clone(),
            ApiInfo {
                id: id.clone(),
                name: name.to_string(),
                protocol,
                target: None,
            },
        );
        if protocol == ApiProtocol::Rest {
            let root = state.id("root");
            state.resources.insert(
                id.clone(),
                vec![PathResource {
                    id: root,
                    parent_id: None,
                    path: "/".to_string(),
                    path_part: String::new(),
                    methods: Vec::new(),
                }],
            );
        }
        id
    }

    /// Adds a REST API not owned by any instance and returns its id.
    pub fn seed_rest_api(&self, name: &str) -> String {
        self.seed_api(name, ApiProtocol::Rest)
    }

    /// Adds an HTTP API not owned by any instance and returns its id.
    pub fn seed_http_api(&self, name: &str) -> String {
        self.seed_api(name, ApiProtocol::Http)
    }

    /// Whether an API exists.
    #[must_use]
    pub fn has_api(&self, api_id: &str) -> bool {
        self.state.lock().apis.contains_key(api_id)
    }

    /// Adds a method on `path`, creating missing path resources.
    pub fn seed_rest_method(&self, api_id: &str, path: &str, method: &str) {
        let mut state = self.state.lock();
        let mut parent = state
            .resources
            .get(api_id)
            .and_then(|r| r.iter().find(|p| p.path == "/"))
            .map(|p| p.id.clone());
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            let existing = state
                .resources
                .get(api_id)
                .and_then(|r| r.iter().find(|p| p.path == current))
                .map(|p| p.id.clone());
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = state.id("res");
                    state.resources.entry(api_id.to_string()).or_default().push(PathResource {
                        id: id.clone(),
                        parent_id: parent.clone(),
                        path: current.clone(),
                        path_part: segment.to_string(),
                        methods: Vec::new(),
                    });
                    id
                }
            };
            parent = Some(id);
        }
        if let Some(resource) = state
            .resources
            .get_mut(api_id)
            .and_then(|r| r.iter_mut().find(|p| p.path == current))
        {
            resource.methods.push(method.to_string());
        }
    }

    /// Every path resource of an API, sorted.
    #[must_use]
    pub fn resource_paths(&self, api_id: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .state
            .lock()
            .resources
            .get(api_id)
            .map(|r| r.iter().map(|p| p.path.clone()).collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Methods on one path of an API.
    #[must_use]
    pub fn methods_at(&self, api_id: &str, path: &str) -> Vec<String> {
        self.state
            .lock()
            .resources
            .get(api_id)
            .and_then(|r| r.iter().find(|p| p.path == path))
            .map(|p| p.methods.clone())
            .unwrap_or_default()
    }

    /// The current settings of one method, when it was defined through the
    /// gateway client.
    #[must_use]
    pub fn method_settings(&self, api_id: &str, path: &str, method: &str) -> Option<MethodRequest> {
        let state = self.state.lock();
        let resource_id = state
            .resources
            .get(api_id)?
            .iter()
            .find(|p| p.path == path)?
            .id
            .clone();
        state
            .method_settings
            .get(&(api_id.to_string(), resource_id, method.to_string()))
            .cloned()
    }

    /// Makes the next `create_resource` for `path` lose a race: the path
    /// appears as if created by another writer and the call conflicts.
    pub fn race_next_resource(&self, api_id: &str, path: &str) {
        self.state
            .lock()
            .racing_paths
            .push((api_id.to_string(), path.to_string()));
    }

    /// Removes a method behind the engine's back.
    pub fn drop_method(&self, api_id: &str, path: &str, method: &str) {
        let mut state = self.state.lock();
        let mut resource_id = None;
        if let Some(resource) = state
            .resources
            .get_mut(api_id)
            .and_then(|r| r.iter_mut().find(|p| p.path == path))
        {
            resource.methods.retain(|m| m != method);
            resource_id = Some(resource.id.clone());
        }
        if let Some(resource_id) = resource_id {
            state
                .method_settings
                .remove(&(api_id.to_string(), resource_id, method.to_string()));
        }
    }

    /// The most recent integration put.
    #[must_use]
    pub fn last_integration(&self) -> Option<IntegrationRequest> {
        self.state.lock().integrations.last().cloned()
    }

    /// Adds a certificate whose status never changes and returns its ARN.
    pub fn seed_certificate(&self, domain: &str, status: CertificateStatus) -> String {
        let mut state = self.state.lock();
        let arn = format!(
            "arn:aws:acm:{FAKE_REGION}:{FAKE_ACCOUNT}:certificate/{}",
            state.id("cert")
        );
        state.certificates.push(FakeCertificate {
            arn: arn.clone(),
            domain: domain.to_string(),
            status,
            sticky: true,
        });
        arn
    }

    /// Names passed to the last certificate request.
    #[must_use]
    pub fn requested_certificate_names(&self) -> Vec<String> {
        self.state.lock().requested_names.clone()
    }

    /// Adds a hosted zone for `apex` and returns its id.
    pub fn seed_hosted_zone(&self, apex: &str) -> String {
        let mut state = self.state.lock();
        let id = format!("/hostedzone/{}", state.id("Z"));
        state.zones.push(HostedZone {
            id: id.clone(),
            name: format!("{apex}."),
        });
        id
    }

    /// A record set in a zone.
    #[must_use]
    pub fn record(&self, zone_id: &str, name: &str) -> Option<RecordSet> {
        self.state
            .lock()
            .records
            .get(&(zone_id.to_string(), name.to_string()))
            .cloned()
    }

    /// Maps `domain` to an API not owned by any instance.
    pub fn seed_api_mapping(&self, domain: &str, api_id: &str) {
        let mut state = self.state.lock();
        let id = state.id("map");
        state.mappings.entry(domain.to_string()).or_default().push(ApiMapping {
            id,
            api_id: api_id.to_string(),
            stage: "$default".to_string(),
        });
    }

    /// Stage of the first mapping of `domain`.
    #[must_use]
    pub fn mapping_stage(&self, domain: &str) -> Option<String> {
        self.state
            .lock()
            .mappings
            .get(domain)
            .and_then(|m| m.first())
            .map(|m| m.stage.clone())
    }

    /// Whether a custom domain exists.
    #[must_use]
    pub fn has_domain(&self, name: &str) -> bool {
        self.state.lock().domains.contains_key(name)
    }

    /// Data points returned by `get_metric_data`.
    pub fn set_metric_data(&self, data: Vec<MetricDataResult>) {
        self.state.lock().metric_data = data;
    }
}

#[async_trait]
impl IdentityClient for FakeCloud {
    async fn get_role(&self, name: &str) -> Result<RoleInfo, RemoteError> {
        let state = self.enter("get_role")?;
        state
            .roles
            .get(name)
            .map(|(role, _)| role.clone())
            .ok_or_else(|| RemoteError::new(codes::NO_SUCH_ENTITY, format!("Role {name} not found")))
    }

    async fn create_role(&self, request: &CreateRoleRequest) -> Result<RoleInfo, RemoteError> {
        let mut state = self.enter("create_role")?;
        if state.roles.contains_key(&request.name) {
            return Err(RemoteError::new(
                codes::ENTITY_ALREADY_EXISTS,
                format!("Role {} already exists", request.name),
            ));
        }
        let role = RoleInfo {
            name: request.name.clone(),
            arn: format!("arn:aws:iam::{FAKE_ACCOUNT}:role/{}", request.name),
        };
        state.roles.insert(
            request.name.clone(),
            (role.clone(), request.assume_role_policy.clone()),
        );
        Ok(role)
    }

    async fn delete_role(&self, name: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_role")?;
        state.attached.remove(name);
        state
            .roles
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RemoteError::new(codes::NO_SUCH_ENTITY, format!("Role {name} not found")))
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("attach_role_policy")?;
        if !state.roles.contains_key(role) {
            return Err(RemoteError::new(codes::NO_SUCH_ENTITY, format!("Role {role} not found")));
        }
        state
            .attached
            .entry(role.to_string())
            .or_default()
            .insert(policy_arn.to_string());
        Ok(())
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("detach_role_policy")?;
        let removed = state
            .attached
            .get_mut(role)
            .is_some_and(|policies| policies.remove(policy_arn));
        if removed {
            Ok(())
        } else {
            Err(RemoteError::new(codes::NO_SUCH_ENTITY, "Policy not attached"))
        }
    }

    async fn create_policy(
        &self,
        name: &str,
        _document: &serde_json::Value,
        _description: &str,
    ) -> Result<String, RemoteError> {
        let mut state = self.enter("create_policy")?;
        let arn = format!("arn:aws:iam::{FAKE_ACCOUNT}:policy/{name}");
        if state.policies.contains_key(&arn) {
            return Err(RemoteError::new(codes::ENTITY_ALREADY_EXISTS, "Policy already exists"));
        }
        state.policies.insert(arn.clone(), name.to_string());
        Ok(arn)
    }

    async fn delete_policy(&self, arn: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_policy")?;
        state
            .policies
            .remove(arn)
            .map(|_| ())
            .ok_or_else(|| RemoteError::new(codes::NO_SUCH_ENTITY, "Policy not found"))
    }
}

#[async_trait]
impl ComputeClient for FakeCloud {
    async fn get_function(&self, name: &str) -> Result<FunctionInfo, RemoteError> {
        let state = self.enter("get_function")?;
        state
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::new(codes::RESOURCE_NOT_FOUND, format!("Function not found: {name}")))
    }

    async fn create_function(&self, request: &CreateFunctionRequest) -> Result<FunctionInfo, RemoteError> {
        let mut state = self.enter("create_function")?;
        let name = request.configuration.name.clone();
        if state.functions.contains_key(&name) {
            return Err(RemoteError::new(codes::RESOURCE_CONFLICT, "Function already exist"));
        }
        let info = FunctionInfo {
            configuration: request.configuration.clone(),
            arn: format!("arn:aws:lambda:{FAKE_REGION}:{FAKE_ACCOUNT}:function:{name}"),
            version: 1,
            code_sha256: request.code_sha256.clone(),
        };
        state.functions.insert(name, info.clone());
        Ok(info)
    }

    async fn update_function_configuration(
        &self,
        configuration: &FunctionConfiguration,
    ) -> Result<FunctionInfo, RemoteError> {
        let mut state = self.enter("update_function_configuration")?;
        let info = state
            .functions
            .get_mut(&configuration.name)
            .ok_or_else(|| not_found("Function"))?;
        info.configuration = configuration.clone();
        Ok(info.clone())
    }

    async fn update_function_code(&self, request: &UpdateCodeRequest) -> Result<FunctionInfo, RemoteError> {
        let mut state = self.enter("update_function_code")?;
        let info = state
            .functions
            .get_mut(&request.name)
            .ok_or_else(|| not_found("Function"))?;
        info.code_sha256 = request.code_sha256.clone();
        info.version += 1;
        Ok(info.clone())
    }

    async fn delete_function(&self, name: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_function")?;
        state.aliases.retain(|(function, _), _| function != name);
        state
            .functions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RemoteError::new(codes::RESOURCE_NOT_FOUND, format!("Function not found: {name}")))
    }

    async fn get_alias(&self, function_name: &str, alias: &str) -> Result<AliasInfo, RemoteError> {
        let state = self.enter("get_alias")?;
        state
            .aliases
            .get(&(function_name.to_string(), alias.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::new(codes::RESOURCE_NOT_FOUND, format!("Alias not found: {alias}")))
    }

    async fn create_alias(&self, request: &AliasRequest) -> Result<AliasInfo, RemoteError> {
        let mut state = self.enter("create_alias")?;
        let key = (request.function_name.clone(), request.name.clone());
        if state.aliases.contains_key(&key) {
            return Err(RemoteError::new(codes::RESOURCE_CONFLICT, "Alias already exists"));
        }
        let info = AliasInfo {
            name: request.name.clone(),
            arn: format!(
                "arn:aws:lambda:{FAKE_REGION}:{FAKE_ACCOUNT}:function:{}:{}",
                request.function_name, request.name
            ),
            function_version: request.function_version,
            routing: request.routing.clone(),
        };
        state.aliases.insert(key, info.clone());
        Ok(info)
    }

    async fn update_alias(&self, request: &AliasRequest) -> Result<AliasInfo, RemoteError> {
        let mut state = self.enter("update_alias")?;
        let info = state
            .aliases
            .get_mut(&(request.function_name.clone(), request.name.clone()))
            .ok_or_else(|| RemoteError::new(codes::RESOURCE_NOT_FOUND, "Alias not found"))?;
        info.function_version = request.function_version;
        info.routing = request.routing.clone();
        Ok(info.clone())
    }

    async fn delete_alias(&self, function_name: &str, alias: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_alias")?;
        state
            .aliases
            .remove(&(function_name.to_string(), alias.to_string()))
            .map(|_| ())
            .ok_or_else(|| RemoteError::new(codes::RESOURCE_NOT_FOUND, "Alias not found"))
    }

    async fn add_permission(&self, request: &PermissionRequest) -> Result<(), RemoteError> {
        let mut state = self.enter("add_permission")?;
        let key = (request.function.clone(), request.statement_id.clone());
        if state.permissions.insert(key) {
            Ok(())
        } else {
            Err(RemoteError::new(
                codes::RESOURCE_CONFLICT,
                "The statement id provided already exists",
            ))
        }
    }
}

#[async_trait]
impl GatewayClient for FakeCloud {
    async fn get_api(&self, api_id: &str) -> Result<ApiInfo, RemoteError> {
        let state = self.enter("get_api")?;
        state.apis.get(api_id).cloned().ok_or_else(|| not_found("API"))
    }

    async fn create_api(&self, request: &CreateApiRequest) -> Result<ApiInfo, RemoteError> {
        drop(self.enter("create_api")?);
        let id = self.seed_api(&request.name, request.protocol);
        let mut state = self.state.lock();
        let api = state.apis.get_mut(&id).ok_or_else(|| not_found("API"))?;
        api.target = request.target.clone();
        Ok(api.clone())
    }

    async fn update_api(
        &self,
        api_id: &str,
        _description: &str,
        target: Option<&str>,
    ) -> Result<ApiInfo, RemoteError> {
        let mut state = self.enter("update_api")?;
        let api = state.apis.get_mut(api_id).ok_or_else(|| not_found("API"))?;
        api.target = target.map(str::to_string);
        Ok(api.clone())
    }

    async fn delete_api(&self, api_id: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_api")?;
        state.resources.remove(api_id);
        state.authorizers.remove(api_id);
        state.apis.remove(api_id).map(|_| ()).ok_or_else(|| not_found("API"))
    }

    async fn get_resources(&self, api_id: &str) -> Result<Vec<PathResource>, RemoteError> {
        let state = self.enter("get_resources")?;
        if !state.apis.contains_key(api_id) {
            return Err(not_found("API"));
        }
        Ok(state.resources.get(api_id).cloned().unwrap_or_default())
    }

    async fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<PathResource, RemoteError> {
        let mut state = self.enter("create_resource")?;
        let id = state.id("res");
        let parent_path = state
            .resources
            .get(api_id)
            .ok_or_else(|| not_found("API"))?
            .iter()
            .find(|r| r.id == parent_id)
            .ok_or_else(|| not_found("Parent resource"))?
            .path
            .clone();
        let path = if parent_path == "/" {
            format!("/{path_part}")
        } else {
            format!("{parent_path}/{path_part}")
        };
        let raced = state
            .racing_paths
            .iter()
            .position(|(api, p)| api == api_id && *p == path);
        if let Some(position) = raced {
            state.racing_paths.remove(position);
        }

        let resource = PathResource {
            id,
            parent_id: Some(parent_id.to_string()),
            path,
            path_part: path_part.to_string(),
            methods: Vec::new(),
        };
        let resources = state.resources.entry(api_id.to_string()).or_default();
        if raced.is_some() {
            // Another writer got there first.
            resources.push(resource);
            return Err(conflict("Resource"));
        }
        if resources.iter().any(|r| r.path == resource.path) {
            return Err(conflict("Resource"));
        }
        resources.push(resource.clone());
        Ok(resource)
    }

    async fn delete_resource(&self, api_id: &str, resource_id: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_resource")?;
        let resources = state.resources.get_mut(api_id).ok_or_else(|| not_found("API"))?;
        let before = resources.len();
        resources.retain(|r| r.id != resource_id);
        if resources.len() == before {
            Err(not_found("Resource"))
        } else {
            Ok(())
        }
    }

    async fn put_method(&self, request: &MethodRequest) -> Result<(), RemoteError> {
        let mut state = self.enter("put_method")?;
        let resource = state
            .resources
            .get_mut(&request.api_id)
            .and_then(|r| r.iter_mut().find(|p| p.id == request.resource_id))
            .ok_or_else(|| not_found("Resource"))?;
        if resource.methods.contains(&request.method) {
            return Err(conflict("Method"));
        }
        resource.methods.push(request.method.clone());
        state.method_settings.insert(method_key(request), request.clone());
        Ok(())
    }

    async fn update_method(&self, request: &MethodRequest) -> Result<(), RemoteError> {
        let mut state = self.enter("update_method")?;
        let exists = state
            .resources
            .get(&request.api_id)
            .and_then(|r| r.iter().find(|p| p.id == request.resource_id))
            .is_some_and(|p| p.methods.contains(&request.method));
        if !exists {
            return Err(not_found("Method"));
        }
        state.method_settings.insert(method_key(request), request.clone());
        Ok(())
    }

    async fn delete_method(&self, api_id: &str, resource_id: &str, method: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_method")?;
        let resource = state
            .resources
            .get_mut(api_id)
            .and_then(|r| r.iter_mut().find(|p| p.id == resource_id))
            .ok_or_else(|| not_found("Resource"))?;
        let before = resource.methods.len();
        resource.methods.retain(|m| m != method);
        let removed = resource.methods.len() != before;
        state
            .method_settings
            .remove(&(api_id.to_string(), resource_id.to_string(), method.to_string()));
        if removed {
            Ok(())
        } else {
            Err(not_found("Method"))
        }
    }

    async fn put_integration(&self, request: &IntegrationRequest) -> Result<(), RemoteError> {
        let mut state = self.enter("put_integration")?;
        state.integrations.push(request.clone());
        Ok(())
    }

    async fn get_authorizers(&self, api_id: &str) -> Result<Vec<AuthorizerInfo>, RemoteError> {
        let state = self.enter("get_authorizers")?;
        Ok(state.authorizers.get(api_id).cloned().unwrap_or_default())
    }

    async fn create_authorizer(&self, request: &AuthorizerRequest) -> Result<AuthorizerInfo, RemoteError> {
        let mut state = self.enter("create_authorizer")?;
        let authorizer = AuthorizerInfo {
            id: state.id("auth"),
            name: request.name.clone(),
        };
        state
            .authorizers
            .entry(request.api_id.clone())
            .or_default()
            .push(authorizer.clone());
        Ok(authorizer)
    }

    async fn delete_authorizer(&self, api_id: &str, authorizer_id: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_authorizer")?;
        let authorizers = state.authorizers.entry(api_id.to_string()).or_default();
        let before = authorizers.len();
        authorizers.retain(|a| a.id != authorizer_id);
        if authorizers.len() == before {
            Err(not_found("Authorizer"))
        } else {
            Ok(())
        }
    }

    async fn create_deployment(&self, api_id: &str, _stage: &str) -> Result<String, RemoteError> {
        let mut state = self.enter("create_deployment")?;
        if !state.apis.contains_key(api_id) {
            return Err(not_found("API"));
        }
        Ok(state.id("dep"))
    }
}

#[async_trait]
impl DomainClient for FakeCloud {
    async fn get_domain(&self, name: &str) -> Result<DomainInfo, RemoteError> {
        let state = self.enter("get_domain")?;
        state.domains.get(name).cloned().ok_or_else(|| not_found("Domain"))
    }

    async fn create_domain(&self, request: &CreateDomainRequest) -> Result<DomainInfo, RemoteError> {
        let mut state = self.enter("create_domain")?;
        if state.domains.contains_key(&request.name) {
            return Err(conflict("Domain"));
        }
        let target = format!("d-{}.execute-api.{FAKE_REGION}.amazonaws.com", state.id(""));
        let domain = DomainInfo {
            name: request.name.clone(),
            target_domain: target,
            target_hosted_zone_id: FAKE_TARGET_ZONE.to_string(),
        };
        state.domains.insert(request.name.clone(), domain.clone());
        Ok(domain)
    }

    async fn delete_domain(&self, name: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_domain")?;
        if state.mappings.get(name).is_some_and(|m| !m.is_empty()) {
            return Err(RemoteError::new(
                codes::CONFLICT,
                "Cannot delete a domain that is still mapped",
            )
            .with_status(409));
        }
        state.domains.remove(name).map(|_| ()).ok_or_else(|| not_found("Domain"))
    }

    async fn get_api_mappings(&self, domain: &str) -> Result<Vec<ApiMapping>, RemoteError> {
        let state = self.enter("get_api_mappings")?;
        Ok(state.mappings.get(domain).cloned().unwrap_or_default())
    }

    async fn create_api_mapping(
        &self,
        domain: &str,
        api_id: &str,
        stage: &str,
    ) -> Result<ApiMapping, RemoteError> {
        let mut state = self.enter("create_api_mapping")?;
        let id = state.id("map");
        let mappings = state.mappings.entry(domain.to_string()).or_default();
        if mappings.iter().any(|m| m.api_id == api_id) {
            return Err(conflict("Mapping"));
        }
        let mapping = ApiMapping {
            id,
            api_id: api_id.to_string(),
            stage: stage.to_string(),
        };
        mappings.push(mapping.clone());
        Ok(mapping)
    }

    async fn delete_api_mapping(&self, domain: &str, mapping_id: &str) -> Result<(), RemoteError> {
        let mut state = self.enter("delete_api_mapping")?;
        let mappings = state.mappings.entry(domain.to_string()).or_default();
        let before = mappings.len();
        mappings.retain(|m| m.id != mapping_id);
        if mappings.len() == before {
            Err(not_found("Mapping"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CertificateClient for FakeCloud {
    async fn list_certificates(&self) -> Result<Vec<CertificateSummary>, RemoteError> {
        let state = self.enter("list_certificates")?;
        Ok(state
            .certificates
            .iter()
            .map(|c| CertificateSummary {
                arn: c.arn.clone(),
                domain: c.domain.clone(),
            })
            .collect())
    }

    async fn request_certificate(
        &self,
        domain: &str,
        alternative_names: &[String],
    ) -> Result<String, RemoteError> {
        let mut state = self.enter("request_certificate")?;
        let arn = format!(
            "arn:aws:acm:{FAKE_REGION}:{FAKE_ACCOUNT}:certificate/{}",
            state.id("cert")
        );
        state.requested_names = alternative_names.to_vec();
        state.certificates.push(FakeCertificate {
            arn: arn.clone(),
            domain: domain.to_string(),
            status: CertificateStatus::PendingValidation,
            sticky: false,
        });
        Ok(arn)
    }

    async fn describe_certificate(&self, arn: &str) -> Result<CertificateDetail, RemoteError> {
        let mut state = self.enter("describe_certificate")?;
        let index = state
            .certificates
            .iter()
            .position(|c| c.arn == arn)
            .ok_or_else(|| RemoteError::new(codes::RESOURCE_NOT_FOUND, "Certificate not found"))?;
        let record_name = FakeState::validation_record_name(&state.certificates[index].domain);
        let validated = state.has_record(&record_name);

        let certificate = &mut state.certificates[index];
        if !certificate.sticky
            && certificate.status == CertificateStatus::PendingValidation
            && validated
        {
            certificate.status = CertificateStatus::Issued;
        }
        let validation_record = matches!(
            certificate.status,
            CertificateStatus::PendingValidation | CertificateStatus::Success
        )
        .then(|| ValidationRecord {
            name: record_name,
            record_type: "CNAME".to_string(),
            value: "_token.acm-validations.aws.".to_string(),
        });
        Ok(CertificateDetail {
            arn: certificate.arn.clone(),
            domain: certificate.domain.clone(),
            status: certificate.status.clone(),
            validation_record,
        })
    }
}

#[async_trait]
impl DnsClient for FakeCloud {
    async fn list_hosted_zones(&self) -> Result<Vec<HostedZone>, RemoteError> {
        let state = self.enter("list_hosted_zones")?;
        Ok(state.zones.clone())
    }

    async fn change_record_sets(&self, zone_id: &str, changes: &[RecordChange]) -> Result<(), RemoteError> {
        let mut state = self.enter("change_record_sets")?;
        if !state.zones.iter().any(|z| z.id == zone_id) {
            return Err(RemoteError::new(codes::NO_SUCH_HOSTED_ZONE, "No hosted zone found"));
        }
        for change in changes {
            let key = (zone_id.to_string(), change.record.name.clone());
            match change.action {
                ChangeAction::Upsert => {
                    state.records.insert(key, change.record.clone());
                }
                ChangeAction::Delete => {
                    if state.records.remove(&key).is_none() {
                        return Err(RemoteError::new(
                            codes::INVALID_CHANGE_BATCH,
                            "Tried to delete resource record set but it was not found",
                        )
                        .with_status(400));
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsClient for FakeCloud {
    async fn assume_role(
        &self,
        role_arn: &str,
        _session_name: &str,
        duration_secs: u32,
    ) -> Result<ScopedCredentials, RemoteError> {
        let state = self.enter("assume_role")?;
        let role_name = role_arn.rsplit('/').next().unwrap_or_default();
        if !state.roles.contains_key(role_name) {
            return Err(RemoteError::new(codes::NO_SUCH_ENTITY, "Role not found"));
        }
        Ok(ScopedCredentials {
            access_key_id: "ASIAFAKE".to_string(),
            secret_access_key: "fake-secret".to_string(),
            session_token: "fake-token".to_string(),
            expiration: Utc::now() + Duration::seconds(i64::from(duration_secs)),
        })
    }

    async fn get_metric_data(
        &self,
        _credentials: &ScopedCredentials,
        _request: &MetricDataRequest,
    ) -> Result<Vec<MetricDataResult>, RemoteError> {
        let state = self.enter("get_metric_data")?;
        Ok(state.metric_data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_injection_is_consumed_in_order() {
        let cloud = FakeCloud::new();
        cloud.fail_next("get_api", RemoteError::throttled("slow down"), 1);
        assert!(cloud.get_api("x").await.unwrap_err().is_throttled());
        assert!(cloud.get_api("x").await.unwrap_err().is_not_found());
        assert_eq!(cloud.count_calls("get_api"), 2);
    }

    #[tokio::test]
    async fn test_requested_certificate_issues_after_validation() {
        let cloud = FakeCloud::new();
        let zone = cloud.seed_hosted_zone("example.com");
        let arn = cloud
            .request_certificate("example.com", &["example.com".to_string()])
            .await
            .unwrap();
        let pending = cloud.describe_certificate(&arn).await.unwrap();
        assert_eq!(pending.status, CertificateStatus::PendingValidation);

        let record = pending.validation_record.unwrap();
        cloud
            .change_record_sets(
                &zone,
                &[RecordChange {
                    action: ChangeAction::Upsert,
                    record: RecordSet {
                        name: record.name,
                        record_type: record.record_type,
                        ttl: Some(300),
                        values: vec![record.value],
                        alias_target: None,
                    },
                }],
            )
            .await
            .unwrap();
        let issued = cloud.describe_certificate(&arn).await.unwrap();
        assert_eq!(issued.status, CertificateStatus::Issued);
    }
}
