//! What the user asked for, and how it is checked before any remote call.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use super::EngineConfig;
use crate::errors::DeployError;
use crate::utils::naming::normalize_domain;

/// HTTP methods an explicit endpoint may use.
pub const VALID_METHODS: [&str; 8] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "ANY"];

fn path_segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\{[A-Za-z0-9_.\-]+\+?\}|[A-Za-z0-9._~\-]+)$")
            .unwrap_or_else(|_| unreachable!("static pattern compiles"))
    })
}

fn hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
            .unwrap_or_else(|_| unreachable!("static pattern compiles"))
    })
}

/// One explicit `(method, path)` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    /// Resource path, e.g. `/users/{id}`.
    pub path: String,
    /// HTTP method.
    pub method: String,
    /// Function ARN to proxy to. Defaults to this instance's alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_arn: Option<String>,
    /// HTTP backend to proxy to instead of a function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_uri: Option<String>,
    /// ARN of a token authorizer function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer_arn: Option<String>,
    /// Whether callers must present an API key.
    #[serde(default)]
    pub api_key_required: bool,
    /// Usage plan the key is issued under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_plan_id: Option<String>,
}

impl EndpointSpec {
    /// Creates an endpoint proxying to this instance's function.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            function_arn: None,
            proxy_uri: None,
            authorizer_arn: None,
            api_key_required: false,
            usage_plan_id: None,
        }
    }

    /// Proxies to another function.
    #[must_use]
    pub fn with_function(mut self, arn: impl Into<String>) -> Self {
        self.function_arn = Some(arn.into());
        self
    }

    /// Proxies to an HTTP backend.
    #[must_use]
    pub fn with_proxy_uri(mut self, uri: impl Into<String>) -> Self {
        self.proxy_uri = Some(uri.into());
        self
    }

    /// Protects the endpoint with a token authorizer.
    #[must_use]
    pub fn with_authorizer(mut self, arn: impl Into<String>) -> Self {
        self.authorizer_arn = Some(arn.into());
        self
    }

    /// Requires an API key issued under `usage_plan_id`.
    #[must_use]
    pub fn with_usage_plan(mut self, usage_plan_id: impl Into<String>) -> Self {
        self.api_key_required = true;
        self.usage_plan_id = Some(usage_plan_id.into());
        self
    }

    /// The `(method, path)` identity of the endpoint.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.method.clone(), self.path.clone())
    }

    /// Upper-cases the method and normalizes the path to a leading slash
    /// without a trailing one.
    pub fn normalized(&self) -> Result<Self, DeployError> {
        let method = self.method.trim().to_ascii_uppercase();
        if !VALID_METHODS.contains(&method.as_str()) {
            return Err(DeployError::validation(format!(
                "Invalid method \"{}\" for endpoint {}. Valid methods are: {}",
                self.method,
                self.path,
                VALID_METHODS.join(", ")
            )));
        }

        let trimmed = self.path.trim();
        if trimmed.is_empty() {
            return Err(DeployError::validation(format!(
                "Missing path for endpoint with method {method}"
            )));
        }
        let mut path = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        while path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
        for segment in path.split('/').skip(1).filter(|s| !s.is_empty()) {
            if !path_segment_pattern().is_match(segment) {
                return Err(DeployError::validation(format!(
                    "Invalid path segment \"{segment}\" in endpoint {method} {path}"
                )));
            }
        }
        if path.contains("//") {
            return Err(DeployError::validation(format!(
                "Empty path segment in endpoint {method} {path}"
            )));
        }

        if self.function_arn.is_some() && self.proxy_uri.is_some() {
            return Err(DeployError::validation(format!(
                "Endpoint {method} {path} cannot proxy to both a function and a URI"
            )));
        }
        if self.usage_plan_id.is_some() && !self.api_key_required {
            return Err(DeployError::validation(format!(
                "Endpoint {method} {path} names a usage plan but does not require an API key"
            )));
        }

        Ok(Self {
            path,
            method,
            ..self.clone()
        })
    }
}

/// How requests reach the function.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "style")]
pub enum RoutingStyle {
    /// Every path and method goes to the alias.
    #[default]
    CatchAll,
    /// Only the listed endpoints exist.
    Endpoints {
        /// The desired endpoint set.
        #[serde(default)]
        endpoints: Vec<EndpointSpec>,
    },
}

/// The desired shape of one instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredConfig {
    /// Source reference handed to the packager; a default app when absent.
    #[serde(default)]
    pub src: Option<String>,
    /// Extra files bundled with the source.
    #[serde(default)]
    pub extra_files: Vec<String>,
    /// Memory in MB.
    #[serde(default)]
    pub memory: Option<u32>,
    /// Timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u32>,
    /// Runtime identifier.
    #[serde(default)]
    pub runtime: Option<String>,
    /// Function environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Function description.
    #[serde(default)]
    pub description: Option<String>,
    /// Layer ARNs.
    #[serde(default)]
    pub layers: Vec<String>,
    /// Existing execution role to use instead of creating one.
    #[serde(default)]
    pub role_name: Option<String>,
    /// Whether to provision the metrics reader role.
    #[serde(default = "default_monitoring")]
    pub monitoring: bool,
    /// Custom domain.
    #[serde(default)]
    pub domain: Option<String>,
    /// Share of traffic for the newest version, in `[0, 1]`.
    #[serde(default)]
    pub traffic_weight: Option<f64>,
    /// Routing style.
    #[serde(default)]
    pub routing: RoutingStyle,
    /// Existing REST API to add endpoints to.
    #[serde(default)]
    pub api_id: Option<String>,
    /// Region; the engine default when absent.
    #[serde(default)]
    pub region: Option<String>,
}

fn default_monitoring() -> bool {
    true
}

impl DesiredConfig {
    /// Creates a catch-all config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            monitoring: true,
            ..Self::default()
        }
    }

    /// Sets the source reference.
    #[must_use]
    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Sets the memory.
    #[must_use]
    pub fn with_memory(mut self, mb: u32) -> Self {
        self.memory = Some(mb);
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Uses an existing execution role.
    #[must_use]
    pub fn with_role_name(mut self, name: impl Into<String>) -> Self {
        self.role_name = Some(name.into());
        self
    }

    /// Enables or disables the metrics reader role.
    #[must_use]
    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitoring = enabled;
        self
    }

    /// Sets the custom domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the traffic weight of the newest version.
    #[must_use]
    pub fn with_traffic_weight(mut self, weight: f64) -> Self {
        self.traffic_weight = Some(weight);
        self
    }

    /// Switches to explicit endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Vec<EndpointSpec>) -> Self {
        self.routing = RoutingStyle::Endpoints { endpoints };
        self
    }

    /// Adds endpoints to an existing REST API.
    #[must_use]
    pub fn with_api_id(mut self, api_id: impl Into<String>) -> Self {
        self.api_id = Some(api_id.into());
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// The traffic weight that actually splits traffic (absent or zero means none).
    #[must_use]
    pub fn effective_traffic_weight(&self) -> Option<f64> {
        self.traffic_weight.filter(|w| *w > 0.0)
    }

    /// Desired endpoints, empty for catch-all routing.
    #[must_use]
    pub fn endpoints(&self) -> &[EndpointSpec] {
        match &self.routing {
            RoutingStyle::CatchAll => &[],
            RoutingStyle::Endpoints { endpoints } => endpoints,
        }
    }

    /// Checks every field and returns a normalized copy.
    pub fn validate(&self, engine: &EngineConfig) -> Result<Self, DeployError> {
        let limits = &engine.function;
        let mut normalized = self.clone();

        if let Some(timeout) = self.timeout {
            if timeout > limits.timeout_ceiling_secs {
                return Err(DeployError::validation(format!(
                    "\"timeout\" can not be greater than {} seconds.",
                    limits.timeout_ceiling_secs
                )));
            }
            if timeout == 0 {
                return Err(DeployError::validation("\"timeout\" must be at least 1 second."));
            }
        }

        if let Some(memory) = self.memory {
            if memory < limits.min_memory_mb || memory > limits.max_memory_mb {
                return Err(DeployError::validation(format!(
                    "\"memory\" must be between {} and {} MB.",
                    limits.min_memory_mb, limits.max_memory_mb
                )));
            }
        }

        if let Some(src) = &self.src {
            if src.trim().is_empty() {
                return Err(DeployError::validation("\"src\" must not be empty."));
            }
        }

        if let Some(weight) = self.traffic_weight {
            if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                return Err(DeployError::validation(format!(
                    "\"trafficWeight\" must be between 0 and 1, got {weight}."
                )));
            }
        }

        if let Some(domain) = &self.domain {
            let domain = normalize_domain(domain);
            if !hostname_pattern().is_match(&domain) {
                return Err(DeployError::validation(format!(
                    "\"domain\" is not a valid hostname: {domain}"
                )));
            }
            normalized.domain = Some(domain);
        }

        match &self.routing {
            RoutingStyle::CatchAll => {
                if self.api_id.is_some() {
                    return Err(DeployError::validation(
                        "\"apiId\" can only be used with explicit endpoints.",
                    ));
                }
            }
            RoutingStyle::Endpoints { endpoints } => {
                if !engine.gateway.explicit_endpoints {
                    return Err(DeployError::validation(
                        "The configured gateway provider does not support explicit endpoints.",
                    ));
                }
                let mut seen = HashSet::new();
                let mut checked = Vec::with_capacity(endpoints.len());
                for endpoint in endpoints {
                    let endpoint = endpoint.normalized()?;
                    if !seen.insert(endpoint.key()) {
                        return Err(DeployError::validation(format!(
                            "Endpoint {} {} is declared more than once.",
                            endpoint.method, endpoint.path
                        )));
                    }
                    checked.push(endpoint);
                }
                normalized.routing = RoutingStyle::Endpoints { endpoints: checked };
            }
        }

        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn test_deserialize_camel_case_with_defaults() {
        let config: DesiredConfig = serde_json::from_str(
            r#"{
                "src": "./app",
                "roleName": "existing",
                "trafficWeight": 0.25,
                "routing": {"style": "endpoints", "endpoints": [{"path": "users", "method": "get"}]}
            }"#,
        )
        .unwrap();

        assert!(config.monitoring);
        assert_eq!(config.role_name.as_deref(), Some("existing"));
        assert_eq!(config.effective_traffic_weight(), Some(0.25));
        assert_eq!(config.endpoints().len(), 1);
    }

    #[test]
    fn test_timeout_ceiling() {
        let err = DesiredConfig::new().with_timeout(31).validate(&engine()).unwrap_err();
        assert_eq!(err.to_string(), "\"timeout\" can not be greater than 30 seconds.");
        assert!(DesiredConfig::new().with_timeout(30).validate(&engine()).is_ok());
    }

    #[test]
    fn test_memory_bounds() {
        assert!(DesiredConfig::new().with_memory(64).validate(&engine()).is_err());
        assert!(DesiredConfig::new().with_memory(2048).validate(&engine()).is_ok());
    }

    #[test]
    fn test_blank_src_rejected() {
        assert!(DesiredConfig::new().with_src("  ").validate(&engine()).is_err());
    }

    #[test]
    fn test_traffic_weight_range() {
        assert!(DesiredConfig::new().with_traffic_weight(1.5).validate(&engine()).is_err());
        assert!(DesiredConfig::new().with_traffic_weight(f64::NAN).validate(&engine()).is_err());
        let zero = DesiredConfig::new().with_traffic_weight(0.0);
        assert_eq!(zero.effective_traffic_weight(), None);
    }

    #[test]
    fn test_domain_normalized() {
        let config = DesiredConfig::new()
            .with_domain("https://API.Example.com/")
            .validate(&engine())
            .unwrap();
        assert_eq!(config.domain.as_deref(), Some("api.example.com"));

        assert!(DesiredConfig::new().with_domain("not a domain").validate(&engine()).is_err());
    }

    #[test]
    fn test_endpoint_normalization() {
        let endpoint = EndpointSpec::new("get", "users/{id}/").normalized().unwrap();
        assert_eq!(endpoint.method, "GET");
        assert_eq!(endpoint.path, "/users/{id}");

        let root = EndpointSpec::new("ANY", "/").normalized().unwrap();
        assert_eq!(root.path, "/");
    }

    #[test]
    fn test_endpoint_rejections() {
        assert!(EndpointSpec::new("FETCH", "/a").normalized().is_err());
        assert!(EndpointSpec::new("GET", "  ").normalized().is_err());
        assert!(EndpointSpec::new("GET", "/a//b").normalized().is_err());
        assert!(EndpointSpec::new("GET", "/a b").normalized().is_err());
        assert!(EndpointSpec::new("GET", "/a")
            .with_function("arn:fn")
            .with_proxy_uri("https://x")
            .normalized()
            .is_err());
    }

    #[test]
    fn test_duplicate_endpoints_rejected() {
        let config = DesiredConfig::new().with_endpoints(vec![
            EndpointSpec::new("GET", "/a"),
            EndpointSpec::new("get", "/a/"),
        ]);
        let err = config.validate(&engine()).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_api_id_requires_endpoints() {
        assert!(DesiredConfig::new().with_api_id("abc").validate(&engine()).is_err());
        assert!(DesiredConfig::new()
            .with_endpoints(vec![])
            .with_api_id("abc")
            .validate(&engine())
            .is_ok());
    }

    #[test]
    fn test_endpoints_require_capability() {
        let mut engine = engine();
        engine.gateway.explicit_endpoints = false;
        let config = DesiredConfig::new().with_endpoints(vec![EndpointSpec::new("GET", "/")]);
        assert!(config.validate(&engine).is_err());
    }
}
