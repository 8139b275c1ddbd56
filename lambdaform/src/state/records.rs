//! Persisted per-instance records.
//!
//! Field names are part of the on-disk format; rename with a serde alias,
//! never in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the engine remembers about one deployed instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceState {
    /// Instance name, generated once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Region the instance lives in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Execution role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleRecord>,
    /// Role this instance created, kept while a user-named role is in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_role: Option<RoleRecord>,
    /// Metrics reader role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_role: Option<MetaRoleRecord>,
    /// Compute function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionRecord>,
    /// Alias the routing API targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<AliasRecord>,
    /// Routing API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiRecord>,
    /// Custom domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainRecord>,
    /// When the state was last persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl InstanceState {
    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.role.is_none()
            && self.default_role.is_none()
            && self.meta_role.is_none()
            && self.function.is_none()
            && self.alias.is_none()
            && self.api.is_none()
            && self.domain.is_none()
    }

    /// Stamps the state before it is persisted.
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    /// Account id derived from the execution role ARN.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.role
            .as_ref()
            .and_then(|role| crate::utils::naming::account_id_from_arn(&role.arn))
    }
}

/// Execution role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    /// Role name.
    pub name: String,
    /// Role ARN.
    pub arn: String,
    /// Whether this instance created the role (and may delete it).
    pub created: bool,
}

/// Metrics reader role and its policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaRoleRecord {
    /// Role name.
    pub name: String,
    /// Role ARN.
    pub arn: String,
    /// ARN of the read-only policy.
    pub policy_arn: String,
    /// Whether this instance created the role.
    pub created: bool,
}

/// Compute function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRecord {
    /// Function name.
    pub name: String,
    /// Unqualified function ARN.
    pub arn: String,
    /// Latest published version.
    pub version: u64,
    /// Hash of the deployed artifact.
    pub code_sha256: String,
}

/// Alias in front of the function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasRecord {
    /// Alias name (`default` or `feature`).
    pub name: String,
    /// Alias ARN.
    pub arn: String,
    /// Primary version.
    pub function_version: u64,
    /// Additional version weights; empty when traffic is not split.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub routing: BTreeMap<String, f64>,
}

/// Wire protocol of the routing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiProtocol {
    /// Catch-all HTTP API.
    #[default]
    Http,
    /// REST API with explicit resources and methods.
    Rest,
}

/// Routing API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRecord {
    /// API id.
    pub id: String,
    /// API name.
    pub name: String,
    /// Invoke URL.
    pub url: String,
    /// Protocol.
    #[serde(default)]
    pub protocol: ApiProtocol,
    /// Whether this instance created the API.
    pub created: bool,
    /// Explicit endpoints owned by this instance.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<EndpointRecord>,
}

/// What an endpoint's integration points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum IntegrationTarget {
    /// Proxy to a function or alias ARN.
    Function {
        /// Target ARN.
        arn: String,
    },
    /// Proxy to an HTTP backend.
    Http {
        /// Backend URI.
        uri: String,
    },
}

/// Custom authorizer attached to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerRecord {
    /// Authorizer id.
    pub id: String,
    /// Authorizer name.
    pub name: String,
    /// Authorizer function ARN.
    pub function_arn: String,
    /// Whether this instance created the authorizer.
    pub created: bool,
}

/// One explicit endpoint owned by this instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRecord {
    /// Normalized path.
    pub path: String,
    /// Upper-case method.
    pub method: String,
    /// Provider id of the path resource.
    pub resource_id: String,
    /// Integration target.
    pub target: IntegrationTarget,
    /// Authorizer, when the method requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer: Option<AuthorizerRecord>,
    /// Whether the method requires an API key.
    #[serde(default)]
    pub api_key_required: bool,
    /// Usage plan the key belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_plan_id: Option<String>,
    /// Public URL.
    pub url: String,
}

impl EndpointRecord {
    /// The `(method, path)` identity of the endpoint.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.method.clone(), self.path.clone())
    }
}

/// Custom domain and its certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRecord {
    /// Fully-qualified domain.
    pub name: String,
    /// Last two labels of the domain.
    pub apex: String,
    /// Hosted zone, when the account manages DNS for the apex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_zone_id: Option<String>,
    /// Certificate ARN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_arn: Option<String>,
    /// Whether the certificate has been issued.
    #[serde(default)]
    pub certificate_valid: bool,
    /// Regional hostname traffic for the domain is sent to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_domain: Option<String>,
    /// Hosted zone of the regional hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_hosted_zone_id: Option<String>,
    /// API mapping id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_state() {
        let state = InstanceState::default();
        assert!(state.is_empty());
        assert_eq!(serde_json::to_string(&state).unwrap(), "{}");
    }

    #[test]
    fn test_account_id_from_role() {
        let state = InstanceState {
            role: Some(RoleRecord {
                name: "r".to_string(),
                arn: "arn:aws:iam::123456789012:role/r".to_string(),
                created: true,
            }),
            ..InstanceState::default()
        };
        assert_eq!(state.account_id(), Some("123456789012"));
    }

    #[test]
    fn test_wire_field_names() {
        let state = InstanceState {
            name: Some("app-1".to_string()),
            alias: Some(AliasRecord {
                name: "feature".to_string(),
                arn: "arn:alias".to_string(),
                function_version: 3,
                routing: BTreeMap::from([("2".to_string(), 0.75)]),
            }),
            ..InstanceState::default()
        };

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "name": "app-1",
                "alias": {
                    "name": "feature",
                    "arn": "arn:alias",
                    "functionVersion": 3,
                    "routing": {"2": 0.75}
                }
            })
        );
    }

    #[test]
    fn test_integration_target_tagging() {
        let target = IntegrationTarget::Http {
            uri: "https://backend".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&target).unwrap(),
            serde_json::json!({"type": "http", "uri": "https://backend"})
        );
    }
}
