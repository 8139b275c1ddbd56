//! Pure classification of desired endpoints against recorded ones.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::EndpointSpec;
use crate::state::{EndpointRecord, IntegrationTarget};

/// Where an endpoint exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    /// Desired but not yet created by this instance.
    DesiredOnly,
    /// Created by this instance but no longer desired.
    RecordedOnly,
    /// Desired and recorded with the same shape.
    Matched,
    /// Desired and recorded, but the target or authorization differs.
    Changed,
}

/// A desired endpoint with its integration target resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Path, starting with `/`.
    pub path: String,
    /// Upper-case method.
    pub method: String,
    /// Integration target.
    pub target: IntegrationTarget,
    /// Authorizer function ARN.
    pub authorizer_arn: Option<String>,
    /// Whether an API key is required.
    pub api_key_required: bool,
    /// Usage plan the key belongs to.
    pub usage_plan_id: Option<String>,
}

impl ResolvedEndpoint {
    /// Resolves a spec; endpoints without a target go to `default_target`.
    #[must_use]
    pub fn from_spec(spec: &EndpointSpec, default_target: &IntegrationTarget) -> Self {
        let target = match (&spec.function_arn, &spec.proxy_uri) {
            (Some(arn), _) => IntegrationTarget::Function { arn: arn.clone() },
            (None, Some(uri)) => IntegrationTarget::Http { uri: uri.clone() },
            (None, None) => default_target.clone(),
        };
        Self {
            path: spec.path.clone(),
            method: spec.method.clone(),
            target,
            authorizer_arn: spec.authorizer_arn.clone(),
            api_key_required: spec.api_key_required,
            usage_plan_id: spec.usage_plan_id.clone(),
        }
    }

    /// Rebuilds the desired shape of a recorded endpoint.
    #[must_use]
    pub fn from_record(record: &EndpointRecord) -> Self {
        Self {
            path: record.path.clone(),
            method: record.method.clone(),
            target: record.target.clone(),
            authorizer_arn: record.authorizer.as_ref().map(|a| a.function_arn.clone()),
            api_key_required: record.api_key_required,
            usage_plan_id: record.usage_plan_id.clone(),
        }
    }

    /// `(method, path)` key.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.method.clone(), self.path.clone())
    }

    /// Whether `record` already has this shape.
    #[must_use]
    pub fn matches(&self, record: &EndpointRecord) -> bool {
        self.target == record.target
            && self.authorizer_arn.as_deref()
                == record.authorizer.as_ref().map(|a| a.function_arn.as_str())
            && self.api_key_required == record.api_key_required
            && self.usage_plan_id == record.usage_plan_id
    }
}

/// Classifies one endpoint key.
#[must_use]
pub fn classify(
    desired: Option<&ResolvedEndpoint>,
    recorded: Option<&EndpointRecord>,
) -> Option<EndpointState> {
    match (desired, recorded) {
        (Some(_), None) => Some(EndpointState::DesiredOnly),
        (None, Some(_)) => Some(EndpointState::RecordedOnly),
        (Some(d), Some(r)) if d.matches(r) => Some(EndpointState::Matched),
        (Some(_), Some(_)) => Some(EndpointState::Changed),
        (None, None) => None,
    }
}

/// What the reconciler has to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointPlan {
    /// Endpoints to create.
    pub create: Vec<ResolvedEndpoint>,
    /// Endpoints to re-apply, with their previous record.
    pub update: Vec<(ResolvedEndpoint, EndpointRecord)>,
    /// Endpoints already in shape.
    pub keep: Vec<EndpointRecord>,
    /// Endpoints to delete.
    pub remove: Vec<EndpointRecord>,
}

impl EndpointPlan {
    /// Whether nothing needs to change.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

/// Builds the plan for `desired` against what this instance `recorded`.
///
/// Output order is stable: sorted by method, then path.
#[must_use]
pub fn plan(
    desired: &[EndpointSpec],
    recorded: &[EndpointRecord],
    default_target: &IntegrationTarget,
) -> EndpointPlan {
    let desired: BTreeMap<_, _> = desired
        .iter()
        .map(|spec| {
            let resolved = ResolvedEndpoint::from_spec(spec, default_target);
            (resolved.key(), resolved)
        })
        .collect();
    let recorded: BTreeMap<_, _> = recorded.iter().map(|r| (r.key(), r)).collect();
    let keys: BTreeSet<_> = desired.keys().chain(recorded.keys()).cloned().collect();

    let mut plan = EndpointPlan::default();
    for key in keys {
        let want = desired.get(&key);
        let have = recorded.get(&key).copied();
        match (classify(want, have), want, have) {
            (Some(EndpointState::DesiredOnly), Some(want), _) => plan.create.push(want.clone()),
            (Some(EndpointState::RecordedOnly), _, Some(have)) => plan.remove.push(have.clone()),
            (Some(EndpointState::Matched), _, Some(have)) => plan.keep.push(have.clone()),
            (Some(EndpointState::Changed), Some(want), Some(have)) => {
                plan.update.push((want.clone(), have.clone()));
            }
            _ => {}
        }
    }
    plan
}

/// `/a/b/c` -> `["/a", "/a/b", "/a/b/c"]`.
#[must_use]
pub fn path_prefixes(path: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        prefixes.push(current.clone());
    }
    prefixes
}

/// Number of segments in a path.
#[must_use]
pub fn path_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn alias_target() -> IntegrationTarget {
        IntegrationTarget::Function {
            arn: "arn:aws:lambda:us-east-1:123456789012:function:app-function:default".into(),
        }
    }

    fn record(method: &str, path: &str) -> EndpointRecord {
        EndpointRecord {
            path: path.into(),
            method: method.into(),
            resource_id: format!("res{path}"),
            target: alias_target(),
            authorizer: None,
            api_key_required: false,
            usage_plan_id: None,
            url: String::new(),
        }
    }

    #[test]
    fn test_plan_classifies_every_key() {
        let desired = vec![
            EndpointSpec::new("GET", "/users"),
            EndpointSpec::new("POST", "/users"),
            EndpointSpec::new("GET", "/health").with_proxy_uri("https://backend/health"),
        ];
        let recorded = vec![record("GET", "/users"), record("GET", "/health"), record("GET", "/old")];

        let plan = plan(&desired, &recorded, &alias_target());
        assert_eq!(plan.create.iter().map(ResolvedEndpoint::key).collect::<Vec<_>>(), vec![
            ("POST".to_string(), "/users".to_string())
        ]);
        assert_eq!(plan.update.len(), 1);
        assert_eq!(plan.update[0].0.path, "/health");
        assert_eq!(plan.keep, vec![record("GET", "/users")]);
        assert_eq!(plan.remove, vec![record("GET", "/old")]);
        assert!(!plan.is_noop());
    }

    #[test]
    fn test_identical_sets_are_noop() {
        let desired = vec![EndpointSpec::new("GET", "/users")];
        let plan = plan(&desired, &[record("GET", "/users")], &alias_target());
        assert!(plan.is_noop());
    }

    #[test]
    fn test_classify_detects_authorizer_change() {
        let want = ResolvedEndpoint::from_spec(
            &EndpointSpec::new("GET", "/users")
                .with_authorizer("arn:aws:lambda:us-east-1:123456789012:function:auth"),
            &alias_target(),
        );
        assert_eq!(
            classify(Some(&want), Some(&record("GET", "/users"))),
            Some(EndpointState::Changed)
        );
        assert_eq!(classify(None, None), None);
    }

    #[test]
    fn test_path_prefixes() {
        assert_eq!(path_prefixes("/a/{id}/c"), vec!["/a", "/a/{id}", "/a/{id}/c"]);
        assert!(path_prefixes("/").is_empty());
        assert_eq!(path_depth("/a/b"), 2);
    }
}
