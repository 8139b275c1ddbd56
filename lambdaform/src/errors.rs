//! Error types for lambdaform.
//!
//! Provider clients report every failure as a [`RemoteError`] carrying the
//! provider's machine-readable code. Drivers classify those codes and surface
//! a [`DeployError`], whose [`ErrorCategory`] tells a caller whether to retry,
//! fix its input, or remove and redeploy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Machine-readable error codes returned by the cloud control plane.
pub mod codes {
    /// Generic missing resource.
    pub const NOT_FOUND: &str = "NotFoundException";
    /// Missing function, alias or permission.
    pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";
    /// Missing role or policy.
    pub const NO_SUCH_ENTITY: &str = "NoSuchEntity";
    /// Missing hosted zone.
    pub const NO_SUCH_HOSTED_ZONE: &str = "NoSuchHostedZone";
    /// Generic conflict on create.
    pub const CONFLICT: &str = "ConflictException";
    /// Conflict on a function permission or statement.
    pub const RESOURCE_CONFLICT: &str = "ResourceConflictException";
    /// Role or policy already exists.
    pub const ENTITY_ALREADY_EXISTS: &str = "EntityAlreadyExists";
    /// Request rate exceeded.
    pub const TOO_MANY_REQUESTS: &str = "TooManyRequestsException";
    /// Request rate exceeded (identity service spelling).
    pub const THROTTLING: &str = "Throttling";
    /// Request rate exceeded (metrics service spelling).
    pub const THROTTLING_EXCEPTION: &str = "ThrottlingException";
    /// Malformed request parameter.
    pub const INVALID_PARAMETER: &str = "InvalidParameterValueException";
    /// DNS change batch rejected (record already gone).
    pub const INVALID_CHANGE_BATCH: &str = "InvalidChangeBatch";
}

/// An error reported by a provider client.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RemoteError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// HTTP status, when the transport exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl RemoteError {
    /// Creates a new remote error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Sets the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(codes::NOT_FOUND, message).with_status(404)
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(codes::CONFLICT, message).with_status(409)
    }

    /// Creates a rate-limit error.
    #[must_use]
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(codes::TOO_MANY_REQUESTS, message).with_status(429)
    }

    /// Returns true if the resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.code.as_str(),
            codes::NOT_FOUND
                | codes::RESOURCE_NOT_FOUND
                | codes::NO_SUCH_ENTITY
                | codes::NO_SUCH_HOSTED_ZONE
        ) || self.status == Some(404)
    }

    /// Returns true if the resource already exists or is being modified.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.code.as_str(),
            codes::CONFLICT | codes::RESOURCE_CONFLICT | codes::ENTITY_ALREADY_EXISTS
        ) || self.status == Some(409)
            || self.message.contains("already exists")
    }

    /// Returns true if the request was rate limited.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        matches!(
            self.code.as_str(),
            codes::TOO_MANY_REQUESTS | codes::THROTTLING | codes::THROTTLING_EXCEPTION
        ) || self.status == Some(429)
            || self.message.contains("Rate exceeded")
    }

    /// Returns true if a freshly created role or key has not propagated yet.
    #[must_use]
    pub fn is_role_propagation(&self) -> bool {
        self.message.contains("cannot be assumed by Lambda")
            || self.message.contains("KMS key is invalid")
    }
}

/// Coarse classification of a [`DeployError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A referenced resource does not exist.
    NotFound,
    /// The resource exists and is owned by someone else.
    Conflict,
    /// A transient failure that outlived its retry budget.
    Transient,
    /// Malformed input, rejected before any remote call.
    Validation,
    /// Unrecoverable without manual intervention.
    Terminal,
    /// The operation was cancelled.
    Cancelled,
    /// An unclassified provider failure.
    Remote,
    /// Persisting or loading state failed.
    Storage,
}

/// Structured details attached to terminal errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., `DOMAIN-CERT-TIMEOUT`).
    pub code: String,
    /// Short summary.
    pub summary: String,
    /// What the user should do about it.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::Value::String(self.code.clone()));
        map.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));

        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::Value::String(hint.clone()));
        }
        if !self.context.is_empty() {
            let context_map: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context_map));
        }

        map
    }
}

/// The main error type for deploy, remove and metrics operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A resource the desired configuration references does not exist.
    #[error("The provided {kind} with the name: {name} could not be found.")]
    NotFound {
        /// Human-readable resource kind.
        kind: String,
        /// The missing resource name.
        name: String,
    },

    /// The resource exists but belongs to another deployment.
    #[error("{0}")]
    Conflict(String),

    /// A transient failure kept recurring until the retry budget ran out.
    #[error("{operation} failed after {attempts} attempts ({source}). Remove this instance and deploy it again.")]
    RetriesExhausted {
        /// The operation that was retried.
        operation: String,
        /// How many times it was attempted.
        attempts: usize,
        /// The last error seen.
        #[source]
        source: RemoteError,
    },

    /// The desired configuration is malformed.
    #[error("{0}")]
    Validation(String),

    /// Manual intervention is required.
    #[error("{message}")]
    Terminal {
        /// The error message.
        message: String,
        /// Remediation details.
        info: Box<ErrorInfo>,
    },

    /// A provider failure that is neither transient nor recoverable.
    #[error("{operation} failed: {source}")]
    Remote {
        /// The operation that failed.
        operation: String,
        /// The provider error.
        #[source]
        source: RemoteError,
    },

    /// The operation was cancelled.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// The state store failed.
    #[error("State storage error: {0}")]
    Storage(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a terminal error with remediation details.
    #[must_use]
    pub fn terminal(message: impl Into<String>, info: ErrorInfo) -> Self {
        Self::Terminal {
            message: message.into(),
            info: Box::new(info),
        }
    }

    /// Wraps a provider error for the named operation.
    #[must_use]
    pub fn remote(operation: impl Into<String>, source: RemoteError) -> Self {
        Self::Remote {
            operation: operation.into(),
            source,
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::RetriesExhausted { .. } => ErrorCategory::Transient,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Terminal { .. } => ErrorCategory::Terminal,
            Self::Cancelled(_) => ErrorCategory::Cancelled,
            Self::Remote { .. } => ErrorCategory::Remote,
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) => ErrorCategory::Storage,
        }
    }

    /// Returns true if running the same operation again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    /// Returns the remediation details of a terminal error.
    #[must_use]
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Terminal { info, .. } => Some(info),
            _ => None,
        }
    }

    /// Returns the provider error underneath, if any.
    #[must_use]
    pub fn remote_source(&self) -> Option<&RemoteError> {
        match self {
            Self::RetriesExhausted { source, .. } | Self::Remote { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Returns true if a non-retried provider call reported a missing resource.
    #[must_use]
    pub fn is_remote_not_found(&self) -> bool {
        matches!(self, Self::Remote { source, .. } if source.is_not_found())
    }

    /// Returns true if a non-retried provider call reported a conflict.
    #[must_use]
    pub fn is_remote_conflict(&self) -> bool {
        matches!(self, Self::Remote { source, .. } if source.is_conflict())
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("message".to_string(), serde_json::Value::String(self.to_string()));
        map.insert(
            "category".to_string(),
            serde_json::to_value(self.category()).unwrap_or(serde_json::Value::Null),
        );
        if let Some(source) = self.remote_source() {
            map.insert("code".to_string(), serde_json::Value::String(source.code.clone()));
        }
        if let Some(info) = self.error_info() {
            let info_map: serde_json::Map<String, serde_json::Value> =
                info.to_dict().into_iter().collect();
            map.insert("error_info".to_string(), serde_json::Value::Object(info_map));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_classification() {
        assert!(RemoteError::not_found("gone").is_not_found());
        assert!(RemoteError::new(codes::NO_SUCH_ENTITY, "role").is_not_found());
        assert!(RemoteError::conflict("taken").is_conflict());
        assert!(RemoteError::new("Other", "Statement already exists").is_conflict());
        assert!(RemoteError::throttled("slow down").is_throttled());
        assert!(RemoteError::new(codes::THROTTLING, "Rate exceeded").is_throttled());
        assert!(!RemoteError::conflict("taken").is_throttled());
    }

    #[test]
    fn test_role_propagation_detection() {
        let err = RemoteError::new(
            codes::INVALID_PARAMETER,
            "The role defined for the function cannot be assumed by Lambda.",
        );
        assert!(err.is_role_propagation());
        assert!(RemoteError::new(codes::INVALID_PARAMETER, "KMS key is invalid for CreateGrant")
            .is_role_propagation());
        assert!(!RemoteError::new(codes::INVALID_PARAMETER, "memory too large").is_role_propagation());
    }

    #[test]
    fn test_retries_exhausted_distinguishable_from_validation() {
        let exhausted = DeployError::RetriesExhausted {
            operation: "create_function".to_string(),
            attempts: 5,
            source: RemoteError::throttled("slow down"),
        };
        let invalid = DeployError::validation("timeout too large");

        assert_eq!(exhausted.category(), ErrorCategory::Transient);
        assert_eq!(invalid.category(), ErrorCategory::Validation);
        assert!(exhausted.is_retryable());
        assert!(!invalid.is_retryable());
        assert!(exhausted.to_string().contains("deploy it again"));
    }

    #[test]
    fn test_not_found_message() {
        let err = DeployError::not_found("IAM Role", "custom-role");
        assert_eq!(
            err.to_string(),
            "The provided IAM Role with the name: custom-role could not be found."
        );
    }

    #[test]
    fn test_terminal_error_to_dict() {
        let info = ErrorInfo::new("DOMAIN-CERT-TIMEOUT", "Certificate validation timed out")
            .with_fix_hint("Request a new certificate")
            .with_context_entry("domain", "example.com");
        let err = DeployError::terminal("certificate validation timed out", info);

        let dict = err.to_dict();
        assert_eq!(dict["category"], serde_json::json!("terminal"));
        assert_eq!(dict["error_info"]["code"], serde_json::json!("DOMAIN-CERT-TIMEOUT"));
        assert_eq!(dict["error_info"]["context"]["domain"], serde_json::json!("example.com"));
    }

    #[test]
    fn test_remote_error_display() {
        let err = DeployError::remote("get_api", RemoteError::new("BadRequest", "nope"));
        assert_eq!(err.to_string(), "get_api failed: BadRequest: nope");
        assert_eq!(err.remote_source().map(|e| e.code.as_str()), Some("BadRequest"));
    }
}
