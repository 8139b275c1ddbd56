//! Stable resource names and identifier helpers.
//!
//! Every remote resource an instance owns is named `<instance>-<suffix>`,
//! where the instance name is generated once and persisted. Names are never
//! regenerated on redeploy.

use rand::Rng;

/// Length of the random part of an instance name.
pub const INSTANCE_ID_LENGTH: usize = 8;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a random lowercase alphanumeric id.
#[must_use]
pub fn random_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())]))
        .collect()
}

/// Generates a new instance name for a component.
#[must_use]
pub fn instance_name(component: &str) -> String {
    format!("{component}-{}", random_id(INSTANCE_ID_LENGTH))
}

/// Execution role created when the user does not name one.
#[must_use]
pub fn role_name(instance: &str) -> String {
    format!("{instance}-lambda-role")
}

/// Role assumed by the metrics reader.
#[must_use]
pub fn meta_role_name(instance: &str) -> String {
    format!("{instance}-meta-role")
}

/// Read-only observability policy attached to the meta role.
#[must_use]
pub fn meta_policy_name(instance: &str) -> String {
    format!("{instance}-meta-policy")
}

/// Compute function.
#[must_use]
pub fn function_name(instance: &str) -> String {
    format!("{instance}-function")
}

/// Routing API.
#[must_use]
pub fn api_name(instance: &str) -> String {
    format!("{instance}-api")
}

/// Statement id of the permission letting the routing API invoke an alias.
#[must_use]
pub fn api_permission_statement(api_id: &str, alias: &str) -> String {
    format!("API-{api_id}-{alias}")
}

/// Strips an `http://` or `https://` prefix and any trailing slash.
#[must_use]
pub fn normalize_domain(input: &str) -> String {
    let trimmed = input.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    without_scheme.trim_end_matches('/').to_ascii_lowercase()
}

/// Returns the last two labels of a domain (`api.example.com` -> `example.com`).
#[must_use]
pub fn apex_domain(domain: &str) -> String {
    let labels: Vec<&str> = domain.trim_end_matches('.').split('.').collect();
    if labels.len() <= 2 {
        labels.join(".")
    } else {
        labels[labels.len() - 2..].join(".")
    }
}

/// Extracts the account id from an ARN (`arn:aws:iam::123456789012:role/x`).
#[must_use]
pub fn account_id_from_arn(arn: &str) -> Option<&str> {
    arn.split(':').nth(4).filter(|id| !id.is_empty())
}

/// Extracts the function name from a function ARN.
#[must_use]
pub fn function_name_from_arn(arn: &str) -> Option<&str> {
    arn.split(':').nth(6).filter(|name| !name.is_empty())
}

/// Base URL of a routing API.
#[must_use]
pub fn api_base_url(api_id: &str, region: &str) -> String {
    format!("https://{api_id}.execute-api.{region}.amazonaws.com")
}

/// URL of one explicit endpoint.
#[must_use]
pub fn endpoint_url(api_id: &str, region: &str, stage: &str, path: &str) -> String {
    format!("{}/{stage}{path}", api_base_url(api_id, region))
}

/// Invocation URI the gateway uses to call a function or alias.
#[must_use]
pub fn invocation_uri(region: &str, target_arn: &str) -> String {
    format!("arn:aws:apigateway:{region}:lambda:path/2015-03-31/functions/{target_arn}/invocations")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_name_shape() {
        let name = instance_name("express");
        let suffix = name.strip_prefix("express-").unwrap();
        assert_eq!(suffix.len(), INSTANCE_ID_LENGTH);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(instance_name("express"), instance_name("express"));
    }

    #[test]
    fn test_resource_names() {
        assert_eq!(role_name("app-abc"), "app-abc-lambda-role");
        assert_eq!(meta_role_name("app-abc"), "app-abc-meta-role");
        assert_eq!(meta_policy_name("app-abc"), "app-abc-meta-policy");
        assert_eq!(function_name("app-abc"), "app-abc-function");
        assert_eq!(api_name("app-abc"), "app-abc-api");
        assert_eq!(api_permission_statement("a1", "default"), "API-a1-default");
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("https://App.Example.com/"), "app.example.com");
        assert_eq!(normalize_domain("http://example.com"), "example.com");
        assert_eq!(normalize_domain(" example.com "), "example.com");
    }

    #[test]
    fn test_apex_domain() {
        assert_eq!(apex_domain("api.example.com"), "example.com");
        assert_eq!(apex_domain("a.b.example.com"), "example.com");
        assert_eq!(apex_domain("example.com"), "example.com");
        assert_eq!(apex_domain("example.com."), "example.com");
    }

    #[test]
    fn test_arn_parsing() {
        assert_eq!(
            account_id_from_arn("arn:aws:iam::123456789012:role/app"),
            Some("123456789012")
        );
        assert_eq!(account_id_from_arn("not-an-arn"), None);
        assert_eq!(
            function_name_from_arn("arn:aws:lambda:us-east-1:123456789012:function:auth"),
            Some("auth")
        );
    }

    #[test]
    fn test_urls() {
        assert_eq!(
            api_base_url("abc123", "us-east-1"),
            "https://abc123.execute-api.us-east-1.amazonaws.com"
        );
        assert_eq!(
            endpoint_url("abc123", "eu-west-1", "dev", "/users/{id}"),
            "https://abc123.execute-api.eu-west-1.amazonaws.com/dev/users/{id}"
        );
        assert!(invocation_uri("us-east-1", "arn:fn").ends_with("functions/arn:fn/invocations"));
    }
}
