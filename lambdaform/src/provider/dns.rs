//! DNS service: hosted zones and record sets.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RemoteError;

/// A hosted zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    /// Zone id, without the `/hostedzone/` prefix.
    pub id: String,
    /// Zone name, possibly with a trailing dot.
    pub name: String,
}

/// Alias target of an `A` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTarget {
    /// Target hostname.
    pub dns_name: String,
    /// Hosted zone of the target.
    pub hosted_zone_id: String,
}

/// A record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    /// Record name.
    pub name: String,
    /// Record type.
    pub record_type: String,
    /// TTL, for plain records.
    pub ttl: Option<u32>,
    /// Values, for plain records.
    pub values: Vec<String>,
    /// Alias target, for alias records.
    pub alias_target: Option<AliasTarget>,
}

/// Change action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeAction {
    /// Create or replace.
    Upsert,
    /// Delete.
    Delete,
}

/// One change in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChange {
    /// Action.
    pub action: ChangeAction,
    /// Record.
    pub record: RecordSet,
}

/// DNS client.
#[async_trait]
pub trait DnsClient: Send + Sync {
    /// Lists hosted zones.
    async fn list_hosted_zones(&self) -> Result<Vec<HostedZone>, RemoteError>;

    /// Applies a batch of changes to a zone.
    async fn change_record_sets(&self, zone_id: &str, changes: &[RecordChange]) -> Result<(), RemoteError>;
}
