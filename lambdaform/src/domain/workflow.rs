//! Custom domain driver.
//!
//! Deploy: hosted zone, certificate, regional custom domain, API mapping,
//! then an alias A record. Removal unwinds mapping, domain and record in
//! that order. The certificate is kept so a redeploy does not wait on
//! validation again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::certificate::{CertificateManager, CertificateReadiness};
use crate::drivers::{
    lookup, removal_outcome, DriverCapabilities, DriverContext, Reconciled, Removal,
    ResourceDriver, ResourceKind,
};
use crate::errors::{DeployError, ErrorInfo};
use crate::provider::{
    AliasTarget, ApiMapping, ChangeAction, CreateDomainRequest, DomainEndpointType, DomainInfo, RecordChange,
    RecordSet,
};
use crate::retry::RetryOn;
use crate::state::{ApiProtocol, ApiRecord, DomainRecord};
use crate::utils::naming;

/// Stage HTTP APIs serve from.
pub const DEFAULT_STAGE: &str = "$default";
/// TLS policy of the custom domain.
pub const SECURITY_POLICY: &str = "TLS_1_2";

/// Desired custom domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDesired {
    /// Normalized domain name.
    pub name: String,
    /// API id the domain maps to.
    pub api_id: String,
    /// Protocol of that API.
    pub api_protocol: ApiProtocol,
}

impl DomainDesired {
    /// Domain for `api`.
    #[must_use]
    pub fn for_api(name: impl Into<String>, api: &ApiRecord) -> Self {
        Self {
            name: name.into(),
            api_id: api.id.clone(),
            api_protocol: api.protocol,
        }
    }
}

/// How far the domain setup got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    /// Serving traffic.
    Active,
    /// Waiting for the certificate; the deploy continues without the domain.
    CertificatePending,
    /// No hosted zone for the apex; DNS must be set up by hand.
    ManualSetup,
}

impl DomainStatus {
    /// Status implied by a record.
    #[must_use]
    pub fn of(record: &DomainRecord) -> Self {
        if record.hosted_zone_id.is_none() {
            Self::ManualSetup
        } else if !record.certificate_valid || record.mapping_id.is_none() {
            Self::CertificatePending
        } else {
            Self::Active
        }
    }
}

/// Fails when a deployed domain would be replaced by a different one.
pub fn check_domain_change(
    prior: Option<&DomainRecord>,
    desired: Option<&str>,
) -> Result<(), DeployError> {
    match (prior, desired) {
        (Some(prior), Some(desired)) if prior.name != desired => {
            Err(DeployError::validation(format!(
                "Changing the domain from {} to {desired} will remove your infrastructure. \
                 Please remove it manually, change the domain, then re-deploy.",
                prior.name
            )))
        }
        _ => Ok(()),
    }
}

fn alias_record(record: &DomainRecord, target: &str, target_zone: &str) -> RecordSet {
    RecordSet {
        name: record.name.clone(),
        record_type: "A".to_string(),
        ttl: None,
        values: Vec::new(),
        alias_target: Some(AliasTarget {
            dns_name: target.to_string(),
            hosted_zone_id: target_zone.to_string(),
        }),
    }
}

/// Sets up and tears down a custom domain.
#[derive(Debug, Clone)]
pub struct DomainWorkflow {
    ctx: DriverContext,
}

impl DomainWorkflow {
    /// Creates a workflow.
    #[must_use]
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }

    async fn find_zone(&self, apex: &str) -> Result<Option<String>, DeployError> {
        let dns = &self.ctx.clients.dns;
        let zones = self
            .ctx
            .call("list_hosted_zones", RetryOn::Throttling, || dns.list_hosted_zones())
            .await?;
        Ok(zones
            .into_iter()
            .find(|z| z.name.trim_end_matches('.') == apex)
            .map(|z| z.id))
    }

    async fn ensure_domain(
        &self,
        name: &str,
        certificate_arn: &str,
    ) -> Result<DomainInfo, DeployError> {
        let domains = &self.ctx.clients.domains;
        if let Some(existing) = lookup(
            self.ctx
                .call("get_domain", RetryOn::Throttling, || domains.get_domain(name))
                .await,
        )? {
            return Ok(existing);
        }

        let endpoint_type = if self.ctx.config.gateway.custom_domain_v2 {
            DomainEndpointType::Regional
        } else {
            DomainEndpointType::Edge
        };
        let request = CreateDomainRequest {
            name: name.to_string(),
            certificate_arn: certificate_arn.to_string(),
            endpoint_type,
            security_policy: SECURITY_POLICY.to_string(),
        };
        let created = self
            .ctx
            .call("create_domain", RetryOn::Throttling, || domains.create_domain(&request))
            .await;
        match created {
            Ok(domain) => {
                info!(domain = %name, target = %domain.target_domain, "Created custom domain");
                self.ctx.emit("domain.created", json!({ "name": name }));
                Ok(domain)
            }
            Err(e) if e.is_remote_conflict() => Err(DeployError::conflict(format!(
                "The domain {name} is already in use by another API"
            ))),
            Err(e) => Err(e),
        }
    }

    async fn mappings(&self, name: &str) -> Result<Vec<ApiMapping>, DeployError> {
        let domains = &self.ctx.clients.domains;
        self.ctx
            .call("get_api_mappings", RetryOn::Throttling, || domains.get_api_mappings(name))
            .await
    }

    async fn ensure_mapping(&self, desired: &DomainDesired) -> Result<String, DeployError> {
        let stage = match desired.api_protocol {
            ApiProtocol::Http => DEFAULT_STAGE.to_string(),
            ApiProtocol::Rest => self.ctx.config.rest_stage.clone(),
        };
        let domains = &self.ctx.clients.domains;
        let mappings = self.mappings(&desired.name).await?;
        if let Some(ours) = mappings.iter().find(|m| m.api_id == desired.api_id) {
            return Ok(ours.id.clone());
        }
        if !mappings.is_empty() {
            return Err(DeployError::conflict(format!(
                "The domain {} is already in use by another API",
                desired.name
            )));
        }

        let created = self
            .ctx
            .call("create_api_mapping", RetryOn::Throttling, || {
                domains.create_api_mapping(&desired.name, &desired.api_id, &stage)
            })
            .await;
        match created {
            Ok(mapping) => Ok(mapping.id),
            Err(e) if e.is_remote_conflict() => {
                // Mapped by a concurrent run; only ours counts as success.
                let mappings = self.mappings(&desired.name).await?;
                mappings
                    .into_iter()
                    .find(|m| m.api_id == desired.api_id)
                    .map(|m| m.id)
                    .ok_or_else(|| {
                        DeployError::terminal(
                            format!("The domain {} is already in use by another API", desired.name),
                            ErrorInfo::new("DOMAIN-MAPPED", "Domain mapped to a foreign API")
                                .with_context_entry("domain", desired.name.clone()),
                        )
                    })
            }
            Err(e) => Err(e),
        }
    }

    async fn change_records(&self, zone_id: &str, change: RecordChange) -> Result<(), DeployError> {
        let changes = [change];
        let dns = &self.ctx.clients.dns;
        self.ctx
            .call("change_record_sets", RetryOn::Throttling, || {
                dns.change_record_sets(zone_id, &changes)
            })
            .await
    }
}

#[async_trait]
impl ResourceDriver for DomainWorkflow {
    type Id = str;
    type Desired = DomainDesired;
    type Record = DomainRecord;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Domain
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            custom_domain_v2: self.ctx.config.gateway.custom_domain_v2,
            ..DriverCapabilities::default()
        }
    }

    async fn get(&self, id: &str) -> Result<Option<DomainRecord>, DeployError> {
        let domains = &self.ctx.clients.domains;
        let domain = lookup(
            self.ctx
                .call("get_domain", RetryOn::Throttling, || domains.get_domain(id))
                .await,
        )?;
        Ok(domain.map(|d| DomainRecord {
            apex: naming::apex_domain(&d.name),
            name: d.name,
            target_domain: Some(d.target_domain),
            target_hosted_zone_id: Some(d.target_hosted_zone_id),
            ..DomainRecord::default()
        }))
    }

    async fn create_or_update(
        &self,
        desired: &DomainDesired,
        prior: Option<&DomainRecord>,
    ) -> Result<Reconciled<DomainRecord>, DeployError> {
        check_domain_change(prior, Some(&desired.name))?;
        let apex = naming::apex_domain(&desired.name);
        let mut record = prior.cloned().unwrap_or_else(|| DomainRecord {
            name: desired.name.clone(),
            apex: apex.clone(),
            ..DomainRecord::default()
        });
        let was_active = prior.is_some_and(|p| DomainStatus::of(p) == DomainStatus::Active);

        let Some(zone_id) = self.find_zone(&apex).await? else {
            warn!(domain = %desired.name, "No hosted zone for domain, skipping DNS automation");
            self.ctx.emit(
                "domain.manual_setup",
                json!({
                    "domain": desired.name,
                    "message": format!(
                        "No hosted zone found for {apex}. Create one, or point {} at the \
                         routing API's regional hostname yourself.",
                        desired.name
                    ),
                }),
            );
            record.hosted_zone_id = None;
            return Ok(Reconciled::unchanged(record));
        };
        record.hosted_zone_id = Some(zone_id.clone());

        let certificates = CertificateManager::new(self.ctx.clone());
        let arn = certificates.ensure(&apex).await?;
        record.certificate_arn = Some(arn.clone());
        match certificates.wait_until_issued(&arn, &zone_id).await? {
            CertificateReadiness::Issued { .. } => record.certificate_valid = true,
            CertificateReadiness::Pending { .. } => {
                warn!(domain = %desired.name, "Certificate not issued yet, deploying without the domain");
                self.ctx.emit(
                    "domain.certificate_pending",
                    json!({ "domain": desired.name, "certificate": arn }),
                );
                record.certificate_valid = false;
                return Ok(Reconciled::updated(record));
            }
        }

        let domain = self.ensure_domain(&desired.name, &arn).await?;
        record.target_domain = Some(domain.target_domain.clone());
        record.target_hosted_zone_id = Some(domain.target_hosted_zone_id.clone());
        record.mapping_id = Some(self.ensure_mapping(desired).await?);

        self.change_records(
            &zone_id,
            RecordChange {
                action: ChangeAction::Upsert,
                record: alias_record(&record, &domain.target_domain, &domain.target_hosted_zone_id),
            },
        )
        .await?;

        info!(domain = %desired.name, "Custom domain active");
        self.ctx.emit("domain.active", json!({ "domain": desired.name }));
        Ok(if was_active {
            Reconciled::unchanged(record)
        } else if prior.is_some() {
            Reconciled::updated(record)
        } else {
            Reconciled::created(record)
        })
    }

    async fn remove(&self, record: &DomainRecord) -> Result<Removal, DeployError> {
        let domains = &self.ctx.clients.domains;
        if let Some(mapping_id) = &record.mapping_id {
            self.ctx.cancel.check()?;
            removal_outcome(
                self.ctx
                    .call("delete_api_mapping", RetryOn::Throttling, || {
                        domains.delete_api_mapping(&record.name, mapping_id)
                    })
                    .await,
            )?;
        }

        let mut outcome = Removal::AlreadyAbsent;
        if record.target_domain.is_some() {
            self.ctx.cancel.check()?;
            outcome = removal_outcome(
                self.ctx
                    .call("delete_domain", RetryOn::Throttling, || {
                        domains.delete_domain(&record.name)
                    })
                    .await,
            )?;
        }

        if let (Some(zone), Some(target), Some(target_zone)) = (
            &record.hosted_zone_id,
            &record.target_domain,
            &record.target_hosted_zone_id,
        ) {
            self.ctx.cancel.check()?;
            let deleted = self
                .change_records(
                    zone,
                    RecordChange {
                        action: ChangeAction::Delete,
                        record: alias_record(record, target, target_zone),
                    },
                )
                .await;
            match deleted {
                // Deleting a record that is already gone is rejected as an invalid batch.
                Err(e)
                    if e.remote_source().is_some_and(|r| {
                        r.code == crate::errors::codes::INVALID_CHANGE_BATCH || r.is_not_found()
                    }) => {}
                other => other?,
            }
        }

        self.ctx.emit("domain.removed", json!({ "domain": record.name }));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ReconcileAction;
    use crate::provider::CertificateStatus;
    use crate::testing::FakeCloud;

    fn api(cloud: &FakeCloud) -> ApiRecord {
        let id = cloud.seed_http_api("app-api");
        ApiRecord {
            url: naming::api_base_url(&id, "us-east-1"),
            id,
            name: "app-api".into(),
            protocol: ApiProtocol::Http,
            created: true,
            endpoints: Vec::new(),
        }
    }

    #[test]
    fn test_domain_change_is_rejected() {
        let prior = DomainRecord {
            name: "a.example.com".into(),
            ..DomainRecord::default()
        };
        let err = check_domain_change(Some(&prior), Some("b.example.com")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Changing the domain from a.example.com to b.example.com will remove your \
             infrastructure. Please remove it manually, change the domain, then re-deploy."
        );
        assert!(check_domain_change(Some(&prior), Some("a.example.com")).is_ok());
        assert!(check_domain_change(Some(&prior), None).is_ok());
    }

    #[tokio::test]
    async fn test_full_setup_and_unwind() {
        let cloud = FakeCloud::new();
        let zone = cloud.seed_hosted_zone("example.com");
        cloud.seed_certificate("example.com", CertificateStatus::Issued);
        let api = api(&cloud);
        let workflow = DomainWorkflow::new(cloud.driver_context());

        let desired = DomainDesired::for_api("api.example.com", &api);
        let created = workflow.create_or_update(&desired, None).await.unwrap();
        assert_eq!(created.action, ReconcileAction::Created);
        assert_eq!(DomainStatus::of(&created.record), DomainStatus::Active);
        let a_record = cloud.record(&zone, "api.example.com").unwrap();
        assert_eq!(a_record.record_type, "A");
        assert_eq!(cloud.mapping_stage("api.example.com").as_deref(), Some(DEFAULT_STAGE));

        let again = workflow.create_or_update(&desired, Some(&created.record)).await.unwrap();
        assert_eq!(again.action, ReconcileAction::Unchanged);
        assert_eq!(cloud.count_calls("create_domain"), 1);

        workflow.remove(&created.record).await.unwrap();
        let calls = cloud.calls();
        let mapping_at = calls.iter().position(|c| c == "delete_api_mapping").unwrap();
        let domain_at = calls.iter().position(|c| c == "delete_domain").unwrap();
        assert!(mapping_at < domain_at);
        assert!(cloud.record(&zone, "api.example.com").is_none());
    }

    #[tokio::test]
    async fn test_missing_zone_falls_back_to_manual_setup() {
        let cloud = FakeCloud::new();
        let api = api(&cloud);
        let workflow = DomainWorkflow::new(cloud.driver_context());
        let record = workflow
            .create_or_update(&DomainDesired::for_api("api.example.com", &api), None)
            .await
            .unwrap()
            .record;
        assert_eq!(DomainStatus::of(&record), DomainStatus::ManualSetup);
        assert_eq!(cloud.count_calls("request_certificate"), 0);
    }

    #[tokio::test]
    async fn test_pending_certificate_skips_domain() {
        let cloud = FakeCloud::new();
        cloud.seed_hosted_zone("example.com");
        cloud.seed_certificate("example.com", CertificateStatus::PendingValidation);
        let api = api(&cloud);
        let workflow = DomainWorkflow::new(cloud.driver_context());
        let record = workflow
            .create_or_update(&DomainDesired::for_api("api.example.com", &api), None)
            .await
            .unwrap()
            .record;
        assert_eq!(DomainStatus::of(&record), DomainStatus::CertificatePending);
        assert_eq!(cloud.count_calls("create_domain"), 0);
    }

    #[tokio::test]
    async fn test_foreign_mapping_is_conflict() {
        let cloud = FakeCloud::new();
        cloud.seed_hosted_zone("example.com");
        cloud.seed_certificate("example.com", CertificateStatus::Issued);
        cloud.seed_api_mapping("api.example.com", "someone-else");
        let api = api(&cloud);
        let workflow = DomainWorkflow::new(cloud.driver_context());
        let err = workflow
            .create_or_update(&DomainDesired::for_api("api.example.com", &api), None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The domain api.example.com is already in use by another API"
        );
    }
}
