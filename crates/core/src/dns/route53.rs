//! Route53 challenge record backend
//!
//! Publishes challenge records with UPSERT so a record left behind by an
//! interrupted run is overwritten, and polls GetChange until the change set
//! reaches INSYNC, which is Route53's signal that every authoritative name
//! server serves the record.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_route53::config::{Credentials, Region};
use aws_sdk_route53::error::DisplayErrorContext;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ChangeStatus, ResourceRecord, ResourceRecordSet, RrType,
};
use aws_sdk_route53::Client;
use tracing::{debug, info, warn};

use super::provisioner::{
    challenge_record_fqdn, ChallengeProvisioner, DnsBackendError, ProvisionedRecord,
    CHALLENGE_TTL,
};

/// Route53 is a global service fronted by the us-east-1 endpoint
const ROUTE53_REGION: &str = "us-east-1";

/// GetChange polling: 60 attempts, 5 seconds apart
const PROPAGATION_ATTEMPTS: u32 = 60;
const PROPAGATION_INTERVAL: Duration = Duration::from_secs(5);

/// Route53-backed [`ChallengeProvisioner`]
pub struct Route53Provisioner {
    client: Client,
    zone_id: String,
}

impl Route53Provisioner {
    /// Connect using static credentials when provided, otherwise the
    /// ambient AWS credential chain (environment, profile, instance role)
    pub async fn connect(
        zone_id: impl Into<String>,
        static_credentials: Option<(String, String)>,
    ) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(ROUTE53_REGION));
        if let Some((access_key_id, secret_access_key)) = static_credentials {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "certsmith-static",
            ));
        }
        let sdk_config = loader.load().await;

        Self {
            client: Client::new(&sdk_config),
            zone_id: zone_id.into(),
        }
    }

    async fn submit_change(
        &self,
        action: ChangeAction,
        fqdn: &str,
        value: &str,
    ) -> Result<Option<String>, DnsBackendError> {
        let record = ResourceRecord::builder()
            .value(quote_txt_value(value))
            .build()
            .map_err(|e| DnsBackendError::Api(e.to_string()))?;
        let record_set = ResourceRecordSet::builder()
            .name(fqdn)
            .r#type(RrType::Txt)
            .ttl(i64::from(CHALLENGE_TTL))
            .resource_records(record)
            .build()
            .map_err(|e| DnsBackendError::Api(e.to_string()))?;
        let change = Change::builder()
            .action(action.clone())
            .resource_record_set(record_set)
            .build()
            .map_err(|e| DnsBackendError::Api(e.to_string()))?;
        let batch = ChangeBatch::builder()
            .changes(change)
            .build()
            .map_err(|e| DnsBackendError::Api(e.to_string()))?;

        let response = self
            .client
            .change_resource_record_sets()
            .hosted_zone_id(&self.zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| DnsBackendError::RecordChange {
                record_name: fqdn.to_string(),
                message: format!("{} failed: {}", action.as_str(), DisplayErrorContext(&e)),
            })?;

        Ok(response.change_info().map(|info| info.id().to_string()))
    }
}

#[async_trait]
impl ChallengeProvisioner for Route53Provisioner {
    fn name(&self) -> &'static str {
        "route53"
    }

    async fn provision(
        &self,
        domain: &str,
        value: &str,
    ) -> Result<ProvisionedRecord, DnsBackendError> {
        let fqdn = challenge_record_fqdn(domain);
        info!(domain = %domain, record = %fqdn, zone_id = %self.zone_id, "Publishing challenge TXT record");

        let change_token = self.submit_change(ChangeAction::Upsert, &fqdn, value).await?;

        Ok(ProvisionedRecord {
            domain: domain.to_string(),
            fqdn,
            value: value.to_string(),
            change_token,
        })
    }

    async fn await_propagation(
        &self,
        record: &ProvisionedRecord,
    ) -> Result<bool, DnsBackendError> {
        let Some(change_id) = record.change_token.as_deref() else {
            // No change id means nothing to poll; treat the record as live.
            return Ok(true);
        };

        for attempt in 1..=PROPAGATION_ATTEMPTS {
            let response = self
                .client
                .get_change()
                .id(change_id)
                .send()
                .await
                .map_err(|e| DnsBackendError::Api(DisplayErrorContext(&e).to_string()))?;

            let status = response.change_info().map(|info| info.status().clone());
            if matches!(status, Some(ChangeStatus::Insync)) {
                debug!(record = %record.fqdn, attempt, "Challenge record in sync");
                return Ok(true);
            }

            if attempt < PROPAGATION_ATTEMPTS {
                debug!(record = %record.fqdn, attempt, "Change still pending");
                tokio::time::sleep(PROPAGATION_INTERVAL).await;
            }
        }

        warn!(record = %record.fqdn, "Change never reached INSYNC");
        Ok(false)
    }

    async fn clean(&self, record: &ProvisionedRecord) -> Result<(), DnsBackendError> {
        info!(record = %record.fqdn, "Removing challenge TXT record");
        self.submit_change(ChangeAction::Delete, &record.fqdn, &record.value)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Route53Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route53Provisioner")
            .field("zone_id", &self.zone_id)
            .finish()
    }
}

/// TXT record data must be wrapped in double quotes
fn quote_txt_value(value: &str) -> String {
    format!("\"{}\"", value)
}
