//! Issuance state machine
//!
//! Drives one certificate order end to end: account registration, one
//! DNS-01 authorization per pending domain, finalization, and certificate
//! download. DNS challenge records are removed exactly once per successful
//! provision, whether validation succeeded, failed, or timed out.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::client::DirectoryClient;
use crate::dns::{dns01_record_value, ChallengeProvisioner, ProvisionedRecord};
use crate::error::{AcmeError, ProtocolErrorKind};
use crate::keys::{split_chain, KeyMaterial};
use crate::protocol::{
    Account, Authorization, AuthorizationStatus, Challenge, ChallengeStatus, Order, OrderStatus,
    CHALLENGE_TYPE_DNS01,
};
use crate::request::CertificateRequest;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The downloaded certificate, split into leaf and issuer chain
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub leaf: String,
    pub chain: Vec<String>,
}

/// Runs the ACME issuance flow against a directory and a DNS backend
pub struct CertificateOrchestrator<C, P> {
    client: C,
    provisioner: P,
    authorization_timeout: Duration,
    order_timeout: Duration,
}

impl<C: DirectoryClient, P: ChallengeProvisioner> CertificateOrchestrator<C, P> {
    pub fn new(
        client: C,
        provisioner: P,
        authorization_timeout: Duration,
        order_timeout: Duration,
    ) -> Self {
        Self {
            client,
            provisioner,
            authorization_timeout,
            order_timeout,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    /// Issue a certificate for `request`, signing the CSR with `key`
    ///
    /// Any error aborts the run; nothing is written to disk here, so a
    /// failed run leaves the on-disk state untouched.
    pub async fn issue(
        &self,
        request: &CertificateRequest,
        key: &KeyMaterial,
    ) -> Result<IssuedCertificate, AcmeError> {
        let account = self.client.register_account().await?;

        let identifiers = request.identifiers();
        let order = self.client.new_order(&account, &identifiers).await?;

        for authorization_url in &order.authorization_urls {
            let authorization = self
                .client
                .fetch_authorization(&account, authorization_url)
                .await?;

            match authorization.status {
                AuthorizationStatus::Valid => {
                    // The server cached a prior validation for this domain.
                    debug!(domain = %authorization.domain, "Authorization already valid, skipping");
                }
                AuthorizationStatus::Pending => {
                    self.authorize_domain(&account, &authorization).await?;
                }
                status => {
                    return Err(AcmeError::AuthorizationFailed {
                        domain: authorization.domain,
                        status,
                        detail: "authorization is in a terminal state before any challenge"
                            .to_string(),
                    });
                }
            }
        }

        let csr = key.build_csr(&request.common_name, &identifiers)?;
        let order = self.client.finalize_order(&account, &order, &csr).await?;
        let order = self.poll_order(&account, order).await?;

        let certificate_url = order.certificate_url.ok_or_else(|| AcmeError::Protocol {
            kind: ProtocolErrorKind::Malformed,
            detail: "order is valid but carries no certificate URL".to_string(),
        })?;
        let pem = self
            .client
            .download_certificate(&account, &certificate_url)
            .await?;
        let (leaf, chain) = split_chain(&pem)?;

        info!(
            common_name = %request.common_name,
            chain_length = chain.len(),
            "Certificate issued"
        );
        Ok(IssuedCertificate { leaf, chain })
    }

    /// Run one domain's DNS-01 challenge, cleaning the record on every exit
    async fn authorize_domain(
        &self,
        account: &Account,
        authorization: &Authorization,
    ) -> Result<(), AcmeError> {
        let domain = &authorization.domain;
        let challenge = select_dns01(authorization)?;

        let key_authorization = self.client.key_authorization(&challenge.token);
        let record_value = dns01_record_value(&key_authorization);

        info!(domain = %domain, "Starting DNS-01 authorization");
        let record = self.provisioner.provision(domain, &record_value).await?;

        let result = self
            .drive_challenge(account, authorization, challenge, &record)
            .await;

        // The issuance failure, if any, takes precedence over cleanup noise.
        if let Err(e) = self.provisioner.clean(&record).await {
            warn!(domain = %domain, error = %e, "Failed to remove challenge record");
        }

        result
    }

    async fn drive_challenge(
        &self,
        account: &Account,
        authorization: &Authorization,
        challenge: &Challenge,
        record: &ProvisionedRecord,
    ) -> Result<(), AcmeError> {
        let domain = &authorization.domain;

        if !self.provisioner.await_propagation(record).await? {
            return Err(AcmeError::PropagationTimeout {
                domain: domain.clone(),
            });
        }

        self.client
            .validate_challenge(account, &challenge.url)
            .await?;

        // Challenge and authorization polls share one deadline.
        let deadline = Instant::now() + self.authorization_timeout;
        let timeout_seconds = self.authorization_timeout.as_secs();

        loop {
            let current = self.client.fetch_challenge(account, &challenge.url).await?;
            match current.status {
                ChallengeStatus::Valid => break,
                ChallengeStatus::Invalid => {
                    let detail = current
                        .error
                        .map(|p| p.describe())
                        .unwrap_or_else(|| "no detail reported".to_string());
                    return Err(AcmeError::ChallengeFailed {
                        domain: domain.clone(),
                        status: current.status,
                        detail,
                    });
                }
                ChallengeStatus::Pending | ChallengeStatus::Processing => {
                    if Instant::now() >= deadline {
                        return Err(AcmeError::AuthorizationTimeout {
                            domain: domain.clone(),
                            seconds: timeout_seconds,
                        });
                    }
                    sleep(POLL_INTERVAL).await;
                }
            }
        }

        // A challenge can validate before the authorization record updates.
        loop {
            let current = self
                .client
                .fetch_authorization(account, &authorization.url)
                .await?;
            match current.status {
                AuthorizationStatus::Valid => {
                    info!(domain = %domain, "Domain authorized");
                    return Ok(());
                }
                AuthorizationStatus::Pending => {
                    if Instant::now() >= deadline {
                        return Err(AcmeError::AuthorizationTimeout {
                            domain: domain.clone(),
                            seconds: timeout_seconds,
                        });
                    }
                    sleep(POLL_INTERVAL).await;
                }
                status => {
                    let detail = select_dns01(&current)
                        .ok()
                        .and_then(|c| c.error.clone())
                        .map(|p| p.describe())
                        .unwrap_or_else(|| "no detail reported".to_string());
                    return Err(AcmeError::AuthorizationFailed {
                        domain: domain.clone(),
                        status,
                        detail,
                    });
                }
            }
        }
    }

    async fn poll_order(&self, account: &Account, mut order: Order) -> Result<Order, AcmeError> {
        let deadline = Instant::now() + self.order_timeout;
        let timeout_seconds = self.order_timeout.as_secs();

        loop {
            match order.status {
                OrderStatus::Valid => return Ok(order),
                OrderStatus::Invalid => {
                    return Err(AcmeError::Protocol {
                        kind: ProtocolErrorKind::Other,
                        detail: "certificate order ended in status 'invalid'".to_string(),
                    });
                }
                // `ready` can appear transiently while the server picks up
                // the finalize request.
                OrderStatus::Pending | OrderStatus::Processing | OrderStatus::Ready => {
                    if Instant::now() >= deadline {
                        return Err(AcmeError::OrderTimeout {
                            seconds: timeout_seconds,
                        });
                    }
                    sleep(POLL_INTERVAL).await;
                    order = self.client.fetch_order(account, &order.url).await?;
                }
            }
        }
    }
}

fn select_dns01(authorization: &Authorization) -> Result<&Challenge, AcmeError> {
    authorization
        .challenges
        .iter()
        .find(|c| c.kind == CHALLENGE_TYPE_DNS01)
        .ok_or_else(|| AcmeError::NoDns01Challenge(authorization.domain.clone()))
}
