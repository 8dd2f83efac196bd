//! ACME DNS-01 certificate issuance core
//!
//! Treats a certificate as a managed resource: given a declared
//! [`CertificateResource`], ensure the certificate file exists on disk,
//! matches its private key, covers the declared names, and is not near
//! expiry — issuing or renewing through an ACME directory with DNS-01
//! challenges answered via Route53 when it is not.
//!
//! # Architecture
//!
//! - [`existence`] - Read-only satisfaction check; a satisfied resource
//!   causes zero network calls and zero file writes
//! - [`keys`] - RSA key loading/generation, CSR construction, chain
//!   splitting
//! - [`client`] - The [`DirectoryClient`] seam and its HTTPS
//!   implementation with JWS signing and nonce handling
//! - [`dns`] - The [`ChallengeProvisioner`] seam and the Route53 backend
//! - [`orchestrator`] - The issuance state machine: register, order,
//!   authorize per domain, finalize, download
//! - [`storage`] - Mode-aware persistence of certificate, chain, and key
//!
//! # Example
//!
//! ```no_run
//! use certsmith_config::CertificateResource;
//! use certsmith_core::ensure_certificate;
//!
//! # async fn run(resource: CertificateResource) -> Result<(), certsmith_core::AcmeError> {
//! match ensure_certificate(&resource).await? {
//!     certsmith_core::EnsureOutcome::AlreadySatisfied => {}
//!     certsmith_core::EnsureOutcome::Issued => {
//!         println!("certificate written to {}", resource.certificate_path.display());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod dns;
pub mod error;
pub mod existence;
pub mod jose;
pub mod keys;
pub mod orchestrator;
pub mod protocol;
pub mod request;
pub mod storage;

use std::time::Duration;

use chrono::Utc;
use tracing::info;

use certsmith_config::CertificateResource;

pub use crate::client::{DirectoryClient, HttpAcmeClient};
pub use crate::dns::{ChallengeProvisioner, Route53Provisioner};
pub use crate::error::{AcmeError, ProtocolErrorKind, StorageError};
pub use crate::existence::certificate_satisfied;
pub use crate::keys::KeyMaterial;
pub use crate::orchestrator::{CertificateOrchestrator, IssuedCertificate};
pub use crate::request::CertificateRequest;

/// Result of one `ensure_certificate` run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The on-disk certificate already satisfies the resource
    AlreadySatisfied,
    /// A certificate was issued and written
    Issued,
}

/// Ensure the declared certificate exists and is valid on disk
///
/// Validates the resource, consults the existence check, and only when the
/// certificate is missing, mismatched, or near expiry runs the full ACME
/// flow and persists the result.
pub async fn ensure_certificate(
    resource: &CertificateResource,
) -> Result<EnsureOutcome, AcmeError> {
    resource
        .validate_resource()
        .map_err(|e| AcmeError::Configuration(e.to_string()))?;

    if certificate_satisfied(resource, Utc::now()) {
        info!(
            common_name = %resource.common_name,
            path = %resource.certificate_path.display(),
            "Certificate already satisfies the resource"
        );
        return Ok(EnsureOutcome::AlreadySatisfied);
    }

    let account_key = KeyMaterial::load(&resource.acme_private_key_path)?;
    let certificate_key =
        KeyMaterial::load_or_generate(&resource.private_key_path, resource.generate_private_key)?;
    let request = CertificateRequest::from(resource);

    let client = HttpAcmeClient::connect(
        &resource.directory,
        &account_key,
        resource.contact.clone(),
        resource.agree_to_terms_url.as_deref(),
    )
    .await?;
    let static_credentials = resource
        .aws_access_key_id
        .clone()
        .zip(resource.aws_secret_access_key.clone());
    let provisioner =
        Route53Provisioner::connect(resource.route53_zone_id.clone(), static_credentials).await;

    let orchestrator = CertificateOrchestrator::new(
        client,
        provisioner,
        Duration::from_secs(resource.authorization_timeout),
        Duration::from_secs(resource.order_timeout()),
    );
    let issued = orchestrator.issue(&request, &certificate_key).await?;

    storage::persist_issuance(resource, &issued.leaf, &issued.chain, &certificate_key)?;
    Ok(EnsureOutcome::Issued)
}
