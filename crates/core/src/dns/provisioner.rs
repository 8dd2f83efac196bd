//! Challenge record provisioning trait
//!
//! Defines the interface the issuance flow uses to publish and remove
//! DNS-01 TXT records, independent of the hosting backend.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from the DNS backend
#[derive(Debug, Error)]
pub enum DnsBackendError {
    /// Authentication failed with the DNS backend
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Record creation or deletion was rejected
    #[error("failed to change TXT record '{record_name}': {message}")]
    RecordChange {
        record_name: String,
        message: String,
    },

    /// API request failed
    #[error("DNS API request failed: {0}")]
    Api(String),

    /// Credential loading failed
    #[error("failed to load DNS credentials: {0}")]
    Credentials(String),
}

/// Handle for a published challenge record
///
/// Returned by [`ChallengeProvisioner::provision`] and passed back for
/// propagation checks and cleanup.
#[derive(Debug, Clone)]
pub struct ProvisionedRecord {
    /// Domain as requested, wildcard prefix included
    pub domain: String,
    /// Full record name, e.g. `_acme-challenge.example.com`
    pub fqdn: String,
    /// TXT value the ACME server will look up
    pub value: String,
    /// Backend change identifier for propagation polling, when the backend
    /// issues one
    pub change_token: Option<String>,
}

/// DNS backend capable of serving DNS-01 challenges
///
/// Implementations must tolerate concurrent calls and treat `clean` as
/// idempotent; cleanup runs even when validation failed.
#[async_trait]
pub trait ChallengeProvisioner: Send + Sync {
    /// Backend name for logging (e.g. "route53")
    fn name(&self) -> &'static str;

    /// Publish the challenge TXT record for `domain`
    ///
    /// Replaces any stale record with the same name left behind by an
    /// earlier run.
    async fn provision(
        &self,
        domain: &str,
        value: &str,
    ) -> Result<ProvisionedRecord, DnsBackendError>;

    /// Wait until the backend reports the record live
    ///
    /// Returns `Ok(false)` when the backend never confirmed within its
    /// polling budget; the caller decides whether that aborts the run.
    async fn await_propagation(
        &self,
        record: &ProvisionedRecord,
    ) -> Result<bool, DnsBackendError>;

    /// Remove a previously published record
    async fn clean(&self, record: &ProvisionedRecord) -> Result<(), DnsBackendError>;
}

/// ACME challenge record name prefix
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// TTL for challenge records, in seconds
pub const CHALLENGE_TTL: u32 = 60;

/// Build the full ACME challenge record name
///
/// A wildcard identifier validates at its base name, so `*.example.com`
/// and `example.com` both map to `_acme-challenge.example.com`.
pub fn challenge_record_fqdn(domain: &str) -> String {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{}.{}", ACME_CHALLENGE_RECORD, base)
}

/// Derive the dns-01 TXT record value from a key authorization
///
/// RFC 8555 §8.4: base64url(SHA-256(key_authorization)), unpadded.
pub fn dns01_record_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}
