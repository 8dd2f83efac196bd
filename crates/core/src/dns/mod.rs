//! DNS-01 challenge record management
//!
//! The ACME server proves domain control by looking up a TXT record under
//! `_acme-challenge.{domain}`; this module creates that record, waits for
//! the backend to report it live, and removes it afterwards.
//!
//! # Architecture
//!
//! - [`ChallengeProvisioner`] - Trait the issuance flow drives records through
//! - [`Route53Provisioner`] - AWS Route53 backend
//! - [`dns01_record_value`] - Derives the TXT value from a key authorization

mod provisioner;
mod route53;

pub use provisioner::{
    challenge_record_fqdn, dns01_record_value, ChallengeProvisioner, DnsBackendError,
    ProvisionedRecord, ACME_CHALLENGE_RECORD, CHALLENGE_TTL,
};
pub use route53::Route53Provisioner;
