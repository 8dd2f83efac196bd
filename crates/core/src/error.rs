//! Issuance error taxonomy

use std::io;

use thiserror::Error;

use crate::dns::DnsBackendError;
use crate::protocol::{AuthorizationStatus, ChallengeStatus};

/// Errors that can abort an issuance run
///
/// All variants are fatal for the current run; the next scheduled invocation
/// starts fresh. DNS record cleanup is attempted regardless of which variant
/// unwinds.
#[derive(Debug, Error)]
pub enum AcmeError {
    /// A required parameter is missing or unusable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The directory requires agreeing to terms of service the operator has
    /// not accepted
    #[error(
        "ACME server requires agreement to the terms of service at {url}; \
         set agree_to_terms_url to this URL to accept them"
    )]
    TermsNotAccepted { url: String },

    /// The ACME server rejected a request
    #[error("ACME protocol error ({kind}): {detail}")]
    Protocol {
        kind: ProtocolErrorKind,
        detail: String,
    },

    /// The offered challenges for a domain did not include dns-01
    #[error("no dns-01 challenge offered for domain '{0}'")]
    NoDns01Challenge(String),

    /// A domain authorization did not reach a terminal state in time
    #[error("timed out waiting for ACME server to verify domain '{domain}' after {seconds} seconds")]
    AuthorizationTimeout { domain: String, seconds: u64 },

    /// The finalized order did not reach a terminal state in time
    #[error("timed out waiting for certificate order to complete after {seconds} seconds")]
    OrderTimeout { seconds: u64 },

    /// The server reported a challenge terminally failed
    #[error("challenge for domain '{domain}' failed with status '{status}': {detail}")]
    ChallengeFailed {
        domain: String,
        status: ChallengeStatus,
        detail: String,
    },

    /// The authorization reached a terminal failure state
    #[error("authorization for domain '{domain}' ended in status '{status}': {detail}")]
    AuthorizationFailed {
        domain: String,
        status: AuthorizationStatus,
        detail: String,
    },

    /// The DNS backend never confirmed the challenge record propagated
    #[error("DNS challenge record for domain '{domain}' never propagated")]
    PropagationTimeout { domain: String },

    /// DNS record creation or removal failed
    #[error("DNS backend error: {0}")]
    DnsBackend(#[from] DnsBackendError),

    /// An issued or on-disk certificate could not be parsed
    #[error("failed to parse certificate: {0}")]
    CertificateParse(String),

    /// Key loading, generation, or CSR construction failed
    #[error("key material error: {0}")]
    Crypto(String),

    /// Writing certificate or key files failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Classification of ACME server rejections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// The server considered the request malformed
    Malformed,
    /// The server is rate limiting this account or endpoint
    RateLimited,
    /// The request was not authorized for this account
    Unauthorized,
    /// The request never produced a usable response
    Transport,
    /// Any other problem type
    Other,
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolErrorKind::Malformed => "malformed",
            ProtocolErrorKind::RateLimited => "rate-limited",
            ProtocolErrorKind::Unauthorized => "unauthorized",
            ProtocolErrorKind::Transport => "transport",
            ProtocolErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Errors specific to certificate/key persistence
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// File mode could not be interpreted
    #[error("invalid file mode: {0}")]
    InvalidMode(String),
}
