//! Resource-parameter surface for certsmith managed certificates
//!
//! A configuration-management agent declares a certificate it wants to exist
//! on disk; this crate models that declaration as [`CertificateResource`] and
//! validates it before the issuance core touches the network or filesystem.
//!
//! # Module Organization
//!
//! - [`CertificateResource`]: the full parameter set for one managed
//!   certificate (paths, certificate intent, file modes, protocol, timing,
//!   DNS backend)
//! - [`ConfigError`]: validation failures, surfaced verbatim to the caller

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError};

// ============================================================================
// Errors
// ============================================================================

/// Configuration validation failure
///
/// Fatal and never retried; the declaring agent must fix the resource.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required parameter is missing or malformed
    #[error("invalid resource parameter '{field}': {detail}")]
    Invalid { field: String, detail: String },

    /// A file mode string could not be parsed as octal
    #[error("invalid file mode '{value}': expected an octal string such as \"0644\"")]
    InvalidMode { value: String },
}

// ============================================================================
// Certificate Resource
// ============================================================================

/// Declaration of one managed certificate
///
/// Mirrors the parameters the management layer passes for an
/// "ensure this certificate exists" resource. All defaults are chosen so
/// that omitting a field is safe (restrictive key mode, no key generation).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CertificateResource {
    // --- identity / paths ---
    /// Where the issued certificate is written
    pub certificate_path: PathBuf,

    /// Optional separate file for the issuer chain
    pub certificate_chain_path: Option<PathBuf>,

    /// Private key backing the certificate
    pub private_key_path: PathBuf,

    /// RSA key used to sign ACME protocol requests
    ///
    /// Distinct from `private_key_path`: RFC 8555 forbids reusing the
    /// account key in the CSR. The consuming agent passes its own identity
    /// key path here when the operator does not configure one.
    pub acme_private_key_path: PathBuf,

    // --- certificate intent ---
    /// Subject common name
    #[validate(length(min = 1, message = "common_name must not be empty"))]
    pub common_name: String,

    /// Additional DNS names covered by the certificate
    #[serde(default)]
    pub alternate_names: Vec<String>,

    /// Generate the private key when it does not exist yet
    #[serde(default)]
    pub generate_private_key: bool,

    /// Write leaf and chain into `certificate_path` as one file
    #[serde(default)]
    pub combine_certificate_and_chain: bool,

    // --- file modes ---
    /// Octal mode for the certificate file
    #[serde(default = "default_certificate_mode")]
    #[validate(custom(function = "validate_octal_mode"))]
    pub certificate_mode: String,

    /// Octal mode for the chain file
    #[serde(default = "default_certificate_mode")]
    #[validate(custom(function = "validate_octal_mode"))]
    pub certificate_chain_mode: String,

    /// Octal mode for a newly generated private key
    #[serde(default = "default_private_key_mode")]
    #[validate(custom(function = "validate_octal_mode"))]
    pub private_key_mode: String,

    // --- protocol ---
    /// ACME directory URL
    #[validate(custom(function = "validate_http_url"))]
    pub directory: String,

    /// Contact URI registered with the account (e.g. `mailto:ops@example.com`)
    #[validate(custom(function = "validate_contact_uri"))]
    pub contact: String,

    /// Terms-of-service URL the operator has agreed to
    ///
    /// Must match the URL the directory publishes, otherwise registration
    /// fails without creating an account.
    pub agree_to_terms_url: Option<String>,

    // --- timing ---
    /// Seconds to wait for one domain authorization to reach a terminal state
    #[serde(default = "default_authorization_timeout")]
    #[validate(range(min = 1, message = "authorization_timeout must be positive"))]
    pub authorization_timeout: u64,

    /// Seconds to wait for the finalized order; falls back to
    /// `authorization_timeout` when unset
    pub order_timeout: Option<u64>,

    /// Renew when the certificate expires within this many days
    #[serde(default = "default_renew_within_days")]
    pub renew_within_days: u32,

    // --- DNS backend ---
    /// Static AWS credentials; when absent the ambient credential chain is used
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,

    /// Route53 hosted zone holding the challenge records
    #[validate(length(min = 1, message = "route53_zone_id must not be empty"))]
    pub route53_zone_id: String,
}

impl CertificateResource {
    /// Validate the resource, failing before any network or file activity
    pub fn validate_resource(&self) -> Result<(), ConfigError> {
        Validate::validate(self).map_err(|errors| {
            // Report the first field error; the agent fixes one at a time anyway.
            let (field, error) = errors
                .field_errors()
                .into_iter()
                .next()
                .map(|(field, errs)| (field.to_string(), errs.first().cloned()))
                .unwrap_or_else(|| ("resource".to_string(), None));
            let detail = error
                .and_then(|e| e.message.map(|m| m.to_string()))
                .unwrap_or_else(|| "validation failed".to_string());
            ConfigError::Invalid { field, detail }
        })?;

        match (&self.aws_access_key_id, &self.aws_secret_access_key) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::Invalid {
                    field: "aws_secret_access_key".to_string(),
                    detail: "aws_access_key_id and aws_secret_access_key must be set together"
                        .to_string(),
                });
            }
            _ => {}
        }

        // Parse modes eagerly so bad values fail here, not during persistence.
        for mode in [
            &self.certificate_mode,
            &self.certificate_chain_mode,
            &self.private_key_mode,
        ] {
            parse_mode(mode)?;
        }

        Ok(())
    }

    /// Effective order-polling timeout in seconds
    pub fn order_timeout(&self) -> u64 {
        self.order_timeout.unwrap_or(self.authorization_timeout)
    }

    /// Certificate file mode as a Unix permission value
    pub fn certificate_mode(&self) -> Result<u32, ConfigError> {
        parse_mode(&self.certificate_mode)
    }

    /// Chain file mode as a Unix permission value
    pub fn certificate_chain_mode(&self) -> Result<u32, ConfigError> {
        parse_mode(&self.certificate_chain_mode)
    }

    /// Private key file mode as a Unix permission value
    pub fn private_key_mode(&self) -> Result<u32, ConfigError> {
        parse_mode(&self.private_key_mode)
    }
}

/// Parse an octal mode string such as `"0644"` or `"600"`
pub fn parse_mode(value: &str) -> Result<u32, ConfigError> {
    let digits = value.trim().trim_start_matches("0o");
    if digits.is_empty() {
        return Err(ConfigError::InvalidMode {
            value: value.to_string(),
        });
    }
    let mode = u32::from_str_radix(digits, 8).map_err(|_| ConfigError::InvalidMode {
        value: value.to_string(),
    })?;
    if mode > 0o7777 {
        return Err(ConfigError::InvalidMode {
            value: value.to_string(),
        });
    }
    Ok(mode)
}

// ============================================================================
// Validation Functions
// ============================================================================

fn validate_octal_mode(value: &str) -> Result<(), ValidationError> {
    parse_mode(value).map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("octal_mode");
        err.message = Some("expected an octal string such as \"0644\"".into());
        err
    })
}

fn validate_http_url(value: &str) -> Result<(), ValidationError> {
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("http_url");
        err.message = Some("directory must be an http(s) URL".into());
        Err(err)
    }
}

fn validate_contact_uri(value: &str) -> Result<(), ValidationError> {
    // RFC 8555 contacts are URIs; "mailto:" is the common case.
    if value.contains(':') && !value.starts_with(':') {
        Ok(())
    } else {
        let mut err = ValidationError::new("contact_uri");
        err.message = Some("contact must be a URI such as mailto:ops@example.com".into());
        Err(err)
    }
}

// ============================================================================
// Default Value Functions
// ============================================================================

fn default_certificate_mode() -> String {
    "0644".to_string()
}

fn default_private_key_mode() -> String {
    "0600".to_string()
}

fn default_authorization_timeout() -> u64 {
    300
}

fn default_renew_within_days() -> u32 {
    30
}
