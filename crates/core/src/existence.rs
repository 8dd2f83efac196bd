//! On-disk certificate satisfaction check
//!
//! Decides whether the declared certificate already exists and still
//! matches the resource, so an issuance run can exit before touching the
//! network. Every check fails closed: unreadable or unparseable files mean
//! "not satisfied" and trigger reissuance rather than an error.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::debug;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::X509Certificate;

use certsmith_config::CertificateResource;

use crate::keys::KeyMaterial;
use crate::request::CertificateRequest;

const SECONDS_PER_DAY: i64 = 86_400;

/// Whether the certificate on disk satisfies the resource at `now`
///
/// Satisfied means: both files exist and parse, the certificate embeds the
/// key's public half, the common name matches, expiry is further out than
/// the renewal window, and the SAN set equals `{common_name} ∪
/// alternate_names` exactly. Each failing check logs its reason at debug.
pub fn certificate_satisfied(resource: &CertificateResource, now: DateTime<Utc>) -> bool {
    let cert_path = &resource.certificate_path;
    let key_path = &resource.private_key_path;

    if !cert_path.exists() {
        debug!(path = %cert_path.display(), "Certificate file does not exist");
        return false;
    }
    if !key_path.exists() {
        debug!(path = %key_path.display(), "Private key file does not exist");
        return false;
    }

    let key_pem = match std::fs::read_to_string(key_path) {
        Ok(pem) => pem,
        Err(e) => {
            debug!(path = %key_path.display(), error = %e, "Private key is unreadable");
            return false;
        }
    };
    let key = match KeyMaterial::from_pem(&key_pem) {
        Ok(key) => key,
        Err(e) => {
            debug!(path = %key_path.display(), error = %e, "Private key does not parse");
            return false;
        }
    };

    let cert_bytes = match std::fs::read(cert_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %cert_path.display(), error = %e, "Certificate is unreadable");
            return false;
        }
    };
    // With a combined file the leaf is the first PEM block.
    let pem = match x509_parser::pem::parse_x509_pem(&cert_bytes) {
        Ok((_, pem)) => pem,
        Err(e) => {
            debug!(path = %cert_path.display(), error = %e, "Certificate is not PEM");
            return false;
        }
    };
    let cert = match pem.parse_x509() {
        Ok(cert) => cert,
        Err(e) => {
            debug!(path = %cert_path.display(), error = %e, "Certificate does not parse");
            return false;
        }
    };

    let spki = match key.public_key_der() {
        Ok(spki) => spki,
        Err(e) => {
            debug!(path = %key_path.display(), error = %e, "Could not encode public key");
            return false;
        }
    };
    if cert.public_key().raw != spki.as_slice() {
        debug!("Certificate public key does not match the private key");
        return false;
    }

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok());
    if common_name != Some(resource.common_name.as_str()) {
        debug!(
            expected = %resource.common_name,
            found = common_name.unwrap_or("<none>"),
            "Certificate common name does not match"
        );
        return false;
    }

    let renew_at =
        cert.validity().not_after.timestamp() - i64::from(resource.renew_within_days) * SECONDS_PER_DAY;
    if now.timestamp() > renew_at {
        debug!(
            not_after = cert.validity().not_after.timestamp(),
            renew_within_days = resource.renew_within_days,
            "Certificate is within its renewal window"
        );
        return false;
    }

    let request = CertificateRequest::from(resource);
    let cert_sans = certificate_san_set(&cert);
    if cert_sans != request.san_set() {
        debug!(
            expected = ?request.san_set(),
            found = ?cert_sans,
            "Certificate SAN set does not match"
        );
        return false;
    }

    true
}

fn certificate_san_set(cert: &X509Certificate<'_>) -> BTreeSet<String> {
    let mut sans = BTreeSet::new();
    for extension in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
            for name in &san.general_names {
                if let GeneralName::DNSName(dns) = name {
                    sans.insert(dns.to_string());
                }
            }
        }
    }
    sans
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    const KEY_A_PEM: &str = include_str!("../testdata/key_a.pem");
    const KEY_B_PEM: &str = include_str!("../testdata/key_b.pem");

    fn resource(dir: &Path, alternate_names: &[&str]) -> CertificateResource {
        serde_json::from_value(serde_json::json!({
            "certificate_path": dir.join("cert.pem"),
            "private_key_path": dir.join("key.pem"),
            "acme_private_key_path": dir.join("account.key"),
            "common_name": "www.example.com",
            "alternate_names": alternate_names,
            "directory": "https://acme.example/directory",
            "contact": "mailto:ops@example.com",
            "route53_zone_id": "Z3M3LMPEXAMPLE"
        }))
        .unwrap()
    }

    fn write_cert_until(dir: &Path, key_pem: &str, sans: &[&str], not_after: time::OffsetDateTime) {
        let key_pair = KeyPair::from_pem(key_pem).unwrap();
        let mut params =
            CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>())
                .unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "www.example.com");
        params.distinguished_name = dn;
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
        params.not_after = not_after;
        let cert = params.self_signed(&key_pair).unwrap();

        std::fs::write(dir.join("cert.pem"), cert.pem()).unwrap();
        std::fs::write(dir.join("key.pem"), key_pem).unwrap();
    }

    fn write_cert(dir: &Path, key_pem: &str, sans: &[&str], valid_days: i64) {
        let not_after = time::OffsetDateTime::now_utc() + time::Duration::days(valid_days);
        write_cert_until(dir, key_pem, sans, not_after);
    }

    #[test]
    fn matching_certificate_is_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        write_cert(dir.path(), KEY_A_PEM, &["www.example.com", "example.com"], 90);
        let resource = resource(dir.path(), &["example.com"]);
        assert!(certificate_satisfied(&resource, Utc::now()));
    }

    #[test]
    fn missing_files_are_not_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        let resource = resource(dir.path(), &[]);
        assert!(!certificate_satisfied(&resource, Utc::now()));

        // Certificate present but key absent.
        write_cert(dir.path(), KEY_A_PEM, &["www.example.com"], 90);
        std::fs::remove_file(dir.path().join("key.pem")).unwrap();
        assert!(!certificate_satisfied(&resource, Utc::now()));
    }

    #[test]
    fn key_mismatch_is_not_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        write_cert(dir.path(), KEY_A_PEM, &["www.example.com"], 90);
        std::fs::write(dir.path().join("key.pem"), KEY_B_PEM).unwrap();
        let resource = resource(dir.path(), &[]);
        assert!(!certificate_satisfied(&resource, Utc::now()));
    }

    #[test]
    fn expiring_certificate_is_not_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        // Expires in 10 days, renewal window is 30.
        write_cert(dir.path(), KEY_A_PEM, &["www.example.com"], 10);
        let resource = resource(dir.path(), &[]);
        assert!(!certificate_satisfied(&resource, Utc::now()));
    }

    #[test]
    fn renewal_starts_strictly_after_the_window_boundary() {
        let dir = tempfile::tempdir().unwrap();
        // Whole-second expiry so the boundary arithmetic is exact.
        let not_after_ts = Utc::now().timestamp() + 90 * SECONDS_PER_DAY;
        write_cert_until(
            dir.path(),
            KEY_A_PEM,
            &["www.example.com"],
            time::OffsetDateTime::from_unix_timestamp(not_after_ts).unwrap(),
        );
        let resource = resource(dir.path(), &[]);

        // renew_within_days defaults to 30.
        let boundary = not_after_ts - 30 * SECONDS_PER_DAY;
        let at_boundary = DateTime::from_timestamp(boundary, 0).unwrap();
        let past_boundary = DateTime::from_timestamp(boundary + 1, 0).unwrap();

        assert!(certificate_satisfied(&resource, at_boundary));
        assert!(!certificate_satisfied(&resource, past_boundary));
    }

    #[test]
    fn san_set_mismatch_is_not_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        write_cert(dir.path(), KEY_A_PEM, &["www.example.com", "old.example.com"], 90);
        let resource = resource(dir.path(), &["new.example.com"]);
        assert!(!certificate_satisfied(&resource, Utc::now()));
    }

    #[test]
    fn san_order_does_not_matter() {
        let dir = tempfile::tempdir().unwrap();
        write_cert(
            dir.path(),
            KEY_A_PEM,
            &["b.example.com", "www.example.com", "a.example.com"],
            90,
        );
        let resource = resource(dir.path(), &["a.example.com", "b.example.com"]);
        assert!(certificate_satisfied(&resource, Utc::now()));
    }

    #[test]
    fn garbage_certificate_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        write_cert(dir.path(), KEY_A_PEM, &["www.example.com"], 90);
        std::fs::write(dir.path().join("cert.pem"), "not a certificate").unwrap();
        let resource = resource(dir.path(), &[]);
        assert!(!certificate_satisfied(&resource, Utc::now()));
    }
}
