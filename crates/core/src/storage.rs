//! Certificate and key persistence
//!
//! Files are written with the resource's declared octal modes. The mode is
//! enforced even when the file already exists, since OpenOptions only
//! applies it at creation.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use tracing::info;

use certsmith_config::CertificateResource;

use crate::error::{AcmeError, StorageError};
use crate::keys::KeyMaterial;

/// Write `contents` to `path` with the given Unix permission bits
pub fn write_file_with_mode(path: &Path, contents: &str, mode: u32) -> Result<(), StorageError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }

    Ok(())
}

/// Persist the outcome of a successful issuance
///
/// The private key is written only when it was generated during this run;
/// a pre-existing key file is never rewritten. The chain lands in the
/// certificate file, the chain file, or both, per the resource.
pub fn persist_issuance(
    resource: &CertificateResource,
    leaf: &str,
    chain: &[String],
    key: &KeyMaterial,
) -> Result<(), AcmeError> {
    if key.newly_generated() {
        let mode = resource
            .private_key_mode()
            .map_err(|e| StorageError::InvalidMode(e.to_string()))?;
        write_file_with_mode(&resource.private_key_path, key.pem(), mode)?;
        info!(path = %resource.private_key_path.display(), "Wrote new private key");
    }

    let chain_pem = chain.concat();
    let certificate_contents = if resource.combine_certificate_and_chain {
        format!("{}{}", leaf, chain_pem)
    } else {
        leaf.to_string()
    };
    let mode = resource
        .certificate_mode()
        .map_err(|e| StorageError::InvalidMode(e.to_string()))?;
    write_file_with_mode(&resource.certificate_path, &certificate_contents, mode)?;
    info!(path = %resource.certificate_path.display(), "Wrote certificate");

    if let Some(chain_path) = &resource.certificate_chain_path {
        let mode = resource
            .certificate_chain_mode()
            .map_err(|e| StorageError::InvalidMode(e.to_string()))?;
        write_file_with_mode(chain_path, &chain_pem, mode)?;
        info!(path = %chain_path.display(), "Wrote certificate chain");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const KEY_A_PEM: &str = include_str!("../testdata/key_a.pem");

    fn resource_json(dir: &Path) -> serde_json::Value {
        serde_json::json!({
            "certificate_path": dir.join("cert.pem"),
            "certificate_chain_path": dir.join("chain.pem"),
            "private_key_path": dir.join("key.pem"),
            "acme_private_key_path": dir.join("account.key"),
            "common_name": "www.example.com",
            "directory": "https://acme.example/directory",
            "contact": "mailto:ops@example.com",
            "route53_zone_id": "Z3M3LMPEXAMPLE"
        })
    }

    #[cfg(unix)]
    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn write_applies_mode_on_create_and_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.pem");

        write_file_with_mode(&path, "first", 0o600).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");
        #[cfg(unix)]
        assert_eq!(mode_of(&path), 0o600);

        // Rewrite with a different mode; the new mode must win.
        write_file_with_mode(&path, "second", 0o644).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        #[cfg(unix)]
        assert_eq!(mode_of(&path), 0o644);
    }

    #[test]
    fn existing_key_file_is_never_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let resource: CertificateResource =
            serde_json::from_value(resource_json(dir.path())).unwrap();
        std::fs::write(&resource.private_key_path, KEY_A_PEM).unwrap();

        let key = KeyMaterial::from_pem(KEY_A_PEM).unwrap();
        persist_issuance(&resource, "LEAF\n", &["CHAIN\n".to_string()], &key).unwrap();

        // Loaded key, not generated: file content untouched.
        assert_eq!(
            std::fs::read_to_string(&resource.private_key_path).unwrap(),
            KEY_A_PEM
        );
    }

    #[test]
    fn generated_key_is_written_with_restrictive_mode() {
        let dir = tempfile::tempdir().unwrap();
        let resource: CertificateResource =
            serde_json::from_value(resource_json(dir.path())).unwrap();

        let key = KeyMaterial::generate().unwrap();
        persist_issuance(&resource, "LEAF\n", &[], &key).unwrap();

        assert_eq!(
            std::fs::read_to_string(&resource.private_key_path).unwrap(),
            key.pem()
        );
        #[cfg(unix)]
        assert_eq!(mode_of(&resource.private_key_path), 0o600);
    }

    #[test]
    fn chain_goes_to_chain_file_not_certificate_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let resource: CertificateResource =
            serde_json::from_value(resource_json(dir.path())).unwrap();
        std::fs::write(&resource.private_key_path, KEY_A_PEM).unwrap();
        let key = KeyMaterial::from_pem(KEY_A_PEM).unwrap();

        persist_issuance(&resource, "LEAF\n", &["CHAIN\n".to_string()], &key).unwrap();

        assert_eq!(
            std::fs::read_to_string(&resource.certificate_path).unwrap(),
            "LEAF\n"
        );
        assert_eq!(
            std::fs::read_to_string(resource.certificate_chain_path.as_ref().unwrap()).unwrap(),
            "CHAIN\n"
        );
    }

    #[test]
    fn combined_certificate_includes_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut json = resource_json(dir.path());
        json["combine_certificate_and_chain"] = serde_json::json!(true);
        let resource: CertificateResource = serde_json::from_value(json).unwrap();
        std::fs::write(&resource.private_key_path, KEY_A_PEM).unwrap();
        let key = KeyMaterial::from_pem(KEY_A_PEM).unwrap();

        persist_issuance(&resource, "LEAF\n", &["CHAIN\n".to_string()], &key).unwrap();

        assert_eq!(
            std::fs::read_to_string(&resource.certificate_path).unwrap(),
            "LEAF\nCHAIN\n"
        );
    }
}
