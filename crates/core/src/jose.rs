//! JWS signing for ACME requests
//!
//! RFC 8555 requires every POST to carry a JWS in flattened JSON form,
//! signed with the account key. Before registration the JWS embeds the
//! public JWK; afterwards it references the account URL as `kid`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::AcmeError;
use crate::keys::KeyMaterial;

/// Signs ACME requests with the operator's RSA account key
pub struct AccountSigner {
    signing_key: SigningKey<Sha256>,
    jwk_e: String,
    jwk_n: String,
}

impl AccountSigner {
    pub fn new(key: &KeyMaterial) -> Self {
        let public = key.public_key();
        let jwk_n = URL_SAFE_NO_PAD.encode(public.n().to_bytes_be());
        let jwk_e = URL_SAFE_NO_PAD.encode(public.e().to_bytes_be());

        Self {
            signing_key: SigningKey::<Sha256>::new(key.private_key().clone()),
            jwk_e,
            jwk_n,
        }
    }

    /// Public JWK for pre-registration requests
    pub fn jwk(&self) -> serde_json::Value {
        json!({
            "e": self.jwk_e,
            "kty": "RSA",
            "n": self.jwk_n,
        })
    }

    /// RFC 7638 JWK thumbprint, base64url-encoded
    ///
    /// The digest input is the JWK with its required members only, in
    /// lexicographic order and with no whitespace.
    pub fn thumbprint(&self) -> String {
        let canonical = format!(
            r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
            self.jwk_e, self.jwk_n
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Key authorization for a challenge token (RFC 8555 §8.1)
    pub fn key_authorization(&self, token: &str) -> String {
        format!("{}.{}", token, self.thumbprint())
    }

    /// Produce the flattened JWS JSON body for one request
    ///
    /// `kid` is `None` only for account registration; `payload` is the
    /// serialized request body, or empty for POST-as-GET.
    pub fn sign(
        &self,
        url: &str,
        nonce: &str,
        kid: Option<&str>,
        payload: &str,
    ) -> Result<String, AcmeError> {
        let mut protected = json!({
            "alg": "RS256",
            "nonce": nonce,
            "url": url,
        });
        match kid {
            Some(kid) => protected["kid"] = json!(kid),
            None => protected["jwk"] = self.jwk(),
        }

        let protected_b64 = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&protected)
                .map_err(|e| AcmeError::Crypto(format!("failed to encode JWS header: {}", e)))?,
        );
        // POST-as-GET uses a truly empty payload, not base64 of "".
        let payload_b64 = if payload.is_empty() {
            String::new()
        } else {
            URL_SAFE_NO_PAD.encode(payload.as_bytes())
        };

        let signing_input = format!("{}.{}", protected_b64, payload_b64);
        let signature = self.signing_key.sign(signing_input.as_bytes());

        let body = json!({
            "protected": protected_b64,
            "payload": payload_b64,
            "signature": URL_SAFE_NO_PAD.encode(signature.to_bytes()),
        });
        serde_json::to_string(&body)
            .map_err(|e| AcmeError::Crypto(format!("failed to encode JWS: {}", e)))
    }
}

impl std::fmt::Debug for AccountSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSigner").finish_non_exhaustive()
    }
}
