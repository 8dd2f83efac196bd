//! ACME directory client
//!
//! [`DirectoryClient`] is the seam between the issuance flow and the ACME
//! server; [`HttpAcmeClient`] is the real implementation over HTTPS with
//! JWS-signed requests, a replay-nonce pool, and the terms-of-service gate.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{AcmeError, ProtocolErrorKind};
use crate::jose::AccountSigner;
use crate::keys::KeyMaterial;
use crate::protocol::{
    Account, Authorization, AuthorizationStatus, Challenge, ChallengeStatus, Order, OrderStatus,
    Problem,
};

const JOSE_CONTENT_TYPE: &str = "application/jose+json";
const PEM_CHAIN_ACCEPT: &str = "application/pem-certificate-chain";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Operations against one ACME directory
///
/// Everything the issuance flow needs from the server, so tests can drive
/// the flow against a scripted double instead of a live directory.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Register (or re-fetch) the account for the configured key
    ///
    /// Registration against an already-registered key returns the same
    /// account URL; calling this repeatedly is safe.
    async fn register_account(&self) -> Result<Account, AcmeError>;

    /// Create an order for the given DNS identifiers
    async fn new_order(
        &self,
        account: &Account,
        identifiers: &[String],
    ) -> Result<Order, AcmeError>;

    /// POST-as-GET an authorization resource
    async fn fetch_authorization(
        &self,
        account: &Account,
        url: &str,
    ) -> Result<Authorization, AcmeError>;

    /// Tell the server a challenge is ready for validation
    async fn validate_challenge(
        &self,
        account: &Account,
        url: &str,
    ) -> Result<Challenge, AcmeError>;

    /// POST-as-GET a challenge resource
    async fn fetch_challenge(&self, account: &Account, url: &str) -> Result<Challenge, AcmeError>;

    /// Submit the CSR to the order's finalize URL
    async fn finalize_order(
        &self,
        account: &Account,
        order: &Order,
        csr_der: &[u8],
    ) -> Result<Order, AcmeError>;

    /// POST-as-GET an order resource
    async fn fetch_order(&self, account: &Account, url: &str) -> Result<Order, AcmeError>;

    /// Download the issued certificate chain as PEM
    async fn download_certificate(
        &self,
        account: &Account,
        url: &str,
    ) -> Result<String, AcmeError>;

    /// Key authorization for a challenge token, bound to the account key
    fn key_authorization(&self, token: &str) -> String;
}

/// HTTPS implementation of [`DirectoryClient`]
#[derive(Debug)]
pub struct HttpAcmeClient {
    http: reqwest::Client,
    endpoints: DirectoryEndpoints,
    signer: AccountSigner,
    contact: String,
    nonces: Mutex<Vec<String>>,
}

#[derive(Debug, Clone)]
struct DirectoryEndpoints {
    new_nonce: String,
    new_account: String,
    new_order: String,
}

impl HttpAcmeClient {
    /// Discover the directory and enforce the terms-of-service gate
    ///
    /// When the directory publishes terms, `agreed_terms_url` must match
    /// them exactly; otherwise connection fails before any account exists.
    pub async fn connect(
        directory_url: &str,
        account_key: &KeyMaterial,
        contact: impl Into<String>,
        agreed_terms_url: Option<&str>,
    ) -> Result<Self, AcmeError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| transport_error(&e))?;

        debug!(directory = %directory_url, "Fetching ACME directory");
        let document: DirectoryDocument = http
            .get(directory_url)
            .send()
            .await
            .map_err(|e| transport_error(&e))?
            .error_for_status()
            .map_err(|e| transport_error(&e))?
            .json()
            .await
            .map_err(|e| transport_error(&e))?;

        if let Some(terms_url) = document.meta.terms_of_service {
            if agreed_terms_url != Some(terms_url.as_str()) {
                return Err(AcmeError::TermsNotAccepted { url: terms_url });
            }
        }

        Ok(Self {
            http,
            endpoints: DirectoryEndpoints {
                new_nonce: document.new_nonce,
                new_account: document.new_account,
                new_order: document.new_order,
            },
            signer: AccountSigner::new(account_key),
            contact: contact.into(),
            nonces: Mutex::new(Vec::new()),
        })
    }

    fn remember_nonce(&self, headers: &header::HeaderMap) {
        if let Some(nonce) = headers.get("replay-nonce").and_then(|v| v.to_str().ok()) {
            self.nonces.lock().push(nonce.to_string());
        }
    }

    async fn take_nonce(&self) -> Result<String, AcmeError> {
        if let Some(nonce) = self.nonces.lock().pop() {
            return Ok(nonce);
        }

        let response = self
            .http
            .head(&self.endpoints.new_nonce)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        self.remember_nonce(response.headers());

        self.nonces.lock().pop().ok_or_else(|| AcmeError::Protocol {
            kind: ProtocolErrorKind::Transport,
            detail: "server returned no Replay-Nonce".to_string(),
        })
    }

    /// Signed POST with a single retry on a stale nonce
    async fn post(
        &self,
        url: &str,
        kid: Option<&str>,
        payload: &str,
        accept: Option<&str>,
    ) -> Result<AcmeResponse, AcmeError> {
        let mut retried = false;
        loop {
            let nonce = self.take_nonce().await?;
            let body = self.signer.sign(url, &nonce, kid, payload)?;

            let mut request = self
                .http
                .post(url)
                .header(header::CONTENT_TYPE, JOSE_CONTENT_TYPE)
                .body(body);
            if let Some(accept) = accept {
                request = request.header(header::ACCEPT, accept);
            }
            let response = request.send().await.map_err(|e| transport_error(&e))?;

            self.remember_nonce(response.headers());
            let status = response.status();
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let bytes = response.bytes().await.map_err(|e| transport_error(&e))?;

            if status.is_success() {
                return Ok(AcmeResponse {
                    location,
                    body: bytes.to_vec(),
                });
            }

            let problem: Problem = serde_json::from_slice(&bytes).unwrap_or_default();
            let bad_nonce = problem
                .kind
                .as_deref()
                .is_some_and(|k| k.ends_with(":badNonce"));
            if bad_nonce && !retried {
                debug!(url, "Stale nonce, retrying with a fresh one");
                retried = true;
                continue;
            }

            return Err(problem_to_error(status, problem));
        }
    }

    fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AcmeError> {
        serde_json::from_slice(body).map_err(|e| AcmeError::Protocol {
            kind: ProtocolErrorKind::Malformed,
            detail: format!("unparseable server response: {}", e),
        })
    }
}

#[async_trait]
impl DirectoryClient for HttpAcmeClient {
    async fn register_account(&self) -> Result<Account, AcmeError> {
        let payload = json!({
            "termsOfServiceAgreed": true,
            "contact": [self.contact],
        })
        .to_string();

        let response = self
            .post(&self.endpoints.new_account, None, &payload, None)
            .await?;
        let url = response.location.ok_or_else(|| AcmeError::Protocol {
            kind: ProtocolErrorKind::Malformed,
            detail: "account response carried no Location header".to_string(),
        })?;

        info!(account = %url, "ACME account registered");
        Ok(Account { url })
    }

    async fn new_order(
        &self,
        account: &Account,
        identifiers: &[String],
    ) -> Result<Order, AcmeError> {
        let identifier_docs: Vec<_> = identifiers
            .iter()
            .map(|value| json!({"type": "dns", "value": value}))
            .collect();
        let payload = json!({"identifiers": identifier_docs}).to_string();

        let response = self
            .post(&self.endpoints.new_order, Some(&account.url), &payload, None)
            .await?;
        let url = response.location.ok_or_else(|| AcmeError::Protocol {
            kind: ProtocolErrorKind::Malformed,
            detail: "order response carried no Location header".to_string(),
        })?;
        let document: OrderDocument = Self::parse_body(&response.body)?;

        info!(order = %url, identifiers = identifiers.len(), "ACME order created");
        Ok(document.into_order(url))
    }

    async fn fetch_authorization(
        &self,
        account: &Account,
        url: &str,
    ) -> Result<Authorization, AcmeError> {
        let response = self.post(url, Some(&account.url), "", None).await?;
        let document: AuthorizationDocument = Self::parse_body(&response.body)?;
        Ok(document.into_authorization(url.to_string()))
    }

    async fn validate_challenge(
        &self,
        account: &Account,
        url: &str,
    ) -> Result<Challenge, AcmeError> {
        // The validation request body is the empty JSON object.
        let response = self.post(url, Some(&account.url), "{}", None).await?;
        let document: ChallengeDocument = Self::parse_body(&response.body)?;
        Ok(document.into_challenge())
    }

    async fn fetch_challenge(&self, account: &Account, url: &str) -> Result<Challenge, AcmeError> {
        let response = self.post(url, Some(&account.url), "", None).await?;
        let document: ChallengeDocument = Self::parse_body(&response.body)?;
        Ok(document.into_challenge())
    }

    async fn finalize_order(
        &self,
        account: &Account,
        order: &Order,
        csr_der: &[u8],
    ) -> Result<Order, AcmeError> {
        let payload = json!({"csr": URL_SAFE_NO_PAD.encode(csr_der)}).to_string();
        let response = self
            .post(&order.finalize_url, Some(&account.url), &payload, None)
            .await?;
        let document: OrderDocument = Self::parse_body(&response.body)?;

        info!(order = %order.url, "CSR submitted");
        Ok(document.into_order(order.url.clone()))
    }

    async fn fetch_order(&self, account: &Account, url: &str) -> Result<Order, AcmeError> {
        let response = self.post(url, Some(&account.url), "", None).await?;
        let document: OrderDocument = Self::parse_body(&response.body)?;
        Ok(document.into_order(url.to_string()))
    }

    async fn download_certificate(
        &self,
        account: &Account,
        url: &str,
    ) -> Result<String, AcmeError> {
        let response = self
            .post(url, Some(&account.url), "", Some(PEM_CHAIN_ACCEPT))
            .await?;
        String::from_utf8(response.body).map_err(|_| AcmeError::Protocol {
            kind: ProtocolErrorKind::Malformed,
            detail: "certificate response is not UTF-8 PEM".to_string(),
        })
    }

    fn key_authorization(&self, token: &str) -> String {
        self.signer.key_authorization(token)
    }
}

struct AcmeResponse {
    location: Option<String>,
    body: Vec<u8>,
}

fn transport_error(error: &dyn std::fmt::Display) -> AcmeError {
    AcmeError::Protocol {
        kind: ProtocolErrorKind::Transport,
        detail: error.to_string(),
    }
}

fn problem_to_error(status: StatusCode, problem: Problem) -> AcmeError {
    let kind = match problem.kind.as_deref() {
        Some(t) if t.ends_with(":malformed") => ProtocolErrorKind::Malformed,
        Some(t) if t.ends_with(":rateLimited") => ProtocolErrorKind::RateLimited,
        Some(t) if t.ends_with(":unauthorized") || t.ends_with(":accountDoesNotExist") => {
            ProtocolErrorKind::Unauthorized
        }
        Some(_) => ProtocolErrorKind::Other,
        None if status == StatusCode::TOO_MANY_REQUESTS => ProtocolErrorKind::RateLimited,
        None => ProtocolErrorKind::Other,
    };
    AcmeError::Protocol {
        kind,
        detail: problem.describe(),
    }
}

// ============================================================================
// Wire documents
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryDocument {
    new_nonce: String,
    new_account: String,
    new_order: String,
    #[serde(default)]
    meta: DirectoryMeta,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DirectoryMeta {
    terms_of_service: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderDocument {
    status: OrderStatus,
    #[serde(default)]
    authorizations: Vec<String>,
    finalize: String,
    certificate: Option<String>,
}

impl OrderDocument {
    fn into_order(self, url: String) -> Order {
        Order {
            url,
            status: self.status,
            finalize_url: self.finalize,
            authorization_urls: self.authorizations,
            certificate_url: self.certificate,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdentifierDocument {
    value: String,
}

#[derive(Debug, Deserialize)]
struct AuthorizationDocument {
    identifier: IdentifierDocument,
    status: AuthorizationStatus,
    #[serde(default)]
    wildcard: bool,
    #[serde(default)]
    challenges: Vec<ChallengeDocument>,
}

impl AuthorizationDocument {
    fn into_authorization(self, url: String) -> Authorization {
        Authorization {
            url,
            domain: self.identifier.value,
            status: self.status,
            wildcard: self.wildcard,
            challenges: self
                .challenges
                .into_iter()
                .map(ChallengeDocument::into_challenge)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChallengeDocument {
    #[serde(rename = "type")]
    kind: String,
    url: String,
    status: ChallengeStatus,
    #[serde(default)]
    token: String,
    error: Option<Problem>,
}

impl ChallengeDocument {
    fn into_challenge(self) -> Challenge {
        Challenge {
            url: self.url,
            kind: self.kind,
            status: self.status,
            token: self.token,
            error: self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_document_deserializes() {
        let document: DirectoryDocument = serde_json::from_str(
            r#"{
                "newNonce": "https://acme.example/new-nonce",
                "newAccount": "https://acme.example/new-account",
                "newOrder": "https://acme.example/new-order",
                "revokeCert": "https://acme.example/revoke",
                "meta": {"termsOfService": "https://acme.example/terms"}
            }"#,
        )
        .unwrap();
        assert_eq!(document.new_nonce, "https://acme.example/new-nonce");
        assert_eq!(
            document.meta.terms_of_service.as_deref(),
            Some("https://acme.example/terms")
        );
    }

    #[test]
    fn directory_meta_is_optional() {
        let document: DirectoryDocument = serde_json::from_str(
            r#"{
                "newNonce": "https://acme.example/new-nonce",
                "newAccount": "https://acme.example/new-account",
                "newOrder": "https://acme.example/new-order"
            }"#,
        )
        .unwrap();
        assert!(document.meta.terms_of_service.is_none());
    }

    #[test]
    fn order_document_maps_to_order() {
        let document: OrderDocument = serde_json::from_str(
            r#"{
                "status": "pending",
                "authorizations": ["https://acme.example/authz/1"],
                "finalize": "https://acme.example/finalize/1"
            }"#,
        )
        .unwrap();
        let order = document.into_order("https://acme.example/order/1".to_string());
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.authorization_urls.len(), 1);
        assert!(order.certificate_url.is_none());
    }

    #[test]
    fn authorization_document_maps_wildcard() {
        let document: AuthorizationDocument = serde_json::from_str(
            r#"{
                "identifier": {"type": "dns", "value": "example.com"},
                "status": "pending",
                "wildcard": true,
                "challenges": [
                    {"type": "dns-01", "url": "https://acme.example/chall/1",
                     "status": "pending", "token": "tok"}
                ]
            }"#,
        )
        .unwrap();
        let authorization =
            document.into_authorization("https://acme.example/authz/1".to_string());
        assert_eq!(authorization.domain, "example.com");
        assert!(authorization.wildcard);
        assert_eq!(authorization.challenges[0].kind, "dns-01");
        assert_eq!(authorization.challenges[0].token, "tok");
    }

    #[test]
    fn problem_mapping_by_urn_suffix() {
        let err = problem_to_error(
            StatusCode::BAD_REQUEST,
            Problem {
                kind: Some("urn:ietf:params:acme:error:rateLimited".to_string()),
                detail: Some("slow down".to_string()),
                status: Some(429),
            },
        );
        assert!(matches!(
            err,
            AcmeError::Protocol {
                kind: ProtocolErrorKind::RateLimited,
                ..
            }
        ));

        let err = problem_to_error(StatusCode::TOO_MANY_REQUESTS, Problem::default());
        assert!(matches!(
            err,
            AcmeError::Protocol {
                kind: ProtocolErrorKind::RateLimited,
                ..
            }
        ));

        let err = problem_to_error(
            StatusCode::FORBIDDEN,
            Problem {
                kind: Some("urn:ietf:params:acme:error:unauthorized".to_string()),
                detail: None,
                status: Some(403),
            },
        );
        assert!(matches!(
            err,
            AcmeError::Protocol {
                kind: ProtocolErrorKind::Unauthorized,
                ..
            }
        ));
    }
}
