//! ACME object model
//!
//! Owned representations of the directory's account, order, authorization,
//! and challenge resources. The orchestrator is written against these types
//! rather than a protocol library's so its seam can be mocked.

use serde::Deserialize;

/// Registered ACME account
///
/// Held in memory for the duration of one issuance run; never persisted.
/// Registration against an existing key is idempotent and yields the same
/// account URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Account URL, used as the JWS `kid` after registration
    pub url: String,
}

/// Certificate order
#[derive(Debug, Clone)]
pub struct Order {
    /// Order URL for reloads
    pub url: String,
    pub status: OrderStatus,
    /// URL the CSR is submitted to
    pub finalize_url: String,
    /// One authorization URL per requested identifier
    pub authorization_urls: Vec<String>,
    /// Present once the order is `valid`
    pub certificate_url: Option<String>,
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    /// No further automatic transition occurs from this status
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Valid | OrderStatus::Invalid)
    }
}

/// Domain authorization, one per identifier in the order
#[derive(Debug, Clone)]
pub struct Authorization {
    /// Authorization URL for reloads
    pub url: String,
    /// Domain this authorization covers (base name for wildcards)
    pub domain: String,
    pub status: AuthorizationStatus,
    /// Whether the identifier was a wildcard
    pub wildcard: bool,
    /// Challenges the server offers for this authorization
    pub challenges: Vec<Challenge>,
}

/// Authorization lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Revoked,
    Expired,
    Deactivated,
}

impl AuthorizationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AuthorizationStatus::Pending)
    }
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthorizationStatus::Pending => "pending",
            AuthorizationStatus::Valid => "valid",
            AuthorizationStatus::Invalid => "invalid",
            AuthorizationStatus::Revoked => "revoked",
            AuthorizationStatus::Expired => "expired",
            AuthorizationStatus::Deactivated => "deactivated",
        };
        f.write_str(s)
    }
}

/// One challenge offered within an authorization
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Challenge URL, used for validation requests and reloads
    pub url: String,
    /// Challenge type, e.g. `dns-01`
    pub kind: String,
    pub status: ChallengeStatus,
    /// Token the key authorization is derived from
    pub token: String,
    /// Server-reported failure detail, populated on `invalid`
    pub error: Option<Problem>,
}

/// Challenge lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChallengeStatus::Valid | ChallengeStatus::Invalid)
    }
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Processing => "processing",
            ChallengeStatus::Valid => "valid",
            ChallengeStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// RFC 7807 problem document attached to failed objects and responses
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

impl Problem {
    /// Human-readable detail, falling back to the problem type
    pub fn describe(&self) -> String {
        match (&self.detail, &self.kind) {
            (Some(detail), _) => detail.clone(),
            (None, Some(kind)) => kind.clone(),
            (None, None) => "unspecified server error".to_string(),
        }
    }
}

/// The dns-01 challenge type identifier
pub const CHALLENGE_TYPE_DNS01: &str = "dns-01";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_deserialize_from_wire_spelling() {
        assert_eq!(
            serde_json::from_str::<OrderStatus>("\"pending\"").unwrap(),
            OrderStatus::Pending
        );
        assert_eq!(
            serde_json::from_str::<AuthorizationStatus>("\"deactivated\"").unwrap(),
            AuthorizationStatus::Deactivated
        );
        assert_eq!(
            serde_json::from_str::<ChallengeStatus>("\"processing\"").unwrap(),
            ChallengeStatus::Processing
        );
    }

    #[test]
    fn terminal_status_detection() {
        assert!(OrderStatus::Valid.is_terminal());
        assert!(OrderStatus::Invalid.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());

        assert!(AuthorizationStatus::Revoked.is_terminal());
        assert!(!AuthorizationStatus::Pending.is_terminal());

        assert!(ChallengeStatus::Invalid.is_terminal());
        assert!(!ChallengeStatus::Pending.is_terminal());
    }

    #[test]
    fn status_display_matches_wire_spelling() {
        assert_eq!(ChallengeStatus::Invalid.to_string(), "invalid");
        assert_eq!(AuthorizationStatus::Revoked.to_string(), "revoked");
    }

    #[test]
    fn problem_describe_prefers_detail() {
        let problem: Problem = serde_json::from_str(
            r#"{"type":"urn:ietf:params:acme:error:dns","detail":"dns record not found","status":400}"#,
        )
        .unwrap();
        assert_eq!(problem.describe(), "dns record not found");

        let bare = Problem::default();
        assert_eq!(bare.describe(), "unspecified server error");
    }
}
