//! Certificate request intent

use std::collections::BTreeSet;

use certsmith_config::CertificateResource;

/// The names a certificate must cover
///
/// The effective SAN set is `{common_name} ∪ alternate_names`; ordering an
/// issuance and validating an existing certificate both compare against this
/// set, so permuting `alternate_names` never changes the outcome.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub common_name: String,
    pub alternate_names: Vec<String>,
}

impl CertificateRequest {
    pub fn new(common_name: impl Into<String>, alternate_names: Vec<String>) -> Self {
        Self {
            common_name: common_name.into(),
            alternate_names,
        }
    }

    /// Identifiers to order, common name first, duplicates removed
    ///
    /// First occurrence wins; case is preserved.
    pub fn identifiers(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut identifiers = Vec::with_capacity(1 + self.alternate_names.len());
        for name in std::iter::once(&self.common_name).chain(self.alternate_names.iter()) {
            if seen.insert(name.clone()) {
                identifiers.push(name.clone());
            }
        }
        identifiers
    }

    /// The effective SAN set, order-independent
    pub fn san_set(&self) -> BTreeSet<String> {
        self.identifiers().into_iter().collect()
    }
}

impl From<&CertificateResource> for CertificateRequest {
    fn from(resource: &CertificateResource) -> Self {
        Self::new(
            resource.common_name.clone(),
            resource.alternate_names.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_start_with_common_name() {
        let request = CertificateRequest::new(
            "www.example.com",
            vec!["api.example.com".to_string(), "example.com".to_string()],
        );
        assert_eq!(
            request.identifiers(),
            vec!["www.example.com", "api.example.com", "example.com"]
        );
    }

    #[test]
    fn duplicate_identifiers_removed_first_occurrence_wins() {
        let request = CertificateRequest::new(
            "www.example.com",
            vec![
                "www.example.com".to_string(),
                "api.example.com".to_string(),
                "api.example.com".to_string(),
            ],
        );
        assert_eq!(
            request.identifiers(),
            vec!["www.example.com", "api.example.com"]
        );
    }

    #[test]
    fn case_is_preserved_not_folded() {
        let request =
            CertificateRequest::new("WWW.Example.com", vec!["www.example.com".to_string()]);
        assert_eq!(
            request.identifiers(),
            vec!["WWW.Example.com", "www.example.com"]
        );
    }

    #[test]
    fn san_set_is_order_independent() {
        let a = CertificateRequest::new(
            "www.example.com",
            vec!["a.example.com".to_string(), "b.example.com".to_string()],
        );
        let b = CertificateRequest::new(
            "www.example.com",
            vec!["b.example.com".to_string(), "a.example.com".to_string()],
        );
        assert_eq!(a.san_set(), b.san_set());
    }
}
