use serde::Deserialize;

/// Worker configuration. Per-request fields (host, base, bind credentials,
/// target domain) arrive with each [`crate::ImportRequest`] instead, since
/// §4.6 scopes them to the request, not the service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LdapImportConfig {
    /// Network deadline for one bind+search, in microseconds.
    pub request_timeout_usec: u64,
}

impl Default for LdapImportConfig {
    fn default() -> Self {
        Self {
            request_timeout_usec: 5_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timeout() {
        let cfg = LdapImportConfig::default();
        assert_eq!(cfg.request_timeout_usec, 5_000_000);
    }

    #[test]
    fn rejects_unknown_fields() {
        let json = serde_json::json!({ "request_timeout_usec": 1, "bogus": true });
        let parsed: Result<LdapImportConfig, _> = serde_json::from_value(json);
        assert!(parsed.is_err());
    }
}
