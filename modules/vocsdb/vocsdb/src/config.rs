use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lock and network timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Coarse-lock try-lock timeout, in microseconds.
    pub thread_lock_usec: u64,
    /// LDAP bind/search network deadline, in microseconds.
    pub ldap_request_usec: u64,
    /// Auth-plane snapshot interval, in seconds. `0` disables the timer.
    pub auth_snapshot_seconds: u64,
    /// State-plane snapshot interval, in seconds. `0` disables the timer.
    pub state_snapshot_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            thread_lock_usec: 100_000,
            ldap_request_usec: 5_000_000,
            auth_snapshot_seconds: 0,
            state_snapshot_seconds: 0,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn thread_lock(&self) -> Duration {
        Duration::from_micros(self.thread_lock_usec)
    }

    #[must_use]
    pub fn ldap_request(&self) -> Duration {
        Duration::from_micros(self.ldap_request_usec)
    }
}

/// Password KDF parameters (scrypt `N`/`r`/`p` plus derived-key length).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    /// log2(N) cost parameter.
    pub workfactor: u8,
    /// Block size `r`.
    pub blocksize: u32,
    /// Parallelism `p`.
    pub parallel: u32,
    /// Derived key length in bytes.
    pub length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            workfactor: 15,
            blocksize: 8,
            parallel: 1,
            length: 32,
        }
    }
}

/// Optional cluster broadcast role (post-save diffs fanned out to replicas).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,
}

/// Top-level configuration for the core store, layered via `figment`
/// (bundled-default YAML, optional `VOCSDB_CONFIG` file, `VOCSDB_`-prefixed
/// environment overlay) the same way this codebase's plugin configs layer
/// file + env, generalized to one cohesive struct since the core is a
/// single service here rather than many independent plugin fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VocsDbConfig {
    pub timeout: TimeoutConfig,
    pub password: PasswordConfig,
    /// Persistence root directory.
    pub path: String,
    pub cluster: ClusterConfig,
}

impl Default for VocsDbConfig {
    fn default() -> Self {
        Self {
            timeout: TimeoutConfig::default(),
            password: PasswordConfig::default(),
            path: "/opt/vocsdb".to_owned(),
            cluster: ClusterConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = VocsDbConfig::default();
        assert_eq!(cfg.timeout.thread_lock_usec, 100_000);
        assert_eq!(cfg.timeout.ldap_request_usec, 5_000_000);
        assert_eq!(cfg.timeout.auth_snapshot_seconds, 0);
        assert_eq!(cfg.password.length, 32);
        assert_eq!(cfg.path, "/opt/vocsdb");
    }

    #[test]
    fn deny_unknown_fields_rejects_typos() {
        let json = serde_json::json!({ "thread_lock_usec": 1, "bogus_field": true });
        let parsed: Result<TimeoutConfig, _> = serde_json::from_value(json);
        assert!(parsed.is_err());
    }
}
