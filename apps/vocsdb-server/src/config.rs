//! Layered configuration (§6, §2.1): a bundled default, an optional file
//! named by `VOCSDB_CONFIG`, and a `VOCSDB_`-prefixed environment overlay,
//! highest precedence last. The same file+env pattern this codebase's
//! plugin configs use, generalized to one top-level struct.

use std::env;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use vocsdb::VocsDbConfig;

const DEFAULT_YAML: &str = include_str!("../config/default.yaml");

/// The server binary's full configuration: the core store config plus the
/// dispatcher-level switches §6 documents alongside it.
///
/// No `deny_unknown_fields` here: it does not compose with `flatten`, and
/// `VocsDbConfig` already denies unknown fields on its own nested structs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub vocsdb: VocsDbConfig,
    /// When set, `login` binds against the directory instead of the local
    /// password store, and `update_password` is uniformly rejected.
    pub ldap_enabled: bool,
    /// Directory host used for LDAP-authenticated logins.
    #[serde(default)]
    pub ldap_host: Option<String>,
    /// Search base used for LDAP-authenticated logins.
    #[serde(default)]
    pub ldap_base: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            vocsdb: VocsDbConfig::default(),
            ldap_enabled: false,
            ldap_host: None,
            ldap_base: None,
        }
    }
}

/// Load configuration from the bundled default, a config file (`override_path`,
/// falling back to `VOCSDB_CONFIG` if unset), and `VOCSDB_`-prefixed
/// environment variables, in that precedence order.
///
/// # Errors
/// Returns an error if the bundled default fails to parse (a build defect)
/// or if the config file names a path that does not parse as YAML.
pub fn load(override_path: Option<&str>) -> Result<ServerConfig, figment::Error> {
    let mut figment = Figment::from(Serialized::defaults(ServerConfig::default())).merge(Yaml::string(DEFAULT_YAML));

    let path = override_path.map(ToOwned::to_owned).or_else(|| env::var("VOCSDB_CONFIG").ok());
    if let Some(path) = path {
        figment = figment.merge(Yaml::file(path));
    }

    figment.merge(Env::prefixed("VOCSDB_").split("_")).extract()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_default_parses_and_matches_hardcoded_defaults() {
        let cfg: ServerConfig = Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Yaml::string(DEFAULT_YAML))
            .extract()
            .unwrap();
        assert_eq!(cfg.vocsdb.path, "/opt/vocsdb");
        assert!(!cfg.ldap_enabled);
    }

    #[test]
    fn env_overlay_takes_precedence_over_bundled_default() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("VOCSDB_LDAP_ENABLED", "true");
            let cfg: ServerConfig = Figment::from(Serialized::defaults(ServerConfig::default()))
                .merge(Yaml::string(DEFAULT_YAML))
                .merge(Env::prefixed("VOCSDB_").split("_"))
                .extract()?;
            assert!(cfg.ldap_enabled);
            Ok(())
        });
    }
}
