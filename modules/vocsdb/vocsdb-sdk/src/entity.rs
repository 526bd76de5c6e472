use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Tag identifying which of the five entity kinds an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Domain,
    Project,
    User,
    Role,
    Loop,
}

impl EntityKind {
    /// Short name used in log fields and error attribute maps.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Project => "project",
            Self::User => "user",
            Self::Role => "role",
            Self::Loop => "loop",
        }
    }
}

/// A single SIP whitelist entry: a (caller, callee) pair permitted to dial
/// into a loop. Absent/empty fields compare equal only to other
/// absent/empty fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SipWhitelistEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callee: Option<String>,
}

/// Per-loop SIP configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SipConfig {
    pub whitelist: Vec<SipWhitelistEntry>,
    /// role id -> whether callout is permitted; callend requires presence of
    /// the entry regardless of its value.
    pub role_callout_permissions: BTreeMap<String, bool>,
}

/// A loop's multicast endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MulticastEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub port: u16,
}

/// A Domain entity as returned over the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainDto {
    pub id: String,
    #[serde(default)]
    pub projects: BTreeSet<String>,
    #[serde(default)]
    pub users: BTreeSet<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub loops: BTreeSet<String>,
}

/// A Project entity as returned over the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectDto {
    pub id: String,
    #[serde(default)]
    pub users: BTreeSet<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub loops: BTreeSet<String>,
}

/// A User entity as returned over the wire. `password` is never present —
/// it is stripped before the DTO is built (I5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserDto {
    pub id: String,
    #[serde(default)]
    pub ldap: bool,
}

/// A Role entity as returned over the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleDto {
    pub id: String,
    #[serde(default)]
    pub members: BTreeSet<String>,
}

/// A Loop entity as returned over the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopDto {
    pub id: String,
    /// role id -> SEND (`true`) / RECV (`false`); absence means NONE.
    #[serde(default)]
    pub role_permissions: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sip: Option<SipConfig>,
    #[serde(default)]
    pub multicast: MulticastEndpoint,
    #[serde(default)]
    pub recording: bool,
    #[serde(default)]
    pub roll_after_secs: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sip_entries_compare_equal() {
        assert_eq!(SipWhitelistEntry::default(), SipWhitelistEntry::default());
    }

    #[test]
    fn user_dto_never_serializes_password_field() {
        let dto = UserDto {
            id: "user1".to_owned(),
            ldap: false,
        };
        let value = serde_json::to_value(&dto).unwrap();
        assert!(value.get("password").is_none());
    }
}
