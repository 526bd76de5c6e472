//! Owned in-memory representation of the auth tree.
//!
//! Plain value types in `BTreeMap`s, no parent pointers anywhere (see the
//! pointer-chasing-to-parents redesign decision) — scope is always derived
//! from where a caller already is in the tree, or looked up through
//! [`super::index::Indices`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use vocsdb_sdk::{MulticastEndpoint, SipConfig};

/// A User node. `password` holds the PHC-formatted scrypt hash, never the
/// cleartext; it is stripped whenever a [`vocsdb_sdk::UserDto`] is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub ldap: bool,
}

/// A Role node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleNode {
    pub id: String,
    #[serde(default)]
    pub members: BTreeSet<String>,
}

/// A Loop node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopNode {
    pub id: String,
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

/// A Project node, owned by exactly one domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectNode {
    pub id: String,
    #[serde(default)]
    pub users: BTreeMap<String, UserNode>,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleNode>,
    #[serde(default)]
    pub loops: BTreeMap<String, LoopNode>,
}

/// A Domain node, the top-level tenant bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainNode {
    pub id: String,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectNode>,
    #[serde(default)]
    pub users: BTreeMap<String, UserNode>,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleNode>,
    #[serde(default)]
    pub loops: BTreeMap<String, LoopNode>,
}

/// The whole auth tree: a flat map of domains, keyed by domain id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tree {
    #[serde(default)]
    pub domains: BTreeMap<String, DomainNode>,
}

/// The reserved role id that may coexist once per scope without being
/// indexed (I1 exception, I6).
pub const ADMIN_ROLE_ID: &str = "admin";
