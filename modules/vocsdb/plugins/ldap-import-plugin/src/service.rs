//! Bind+search against the directory and apply the reconciled result to a
//! domain via `vocsdb`'s normal update path (§4.6 steps 1-5). Runs entirely
//! on the caller's task: the dispatcher is expected to wrap one call per
//! `ldap_import` request in a bounded `tokio::task::spawn` rather than
//! maintain a dedicated thread pool (§4.6 implementation grounding).

use std::collections::BTreeMap;
use std::time::Duration;

use ldap3::{LdapConnAsync, Scope as LdapScope, SearchEntry};
use serde_json::{Value, json};
use tracing::{info, warn};
use vocsdb::{ChangeEvent, DispatchError, EntityStore};
use vocsdb_sdk::EntityKind;

use crate::config::LdapImportConfig;
use crate::reconcile::{LdapUser, reconcile};

const SEARCH_FILTER: &str = "(objectClass=posixAccount)";
const SEARCH_ATTRS: [&str; 3] = ["cn", "sn", "uid"];

/// One `ldap_import` request (§6): host/base/credentials/target all arrive
/// with the request, not the service's own configuration.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub host: String,
    pub base: String,
    pub bind_user: String,
    pub bind_password: String,
    pub domain_id: String,
}

/// The LDAP import worker.
#[derive(Debug, Clone)]
pub struct Service {
    config: LdapImportConfig,
}

impl Service {
    #[must_use]
    pub fn new(config: LdapImportConfig) -> Self {
        Self { config }
    }

    /// Bind, search, reconcile against `store`'s current view of
    /// `request.domain_id`, apply the result, and broadcast the diff.
    ///
    /// # Errors
    /// `Timeout` if bind+search exceeds the configured deadline, `Auth` on
    /// a bind rejection, `Processing` on a malformed search result, an
    /// unknown target domain, or a failed apply.
    pub async fn import(&self, store: &EntityStore, request: &ImportRequest) -> Result<ChangeEvent, DispatchError> {
        let timeout = Duration::from_micros(self.config.request_timeout_usec);
        let ldap_users = tokio::time::timeout(timeout, fetch_users(request))
            .await
            .map_err(|_| DispatchError::Timeout("ldap import timed out".to_owned()))??;

        let domain = store.get(EntityKind::Domain, &request.domain_id)?;
        if domain.is_null() {
            return Err(DispatchError::processing(format!(
                "domain '{}' not found",
                request.domain_id
            )));
        }
        let local_users = domain
            .get("users")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let outcome = reconcile(&local_users, &ldap_users);

        store.update_key(
            EntityKind::Domain,
            &request.domain_id,
            "users",
            json!(outcome.resulting_users),
        )?;
        for id in &outcome.added {
            store.update_key(EntityKind::User, id, "ldap", json!(true))?;
        }

        let add: BTreeMap<String, Value> = outcome.added.iter().map(|id| (id.clone(), Value::Null)).collect();
        let delete: BTreeMap<String, Value> = outcome.removed.iter().map(|id| (id.clone(), Value::Null)).collect();
        info!(
            domain = %request.domain_id,
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "ldap import reconciled"
        );
        let event = ChangeEvent::LdapUpdate { add, delete };
        store.publish_event(event.clone());
        Ok(event)
    }
}

async fn fetch_users(request: &ImportRequest) -> Result<BTreeMap<String, LdapUser>, DispatchError> {
    let (conn, mut ldap) = LdapConnAsync::new(&request.host)
        .await
        .map_err(|e| DispatchError::processing(format!("ldap connect failed: {e}")))?;
    ldap3::drive!(conn);

    ldap.simple_bind(&request.bind_user, &request.bind_password)
        .await
        .and_then(ldap3::LdapResult::success)
        .map_err(|e| DispatchError::Auth(format!("ldap bind failed: {e}")))?;

    let (entries, _) = ldap
        .search(&request.base, LdapScope::Subtree, SEARCH_FILTER, SEARCH_ATTRS.to_vec())
        .await
        .and_then(|res| res.success())
        .map_err(|e| DispatchError::processing(format!("ldap search failed: {e}")))?;

    let mut users = BTreeMap::new();
    for entry in entries {
        let entry = SearchEntry::construct(entry);
        let Some(uid) = entry.attrs.get("uid").and_then(|v| v.first()) else {
            warn!("ldap entry without a uid attribute, skipping");
            continue;
        };
        let name = entry.attrs.get("cn").and_then(|v| v.first()).cloned();
        users.insert(
            uid.clone(),
            LdapUser {
                id: uid.clone(),
                name,
            },
        );
    }

    let _ = ldap.unbind().await;
    Ok(users)
}
