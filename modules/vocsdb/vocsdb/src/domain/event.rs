//! Change-notification events emitted after a mutation commits and the
//! coarse lock is released — see §4.5 and the "change notifications as a
//! topic" design decision (`tokio::sync::broadcast::Sender<ChangeEvent>`,
//! best-effort, lagging subscribers drop oldest).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::differ::SipDelta;

/// One emitted event. `UpdateDb` follows any entity mutation that may have
/// touched SIP whitelists; `LdapUpdate` follows a reconciled LDAP import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    UpdateDb {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        processing: BTreeMap<String, SipDelta>,
    },
    LdapUpdate {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        add: BTreeMap<String, Value>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        delete: BTreeMap<String, Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_ldap_update_shape_matches_scenario() {
        let mut add = BTreeMap::new();
        add.insert("u4".to_owned(), Value::Null);
        let mut delete = BTreeMap::new();
        delete.insert("u1".to_owned(), Value::Null);
        let event = ChangeEvent::LdapUpdate { add, delete };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "ldap_update");
        assert_eq!(value["add"]["u4"], Value::Null);
        assert_eq!(value["delete"]["u1"], Value::Null);
    }

    #[test]
    fn update_db_without_processing_omits_field() {
        let event = ChangeEvent::UpdateDb {
            processing: BTreeMap::new(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("processing").is_none());
    }
}
