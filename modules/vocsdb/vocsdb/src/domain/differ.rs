//! SIP-Whitelist Differ: computes, for every loop whose SIP whitelist
//! changed as a side-effect of a scope-level edit, the permit/revoke delta
//! attached to the change-notification envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vocsdb_sdk::SipWhitelistEntry;

use super::tree::LoopNode;

/// Permit/revoke delta for one loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipDelta {
    pub permit: Vec<SipWhitelistEntry>,
    pub revoke: Vec<SipWhitelistEntry>,
}

/// Diff an old and new `loops` map, per the algorithm in §4.2:
///
/// - a loop present only in `new` emits `permit = new[L].whitelist`, no revoke;
/// - a loop present only in `old` emits nothing (deletion is cascaded
///   separately, see the design note deciding against synthetic revokes);
/// - a loop present in both emits `permit = new[L].whitelist` and
///   `revoke` = every old entry with no equal match in the new whitelist.
#[must_use]
pub fn diff_loops(
    old: &BTreeMap<String, LoopNode>,
    new: &BTreeMap<String, LoopNode>,
) -> BTreeMap<String, SipDelta> {
    let mut out = BTreeMap::new();

    for (loop_id, new_loop) in new {
        let permit = new_loop
            .sip
            .as_ref()
            .map(|sip| sip.whitelist.clone())
            .unwrap_or_default();

        let revoke = match old.get(loop_id) {
            None => Vec::new(),
            Some(old_loop) => {
                let old_whitelist = old_loop
                    .sip
                    .as_ref()
                    .map(|sip| sip.whitelist.as_slice())
                    .unwrap_or_default();
                old_whitelist
                    .iter()
                    .filter(|old_entry| !permit.contains(old_entry))
                    .cloned()
                    .collect()
            }
        };

        out.insert(loop_id.clone(), SipDelta { permit, revoke });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use vocsdb_sdk::SipConfig;

    fn entry(caller: Option<&str>, callee: Option<&str>) -> SipWhitelistEntry {
        SipWhitelistEntry {
            caller: caller.map(str::to_owned),
            callee: callee.map(str::to_owned),
        }
    }

    fn loop_with_whitelist(id: &str, whitelist: Vec<SipWhitelistEntry>) -> LoopNode {
        LoopNode {
            id: id.to_owned(),
            sip: Some(SipConfig {
                whitelist,
                role_callout_permissions: BTreeMap::new(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn s2_revoke_and_permit_match_scenario() {
        let old_loop = loop_with_whitelist(
            "loop11",
            vec![
                entry(Some("a"), None),
                entry(None, Some("b")),
                entry(Some("a"), Some("b")),
            ],
        );
        let new_loop = loop_with_whitelist("loop11", vec![entry(Some("a"), Some("b"))]);

        let mut old = BTreeMap::new();
        old.insert("loop11".to_owned(), old_loop);
        let mut new = BTreeMap::new();
        new.insert("loop11".to_owned(), new_loop);

        let delta = diff_loops(&old, &new);
        let d = delta.get("loop11").unwrap();
        assert_eq!(d.permit, vec![entry(Some("a"), Some("b"))]);
        assert_eq!(d.revoke, vec![entry(Some("a"), None), entry(None, Some("b"))]);
    }

    #[test]
    fn new_loop_only_has_no_revoke() {
        let new_loop = loop_with_whitelist("loop99", vec![entry(Some("x"), None)]);
        let mut new = BTreeMap::new();
        new.insert("loop99".to_owned(), new_loop);

        let delta = diff_loops(&BTreeMap::new(), &new);
        let d = delta.get("loop99").unwrap();
        assert!(d.revoke.is_empty());
        assert_eq!(d.permit, vec![entry(Some("x"), None)]);
    }

    #[test]
    fn loop_only_in_old_emits_nothing() {
        let old_loop = loop_with_whitelist("loop1", vec![entry(Some("x"), None)]);
        let mut old = BTreeMap::new();
        old.insert("loop1".to_owned(), old_loop);

        let delta = diff_loops(&old, &BTreeMap::new());
        assert!(delta.is_empty());
    }
}
