//! Pure reconciliation of a directory-supplied user list against a
//! domain's current users (§4.6 step 4). No network or store access here —
//! kept separate so the scenario in §8/S6 is testable without LDAP.

use std::collections::{BTreeMap, BTreeSet};

/// One user entry as fetched from the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUser {
    pub id: String,
    pub name: Option<String>,
}

/// The outcome of reconciling an LDAP user list against the domain's
/// current users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// The domain's `users` set after reconciliation: present-in-both plus
    /// present-only-in-LDAP. Equal to the LDAP id set.
    pub resulting_users: BTreeSet<String>,
    /// Ids newly present (were missing locally); these get `ldap: true`.
    pub added: BTreeSet<String>,
    /// Ids present locally but absent from the directory; these are dropped.
    pub removed: BTreeSet<String>,
}

/// Diff `local_users` against `ldap_users` per the rule in §4.6: add what's
/// LDAP-only, drop what's local-only, leave the intersection untouched.
#[must_use]
pub fn reconcile(local_users: &BTreeSet<String>, ldap_users: &BTreeMap<String, LdapUser>) -> Reconciliation {
    let ldap_ids: BTreeSet<String> = ldap_users.keys().cloned().collect();
    let added = ldap_ids.difference(local_users).cloned().collect();
    let removed = local_users.difference(&ldap_ids).cloned().collect();
    Reconciliation {
        resulting_users: ldap_ids,
        added,
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ldap_user(id: &str) -> LdapUser {
        LdapUser {
            id: id.to_owned(),
            name: None,
        }
    }

    #[test]
    fn s6_reconcile_matches_scenario() {
        let local: BTreeSet<String> = ["u1", "u2", "u3"].into_iter().map(str::to_owned).collect();
        let ldap = BTreeMap::from([
            ("u2".to_owned(), ldap_user("u2")),
            ("u3".to_owned(), ldap_user("u3")),
            ("u4".to_owned(), ldap_user("u4")),
        ]);

        let outcome = reconcile(&local, &ldap);

        let expected: BTreeSet<String> = ["u2", "u3", "u4"].into_iter().map(str::to_owned).collect();
        assert_eq!(outcome.resulting_users, expected);
        assert_eq!(outcome.added, BTreeSet::from(["u4".to_owned()]));
        assert_eq!(outcome.removed, BTreeSet::from(["u1".to_owned()]));
    }

    #[test]
    fn identical_sets_reconcile_to_no_change() {
        let local: BTreeSet<String> = ["u1", "u2"].into_iter().map(str::to_owned).collect();
        let ldap = BTreeMap::from([
            ("u1".to_owned(), ldap_user("u1")),
            ("u2".to_owned(), ldap_user("u2")),
        ]);

        let outcome = reconcile(&local, &ldap);
        assert!(outcome.added.is_empty());
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.resulting_users, local);
    }

    #[test]
    fn empty_directory_removes_every_local_user() {
        let local: BTreeSet<String> = ["u1", "u2"].into_iter().map(str::to_owned).collect();
        let outcome = reconcile(&local, &BTreeMap::new());
        assert!(outcome.resulting_users.is_empty());
        assert_eq!(outcome.removed, local);
    }
}
