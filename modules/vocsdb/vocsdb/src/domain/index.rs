//! Five secondary indices kept in sync by hand, per the design note: modeled
//! as one derived structure rebuilt from scratch on load, updated inside
//! the same transactional helper as the primary tree on incremental edits.
//!
//! Indices store owned id keys and enough location info (a [`Scope`], plus
//! the domain id for projects) to reach the node through the tree — never a
//! borrowed reference, so a moved/replaced node can never dangle an index
//! entry (see §4.1's "Dict key lifetime" note).

use std::collections::BTreeMap;

use vocsdb_security::Scope;

use super::tree::{ADMIN_ROLE_ID, Tree};

/// Derived secondary indices over a [`Tree`].
#[derive(Debug, Clone, Default)]
pub struct Indices {
    pub domains: BTreeMap<String, ()>,
    pub projects: BTreeMap<String, String>,
    pub users: BTreeMap<String, Scope>,
    pub roles: BTreeMap<String, Scope>,
    pub loops: BTreeMap<String, Scope>,
}

impl Indices {
    /// Rebuild every index from scratch by walking `tree` breadth-first,
    /// as performed whenever a fresh auth snapshot is injected.
    #[must_use]
    pub fn rebuild(tree: &Tree) -> Self {
        let mut idx = Self::default();
        for (domain_id, domain) in &tree.domains {
            idx.domains.insert(domain_id.clone(), ());
            let domain_scope = Scope::Domain(domain_id.clone());
            idx.index_owned(domain_id, &domain.users, &domain.roles, &domain.loops, &domain_scope);

            for (project_id, project) in &domain.projects {
                idx.projects.insert(project_id.clone(), domain_id.clone());
                let project_scope = Scope::Project(domain_id.clone(), project_id.clone());
                idx.index_owned(
                    domain_id,
                    &project.users,
                    &project.roles,
                    &project.loops,
                    &project_scope,
                );
            }
        }
        idx
    }

    fn index_owned<U, R, L>(
        &mut self,
        _domain_id: &str,
        users: &BTreeMap<String, U>,
        roles: &BTreeMap<String, R>,
        loops: &BTreeMap<String, L>,
        scope: &Scope,
    ) {
        for user_id in users.keys() {
            self.users.insert(user_id.clone(), scope.clone());
        }
        for role_id in roles.keys() {
            if role_id == ADMIN_ROLE_ID {
                continue;
            }
            self.roles.insert(role_id.clone(), scope.clone());
        }
        for loop_id in loops.keys() {
            self.loops.insert(loop_id.clone(), scope.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tree::{DomainNode, ProjectNode, RoleNode, UserNode};

    #[test]
    fn rebuild_indexes_every_owned_entity_except_admin_role() {
        let mut tree = Tree::default();
        let mut domain = DomainNode {
            id: "localhost".to_owned(),
            ..Default::default()
        };
        domain.users.insert(
            "u1".to_owned(),
            UserNode {
                id: "u1".to_owned(),
                ..Default::default()
            },
        );
        domain.roles.insert(
            "admin".to_owned(),
            RoleNode {
                id: "admin".to_owned(),
                ..Default::default()
            },
        );
        let project = ProjectNode {
            id: "project1".to_owned(),
            ..Default::default()
        };
        domain.projects.insert("project1".to_owned(), project);
        tree.domains.insert("localhost".to_owned(), domain);

        let idx = Indices::rebuild(&tree);
        assert!(idx.domains.contains_key("localhost"));
        assert!(idx.users.contains_key("u1"));
        assert!(!idx.roles.contains_key("admin"));
        assert_eq!(idx.projects.get("project1"), Some(&"localhost".to_owned()));
    }
}
