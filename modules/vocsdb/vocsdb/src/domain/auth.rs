//! Auth & Admin Engine: role membership, loop permission lookups, and
//! domain/project admin checks with one-way inheritance (domain admin
//! subsumes project admin within its domain).

use serde::Serialize;
use vocsdb_security::Permission;

use super::tree::{ADMIN_ROLE_ID, DomainNode, LoopNode, ProjectNode, RoleNode, Tree};

/// `true` iff `role.members` contains `user`.
#[must_use]
pub fn is_user_in_role(role: &RoleNode, user: &str) -> bool {
    role.members.contains(user)
}

/// Read `loop.role_permissions[role]` through the wire tri-state encoding.
#[must_use]
pub fn role_has_permission_on_loop(loop_node: &LoopNode, role_id: &str) -> Permission {
    Permission::from_wire_bool(loop_node.role_permissions.get(role_id).copied())
}

fn admin_role(roles: &std::collections::BTreeMap<String, RoleNode>) -> Option<&RoleNode> {
    roles.get(ADMIN_ROLE_ID)
}

/// `true` iff `domain` has an `admin` role listing `user` (I6).
#[must_use]
pub fn is_domain_admin(domain: &DomainNode, user: &str) -> bool {
    admin_role(&domain.roles).is_some_and(|role| is_user_in_role(role, user))
}

/// `true` iff `project` has an `admin` role listing `user`, or `user` is a
/// domain-admin of `project`'s domain. Inheritance is one-way only.
#[must_use]
pub fn is_project_admin(domain: &DomainNode, project: &ProjectNode, user: &str) -> bool {
    admin_role(&project.roles).is_some_and(|role| is_user_in_role(role, user))
        || is_domain_admin(domain, user)
}

/// Every domain id where `user` is a domain-admin.
#[must_use]
pub fn admin_domains(tree: &Tree, user: &str) -> Vec<String> {
    tree.domains
        .iter()
        .filter(|(_, domain)| is_domain_admin(domain, user))
        .map(|(id, _)| id.clone())
        .collect()
}

/// One entry of [`admin_projects`]: the project, its (reused-as-name) id,
/// and its owning domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminProjectEntry {
    pub id: String,
    pub name: String,
    pub domain: String,
}

/// Every project where `user` is a project-admin (directly, or via domain
/// inheritance).
#[must_use]
pub fn admin_projects(tree: &Tree, user: &str) -> Vec<AdminProjectEntry> {
    let mut out = Vec::new();
    for (domain_id, domain) in &tree.domains {
        for (project_id, project) in &domain.projects {
            if is_project_admin(domain, project, user) {
                out.push(AdminProjectEntry {
                    id: project_id.clone(),
                    name: project_id.clone(),
                    domain: domain_id.clone(),
                });
            }
        }
    }
    out
}

/// Whether `role_id` may place an outgoing SIP call on `loop_node`. A loop
/// with no SIP configuration allows every role.
#[must_use]
pub fn sip_allow_callout(loop_node: &LoopNode, role_id: &str) -> bool {
    match &loop_node.sip {
        None => true,
        Some(sip) => sip.role_callout_permissions.get(role_id).copied().unwrap_or(false),
    }
}

/// Whether `role_id` may terminate a SIP call on `loop_node`: callend only
/// requires the entry to exist, regardless of its boolean value.
#[must_use]
pub fn sip_allow_callend(loop_node: &LoopNode, role_id: &str) -> bool {
    match &loop_node.sip {
        None => true,
        Some(sip) => sip.role_callout_permissions.contains_key(role_id),
    }
}

/// Ensure `domain` has an `admin` role with `user` among its members.
/// Idempotent: calling twice with the same user is a no-op the second time.
pub fn grant_domain_admin(domain: &mut DomainNode, user: &str) {
    let role = domain
        .roles
        .entry(ADMIN_ROLE_ID.to_owned())
        .or_insert_with(|| RoleNode {
            id: ADMIN_ROLE_ID.to_owned(),
            members: Default::default(),
        });
    role.members.insert(user.to_owned());
}

/// Ensure `project` has an `admin` role with `user` among its members.
/// Idempotent.
pub fn grant_project_admin(project: &mut ProjectNode, user: &str) {
    let role = project
        .roles
        .entry(ADMIN_ROLE_ID.to_owned())
        .or_insert_with(|| RoleNode {
            id: ADMIN_ROLE_ID.to_owned(),
            members: Default::default(),
        });
    role.members.insert(user.to_owned());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn domain_with_admin(user: &str) -> DomainNode {
        let mut domain = DomainNode {
            id: "localhost".to_owned(),
            ..Default::default()
        };
        let mut role = RoleNode {
            id: ADMIN_ROLE_ID.to_owned(),
            members: Default::default(),
        };
        role.members.insert(user.to_owned());
        domain.roles.insert(ADMIN_ROLE_ID.to_owned(), role);
        domain
    }

    #[test]
    fn s1_scope_admin_inheritance() {
        let mut domain = domain_with_admin("user1");
        let mut project = ProjectNode {
            id: "project1".to_owned(),
            ..Default::default()
        };
        grant_project_admin(&mut project, "user2");
        domain.projects.insert("project1".to_owned(), project.clone());

        assert!(is_project_admin(&domain, &project, "user1"));
        assert!(!is_domain_admin(&domain, "user2"));
        assert!(is_project_admin(&domain, &project, "user2"));
    }

    #[test]
    fn grant_domain_admin_is_idempotent() {
        let mut domain = DomainNode {
            id: "d".to_owned(),
            ..Default::default()
        };
        grant_domain_admin(&mut domain, "u1");
        grant_domain_admin(&mut domain, "u1");
        assert_eq!(domain.roles.get(ADMIN_ROLE_ID).unwrap().members.len(), 1);
    }

    #[test]
    fn sip_callout_and_callend_rules() {
        let mut permissions = BTreeMap::new();
        permissions.insert("operator".to_owned(), true);
        permissions.insert("listener".to_owned(), false);
        let loop_node = LoopNode {
            id: "loop1".to_owned(),
            sip: Some(vocsdb_sdk::SipConfig {
                whitelist: Vec::new(),
                role_callout_permissions: permissions,
            }),
            ..Default::default()
        };

        assert!(sip_allow_callout(&loop_node, "operator"));
        assert!(!sip_allow_callout(&loop_node, "listener"));
        assert!(!sip_allow_callout(&loop_node, "unknown"));
        assert!(sip_allow_callend(&loop_node, "listener"));
        assert!(!sip_allow_callend(&loop_node, "unknown"));
    }

    #[test]
    fn loop_without_sip_config_allows_everything() {
        let loop_node = LoopNode {
            id: "loop1".to_owned(),
            ..Default::default()
        };
        assert!(sip_allow_callout(&loop_node, "anyone"));
        assert!(sip_allow_callend(&loop_node, "anyone"));
    }
}
