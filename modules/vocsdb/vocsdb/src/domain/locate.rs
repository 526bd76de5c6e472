//! Scope-directed navigation helpers over the [`Tree`]. No parent pointers
//! are stored anywhere; every lookup starts from a [`Scope`] value and
//! walks down, which is the only direction the tree is ever traversed.

use vocsdb_security::Scope;

use super::tree::{DomainNode, LoopNode, ProjectNode, RoleNode, Tree, UserNode};

pub fn domain<'a>(tree: &'a Tree, domain_id: &str) -> Option<&'a DomainNode> {
    tree.domains.get(domain_id)
}

pub fn domain_mut<'a>(tree: &'a mut Tree, domain_id: &str) -> Option<&'a mut DomainNode> {
    tree.domains.get_mut(domain_id)
}

pub fn project<'a>(tree: &'a Tree, domain_id: &str, project_id: &str) -> Option<&'a ProjectNode> {
    domain(tree, domain_id)?.projects.get(project_id)
}

pub fn project_mut<'a>(
    tree: &'a mut Tree,
    domain_id: &str,
    project_id: &str,
) -> Option<&'a mut ProjectNode> {
    domain_mut(tree, domain_id)?.projects.get_mut(project_id)
}

pub fn user<'a>(tree: &'a Tree, scope: &Scope, id: &str) -> Option<&'a UserNode> {
    match scope {
        Scope::Domain(d) => domain(tree, d)?.users.get(id),
        Scope::Project(d, p) => project(tree, d, p)?.users.get(id),
    }
}

pub fn user_mut<'a>(tree: &'a mut Tree, scope: &Scope, id: &str) -> Option<&'a mut UserNode> {
    match scope {
        Scope::Domain(d) => domain_mut(tree, d)?.users.get_mut(id),
        Scope::Project(d, p) => project_mut(tree, d, p)?.users.get_mut(id),
    }
}

pub fn role<'a>(tree: &'a Tree, scope: &Scope, id: &str) -> Option<&'a RoleNode> {
    match scope {
        Scope::Domain(d) => domain(tree, d)?.roles.get(id),
        Scope::Project(d, p) => project(tree, d, p)?.roles.get(id),
    }
}

pub fn role_mut<'a>(tree: &'a mut Tree, scope: &Scope, id: &str) -> Option<&'a mut RoleNode> {
    match scope {
        Scope::Domain(d) => domain_mut(tree, d)?.roles.get_mut(id),
        Scope::Project(d, p) => project_mut(tree, d, p)?.roles.get_mut(id),
    }
}

pub fn loop_node<'a>(tree: &'a Tree, scope: &Scope, id: &str) -> Option<&'a LoopNode> {
    match scope {
        Scope::Domain(d) => domain(tree, d)?.loops.get(id),
        Scope::Project(d, p) => project(tree, d, p)?.loops.get(id),
    }
}

pub fn loop_node_mut<'a>(tree: &'a mut Tree, scope: &Scope, id: &str) -> Option<&'a mut LoopNode> {
    match scope {
        Scope::Domain(d) => domain_mut(tree, d)?.loops.get_mut(id),
        Scope::Project(d, p) => project_mut(tree, d, p)?.loops.get_mut(id),
    }
}
