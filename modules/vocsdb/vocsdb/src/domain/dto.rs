//! Conversions from internal tree nodes to the wire DTOs in `vocsdb-sdk`.
//! The only place `password` is ever dropped (I5).

use vocsdb_sdk::{DomainDto, LoopDto, ProjectDto, RoleDto, UserDto};

use super::tree::{DomainNode, LoopNode, ProjectNode, RoleNode, UserNode};

pub fn user_to_dto(node: &UserNode) -> UserDto {
    UserDto {
        id: node.id.clone(),
        ldap: node.ldap,
    }
}

pub fn role_to_dto(node: &RoleNode) -> RoleDto {
    RoleDto {
        id: node.id.clone(),
        members: node.members.clone(),
    }
}

pub fn loop_to_dto(node: &LoopNode) -> LoopDto {
    LoopDto {
        id: node.id.clone(),
        role_permissions: node.role_permissions.clone(),
        sip: node.sip.clone(),
        multicast: node.multicast.clone(),
        recording: node.recording,
        roll_after_secs: node.roll_after_secs,
    }
}

pub fn project_to_dto(node: &ProjectNode) -> ProjectDto {
    ProjectDto {
        id: node.id.clone(),
        users: node.users.keys().cloned().collect(),
        roles: node.roles.keys().cloned().collect(),
        loops: node.loops.keys().cloned().collect(),
    }
}

pub fn domain_to_dto(node: &DomainNode) -> DomainDto {
    DomainDto {
        id: node.id.clone(),
        projects: node.projects.keys().cloned().collect(),
        users: node.users.keys().cloned().collect(),
        roles: node.roles.keys().cloned().collect(),
        loops: node.loops.keys().cloned().collect(),
    }
}
