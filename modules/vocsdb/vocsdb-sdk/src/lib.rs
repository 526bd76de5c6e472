//! Wire protocol types shared between the server binary and anything that
//! talks to it: the request/response envelopes, the entity kind tag, and the
//! DTOs exchanged over `get`/`create`/`update`/`verify`.
//!
//! Grounded on `authz-resolver-sdk::models` for envelope/DTO shape (plain
//! `Serialize`/`Deserialize` structs, `#[serde(rename_all = "snake_case")]`,
//! `#[serde(default, skip_serializing_if = ...)]` on optional fields) and on
//! the REDESIGN FLAGS decision to replace free-form JSON with a
//! tagged-variant data model at the entity boundary — only `user_data` and
//! similar opaque bags remain `serde_json::Value`.

pub mod entity;
pub mod envelope;
pub mod keyset;

pub use entity::{
    DomainDto, EntityKind, LoopDto, MulticastEndpoint, ProjectDto, RoleDto, SipConfig,
    SipWhitelistEntry, UserDto,
};
pub use envelope::{ErrorPayload, RequestEnvelope, ResponseEnvelope};
pub use keyset::KeysetLayout;
