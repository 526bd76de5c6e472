//! `vocsdb` is the core library behind the VocsDB auth/state store: a
//! single indexed in-memory tree of domains, projects, users, roles, and
//! loops, guarded by one coarse lock and persisted to disk as JSON
//! snapshots. Wire-facing crates (`apps/vocsdb-server`,
//! `ldap-import-plugin`) depend on this crate for the store itself; it has
//! no network code of its own.

pub mod config;
pub mod domain;
pub mod infra;

pub use config::{ClusterConfig, PasswordConfig, TimeoutConfig, VocsDbConfig};
pub use domain::auth::AdminProjectEntry;
pub use domain::differ::SipDelta;
pub use domain::event::ChangeEvent;
pub use domain::state::RecordedLoop;
pub use domain::store::EntityStore;
pub use vocsdb_errors::{DispatchError, ErrorCategory};
pub use vocsdb_security::{Permission, Scope};
