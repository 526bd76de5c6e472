//! LDAP Import Worker (§4.6): a small, config-constructed `Service` that
//! binds to a directory, searches for POSIX accounts, and reconciles the
//! result against one domain's local users through `vocsdb`'s normal
//! update path.

pub mod config;
pub mod reconcile;
pub mod service;

pub use config::LdapImportConfig;
pub use reconcile::{LdapUser, Reconciliation, reconcile};
pub use service::{ImportRequest, Service};
