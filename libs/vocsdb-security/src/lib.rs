//! Permission lattice and scope modeling shared across the store, the SDK
//! wire types and the dispatcher.
//!
//! Grounded on this codebase's `modkit-security::access_scope` module: small
//! `Copy`/`Clone` value types, `#[must_use]` constructors, `#[inline]`
//! accessors, doctest examples in the module docs. Unlike `AccessScope` (a
//! row-filter description for an ORM), `Scope` here is the actual owned
//! location of an entity in the auth tree — every User/Role/Loop carries one
//! instead of a parent pointer (see the REDESIGN FLAGS on pointer-chasing to
//! parents).

pub mod permission;
pub mod scope;

pub use permission::Permission;
pub use scope::Scope;
