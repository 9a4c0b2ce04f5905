//! Organizations, subjects, roles, documents, and the authorization rules
//! tying them together.
//!
//! Roles and subjects reference each other; both live as name-keyed maps
//! inside their organization, so neither owns the other and removal is an
//! explicit, invariant-checked mutation. The same goes for document ACLs,
//! which reference roles by name.

pub mod authz;
pub mod store;
pub mod types;

pub use store::OrgStore;
pub use types::{Document, MANAGERS, Organization, Role, Subject};
