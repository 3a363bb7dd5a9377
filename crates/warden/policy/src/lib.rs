//! Warden Policy - who may install what.
//!
//! Roles form a single-parent tree loaded once from a [`GrantSource`]. A
//! role's effective permission set is its own grant plus everything its
//! ancestors were granted. [`PermissionResolver`] memoizes those closures and
//! exposes an explicit [`PermissionResolver::reload`] for grant sources that
//! change underneath a running process.

#![deny(unsafe_code)]

mod error;
pub mod grants;
pub mod graph;
pub mod resolver;

pub use error::{PolicyError, PolicyResult};
pub use grants::{GrantSource, RoleCatalog, RoleDefinition, StaticGrantSource};
pub use graph::{Role, RoleGraph};
pub use resolver::{PackageSet, PermissionResolver, RoleSummary};
