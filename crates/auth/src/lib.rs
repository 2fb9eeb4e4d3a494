//! `equiptrack-auth`: capability checks for inventory operations.
//!
//! Decoupled from HTTP and storage: callers resolve an [`Actor`] however they
//! authenticate, and the ledger/registry only ask whether it may act.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize, effective_permissions};
pub use permissions::Permission;
pub use principal::Actor;
pub use roles::Role;
