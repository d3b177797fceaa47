//! Identity and authorization collaborators.
//!
//! The host application owns users and permissions. The pipeline consumes
//! them through [`UserDirectory`] and [`AccessControl`]; the in-memory
//! implementations here back tests and standalone runs.

mod access;
mod directory;

pub use access::{
    AccessControl, AccessProviderConfig, AclAccessControl, AclGrant, OpenAccess,
    build_access_control,
};
pub use directory::{InMemoryUserDirectory, UserDirectory, UserProfile};
