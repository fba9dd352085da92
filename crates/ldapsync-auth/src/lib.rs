//! Directory authentication for Ldapsync
//!
//! Connection pooling, identity resolution, attribute mapping and the
//! login flow against an LDAP-compatible directory server.

pub mod ldap;
pub mod provision;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use ldap::{
    map_entry, scan_filter, AuthSuccess, Authenticator, ConnectionTarget, DirectoryClient,
    DirectoryConnection, DirectoryConnector, IdentityResolver, Ldap3Connector, PooledSession,
    RawEntry, ResolvedIdentity,
};
pub use provision::{ensure_system_user, ConflictPolicy};
