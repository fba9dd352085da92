//! LDAP/Active Directory authentication module
//!
//! Provides:
//! - Pooled service-account sessions with validation before reuse
//! - Template and search based identity resolution
//! - Attribute mapping onto the canonical user profile
//! - Credential verification with local shadow user upkeep
//! - TLS (ldaps://) and STARTTLS transports

mod authenticator;
mod client;
mod mapper;
mod resolver;

pub use authenticator::{AuthSuccess, Authenticator};
pub use client::{
    ConnectionTarget, DirectoryClient, DirectoryConnection, DirectoryConnector, Ldap3Connector,
    PooledSession, RawEntry,
};
pub use mapper::map_entry;
pub use resolver::{scan_filter, template_dn, user_filter, IdentityResolver, ResolvedIdentity};
