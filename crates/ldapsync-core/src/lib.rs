//! Ldapsync Core Library
//!
//! Core types, configuration and error taxonomy shared by the directory
//! authentication and synchronization engine.

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::ServiceConfig;
pub use error::{Error, Result};

/// Ldapsync version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum allowed sync interval in seconds
pub const MIN_SYNC_INTERVAL_SECS: u64 = 30;

/// Default plain LDAP port
pub const DEFAULT_LDAP_PORT: u16 = 389;

/// Default LDAPS port
pub const DEFAULT_LDAPS_PORT: u16 = 636;

/// Placeholder substituted with the login name in DN templates and filters
pub const USERNAME_PLACEHOLDER: &str = "{username}";

/// Email domain used when a directory account has no mail attribute
pub const FALLBACK_EMAIL_DOMAIN: &str = "ldap.local";
