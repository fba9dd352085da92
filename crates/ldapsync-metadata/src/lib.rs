//! Local user and configuration storage for Ldapsync
//!
//! Currently supports a SQLite backend.

pub mod repository;
pub mod traits;

pub use repository::MetadataStore;
pub use traits::*;
