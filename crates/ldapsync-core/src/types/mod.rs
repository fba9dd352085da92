//! Core types for Ldapsync

mod attributes;
mod directory;
mod sync;
mod user;

pub use attributes::*;
pub use directory::*;
pub use sync::*;
pub use user::*;
