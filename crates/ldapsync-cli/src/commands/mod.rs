//! CLI command implementations

pub mod configure;
pub mod login;
pub mod serve;
pub mod status;
pub mod sync;
pub mod users;

use crate::OutputFormat;
use ldapsync_sync::DirectoryEngine;

/// Context passed to all commands
pub struct CommandContext {
    pub engine: DirectoryEngine,
    pub output_format: OutputFormat,
}

impl CommandContext {
    /// Check if output should be JSON
    pub fn is_json(&self) -> bool {
        matches!(self.output_format, OutputFormat::Json)
    }
}
