//! Metadata repository trait
//!
//! Defines the interface the engine uses for the configuration store and
//! the local user store.
//!
//! Every write touches exactly one row in one statement. A sync pass and a
//! concurrent login may both write the same directory user; neither ever
//! overwrites a field the other owns (`last_login` belongs to logins, the
//! sync bookkeeping fields belong to the reconciler).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ldapsync_core::types::{
    ConfigSyncStatus, DirectoryConfig, DirectoryUser, MappedEntry, SystemUser, UserStats,
};
use ldapsync_core::Result;

/// Id and DN of an active directory user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEntry {
    pub id: String,
    pub dn: String,
}

/// Metadata repository trait
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    // ============= Configuration Operations =============

    /// The single active configuration, if any
    async fn get_active_config(&self) -> Result<Option<DirectoryConfig>>;

    /// Store a configuration and make it the only active one
    async fn save_config(&self, config: &DirectoryConfig) -> Result<()>;

    /// Record the latest sync outcome; the timestamp is left alone when `None`
    async fn update_sync_status(
        &self,
        config_id: &str,
        status: ConfigSyncStatus,
        sync_time: Option<DateTime<Utc>>,
    ) -> Result<()>;

    // ============= Directory User Operations =============

    async fn get_directory_user(&self, id: &str) -> Result<Option<DirectoryUser>>;

    async fn find_by_dn(&self, config_id: &str, dn: &str) -> Result<Option<DirectoryUser>>;

    /// Insert unless (config_id, dn) already exists. Returns whether a row was created.
    async fn insert_directory_user(&self, user: &DirectoryUser) -> Result<bool>;

    /// Refresh mapped fields from a sync pass and mark the row active and synced
    async fn apply_sync_update(&self, id: &str, entry: &MappedEntry, at: DateTime<Utc>)
        -> Result<()>;

    /// Flag a row whose directory entry was malformed in this pass
    async fn mark_sync_error(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Stamp a successful login, optionally refreshing mapped fields
    async fn record_login(
        &self,
        id: &str,
        entry: Option<&MappedEntry>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Link a system user unless one is already linked. Returns whether the link was set.
    async fn link_system_user(&self, id: &str, system_user_id: &str) -> Result<bool>;

    async fn list_directory_users(
        &self,
        config_id: &str,
        active_only: bool,
    ) -> Result<Vec<DirectoryUser>>;

    async fn list_active_entries(&self, config_id: &str) -> Result<Vec<ActiveEntry>>;

    /// Deactivate an active row and mark it stale. Returns false if it was already inactive.
    async fn deactivate_directory_user(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Administrative override. Returns false if no such row exists.
    async fn set_directory_user_active(&self, id: &str, active: bool) -> Result<bool>;

    async fn count_directory_users(&self, config_id: &str) -> Result<UserStats>;

    // ============= System User Operations =============

    async fn get_system_user(&self, id: &str) -> Result<Option<SystemUser>>;

    async fn find_system_user_by_email(&self, email: &str) -> Result<Option<SystemUser>>;

    async fn create_system_user(&self, user: &SystemUser) -> Result<()>;
}
