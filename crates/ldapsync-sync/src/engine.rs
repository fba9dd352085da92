//! Service facade
//!
//! [`DirectoryEngine`] is the narrow surface presentation layers call into:
//! configuration, connection tests, status, sync triggers, user listing and
//! login. Every operation reads a fresh snapshot of the active configuration.

use chrono::{DateTime, Utc};
use ldapsync_auth::{AuthSuccess, Authenticator, DirectoryClient};
use ldapsync_core::config::SchedulerConfig;
use ldapsync_core::types::{
    ConfigSyncStatus, DirectoryConfig, DirectoryConfigUpdate, DirectoryUser, UserStats,
};
use ldapsync_core::{Error, Result};
use ldapsync_metadata::DirectoryRepository;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::reconciler::Reconciler;
use crate::scheduler::{SyncScheduler, TriggerOutcome};

// ============================================================================
// Views
// ============================================================================

/// Snapshot for status pages
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStatus {
    pub configured: bool,
    pub enabled: bool,
    pub sync_enabled: bool,
    pub sync_interval: u64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub sync_status: ConfigSyncStatus,
    /// The LDAP client is compiled in, so this is always true
    pub directory_library_available: bool,
    pub user_stats: UserStats,
}

/// Outcome of a connection test, with the error kind for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Login result safe to hand to an unauthenticated caller
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthSuccess>,
}

impl From<Result<AuthSuccess>> for LoginResponse {
    fn from(result: Result<AuthSuccess>) -> Self {
        match result {
            Ok(success) => Self {
                success: true,
                message: "Login successful".to_string(),
                user: Some(success),
            },
            Err(e) => Self {
                success: false,
                message: e.public_message(),
                user: None,
            },
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Clone)]
pub struct DirectoryEngine {
    store: Arc<dyn DirectoryRepository>,
    client: DirectoryClient,
    authenticator: Authenticator,
    scheduler: SyncScheduler,
}

impl DirectoryEngine {
    pub fn new(
        store: Arc<dyn DirectoryRepository>,
        client: DirectoryClient,
        scheduler_settings: SchedulerConfig,
    ) -> Self {
        let authenticator = Authenticator::new(client.clone(), store.clone());
        let reconciler = Reconciler::new(client.clone(), store.clone());
        let scheduler = SyncScheduler::new(reconciler, store.clone(), scheduler_settings);

        Self {
            store,
            client,
            authenticator,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub async fn get_active_config(&self) -> Result<Option<DirectoryConfig>> {
        self.store.get_active_config().await
    }

    async fn require_config(&self) -> Result<DirectoryConfig> {
        self.store
            .get_active_config()
            .await?
            .ok_or(Error::NotConfigured)
    }

    /// Merge `update` onto the active configuration, or create one, and store it
    pub async fn save_config(&self, update: DirectoryConfigUpdate) -> Result<DirectoryConfig> {
        let config = match self.store.get_active_config().await? {
            Some(current) => update.apply(current)?,
            None => update.into_new()?,
        };

        self.store.save_config(&config).await?;
        info!("Saved directory configuration {} ({})", config.name, config.id);

        Ok(config)
    }

    /// Connect and bind with `config` without storing anything
    pub async fn test_connection(&self, config: &DirectoryConfig) -> ConnectionTestResult {
        let result = match config.validate() {
            Ok(()) => self.client.test_connection(config).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => ConnectionTestResult {
                success: true,
                message: format!("Connected to {}", config.server_url()),
                code: None,
            },
            Err(e) => {
                warn!("Connection test to {} failed: {}", config.server_url(), e);
                ConnectionTestResult {
                    success: false,
                    message: e.to_string(),
                    code: Some(e.code().to_string()),
                }
            }
        }
    }

    /// Test the stored configuration
    pub async fn test_active_connection(&self) -> Result<ConnectionTestResult> {
        let config = self.require_config().await?;
        Ok(self.test_connection(&config).await)
    }

    pub async fn get_status(&self) -> Result<DirectoryStatus> {
        let status = match self.store.get_active_config().await? {
            Some(config) => DirectoryStatus {
                configured: true,
                enabled: config.enabled,
                sync_enabled: config.sync_enabled,
                sync_interval: config.sync_interval,
                last_sync_time: config.last_sync_time,
                sync_status: config.sync_status,
                directory_library_available: true,
                user_stats: self.store.count_directory_users(&config.id).await?,
            },
            None => DirectoryStatus {
                configured: false,
                enabled: false,
                sync_enabled: false,
                sync_interval: 0,
                last_sync_time: None,
                sync_status: ConfigSyncStatus::Idle,
                directory_library_available: true,
                user_stats: UserStats::default(),
            },
        };

        Ok(status)
    }

    pub async fn trigger_sync(&self) -> Result<TriggerOutcome> {
        self.scheduler.trigger().await
    }

    pub async fn list_users(&self, active_only: bool) -> Result<Vec<DirectoryUser>> {
        match self.store.get_active_config().await? {
            Some(config) => {
                self.store
                    .list_directory_users(&config.id, active_only)
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    pub async fn set_user_active(&self, id: &str, active: bool) -> Result<()> {
        if !self.store.set_directory_user_active(id, active).await? {
            return Err(Error::UserNotFound(id.to_string()));
        }

        info!("Directory user {} set active={}", id, active);
        Ok(())
    }

    /// Authenticate against the active configuration.
    ///
    /// Errors keep their kind; convert with [`LoginResponse::from`] before
    /// showing them to the person logging in.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSuccess> {
        let config = match self.store.get_active_config().await? {
            Some(config) => config,
            None => return Err(Error::AuthDisabled),
        };

        self.authenticator
            .authenticate(&config, username, password)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RunOutcome;
    use ldapsync_auth::testing::FakeDirectory;
    use ldapsync_core::config::DirectoryClientConfig;
    use ldapsync_core::types::SecretString;
    use ldapsync_core::error::GENERIC_LOGIN_FAILURE;
    use ldapsync_metadata::MetadataStore;

    async fn engine(fake: &FakeDirectory) -> DirectoryEngine {
        let store = Arc::new(MetadataStore::in_memory().await.unwrap());
        let client = DirectoryClient::new(Arc::new(fake.clone()), DirectoryClientConfig::default());
        DirectoryEngine::new(store, client, SchedulerConfig::default())
    }

    fn directory() -> FakeDirectory {
        let fake = FakeDirectory::new();
        fake.add_account("cn=svc,dc=example,dc=com", "svcpass");
        fake.add_user(
            "uid=alice,ou=users,dc=example,dc=com",
            "alicepass",
            &[("uid", "alice"), ("mail", "alice@example.com")],
        );
        fake.add_user(
            "uid=bob,ou=users,dc=example,dc=com",
            "bobpass",
            &[("uid", "bob")],
        );
        fake
    }

    fn update() -> DirectoryConfigUpdate {
        DirectoryConfigUpdate {
            name: Some("corp".into()),
            host: Some("ldap.example.com".into()),
            search_base: Some("ou=users,dc=example,dc=com".into()),
            bind_dn: Some("cn=svc,dc=example,dc=com".into()),
            bind_password: Some(SecretString::new("svcpass")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_save_config_validates_interval() {
        let engine = engine(&directory()).await;

        let err = engine
            .save_config(DirectoryConfigUpdate {
                sync_interval: Some(29),
                ..update()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(engine.get_active_config().await.unwrap().is_none());

        let saved = engine.save_config(update()).await.unwrap();
        let updated = engine
            .save_config(DirectoryConfigUpdate {
                sync_interval: Some(3600),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.sync_interval, 3600);
        assert_eq!(updated.host, "ldap.example.com");

        let stored = engine.get_active_config().await.unwrap().unwrap();
        assert_eq!(stored.bind.unwrap().password.expose(), "svcpass");
    }

    #[tokio::test]
    async fn test_status_reflects_sync() {
        let fake = directory();
        let engine = engine(&fake).await;

        let status = engine.get_status().await.unwrap();
        assert!(!status.configured);
        assert!(status.directory_library_available);

        engine.save_config(update()).await.unwrap();
        let outcome = engine.scheduler().run_now().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(_)));

        let status = engine.get_status().await.unwrap();
        assert!(status.configured);
        assert_eq!(status.sync_status, ConfigSyncStatus::Completed);
        assert!(status.last_sync_time.is_some());
        assert_eq!(status.user_stats.total, 2);
        assert_eq!(status.user_stats.active, 2);

        // The view never carries the bind secret
        let json = serde_json::to_string(&engine.get_active_config().await.unwrap()).unwrap();
        assert!(!json.contains("svcpass"));
    }

    #[tokio::test]
    async fn test_login_messages_are_generic() {
        let fake = directory();
        let engine = engine(&fake).await;

        let response = LoginResponse::from(engine.login("alice", "alicepass").await);
        assert!(!response.success);
        assert_eq!(response.message, "Directory login is not available");

        engine.save_config(update()).await.unwrap();

        let response = LoginResponse::from(engine.login("alice", "alicepass").await);
        assert!(response.success);
        assert_eq!(response.user.unwrap().profile.email, "alice@example.com");

        let wrong = LoginResponse::from(engine.login("alice", "nope").await);
        let unknown = LoginResponse::from(engine.login("zed", "whatever").await);
        assert!(!wrong.success);
        assert_eq!(wrong.message, GENERIC_LOGIN_FAILURE);
        assert_eq!(unknown.message, wrong.message);
    }

    #[tokio::test]
    async fn test_login_without_config_is_unavailable() {
        let engine = engine(&directory()).await;

        let err = engine.login("alice", "alicepass").await.unwrap_err();
        assert!(matches!(err, Error::AuthDisabled));
    }

    #[tokio::test]
    async fn test_user_listing_and_activation() {
        let fake = directory();
        let engine = engine(&fake).await;
        engine.save_config(update()).await.unwrap();
        engine.scheduler().run_now().await.unwrap();

        let users = engine.list_users(true).await.unwrap();
        assert_eq!(users.len(), 2);
        let bob = users.iter().find(|u| u.username == "bob").unwrap();

        engine.set_user_active(&bob.id, false).await.unwrap();
        assert_eq!(engine.list_users(true).await.unwrap().len(), 1);
        assert_eq!(engine.list_users(false).await.unwrap().len(), 2);

        let err = engine.set_user_active("missing", true).await.unwrap_err();
        assert!(matches!(err, Error::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_connection_reports_error_kind() {
        let fake = directory();
        let engine = engine(&fake).await;
        let config = engine.save_config(update()).await.unwrap();

        let result = engine.test_connection(&config).await;
        assert!(result.success);
        assert_eq!(fake.searches(), 0);

        fake.set_unreachable(true);
        let result = engine.test_active_connection().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.code.as_deref(), Some("ConnectionError"));
    }
}
