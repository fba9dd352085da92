//! Login flow
//!
//! Resolve the identity, prove the password with a bind as that identity,
//! then create or refresh the local shadow user. The service-account search
//! and the user bind never share a connection.

use chrono::{DateTime, Utc};
use ldapsync_core::types::{
    AttributeBag, DirectoryConfig, DirectoryUser, MappedEntry, UserProfile,
};
use ldapsync_core::{Error, Result};
use ldapsync_metadata::DirectoryRepository;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::DirectoryClient;
use super::mapper::map_entry;
use super::resolver::IdentityResolver;
use crate::provision::{ensure_system_user, ConflictPolicy};

/// A successful login
#[derive(Debug, Clone, Serialize)]
pub struct AuthSuccess {
    pub profile: UserProfile,
    pub directory_user: DirectoryUser,
    pub system_user_id: Option<String>,
    /// The shadow user was created by this login
    pub created: bool,
}

#[derive(Clone)]
pub struct Authenticator {
    client: DirectoryClient,
    resolver: IdentityResolver,
    store: Arc<dyn DirectoryRepository>,
}

impl Authenticator {
    pub fn new(client: DirectoryClient, store: Arc<dyn DirectoryRepository>) -> Self {
        Self {
            resolver: IdentityResolver::new(client.clone()),
            client,
            store,
        }
    }

    /// Authenticate `username` against the directory described by `config`.
    ///
    /// Failures are reported by kind; callers showing them to end users
    /// should use [`Error::public_message`].
    pub async fn authenticate(
        &self,
        config: &DirectoryConfig,
        username: &str,
        password: &str,
    ) -> Result<AuthSuccess> {
        let result = self.login(config, username, password).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        metrics::counter!("ldapsync_auth_attempts_total", "outcome" => outcome).increment(1);

        match &result {
            Ok(success) => info!(
                "Directory login for {} succeeded (created: {})",
                success.profile.username, success.created
            ),
            Err(e) if e.is_login_failure() => {
                info!("Directory login for {} rejected: {}", username, e.code())
            }
            Err(e) => warn!("Directory login for {} failed: {}", username, e),
        }

        result
    }

    async fn login(
        &self,
        config: &DirectoryConfig,
        username: &str,
        password: &str,
    ) -> Result<AuthSuccess> {
        if !config.enabled {
            return Err(Error::AuthDisabled);
        }
        config.validate()?;

        let username = username.trim();
        // An empty password would be an unauthenticated bind, which succeeds
        if username.is_empty() || password.is_empty() {
            return Err(Error::InvalidCredentials);
        }

        let identity = self.resolver.resolve(config, username).await?;
        self.client
            .verify_credentials(config, &identity.dn, password)
            .await?;
        debug!("Credentials verified for {}", identity.dn);

        let mapped = identity
            .entry
            .as_ref()
            .map(|entry| map_entry(&entry.attrs, &config.attr_mapping));
        let now = Utc::now();

        if let Some(existing) = self.store.find_by_dn(&config.id, &identity.dn).await? {
            return self.refresh(config, existing, mapped, now).await;
        }

        if !config.auto_create_user {
            return Err(Error::AccountNotProvisioned);
        }

        let mut entry = mapped.unwrap_or_else(|| MappedEntry {
            profile: UserProfile::from_username(username),
            attributes: AttributeBag::new(),
        });
        if entry.profile.username.is_empty() {
            entry.profile.username = username.to_string();
        }

        let mut user = DirectoryUser::new(
            &config.id,
            &identity.dn,
            entry.profile.clone(),
            entry.attributes.clone(),
        );
        user.last_login = Some(now);

        if !self.store.insert_directory_user(&user).await? {
            // A sync pass created the row first
            let existing = self
                .store
                .find_by_dn(&config.id, &identity.dn)
                .await?
                .ok_or_else(|| Error::UserNotFound(identity.dn.clone()))?;
            return self.refresh(config, existing, Some(entry), now).await;
        }

        let system_user_id =
            ensure_system_user(self.store.as_ref(), &user, ConflictPolicy::Reject).await?;
        user.system_user_id = system_user_id.clone();

        Ok(AuthSuccess {
            profile: entry.profile,
            directory_user: user,
            system_user_id,
            created: true,
        })
    }

    /// Bump last_login on an existing shadow user, refreshing mapped fields
    /// when the login fetched them.
    ///
    /// A row left without a system user (an earlier conflict, or a sync pass
    /// that skipped it) is provisioned here under the same rules as a first
    /// login, and the login fails until that succeeds.
    async fn refresh(
        &self,
        config: &DirectoryConfig,
        existing: DirectoryUser,
        mapped: Option<MappedEntry>,
        at: DateTime<Utc>,
    ) -> Result<AuthSuccess> {
        if !existing.is_active {
            return Err(Error::AccountDisabled);
        }

        if existing.system_user_id.is_none() && !config.auto_create_user {
            return Err(Error::AccountNotProvisioned);
        }

        let mapped = mapped.map(|mut entry| {
            if entry.profile.username.is_empty() {
                entry.profile.username = existing.username.clone();
            }
            entry
        });

        self.store
            .record_login(&existing.id, mapped.as_ref(), at)
            .await?;

        let mut user = self
            .store
            .get_directory_user(&existing.id)
            .await?
            .ok_or_else(|| Error::UserNotFound(existing.id.clone()))?;

        if user.system_user_id.is_none() {
            user.system_user_id =
                ensure_system_user(self.store.as_ref(), &user, ConflictPolicy::Reject).await?;
        }

        Ok(AuthSuccess {
            profile: user.profile(),
            system_user_id: user.system_user_id.clone(),
            directory_user: user,
            created: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDirectory;
    use ldapsync_core::config::DirectoryClientConfig;
    use ldapsync_core::types::{BindCredentials, LoginChannel, SecretString, SystemUser};
    use ldapsync_metadata::MetadataStore;

    const BASE: &str = "ou=users,dc=example,dc=com";
    const CAROL: &str = "uid=carol,ou=users,dc=example,dc=com";

    struct Harness {
        fake: FakeDirectory,
        store: Arc<MetadataStore>,
        auth: Authenticator,
        config: DirectoryConfig,
    }

    async fn harness() -> Harness {
        let fake = FakeDirectory::new();
        fake.add_account("cn=svc,dc=example,dc=com", "svcpass");
        fake.add_user(
            CAROL,
            "carolpw",
            &[
                ("uid", "carol"),
                ("mail", "carol@example.com"),
                ("displayName", "Carol C."),
                ("givenName", "Carol"),
                ("sn", "Clark"),
            ],
        );

        let mut config = DirectoryConfig::new("corp", "ldap.example.com", BASE);
        config.bind = Some(BindCredentials {
            dn: "cn=svc,dc=example,dc=com".into(),
            password: SecretString::new("svcpass"),
        });

        let store = Arc::new(MetadataStore::in_memory().await.unwrap());
        store.save_config(&config).await.unwrap();

        let client = DirectoryClient::new(Arc::new(fake.clone()), DirectoryClientConfig::default());
        let auth = Authenticator::new(client, store.clone());

        Harness {
            fake,
            store,
            auth,
            config,
        }
    }

    #[tokio::test]
    async fn test_first_login_creates_and_links() {
        let h = harness().await;

        let success = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap();
        assert!(success.created);
        assert_eq!(success.profile.email, "carol@example.com");
        assert_eq!(success.directory_user.dn, CAROL);
        assert!(success.directory_user.last_login.is_some());

        let system_id = success.system_user_id.unwrap();
        let system = h.store.get_system_user(&system_id).await.unwrap().unwrap();
        assert_eq!(system.nickname, "Carol C.");

        // Search bind plus user bind on distinct connections
        assert_eq!(h.fake.binds(), 2);
        assert_eq!(h.fake.connects(), 2);
    }

    #[tokio::test]
    async fn test_repeat_login_refreshes_in_place() {
        let h = harness().await;
        let first = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap();

        h.fake.set_attribute(CAROL, "mail", &["carol.clark@example.com"]);
        let second = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap();

        assert!(!second.created);
        assert_eq!(second.directory_user.id, first.directory_user.id);
        assert_eq!(second.directory_user.email, "carol.clark@example.com");
        assert_eq!(second.system_user_id, first.system_user_id);
        assert!(second.directory_user.last_login >= first.directory_user.last_login);
    }

    #[tokio::test]
    async fn test_wrong_password_mutates_nothing() {
        let h = harness().await;
        h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap();
        let before = h.store.find_by_dn(&h.config.id, CAROL).await.unwrap().unwrap();

        let err = h.auth.authenticate(&h.config, "carol", "wrongpass").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));

        let after = h.store.find_by_dn(&h.config.id, CAROL).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_unknown_and_wrong_password_look_alike() {
        let h = harness().await;

        let missing = h.auth.authenticate(&h.config, "nobody", "x").await.unwrap_err();
        let wrong = h.auth.authenticate(&h.config, "carol", "x").await.unwrap_err();

        assert!(matches!(missing, Error::NotFound));
        assert_eq!(missing.public_message(), wrong.public_message());
    }

    #[tokio::test]
    async fn test_empty_password_never_binds() {
        let h = harness().await;

        let err = h.auth.authenticate(&h.config, "carol", "").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
        assert_eq!(h.fake.connects(), 0);
    }

    #[tokio::test]
    async fn test_disabled_config_rejects_before_network() {
        let mut h = harness().await;
        h.config.enabled = false;

        let err = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap_err();
        assert!(matches!(err, Error::AuthDisabled));
        assert_eq!(h.fake.connects(), 0);
    }

    #[tokio::test]
    async fn test_template_mode_keeps_stored_fields() {
        let mut h = harness().await;
        h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap();
        let searches = h.fake.searches();

        h.config.user_dn_template = Some("uid={username},ou=users,dc=example,dc=com".into());
        let success = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap();

        assert_eq!(h.fake.searches(), searches);
        assert!(!success.created);
        assert_eq!(success.profile.email, "carol@example.com");
    }

    #[tokio::test]
    async fn test_template_mode_creates_minimal_profile() {
        let mut h = harness().await;
        h.config.user_dn_template = Some("uid={username},ou=users,dc=example,dc=com".into());

        let success = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap();
        assert!(success.created);
        assert_eq!(success.profile.username, "carol");
        assert_eq!(success.profile.email, "");
        assert_eq!(h.fake.searches(), 0);

        let system_id = success.system_user_id.unwrap();
        let system = h.store.get_system_user(&system_id).await.unwrap().unwrap();
        assert_eq!(system.email, "carol@ldap.local");
    }

    #[tokio::test]
    async fn test_without_auto_create() {
        let mut h = harness().await;
        h.config.auto_create_user = false;

        let err = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap_err();
        assert!(matches!(err, Error::AccountNotProvisioned));
        assert!(h.store.find_by_dn(&h.config.id, CAROL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_login() {
        let h = harness().await;
        let first = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap();
        h.store
            .set_directory_user_active(&first.directory_user.id, false)
            .await
            .unwrap();

        let err = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap_err();
        assert!(matches!(err, Error::AccountDisabled));
        assert!(err.is_login_failure());
    }

    #[tokio::test]
    async fn test_conflicting_email_keeps_failing_on_retry() {
        let h = harness().await;
        h.store
            .create_system_user(&SystemUser::new(
                "carol@example.com",
                "Carol",
                LoginChannel::Password,
            ))
            .await
            .unwrap();

        let first = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap_err();
        assert!(matches!(first, Error::Conflict(_)));

        let second = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap_err();
        assert!(matches!(second, Error::Conflict(_)));

        let stored = h.store.find_by_dn(&h.config.id, CAROL).await.unwrap().unwrap();
        assert!(stored.system_user_id.is_none());
        assert!(stored.last_login.is_some());
    }

    #[tokio::test]
    async fn test_unlinked_row_is_provisioned_on_login() {
        let mut h = harness().await;
        let user = DirectoryUser::new(
            &h.config.id,
            CAROL,
            UserProfile {
                username: "carol".into(),
                email: "carol@example.com".into(),
                ..Default::default()
            },
            AttributeBag::new(),
        );
        h.store.insert_directory_user(&user).await.unwrap();

        h.config.auto_create_user = false;
        let err = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap_err();
        assert!(matches!(err, Error::AccountNotProvisioned));

        h.config.auto_create_user = true;
        let success = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap();
        assert!(!success.created);
        let system_id = success.system_user_id.unwrap();
        assert_eq!(success.directory_user.system_user_id.as_deref(), Some(system_id.as_str()));
        let system = h.store.get_system_user(&system_id).await.unwrap().unwrap();
        assert_eq!(system.email, "carol@example.com");
    }

    #[tokio::test]
    async fn test_ambiguous_match_is_rejected() {
        let h = harness().await;
        h.fake.add_user(
            "uid=carol,ou=contractors,ou=users,dc=example,dc=com",
            "carolpw",
            &[("uid", "carol")],
        );

        let err = h.auth.authenticate(&h.config, "carol", "carolpw").await.unwrap_err();
        assert!(matches!(err, Error::Ambiguous { count: 2 }));
        assert!(h.store.find_by_dn(&h.config.id, CAROL).await.unwrap().is_none());
    }
}
