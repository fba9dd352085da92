//! Directory configuration types
//!
//! One [`DirectoryConfig`] record is active at a time. The engine reads a
//! snapshot of it per operation and never mutates it in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{
    Error, Result, DEFAULT_LDAPS_PORT, DEFAULT_LDAP_PORT, MIN_SYNC_INTERVAL_SECS,
    USERNAME_PLACEHOLDER,
};

// ============================================================================
// Secrets
// ============================================================================

/// A credential that is never printed or serialized
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Service account used by the engine for searches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindCredentials {
    /// Example: "cn=admin,dc=example,dc=com"
    pub dn: String,

    #[serde(default, skip_serializing)]
    pub password: SecretString,
}

// ============================================================================
// Attribute Mapping
// ============================================================================

/// The canonical profile fields every mapping must supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKey {
    Username,
    Email,
    Nickname,
    FirstName,
    LastName,
}

impl MappingKey {
    pub const ALL: [MappingKey; 5] = [
        MappingKey::Username,
        MappingKey::Email,
        MappingKey::Nickname,
        MappingKey::FirstName,
        MappingKey::LastName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MappingKey::Username => "username",
            MappingKey::Email => "email",
            MappingKey::Nickname => "nickname",
            MappingKey::FirstName => "first_name",
            MappingKey::LastName => "last_name",
        }
    }
}

/// Directory attribute names for each profile field.
///
/// Missing keys deserialize to empty strings so that validation, not the
/// parser, reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMapping {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl Default for AttributeMapping {
    fn default() -> Self {
        Self {
            username: "uid".to_string(),
            email: "mail".to_string(),
            nickname: "displayName".to_string(),
            first_name: "givenName".to_string(),
            last_name: "sn".to_string(),
        }
    }
}

impl AttributeMapping {
    /// Active Directory mapping
    pub fn active_directory() -> Self {
        Self {
            username: "sAMAccountName".to_string(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, key: MappingKey) -> &str {
        match key {
            MappingKey::Username => &self.username,
            MappingKey::Email => &self.email,
            MappingKey::Nickname => &self.nickname,
            MappingKey::FirstName => &self.first_name,
            MappingKey::LastName => &self.last_name,
        }
    }

    /// Attribute names to request from the directory, without duplicates
    pub fn requested_attributes(&self) -> Vec<String> {
        let mut attrs: Vec<String> = Vec::with_capacity(MappingKey::ALL.len());
        for key in MappingKey::ALL {
            let attr = self.attribute(key);
            if !attrs.iter().any(|a| a.eq_ignore_ascii_case(attr)) {
                attrs.push(attr.to_string());
            }
        }
        attrs
    }

    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = MappingKey::ALL
            .iter()
            .filter(|key| self.attribute(**key).trim().is_empty())
            .map(|key| key.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "Attribute mapping is missing: {}",
                missing.join(", ")
            )))
        }
    }
}

// ============================================================================
// Resolution Strategy
// ============================================================================

/// How a login name becomes a directory DN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy<'a> {
    /// Substitute the username into a DN template, no search
    Template { dn_template: &'a str },
    /// Search under the base DN as the service account
    Search { base_dn: &'a str, filter: &'a str },
}

// ============================================================================
// Directory Configuration
// ============================================================================

/// Outcome of the most recent sync, as recorded on the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSyncStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl ConfigSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSyncStatus::Idle => "idle",
            ConfigSyncStatus::Running => "running",
            ConfigSyncStatus::Completed => "completed",
            ConfigSyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(ConfigSyncStatus::Idle),
            "running" => Ok(ConfigSyncStatus::Running),
            "completed" => Ok(ConfigSyncStatus::Completed),
            "error" => Ok(ConfigSyncStatus::Error),
            other => Err(Error::Database(format!("Unknown sync status: {}", other))),
        }
    }
}

/// The directory server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub id: String,
    pub name: String,

    pub host: String,

    /// Explicit port; 389/636 are only used when this is unset
    #[serde(default)]
    pub port: Option<u16>,

    /// Connect over ldaps://
    #[serde(default)]
    pub use_ssl: bool,

    /// Service account; anonymous when absent
    #[serde(default)]
    pub bind: Option<BindCredentials>,

    /// Example: "ou=users,dc=example,dc=com"
    pub search_base: String,

    /// Example: "(objectClass=person)"
    pub search_filter: String,

    /// Example: "uid={username},ou=users,dc=example,dc=com"
    #[serde(default)]
    pub user_dn_template: Option<String>,

    #[serde(default)]
    pub attr_mapping: AttributeMapping,

    pub enabled: bool,
    pub auto_create_user: bool,
    pub sync_enabled: bool,

    /// Allow "sync now" while scheduled sync is disabled
    #[serde(default = "default_true")]
    pub manual_sync_override: bool,

    pub sync_interval: u64,

    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_status: ConfigSyncStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

pub fn default_search_filter() -> String {
    "(objectClass=person)".to_string()
}

impl DirectoryConfig {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        search_base: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crate::utils::generate_id(),
            name: name.into(),
            host: host.into(),
            port: None,
            use_ssl: false,
            bind: None,
            search_base: search_base.into(),
            search_filter: default_search_filter(),
            user_dn_template: None,
            attr_mapping: AttributeMapping::default(),
            enabled: true,
            auto_create_user: true,
            sync_enabled: true,
            manual_sync_override: true,
            sync_interval: MIN_SYNC_INTERVAL_SECS,
            last_sync_time: None,
            sync_status: ConfigSyncStatus::Idle,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn effective_port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None if self.use_ssl => DEFAULT_LDAPS_PORT,
            None => DEFAULT_LDAP_PORT,
        }
    }

    /// Example: "ldaps://dc.example.com:636"
    pub fn server_url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.effective_port())
    }

    pub fn strategy(&self) -> ResolutionStrategy<'_> {
        match self.user_dn_template.as_deref() {
            Some(template) if !template.is_empty() => ResolutionStrategy::Template {
                dn_template: template,
            },
            _ => ResolutionStrategy::Search {
                base_dn: &self.search_base,
                filter: &self.search_filter,
            },
        }
    }

    pub fn sync_interval_duration(&self) -> Duration {
        Duration::from_secs(self.sync_interval.max(MIN_SYNC_INTERVAL_SECS))
    }

    /// Whether an explicit "sync now" may run for this configuration
    pub fn allows_manual_sync(&self) -> bool {
        self.sync_enabled || self.manual_sync_override
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("Name is required".into()));
        }

        if self.host.trim().is_empty() {
            return Err(Error::Validation("Server host is required".into()));
        }

        if self.host.contains("://") {
            return Err(Error::Validation(
                "Server host must not include a scheme; use use_ssl instead".into(),
            ));
        }

        if self.port == Some(0) {
            return Err(Error::Validation("Server port must be non-zero".into()));
        }

        if self.search_base.trim().is_empty() {
            return Err(Error::Validation("Search base DN is required".into()));
        }

        if self.search_filter.trim().is_empty() {
            return Err(Error::Validation("Search filter is required".into()));
        }

        if !(self.search_filter.starts_with('(') && self.search_filter.ends_with(')')) {
            return Err(Error::Validation(
                "Search filter must be enclosed in parentheses".into(),
            ));
        }

        if let Some(template) = &self.user_dn_template {
            if !template.is_empty() && !template.contains(USERNAME_PLACEHOLDER) {
                return Err(Error::Validation(format!(
                    "User DN template must contain {} placeholder",
                    USERNAME_PLACEHOLDER
                )));
            }
        }

        if let Some(bind) = &self.bind {
            if bind.dn.trim().is_empty() {
                return Err(Error::Validation("Bind DN must not be empty".into()));
            }
        }

        if self.sync_interval < MIN_SYNC_INTERVAL_SECS {
            return Err(Error::Validation(format!(
                "Sync interval must be at least {} seconds",
                MIN_SYNC_INTERVAL_SECS
            )));
        }

        self.attr_mapping.validate()
    }
}

// ============================================================================
// Partial Update
// ============================================================================

/// Administrator-supplied changes to the configuration.
///
/// Absent fields keep their current value. An empty `bind_dn` removes the
/// service account and an empty `user_dn_template` switches to search mode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryConfigUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub use_ssl: Option<bool>,
    pub bind_dn: Option<String>,
    pub bind_password: Option<SecretString>,
    pub search_base: Option<String>,
    pub search_filter: Option<String>,
    pub user_dn_template: Option<String>,
    pub attr_mapping: Option<AttributeMapping>,
    pub enabled: Option<bool>,
    pub auto_create_user: Option<bool>,
    pub sync_enabled: Option<bool>,
    pub manual_sync_override: Option<bool>,
    pub sync_interval: Option<u64>,
}

impl DirectoryConfigUpdate {
    /// Build a new configuration; name, host and search base are required
    pub fn into_new(self) -> Result<DirectoryConfig> {
        let name = self
            .name
            .clone()
            .ok_or_else(|| Error::Validation("Name is required".into()))?;
        let host = self
            .host
            .clone()
            .ok_or_else(|| Error::Validation("Server host is required".into()))?;
        let search_base = self
            .search_base
            .clone()
            .ok_or_else(|| Error::Validation("Search base DN is required".into()))?;

        let base = DirectoryConfig::new(name, host, search_base);
        self.apply(base)
    }

    /// Merge onto an existing configuration and validate the result
    pub fn apply(self, mut config: DirectoryConfig) -> Result<DirectoryConfig> {
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(use_ssl) = self.use_ssl {
            config.use_ssl = use_ssl;
        }

        match (self.bind_dn, self.bind_password) {
            (Some(dn), _) if dn.trim().is_empty() => config.bind = None,
            (Some(dn), password) => {
                let password = password
                    .or_else(|| config.bind.as_ref().map(|b| b.password.clone()))
                    .unwrap_or_default();
                config.bind = Some(BindCredentials { dn, password });
            }
            (None, Some(password)) => match config.bind.as_mut() {
                Some(bind) => bind.password = password,
                None => {
                    return Err(Error::Validation(
                        "Bind password supplied without a bind DN".into(),
                    ))
                }
            },
            (None, None) => {}
        }

        if let Some(base) = self.search_base {
            config.search_base = base;
        }
        if let Some(filter) = self.search_filter {
            config.search_filter = filter;
        }
        if let Some(template) = self.user_dn_template {
            config.user_dn_template = if template.trim().is_empty() {
                None
            } else {
                Some(template)
            };
        }
        if let Some(mapping) = self.attr_mapping {
            config.attr_mapping = mapping;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(auto_create) = self.auto_create_user {
            config.auto_create_user = auto_create;
        }
        if let Some(sync_enabled) = self.sync_enabled {
            config.sync_enabled = sync_enabled;
        }
        if let Some(manual) = self.manual_sync_override {
            config.manual_sync_override = manual;
        }
        if let Some(interval) = self.sync_interval {
            config.sync_interval = interval;
        }

        config.updated_at = Utc::now();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DirectoryConfig {
        DirectoryConfig::new("corp", "ldap.example.com", "ou=users,dc=example,dc=com")
    }

    #[test]
    fn test_port_defaults_never_override_explicit_port() {
        let mut config = base_config();
        assert_eq!(config.effective_port(), 389);

        config.use_ssl = true;
        assert_eq!(config.effective_port(), 636);
        assert_eq!(config.server_url(), "ldaps://ldap.example.com:636");

        config.port = Some(3269);
        assert_eq!(config.server_url(), "ldaps://ldap.example.com:3269");
    }

    #[test]
    fn test_sync_interval_minimum() {
        let update = DirectoryConfigUpdate {
            sync_interval: Some(29),
            ..Default::default()
        };
        assert!(matches!(update.apply(base_config()), Err(Error::Validation(_))));

        let update = DirectoryConfigUpdate {
            sync_interval: Some(30),
            ..Default::default()
        };
        assert_eq!(update.apply(base_config()).unwrap().sync_interval, 30);
    }

    #[test]
    fn test_mapping_keys_required() {
        let mapping: AttributeMapping = serde_json::from_str(r#"{"username":"uid"}"#).unwrap();
        let err = mapping.validate().unwrap_err();
        assert!(err.to_string().contains("email"));
        assert!(err.to_string().contains("last_name"));
        assert!(AttributeMapping::default().validate().is_ok());
    }

    #[test]
    fn test_strategy_dispatch() {
        let mut config = base_config();
        assert!(matches!(config.strategy(), ResolutionStrategy::Search { .. }));

        config.user_dn_template = Some("uid={username},ou=users,dc=example,dc=com".into());
        assert!(matches!(
            config.strategy(),
            ResolutionStrategy::Template { .. }
        ));
    }

    #[test]
    fn test_template_requires_placeholder() {
        let update = DirectoryConfigUpdate {
            user_dn_template: Some("uid=admin,dc=example,dc=com".into()),
            ..Default::default()
        };
        assert!(update.apply(base_config()).is_err());
    }

    #[test]
    fn test_bind_password_kept_and_never_serialized() {
        let update = DirectoryConfigUpdate {
            bind_dn: Some("cn=svc,dc=example,dc=com".into()),
            bind_password: Some(SecretString::new("s3cret")),
            ..Default::default()
        };
        let config = update.apply(base_config()).unwrap();

        // Changing only the DN keeps the stored secret
        let update = DirectoryConfigUpdate {
            bind_dn: Some("cn=sync,dc=example,dc=com".into()),
            ..Default::default()
        };
        let config = update.apply(config).unwrap();
        let bind = config.bind.as_ref().unwrap();
        assert_eq!(bind.password.expose(), "s3cret");

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(!format!("{:?}", config).contains("s3cret"));
    }

    #[test]
    fn test_new_config_requires_core_fields() {
        let update = DirectoryConfigUpdate {
            name: Some("corp".into()),
            host: Some("ldap.example.com".into()),
            ..Default::default()
        };
        assert!(update.into_new().is_err());
    }

    #[test]
    fn test_requested_attributes_deduplicated() {
        let mapping = AttributeMapping {
            nickname: "cn".into(),
            first_name: "CN".into(),
            ..Default::default()
        };
        assert_eq!(mapping.requested_attributes(), vec!["uid", "mail", "cn", "sn"]);
    }
}
