//! User types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AttributeBag, MappingKey};
use crate::{Error, Result, FALLBACK_EMAIL_DOMAIN};

/// Canonical profile produced from directory attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
}

impl UserProfile {
    /// Profile known only by its login name
    pub fn from_username(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, key: MappingKey) -> &str {
        match key {
            MappingKey::Username => &self.username,
            MappingKey::Email => &self.email,
            MappingKey::Nickname => &self.nickname,
            MappingKey::FirstName => &self.first_name,
            MappingKey::LastName => &self.last_name,
        }
    }
}

/// A directory entry translated through the attribute mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappedEntry {
    pub profile: UserProfile,
    /// Everything the directory returned, verbatim
    pub attributes: AttributeBag,
}

/// Per-row synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Synced,
    /// Absent from the latest pass
    Stale,
    /// Malformed attributes in the latest pass
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Stale => "stale",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "stale" => Ok(SyncStatus::Stale),
            "error" => Ok(SyncStatus::Error),
            other => Err(Error::Database(format!("Unknown user sync status: {}", other))),
        }
    }
}

/// Local shadow of a directory account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: String,
    pub config_id: String,
    /// Unique within a configuration
    pub dn: String,
    pub username: String,
    pub email: String,
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
    /// Raw attributes, kept for audit only
    #[serde(default)]
    pub attributes: AttributeBag,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub last_sync: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    pub system_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DirectoryUser {
    pub fn new(
        config_id: impl Into<String>,
        dn: impl Into<String>,
        profile: UserProfile,
        attributes: AttributeBag,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crate::utils::generate_id(),
            config_id: config_id.into(),
            dn: dn.into(),
            username: profile.username,
            email: profile.email,
            nickname: profile.nickname,
            first_name: profile.first_name,
            last_name: profile.last_name,
            attributes,
            is_active: true,
            last_login: None,
            last_sync: None,
            sync_status: SyncStatus::Synced,
            system_user_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            username: self.username.clone(),
            email: self.email.clone(),
            nickname: self.nickname.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

/// How a system user was registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginChannel {
    Directory,
    Password,
}

impl LoginChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginChannel::Directory => "ldap",
            LoginChannel::Password => "password",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ldap" => Ok(LoginChannel::Directory),
            "password" => Ok(LoginChannel::Password),
            other => Err(Error::Database(format!("Unknown login channel: {}", other))),
        }
    }
}

/// The application's own identity record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemUser {
    pub id: String,
    pub email: String,
    pub nickname: String,
    pub login_channel: LoginChannel,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl SystemUser {
    pub fn new(email: impl Into<String>, nickname: impl Into<String>, channel: LoginChannel) -> Self {
        Self {
            id: crate::utils::generate_id(),
            email: email.into(),
            nickname: nickname.into(),
            login_channel: channel,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// System user for a directory account, falling back to the username
    /// where the directory supplied no mail or display name
    pub fn for_directory(profile: &UserProfile) -> Self {
        Self::new(
            directory_email(profile),
            if profile.nickname.is_empty() {
                profile.username.clone()
            } else {
                profile.nickname.clone()
            },
            LoginChannel::Directory,
        )
    }
}

/// Email used to match or create the system user for a profile
pub fn directory_email(profile: &UserProfile) -> String {
    if profile.email.is_empty() {
        format!("{}@{}", profile.username, FALLBACK_EMAIL_DOMAIN)
    } else {
        profile.email.clone()
    }
}

/// Directory user counts for one configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub total: u64,
    pub active: u64,
    pub inactive: u64,
}
