//! Metadata repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ldapsync_core::types::{
    AttributeBag, AttributeMapping, BindCredentials, ConfigSyncStatus, DirectoryConfig,
    DirectoryUser, LoginChannel, MappedEntry, SecretString, SyncStatus, SystemUser, UserStats,
};
use ldapsync_core::utils::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use ldapsync_core::{Error, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::traits::{ActiveEntry, DirectoryRepository};

pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Private in-memory database, kept on a single never-expiring connection
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS directory_configs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER,
                use_ssl INTEGER NOT NULL DEFAULT 0,
                bind_dn TEXT,
                bind_password TEXT,
                search_base TEXT NOT NULL,
                search_filter TEXT NOT NULL,
                user_dn_template TEXT,
                attr_mapping TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                auto_create_user INTEGER NOT NULL DEFAULT 1,
                sync_enabled INTEGER NOT NULL DEFAULT 1,
                manual_sync_override INTEGER NOT NULL DEFAULT 1,
                sync_interval INTEGER NOT NULL,
                last_sync_time TEXT,
                sync_status TEXT NOT NULL DEFAULT 'idle',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        // DNs compare case-insensitively, as the directory does
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS directory_users (
                id TEXT PRIMARY KEY,
                config_id TEXT NOT NULL,
                dn TEXT NOT NULL COLLATE NOCASE,
                username TEXT NOT NULL,
                email TEXT NOT NULL DEFAULT '',
                nickname TEXT NOT NULL DEFAULT '',
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                attributes TEXT NOT NULL DEFAULT '{}',
                is_active INTEGER NOT NULL DEFAULT 1,
                last_login TEXT,
                last_sync TEXT,
                sync_status TEXT NOT NULL DEFAULT 'synced',
                system_user_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (config_id, dn)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_directory_users_username
            ON directory_users(config_id, username)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS system_users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                nickname TEXT NOT NULL,
                login_channel TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_system_users_email ON system_users(email)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        info!("Metadata store initialized");
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn config_from_row(row: &SqliteRow) -> Result<DirectoryConfig> {
    let get_err = |e: sqlx::Error| Error::Database(e.to_string());

    let bind_dn: Option<String> = row.try_get("bind_dn").map_err(get_err)?;
    let bind_password: Option<String> = row.try_get("bind_password").map_err(get_err)?;
    let mapping_json: String = row.try_get("attr_mapping").map_err(get_err)?;
    let attr_mapping: AttributeMapping = serde_json::from_str(&mapping_json)
        .map_err(|e| Error::Database(format!("Invalid attribute mapping: {}", e)))?;
    let port: Option<i64> = row.try_get("port").map_err(get_err)?;
    let sync_interval: i64 = row.try_get("sync_interval").map_err(get_err)?;
    let sync_status: String = row.try_get("sync_status").map_err(get_err)?;
    let created_at: String = row.try_get("created_at").map_err(get_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(get_err)?;

    Ok(DirectoryConfig {
        id: row.try_get("id").map_err(get_err)?,
        name: row.try_get("name").map_err(get_err)?,
        host: row.try_get("host").map_err(get_err)?,
        port: port
            .map(u16::try_from)
            .transpose()
            .map_err(|e| Error::Database(format!("Invalid port: {}", e)))?,
        use_ssl: row.try_get("use_ssl").map_err(get_err)?,
        bind: bind_dn.map(|dn| BindCredentials {
            dn,
            password: SecretString::new(bind_password.unwrap_or_default()),
        }),
        search_base: row.try_get("search_base").map_err(get_err)?,
        search_filter: row.try_get("search_filter").map_err(get_err)?,
        user_dn_template: row.try_get("user_dn_template").map_err(get_err)?,
        attr_mapping,
        enabled: row.try_get("enabled").map_err(get_err)?,
        auto_create_user: row.try_get("auto_create_user").map_err(get_err)?,
        sync_enabled: row.try_get("sync_enabled").map_err(get_err)?,
        manual_sync_override: row.try_get("manual_sync_override").map_err(get_err)?,
        sync_interval: sync_interval.max(0) as u64,
        last_sync_time: parse_optional_timestamp(row.try_get("last_sync_time").map_err(get_err)?)?,
        sync_status: ConfigSyncStatus::parse(&sync_status)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn directory_user_from_row(row: &SqliteRow) -> Result<DirectoryUser> {
    let get_err = |e: sqlx::Error| Error::Database(e.to_string());

    let attributes_json: String = row.try_get("attributes").map_err(get_err)?;
    let attributes: AttributeBag = serde_json::from_str(&attributes_json)
        .map_err(|e| Error::Database(format!("Invalid attribute bag: {}", e)))?;
    let sync_status: String = row.try_get("sync_status").map_err(get_err)?;
    let created_at: String = row.try_get("created_at").map_err(get_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(get_err)?;

    Ok(DirectoryUser {
        id: row.try_get("id").map_err(get_err)?,
        config_id: row.try_get("config_id").map_err(get_err)?,
        dn: row.try_get("dn").map_err(get_err)?,
        username: row.try_get("username").map_err(get_err)?,
        email: row.try_get("email").map_err(get_err)?,
        nickname: row.try_get("nickname").map_err(get_err)?,
        first_name: row.try_get("first_name").map_err(get_err)?,
        last_name: row.try_get("last_name").map_err(get_err)?,
        attributes,
        is_active: row.try_get("is_active").map_err(get_err)?,
        last_login: parse_optional_timestamp(row.try_get("last_login").map_err(get_err)?)?,
        last_sync: parse_optional_timestamp(row.try_get("last_sync").map_err(get_err)?)?,
        sync_status: SyncStatus::parse(&sync_status)?,
        system_user_id: row.try_get("system_user_id").map_err(get_err)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn system_user_from_row(row: &SqliteRow) -> Result<SystemUser> {
    let get_err = |e: sqlx::Error| Error::Database(e.to_string());

    let channel: String = row.try_get("login_channel").map_err(get_err)?;
    let created_at: String = row.try_get("created_at").map_err(get_err)?;

    Ok(SystemUser {
        id: row.try_get("id").map_err(get_err)?,
        email: row.try_get("email").map_err(get_err)?,
        nickname: row.try_get("nickname").map_err(get_err)?,
        login_channel: LoginChannel::parse(&channel)?,
        is_active: row.try_get("is_active").map_err(get_err)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn attributes_json(attributes: &AttributeBag) -> Result<String> {
    serde_json::to_string(attributes)
        .map_err(|e| Error::Internal(format!("Failed to encode attributes: {}", e)))
}

const DIRECTORY_USER_COLUMNS: &str = "id, config_id, dn, username, email, nickname, \
    first_name, last_name, attributes, is_active, last_login, last_sync, sync_status, \
    system_user_id, created_at, updated_at";

// ============================================================================
// Repository implementation
// ============================================================================

#[async_trait]
impl DirectoryRepository for MetadataStore {
    async fn get_active_config(&self) -> Result<Option<DirectoryConfig>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM directory_configs
            WHERE is_active = 1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(config_from_row).transpose()
    }

    async fn save_config(&self, config: &DirectoryConfig) -> Result<()> {
        let mapping = serde_json::to_string(&config.attr_mapping)
            .map_err(|e| Error::Internal(format!("Failed to encode mapping: {}", e)))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query("UPDATE directory_configs SET is_active = 0 WHERE id != ?")
            .bind(&config.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO directory_configs (
                id, name, host, port, use_ssl, bind_dn, bind_password, search_base,
                search_filter, user_dn_template, attr_mapping, enabled, auto_create_user,
                sync_enabled, manual_sync_override, sync_interval, last_sync_time,
                sync_status, is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                host = excluded.host,
                port = excluded.port,
                use_ssl = excluded.use_ssl,
                bind_dn = excluded.bind_dn,
                bind_password = excluded.bind_password,
                search_base = excluded.search_base,
                search_filter = excluded.search_filter,
                user_dn_template = excluded.user_dn_template,
                attr_mapping = excluded.attr_mapping,
                enabled = excluded.enabled,
                auto_create_user = excluded.auto_create_user,
                sync_enabled = excluded.sync_enabled,
                manual_sync_override = excluded.manual_sync_override,
                sync_interval = excluded.sync_interval,
                is_active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&config.id)
        .bind(&config.name)
        .bind(&config.host)
        .bind(config.port.map(i64::from))
        .bind(config.use_ssl)
        .bind(config.bind.as_ref().map(|b| b.dn.clone()))
        .bind(config.bind.as_ref().map(|b| b.password.expose().to_string()))
        .bind(&config.search_base)
        .bind(&config.search_filter)
        .bind(&config.user_dn_template)
        .bind(mapping)
        .bind(config.enabled)
        .bind(config.auto_create_user)
        .bind(config.sync_enabled)
        .bind(config.manual_sync_override)
        .bind(config.sync_interval as i64)
        .bind(config.last_sync_time.as_ref().map(format_timestamp))
        .bind(config.sync_status.as_str())
        .bind(format_timestamp(&config.created_at))
        .bind(format_timestamp(&config.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        debug!("Saved directory configuration: {}", config.id);
        Ok(())
    }

    async fn update_sync_status(
        &self,
        config_id: &str,
        status: ConfigSyncStatus,
        sync_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE directory_configs
            SET sync_status = ?, last_sync_time = COALESCE(?, last_sync_time)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(sync_time.as_ref().map(format_timestamp))
        .bind(config_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_directory_user(&self, id: &str) -> Result<Option<DirectoryUser>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM directory_users WHERE id = ?",
            DIRECTORY_USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(directory_user_from_row).transpose()
    }

    async fn find_by_dn(&self, config_id: &str, dn: &str) -> Result<Option<DirectoryUser>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM directory_users WHERE config_id = ? AND dn = ?",
            DIRECTORY_USER_COLUMNS
        ))
        .bind(config_id)
        .bind(dn)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(directory_user_from_row).transpose()
    }

    async fn insert_directory_user(&self, user: &DirectoryUser) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO directory_users ({})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(config_id, dn) DO NOTHING
            "#,
            DIRECTORY_USER_COLUMNS
        ))
        .bind(&user.id)
        .bind(&user.config_id)
        .bind(&user.dn)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.nickname)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(attributes_json(&user.attributes)?)
        .bind(user.is_active)
        .bind(user.last_login.as_ref().map(format_timestamp))
        .bind(user.last_sync.as_ref().map(format_timestamp))
        .bind(user.sync_status.as_str())
        .bind(&user.system_user_id)
        .bind(format_timestamp(&user.created_at))
        .bind(format_timestamp(&user.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let created = result.rows_affected() == 1;
        if created {
            debug!("Created directory user: {}", user.dn);
        }
        Ok(created)
    }

    async fn apply_sync_update(
        &self,
        id: &str,
        entry: &MappedEntry,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let profile = &entry.profile;
        let now = format_timestamp(&at);

        sqlx::query(
            r#"
            UPDATE directory_users
            SET username = ?, email = ?, nickname = ?, first_name = ?, last_name = ?,
                attributes = ?, is_active = 1, last_sync = ?, sync_status = 'synced',
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&profile.username)
        .bind(&profile.email)
        .bind(&profile.nickname)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(attributes_json(&entry.attributes)?)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn mark_sync_error(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let now = format_timestamp(&at);

        sqlx::query(
            r#"
            UPDATE directory_users
            SET sync_status = 'error', last_sync = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn record_login(
        &self,
        id: &str,
        entry: Option<&MappedEntry>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let now = format_timestamp(&at);

        let query = match entry {
            Some(entry) => sqlx::query(
                r#"
                UPDATE directory_users
                SET username = ?, email = ?, nickname = ?, first_name = ?, last_name = ?,
                    attributes = ?, last_login = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&entry.profile.username)
            .bind(&entry.profile.email)
            .bind(&entry.profile.nickname)
            .bind(&entry.profile.first_name)
            .bind(&entry.profile.last_name)
            .bind(attributes_json(&entry.attributes)?)
            .bind(now.clone())
            .bind(now)
            .bind(id),
            None => sqlx::query(
                "UPDATE directory_users SET last_login = ?, updated_at = ? WHERE id = ?",
            )
            .bind(now.clone())
            .bind(now)
            .bind(id),
        };

        query
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn link_system_user(&self, id: &str, system_user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE directory_users SET system_user_id = ?
            WHERE id = ? AND system_user_id IS NULL
            "#,
        )
        .bind(system_user_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_directory_users(
        &self,
        config_id: &str,
        active_only: bool,
    ) -> Result<Vec<DirectoryUser>> {
        let sql = if active_only {
            format!(
                "SELECT {} FROM directory_users WHERE config_id = ? AND is_active = 1 ORDER BY username",
                DIRECTORY_USER_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM directory_users WHERE config_id = ? ORDER BY username",
                DIRECTORY_USER_COLUMNS
            )
        };

        let rows = sqlx::query(&sql)
            .bind(config_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(directory_user_from_row).collect()
    }

    async fn list_active_entries(&self, config_id: &str) -> Result<Vec<ActiveEntry>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, dn FROM directory_users WHERE config_id = ? AND is_active = 1",
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(id, dn)| ActiveEntry { id, dn })
            .collect())
    }

    async fn deactivate_directory_user(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE directory_users
            SET is_active = 0, sync_status = 'stale', updated_at = ?
            WHERE id = ? AND is_active = 1
            "#,
        )
        .bind(format_timestamp(&at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_directory_user_active(&self, id: &str, active: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE directory_users SET is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(active)
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_directory_users(&self, config_id: &str) -> Result<UserStats> {
        let (total, active): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(is_active), 0)
            FROM directory_users WHERE config_id = ?
            "#,
        )
        .bind(config_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let total = total.max(0) as u64;
        let active = active.max(0) as u64;
        Ok(UserStats {
            total,
            active,
            inactive: total.saturating_sub(active),
        })
    }

    async fn get_system_user(&self, id: &str) -> Result<Option<SystemUser>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, nickname, login_channel, is_active, created_at
            FROM system_users WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(system_user_from_row).transpose()
    }

    async fn find_system_user_by_email(&self, email: &str) -> Result<Option<SystemUser>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, nickname, login_channel, is_active, created_at
            FROM system_users WHERE email = ? COLLATE NOCASE
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(system_user_from_row).transpose()
    }

    async fn create_system_user(&self, user: &SystemUser) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_users (id, email, nickname, login_channel, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.nickname)
        .bind(user.login_channel.as_str())
        .bind(user.is_active)
        .bind(format_timestamp(&user.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        debug!("Created system user: {}", user.email);
        Ok(())
    }
}
