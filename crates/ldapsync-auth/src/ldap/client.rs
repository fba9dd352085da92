//! LDAP Client implementation
//!
//! Handles LDAP connections, binds and searches. Service-account sessions
//! are pooled per configuration revision; credential checks always run on a
//! fresh connection of their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ldap3::exop::WhoAmI;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use ldapsync_core::config::DirectoryClientConfig;
use ldapsync_core::types::{BindCredentials, DirectoryConfig};
use ldapsync_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

// ============================================================================
// Connector seam
// ============================================================================

/// Where and how to reach the directory server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Example: "ldaps://dc.example.com:636"
    pub url: String,
    pub starttls: bool,
    pub skip_tls_verify: bool,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
}

impl ConnectionTarget {
    pub fn new(config: &DirectoryConfig, settings: &DirectoryClientConfig) -> Self {
        Self {
            url: config.server_url(),
            // STARTTLS only makes sense on a plain transport
            starttls: settings.starttls && !config.use_ssl,
            skip_tls_verify: settings.skip_tls_verify,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            operation_timeout: Duration::from_secs(settings.operation_timeout_secs),
        }
    }
}

/// One entry returned by a search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl From<SearchEntry> for RawEntry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs,
        }
    }
}

/// An open connection to the directory
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind. A rejected secret is `InvalidCredentials`.
    async fn bind(&mut self, dn: &str, secret: &str) -> Result<()>;

    /// Subtree search returning the requested attributes
    async fn search(&mut self, base: &str, filter: &str, attrs: &[String])
        -> Result<Vec<RawEntry>>;

    /// Cheap round trip used to validate a pooled connection
    async fn ping(&mut self) -> Result<()>;

    async fn unbind(&mut self) -> Result<()>;
}

/// Opens connections to a directory server
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn DirectoryConnection>>;
}

// ============================================================================
// ldap3 implementation
// ============================================================================

/// Production connector backed by `ldap3`
#[derive(Debug, Clone, Copy, Default)]
pub struct Ldap3Connector;

struct Ldap3Connection {
    ldap: Ldap,
    timeout: Duration,
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn DirectoryConnection>> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(target.connect_timeout)
            .set_starttls(target.starttls)
            .set_no_tls_verify(target.skip_tls_verify);

        debug!("Connecting to LDAP server: {}", target.url);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &target.url)
            .await
            .map_err(|e| {
                Error::Connection(format!("Failed to connect to {}: {}", target.url, e))
            })?;

        ldap3::drive!(conn);

        Ok(Box::new(Ldap3Connection {
            ldap,
            timeout: target.operation_timeout,
        }))
    }
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn bind(&mut self, dn: &str, secret: &str) -> Result<()> {
        let result = self
            .ldap
            .with_timeout(self.timeout)
            .simple_bind(dn, secret)
            .await
            .map_err(|e| Error::Connection(format!("Bind failed: {}", e)))?;

        match result.rc {
            0 => Ok(()),
            // 49 = invalidCredentials, 32 = noSuchObject for a template DN
            49 | 32 => Err(Error::InvalidCredentials),
            // 53 = unwillingToPerform, used for disabled/locked accounts
            53 => Err(Error::AccountDisabled),
            rc => Err(Error::Connection(format!(
                "Bind failed with code {}: {}",
                rc, result.text
            ))),
        }
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<Vec<RawEntry>> {
        let attrs: Vec<&str> = attrs.iter().map(String::as_str).collect();

        let (rs, _res) = self
            .ldap
            .with_timeout(self.timeout)
            .search(base, Scope::Subtree, filter, attrs)
            .await
            .map_err(|e| Error::Connection(format!("Search failed: {}", e)))?
            .success()
            .map_err(|e| Error::Search(format!("Search under {} failed: {}", base, e)))?;

        Ok(rs
            .into_iter()
            .map(|entry| RawEntry::from(SearchEntry::construct(entry)))
            .collect())
    }

    async fn ping(&mut self) -> Result<()> {
        self.ldap
            .with_timeout(self.timeout)
            .extended(WhoAmI)
            .await
            .map_err(|e| Error::Connection(format!("Ping failed: {}", e)))?
            .success()
            .map_err(|e| Error::Connection(format!("Ping rejected: {}", e)))?;
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| Error::Connection(format!("Unbind failed: {}", e)))
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Pooled connections belong to one configuration revision
#[derive(Debug, Clone, PartialEq, Eq)]
struct PoolKey {
    config_id: String,
    updated_at: DateTime<Utc>,
}

impl PoolKey {
    fn of(config: &DirectoryConfig) -> Self {
        Self {
            config_id: config.id.clone(),
            updated_at: config.updated_at,
        }
    }
}

#[derive(Default)]
struct IdlePool {
    key: Option<PoolKey>,
    connections: Vec<Box<dyn DirectoryConnection>>,
}

struct ClientInner {
    connector: Arc<dyn DirectoryConnector>,
    settings: DirectoryClientConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<IdlePool>,
}

impl ClientInner {
    /// Connect and authenticate as the service account (or anonymously)
    async fn open(
        &self,
        target: &ConnectionTarget,
        bind: Option<&BindCredentials>,
    ) -> Result<Box<dyn DirectoryConnection>> {
        let mut conn = self.connector.connect(target).await?;

        if let Some(bind) = bind {
            conn.bind(&bind.dn, bind.password.expose())
                .await
                .map_err(|e| match e {
                    Error::InvalidCredentials | Error::AccountDisabled => Error::Connection(
                        format!("Service account bind rejected for {}", bind.dn),
                    ),
                    other => other,
                })?;
        }

        Ok(conn)
    }

    fn take_idle(&self, key: &PoolKey) -> Option<Box<dyn DirectoryConnection>> {
        let mut idle = self.idle.lock();
        if idle.key.as_ref() != Some(key) {
            if !idle.connections.is_empty() {
                info!(
                    "Directory configuration changed, retiring {} pooled connections",
                    idle.connections.len()
                );
            }
            idle.connections.clear();
            idle.key = Some(key.clone());
        }
        idle.connections.pop()
    }

    fn put_idle(&self, key: &PoolKey, conn: Box<dyn DirectoryConnection>) {
        let mut idle = self.idle.lock();
        if idle.key.as_ref() == Some(key) && idle.connections.len() < self.settings.pool_size {
            idle.connections.push(conn);
        }
    }
}

/// Directory client with a bounded pool of service-account connections
#[derive(Clone)]
pub struct DirectoryClient {
    inner: Arc<ClientInner>,
}

impl DirectoryClient {
    pub fn new(connector: Arc<dyn DirectoryConnector>, settings: DirectoryClientConfig) -> Self {
        let permits = Arc::new(Semaphore::new(settings.pool_size.max(1)));
        Self {
            inner: Arc::new(ClientInner {
                connector,
                settings,
                permits,
                idle: Mutex::new(IdlePool::default()),
            }),
        }
    }

    /// Client over real LDAP connections
    pub fn ldap3(settings: DirectoryClientConfig) -> Self {
        Self::new(Arc::new(Ldap3Connector), settings)
    }

    /// Number of connections waiting for reuse
    pub fn idle_connections(&self) -> usize {
        self.inner.idle.lock().connections.len()
    }

    /// Check out a session bound as the configured service account.
    ///
    /// Waits at most `acquire_timeout_secs` for a free slot. An idle
    /// connection is pinged before reuse and replaced when the ping fails.
    pub async fn service_session(&self, config: &DirectoryConfig) -> Result<PooledSession> {
        let acquire_timeout = Duration::from_secs(self.inner.settings.acquire_timeout_secs);
        let permit = tokio::time::timeout(acquire_timeout, self.inner.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                Error::Connection("Timed out waiting for a pooled directory connection".into())
            })?
            .map_err(|_| Error::Internal("Directory connection pool is closed".into()))?;

        let key = PoolKey::of(config);
        let target = ConnectionTarget::new(config, &self.inner.settings);

        if let Some(mut conn) = self.inner.take_idle(&key) {
            match conn.ping().await {
                Ok(()) => {
                    debug!("Reusing pooled directory connection");
                    return Ok(PooledSession {
                        conn: Some(conn),
                        reused: true,
                        key,
                        target,
                        bind: config.bind.clone(),
                        inner: self.inner.clone(),
                        _permit: permit,
                    });
                }
                Err(e) => {
                    debug!("Discarding pooled directory connection: {}", e);
                }
            }
        }

        let conn = self.inner.open(&target, config.bind.as_ref()).await?;
        Ok(PooledSession {
            conn: Some(conn),
            reused: false,
            key,
            target,
            bind: config.bind.clone(),
            inner: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Bind as `dn` with `password` on a fresh, unpooled connection
    pub async fn verify_credentials(
        &self,
        config: &DirectoryConfig,
        dn: &str,
        password: &str,
    ) -> Result<()> {
        let target = ConnectionTarget::new(config, &self.inner.settings);
        let mut conn = self.inner.connector.connect(&target).await?;

        let result = conn.bind(dn, password).await;
        if let Err(e) = conn.unbind().await {
            debug!("Unbind after credential check failed: {}", e);
        }

        result
    }

    /// Connect and bind only. Nothing is searched or stored.
    pub async fn test_connection(&self, config: &DirectoryConfig) -> Result<()> {
        let target = ConnectionTarget::new(config, &self.inner.settings);
        let mut conn = self.inner.open(&target, config.bind.as_ref()).await?;

        if let Err(e) = conn.unbind().await {
            debug!("Unbind after connection test failed: {}", e);
        }

        info!("Directory connection test to {} succeeded", target.url);
        Ok(())
    }
}

/// A checked-out service-account connection.
///
/// Returned to the idle pool on drop unless it failed.
pub struct PooledSession {
    conn: Option<Box<dyn DirectoryConnection>>,
    reused: bool,
    key: PoolKey,
    target: ConnectionTarget,
    bind: Option<BindCredentials>,
    inner: Arc<ClientInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    /// Whether this session came from the idle pool
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Search on this session.
    ///
    /// A transport failure on a reused connection is retried exactly once
    /// on a fresh connection; any further failure goes to the caller.
    pub async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<Vec<RawEntry>> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::Internal("Directory session already failed".into()))?;

        match conn.search(base, filter, attrs).await {
            Ok(entries) => Ok(entries),
            Err(e) if e.is_transient() && self.reused => {
                warn!("Pooled directory connection failed ({}), retrying once", e);
                self.reused = false;
                self.conn = None;

                let mut fresh = self.inner.open(&self.target, self.bind.as_ref()).await?;
                let result = fresh.search(base, filter, attrs).await;
                if !matches!(&result, Err(e) if e.is_transient()) {
                    self.conn = Some(fresh);
                }
                result
            }
            Err(e) => {
                if e.is_transient() {
                    self.conn = None;
                }
                Err(e)
            }
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.inner.put_idle(&self.key, conn);
        }
    }
}
