//! Directory to local mirror reconciliation
//!
//! One pass searches the whole configured scope, upserts every returned
//! entry by DN and then deactivates active shadow users the directory no
//! longer returned. Rows are written one at a time; an interrupted pass
//! leaves processed rows updated and the rest untouched.

use chrono::{DateTime, Utc};
use ldapsync_auth::{
    ensure_system_user, map_entry, scan_filter, ConflictPolicy, DirectoryClient, RawEntry,
};
use ldapsync_core::types::{DirectoryConfig, DirectoryUser, SyncRunStats};
use ldapsync_core::{Error, Result};
use ldapsync_metadata::DirectoryRepository;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

enum EntryOutcome {
    Created,
    Updated,
    Malformed,
}

#[derive(Clone)]
pub struct Reconciler {
    client: DirectoryClient,
    store: Arc<dyn DirectoryRepository>,
}

impl Reconciler {
    pub fn new(client: DirectoryClient, store: Arc<dyn DirectoryRepository>) -> Self {
        Self { client, store }
    }

    /// Run one reconciliation pass for `config`
    pub async fn reconcile(&self, config: &DirectoryConfig) -> Result<SyncRunStats> {
        config.validate()?;

        let mut session = self
            .client
            .service_session(config)
            .await
            .map_err(|e| Error::Sync(format!("Unable to bind as service account: {}", e)))?;
        let entries = session
            .search(
                &config.search_base,
                &scan_filter(&config.search_filter),
                &config.attr_mapping.requested_attributes(),
            )
            .await
            .map_err(|e| Error::Sync(format!("Directory search failed: {}", e)))?;
        drop(session);

        info!(
            "Directory returned {} entries under {}",
            entries.len(),
            config.search_base
        );

        let now = Utc::now();
        let mut stats = SyncRunStats {
            total_found: entries.len() as u64,
            ..Default::default()
        };
        let mut seen: HashSet<String> = HashSet::with_capacity(entries.len());

        for entry in &entries {
            if !entry.dn.trim().is_empty() {
                seen.insert(entry.dn.to_lowercase());
            }

            match self.apply_entry(config, entry, now).await {
                Ok(EntryOutcome::Created) => stats.created += 1,
                Ok(EntryOutcome::Updated) => stats.updated += 1,
                Ok(EntryOutcome::Malformed) => stats.errors += 1,
                Err(e) => {
                    warn!("Failed to apply directory entry {}: {}", entry.dn, e);
                    stats.errors += 1;
                }
            }
        }

        let active = self
            .store
            .list_active_entries(&config.id)
            .await
            .map_err(|e| Error::Sync(format!("Unable to list shadow users: {}", e)))?;

        for candidate in active {
            if seen.contains(&candidate.dn.to_lowercase()) {
                continue;
            }

            match self.store.deactivate_directory_user(&candidate.id, now).await {
                Ok(true) => {
                    info!("Deactivated directory user no longer present: {}", candidate.dn);
                    stats.deactivated += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to deactivate {}: {}", candidate.dn, e);
                    stats.errors += 1;
                }
            }
        }

        record_entry_metrics(&stats);
        Ok(stats)
    }

    async fn apply_entry(
        &self,
        config: &DirectoryConfig,
        entry: &RawEntry,
        now: DateTime<Utc>,
    ) -> Result<EntryOutcome> {
        let mapped = map_entry(&entry.attrs, &config.attr_mapping);

        if entry.dn.trim().is_empty() || mapped.profile.username.trim().is_empty() {
            warn!(
                "Directory entry '{}' has no value for {}",
                entry.dn, config.attr_mapping.username
            );
            if !entry.dn.trim().is_empty() {
                if let Some(existing) = self.store.find_by_dn(&config.id, &entry.dn).await? {
                    self.store.mark_sync_error(&existing.id, now).await?;
                }
            }
            return Ok(EntryOutcome::Malformed);
        }

        if let Some(existing) = self.store.find_by_dn(&config.id, &entry.dn).await? {
            self.store.apply_sync_update(&existing.id, &mapped, now).await?;
            if !existing.is_active {
                info!("Reactivated directory user: {}", entry.dn);
            }
            debug!("Updated directory user: {}", entry.dn);
            return Ok(EntryOutcome::Updated);
        }

        let mut user = DirectoryUser::new(
            &config.id,
            &entry.dn,
            mapped.profile.clone(),
            mapped.attributes.clone(),
        );
        user.last_sync = Some(now);

        if !self.store.insert_directory_user(&user).await? {
            // A concurrent login created the row
            let existing = self
                .store
                .find_by_dn(&config.id, &entry.dn)
                .await?
                .ok_or_else(|| Error::UserNotFound(entry.dn.clone()))?;
            self.store.apply_sync_update(&existing.id, &mapped, now).await?;
            return Ok(EntryOutcome::Updated);
        }

        if config.auto_create_user {
            let provisioned =
                ensure_system_user(self.store.as_ref(), &user, ConflictPolicy::Skip).await;
            if let Err(e) = provisioned {
                warn!("Failed to provision system user for {}: {}", entry.dn, e);
            }
        }

        Ok(EntryOutcome::Created)
    }
}

fn record_entry_metrics(stats: &SyncRunStats) {
    metrics::counter!("ldapsync_sync_entries_total", "kind" => "created").increment(stats.created);
    metrics::counter!("ldapsync_sync_entries_total", "kind" => "updated").increment(stats.updated);
    metrics::counter!("ldapsync_sync_entries_total", "kind" => "deactivated")
        .increment(stats.deactivated);
    metrics::counter!("ldapsync_sync_entries_total", "kind" => "errors").increment(stats.errors);
}
