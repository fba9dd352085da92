//! System user provisioning for directory accounts

use ldapsync_core::types::{directory_email, DirectoryUser, LoginChannel, SystemUser};
use ldapsync_core::{Error, Result};
use ldapsync_metadata::DirectoryRepository;
use tracing::{info, warn};

/// What to do when the account's email already belongs to a system user
/// registered through another channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Fail with `Conflict`
    Reject,
    /// Log and leave the directory user unlinked
    Skip,
}

/// Link `user` to a system user, creating one when none matches its email.
///
/// Returns the linked id, or `None` when skipped under [`ConflictPolicy::Skip`].
/// An existing link is never replaced.
pub async fn ensure_system_user(
    store: &dyn DirectoryRepository,
    user: &DirectoryUser,
    policy: ConflictPolicy,
) -> Result<Option<String>> {
    if let Some(id) = &user.system_user_id {
        return Ok(Some(id.clone()));
    }

    let profile = user.profile();
    let email = directory_email(&profile);

    let system_user_id = match store.find_system_user_by_email(&email).await? {
        Some(existing) if existing.login_channel == LoginChannel::Directory => existing.id,
        Some(existing) => {
            let message = format!(
                "{} is already registered through the {} channel",
                email,
                existing.login_channel.as_str()
            );
            return match policy {
                ConflictPolicy::Reject => Err(Error::Conflict(message)),
                ConflictPolicy::Skip => {
                    warn!("Leaving {} unlinked: {}", user.dn, message);
                    Ok(None)
                }
            };
        }
        None => {
            let system_user = SystemUser::for_directory(&profile);
            store.create_system_user(&system_user).await?;
            info!("Created system user {} for {}", system_user.email, user.dn);
            system_user.id
        }
    };

    if store.link_system_user(&user.id, &system_user_id).await? {
        Ok(Some(system_user_id))
    } else {
        // Linked concurrently; keep whatever won
        Ok(store
            .get_directory_user(&user.id)
            .await?
            .and_then(|u| u.system_user_id))
    }
}
