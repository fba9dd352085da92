//! Identity resolution
//!
//! Turns a login name into the DN to bind as. Template mode substitutes the
//! name into a DN pattern without touching the network; search mode looks the
//! entry up as the service account and insists on exactly one match.

use ldap3::{dn_escape, ldap_escape};
use ldapsync_core::types::{DirectoryConfig, ResolutionStrategy};
use ldapsync_core::{Error, Result, USERNAME_PLACEHOLDER};
use tracing::debug;

use super::client::{DirectoryClient, RawEntry};

/// Outcome of resolving a username
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub dn: String,
    /// Attributes fetched during a search; `None` in template mode
    pub entry: Option<RawEntry>,
}

/// DN for `username` from a `{username}` template
pub fn template_dn(template: &str, username: &str) -> String {
    template.replace(USERNAME_PLACEHOLDER, &dn_escape(username))
}

/// Search filter selecting `username`.
///
/// A filter carrying the `{username}` placeholder gets the escaped name
/// substituted; any other filter is AND-ed with an equality match on the
/// username attribute.
pub fn user_filter(filter: &str, username_attr: &str, username: &str) -> String {
    let escaped = ldap_escape(username);
    if filter.contains(USERNAME_PLACEHOLDER) {
        filter.replace(USERNAME_PLACEHOLDER, &escaped)
    } else {
        format!("(&{}({}={}))", filter, username_attr, escaped)
    }
}

/// Filter for a full-scope scan.
///
/// The `{username}` placeholder becomes a wildcard so a per-user login
/// filter still selects every user; filters without it pass through.
pub fn scan_filter(filter: &str) -> String {
    filter.replace(USERNAME_PLACEHOLDER, "*")
}

#[derive(Clone)]
pub struct IdentityResolver {
    client: DirectoryClient,
}

impl IdentityResolver {
    pub fn new(client: DirectoryClient) -> Self {
        Self { client }
    }

    pub async fn resolve(&self, config: &DirectoryConfig, username: &str) -> Result<ResolvedIdentity> {
        match config.strategy() {
            ResolutionStrategy::Template { dn_template } => Ok(ResolvedIdentity {
                dn: template_dn(dn_template, username),
                entry: None,
            }),
            ResolutionStrategy::Search { base_dn, filter } => {
                let filter = user_filter(filter, &config.attr_mapping.username, username);
                debug!("Searching for user with filter: {}", filter);

                let mut session = self.client.service_session(config).await?;
                let mut entries = session
                    .search(base_dn, &filter, &config.attr_mapping.requested_attributes())
                    .await?;
                drop(session);

                match entries.len() {
                    0 => Err(Error::NotFound),
                    1 => {
                        let entry = entries.remove(0);
                        debug!("Found user DN: {}", entry.dn);
                        Ok(ResolvedIdentity {
                            dn: entry.dn.clone(),
                            entry: Some(entry),
                        })
                    }
                    count => Err(Error::Ambiguous { count }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDirectory;
    use ldapsync_core::config::DirectoryClientConfig;
    use std::sync::Arc;

    fn resolver(fake: &FakeDirectory) -> IdentityResolver {
        IdentityResolver::new(DirectoryClient::new(
            Arc::new(fake.clone()),
            DirectoryClientConfig::default(),
        ))
    }

    fn config() -> DirectoryConfig {
        DirectoryConfig::new("corp", "ldap.example.com", "ou=users,dc=example,dc=com")
    }

    #[test]
    fn test_filters_escape_username() {
        assert_eq!(
            user_filter("(objectClass=person)", "uid", "a*)(uid=*").to_lowercase(),
            "(&(objectclass=person)(uid=a\\2a\\29\\28uid=\\2a))"
        );
        assert_eq!(
            user_filter("(&(objectClass=user)(sAMAccountName={username}))", "uid", "bob"),
            "(&(objectClass=user)(sAMAccountName=bob))"
        );
    }

    #[test]
    fn test_scan_filter_widens_placeholder() {
        assert_eq!(
            scan_filter("(&(objectClass=person)(uid={username}))"),
            "(&(objectClass=person)(uid=*))"
        );
        assert_eq!(scan_filter("(objectClass=person)"), "(objectClass=person)");
    }

    #[test]
    fn test_template_escapes_dn_specials() {
        let dn = template_dn("uid={username},ou=users,dc=example,dc=com", "smith, john");
        assert!(dn.starts_with("uid=smith\\"));
        assert!(!dn.contains("smith, john"));
        assert!(dn.ends_with(" john,ou=users,dc=example,dc=com"));
    }

    #[tokio::test]
    async fn test_template_mode_never_searches() {
        let fake = FakeDirectory::new();
        let mut config = config();
        config.user_dn_template = Some("uid={username},ou=users,dc=example,dc=com".into());

        let resolved = resolver(&fake).resolve(&config, "alice").await.unwrap();
        assert_eq!(resolved.dn, "uid=alice,ou=users,dc=example,dc=com");
        assert!(resolved.entry.is_none());
        assert_eq!(fake.connects(), 0);
        assert_eq!(fake.searches(), 0);
    }

    #[tokio::test]
    async fn test_search_mode_requires_single_match() {
        let fake = FakeDirectory::new();
        fake.add_entry("uid=dave,ou=users,dc=example,dc=com", &[("uid", "dave")]);
        fake.add_entry("uid=dave,ou=contractors,ou=users,dc=example,dc=com", &[("uid", "dave")]);
        fake.add_entry("uid=erin,ou=users,dc=example,dc=com", &[("uid", "erin"), ("mail", "erin@example.com")]);
        let resolver = resolver(&fake);
        let config = config();

        let err = resolver.resolve(&config, "dave").await.unwrap_err();
        assert!(matches!(err, Error::Ambiguous { count: 2 }));

        let err = resolver.resolve(&config, "frank").await.unwrap_err();
        assert!(matches!(err, Error::NotFound));

        let resolved = resolver.resolve(&config, "erin").await.unwrap();
        assert_eq!(resolved.dn, "uid=erin,ou=users,dc=example,dc=com");
        let entry = resolved.entry.unwrap();
        assert_eq!(entry.attrs["mail"], vec!["erin@example.com".to_string()]);
    }
}
