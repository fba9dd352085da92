//! Directory attributes to canonical profile

use ldapsync_core::types::{attribute_bag, AttributeMapping, MappedEntry, MappingKey, UserProfile};
use std::collections::HashMap;

/// Translate a raw attribute set through the mapping.
///
/// Attribute names match case-insensitively, as LDAP does. Absent
/// attributes become empty strings.
pub fn map_entry(attrs: &HashMap<String, Vec<String>>, mapping: &AttributeMapping) -> MappedEntry {
    let value = |key: MappingKey| first_value(attrs, mapping.attribute(key)).unwrap_or_default();

    MappedEntry {
        profile: UserProfile {
            username: value(MappingKey::Username),
            email: value(MappingKey::Email),
            nickname: value(MappingKey::Nickname),
            first_name: value(MappingKey::FirstName),
            last_name: value(MappingKey::LastName),
        },
        attributes: attribute_bag(attrs),
    }
}

fn first_value(attrs: &HashMap<String, Vec<String>>, name: &str) -> Option<String> {
    attrs
        .get(name)
        .or_else(|| {
            attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
        .and_then(|values| values.first().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldapsync_core::types::AttributeValue;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in pairs {
            map.entry(k.to_string()).or_default().push(v.to_string());
        }
        map
    }

    #[test]
    fn test_profile_recovers_mapped_values() {
        let attrs = raw(&[
            ("uid", "alice"),
            ("mail", "alice@example.com"),
            ("displayName", "Alice A."),
            ("givenName", "Alice"),
            ("sn", "Anders"),
            ("uidNumber", "1001"),
        ]);
        let mapping = AttributeMapping::default();
        let mapped = map_entry(&attrs, &mapping);

        for key in MappingKey::ALL {
            assert_eq!(mapped.profile.get(key), attrs[mapping.attribute(key)][0]);
        }
        assert_eq!(
            mapped.attributes.get("uidNumber"),
            Some(&AttributeValue::Integer(1001))
        );
        assert_eq!(mapped.attributes.len(), attrs.len());
    }

    #[test]
    fn test_missing_attributes_are_empty() {
        let attrs = raw(&[("uid", "bob")]);
        let mapped = map_entry(&attrs, &AttributeMapping::default());

        assert_eq!(mapped.profile.username, "bob");
        assert_eq!(mapped.profile.email, "");
        assert_eq!(mapped.profile.last_name, "");
    }

    #[test]
    fn test_attribute_names_case_insensitive() {
        let attrs = raw(&[
            ("SAMACCOUNTNAME", "carol"),
            ("Mail", "c@example.com"),
            ("Mail", "alt@example.com"),
        ]);
        let mapped = map_entry(&attrs, &AttributeMapping::active_directory());

        assert_eq!(mapped.profile.username, "carol");
        assert_eq!(mapped.profile.email, "c@example.com");
        assert_eq!(
            mapped.attributes.get("Mail"),
            Some(&AttributeValue::Multi(vec![
                "c@example.com".into(),
                "alt@example.com".into()
            ]))
        );
    }
}
