//! Raw directory attribute bag
//!
//! Attributes fetched from the directory are kept verbatim for audit and
//! debugging. The engine never matches on them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered attribute name to value mapping
pub type AttributeBag = BTreeMap<String, AttributeValue>;

/// Loosely typed attribute value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Boolean(bool),
    Integer(i64),
    Text(String),
    Multi(Vec<String>),
}

impl AttributeValue {
    /// Build a value from the raw strings returned by the directory.
    ///
    /// Single values become `Integer` or `Boolean` only when their textual
    /// form survives the conversion unchanged, so nothing is lost. An
    /// attribute returned without values stays an empty `Multi`.
    pub fn from_values(values: &[String]) -> Self {
        match values {
            [single] => Self::from_single(single),
            many => AttributeValue::Multi(many.to_vec()),
        }
    }

    fn from_single(value: &str) -> Self {
        match value {
            "TRUE" => return AttributeValue::Boolean(true),
            "FALSE" => return AttributeValue::Boolean(false),
            _ => {}
        }

        if let Ok(n) = value.parse::<i64>() {
            if n.to_string() == value {
                return AttributeValue::Integer(n);
            }
        }

        AttributeValue::Text(value.to_string())
    }
}

/// Convert raw directory attributes into an ordered bag
pub fn attribute_bag<'a, I>(attrs: I) -> AttributeBag
where
    I: IntoIterator<Item = (&'a String, &'a Vec<String>)>,
{
    attrs
        .into_iter()
        .map(|(name, values)| (name.clone(), AttributeValue::from_values(values)))
        .collect()
}
