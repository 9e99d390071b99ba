//! Opaque property bags attached to boxes and items.
//!
//! Values are restricted to a closed set of scalars and lists. Untyped JSON
//! only appears at the (de)serialization boundary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single property value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<PropertyValue>),
}

/// Key → value mapping stored as a JSON object.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: PropertyValue) -> Option<PropertyValue> {
        self.0.insert(key.into(), value)
    }

    /// Parse a form value sent alongside an upload.
    ///
    /// Accepts either a JSON object or the `key=value;key=value` shorthand, in
    /// which case every key collects a list of text values.
    pub fn parse_form(raw: &str) -> Result<Self, serde_json::Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed);
        }

        let mut props = Self::default();
        for pair in trimmed.split(';') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let value = PropertyValue::Text(value.trim().to_string());
            match props.0.get_mut(key) {
                Some(PropertyValue::List(values)) => values.push(value),
                _ => {
                    props.0.insert(key.to_string(), PropertyValue::List(vec![value]));
                }
            }
        }
        Ok(props)
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
