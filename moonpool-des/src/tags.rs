//! Per-process metadata.
//!
//! Every process owns exactly one [`TagSet`], allocated when the process is
//! spawned. Tag sets are plain values: copying one into a child process
//! produces an independent map, so no two processes ever alias the same
//! storage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A map of tag names to arbitrary JSON values.
///
/// # Example
///
/// ```rust
/// use moonpool_des::TagSet;
/// use serde_json::json;
///
/// let mut tags = TagSet::new();
/// tags.set("priority", 1);
/// tags.set("route", json!({"belt": 3}));
/// assert_eq!(tags.get("priority"), Some(&json!(1)));
/// assert!(tags.get("unknown").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, Value>,
}

impl TagSet {
    /// Create an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a tag.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.tags.get(name)
    }

    /// Set a tag, returning the previous value if any.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.tags.insert(name.into(), value.into())
    }

    /// Remove a tag, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.tags.remove(name)
    }

    /// Whether the tag is present.
    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    /// Remove every tag.
    pub fn clear(&mut self) {
        self.tags.clear();
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate over tags in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            tags: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
