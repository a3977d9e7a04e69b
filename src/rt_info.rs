//! Runtime information annotations attached to graph nodes.
//!
//! Passes attach small key/value annotations to nodes to communicate with
//! later passes and with backends. The keys read and written by this crate
//! are listed in [`keys`].

use std::collections::BTreeMap;

use serde::Serialize;

/// Well-known runtime info keys.
pub mod keys {
    /// List of the original node names that were fused into a node.
    pub const FUSED_NAMES: &str = "fused_names";

    /// Marks a node as part of a weight decompression subgraph. Such nodes
    /// are kept as-is by constant folding.
    pub const DECOMPRESSION: &str = "decompression";

    /// Comma-separated list of preferred kernel implementations, consumed
    /// by backends.
    pub const PRIMITIVES_PRIORITY: &str = "primitives_priority";

    /// Prevents constant folding of a node.
    pub const DISABLE_CONST_FOLDING: &str = "disable_const_folding";
}

/// Value of a runtime info entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RtValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
}

impl From<bool> for RtValue {
    fn from(value: bool) -> Self {
        RtValue::Bool(value)
    }
}

impl From<&str> for RtValue {
    fn from(value: &str) -> Self {
        RtValue::String(value.to_string())
    }
}

/// Runtime info map of a node.
///
/// Entries are kept sorted by key so that iteration and serialization are
/// deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RtInfo {
    entries: BTreeMap<String, RtValue>,
}

impl RtInfo {
    pub fn new() -> RtInfo {
        RtInfo::default()
    }

    pub fn get(&self, key: &str) -> Option<&RtValue> {
        self.entries.get(key)
    }

    pub fn insert<V: Into<RtValue>>(&mut self, key: &str, value: V) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<RtValue> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RtValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Return true if `key` is present and set to `true`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(RtValue::Bool(true)))
    }

    /// Return the names recorded under [`keys::FUSED_NAMES`].
    pub fn fused_names(&self) -> &[String] {
        match self.entries.get(keys::FUSED_NAMES) {
            Some(RtValue::List(names)) => names,
            _ => &[],
        }
    }

    /// Merge entries from another node into this one.
    ///
    /// Fused names are unioned, preserving order. Other entries are copied
    /// only if they are absent here.
    pub fn merge_from(&mut self, other: &RtInfo) {
        for (key, value) in &other.entries {
            if key == keys::FUSED_NAMES {
                let mut names = self.fused_names().to_vec();
                if let RtValue::List(other_names) = value {
                    for name in other_names {
                        if !names.contains(name) {
                            names.push(name.clone());
                        }
                    }
                }
                self.entries
                    .insert(keys::FUSED_NAMES.to_string(), RtValue::List(names));
            } else if !self.entries.contains_key(key) {
                self.entries.insert(key.clone(), value.clone());
            }
        }
    }
}
