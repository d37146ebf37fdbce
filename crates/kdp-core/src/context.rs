//! Render context
//!
//! The context is the `context` binding of a render call: the subject's
//! identity, its owning group's metadata, shared settings collected from the
//! group and a generated short identifier. It is built fresh for every
//! render and is append-only while being built.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha1::{Digest, Sha1};
use sha2::Sha512;
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::subject::{GroupInfo, Subject};

/// Reserved context keys
pub mod keys {
    pub const NAME: &str = "name";
    pub const NAMESPACE: &str = "namespace";
    pub const GROUP_NAME: &str = "bdcName";
    pub const GROUP_LABELS: &str = "bdcLabels";
    pub const GROUP_ANNOTATIONS: &str = "bdcAnnotations";
    pub const SHORT_ID: &str = "shortId";
}

/// A context entry: a scalar string or a nested string map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Str(String),
    Map(BTreeMap<String, String>),
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Str(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Str(value)
    }
}

impl From<BTreeMap<String, String>> for ContextValue {
    fn from(value: BTreeMap<String, String>) -> Self {
        ContextValue::Map(value)
    }
}

/// Per-render key/value environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    entries: BTreeMap<String, ContextValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry unless the key is already present
    ///
    /// Returns false (and leaves the context untouched) on collision.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> bool {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, value.into());
        true
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    /// Get a scalar entry
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(ContextValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContextValue)> {
        self.entries.iter()
    }

    /// Convert to the JSON value bound to `context` in templates
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(&self.entries).unwrap_or(JsonValue::Null)
    }
}

impl<K: Into<String>, V: Into<ContextValue>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = Context::new();
        for (key, value) in iter {
            context.append(key, value);
        }
        context
    }
}

/// Builds the context for one subject
pub struct ContextBuilder {
    name: String,
    namespace: Option<String>,
    group: GroupInfo,
    shared: Vec<BTreeMap<String, String>>,
    short_id_length: Option<usize>,
}

impl ContextBuilder {
    /// Start from a subject and its resolved owning group
    pub fn new(subject: &dyn Subject, group: &GroupInfo) -> Self {
        let identity = subject.identity();
        Self {
            name: identity.name,
            namespace: identity.namespace,
            group: group.clone(),
            shared: Vec::new(),
            short_id_length: None,
        }
    }

    /// Add shared settings; on key collision the later source wins
    pub fn with_shared_settings<I>(mut self, settings: I) -> Self
    where
        I: IntoIterator<Item = BTreeMap<String, String>>,
    {
        self.shared.extend(settings);
        self
    }

    /// Append a short identifier of the given length under `shortId`
    pub fn with_short_id(mut self, length: usize) -> Self {
        self.short_id_length = Some(length);
        self
    }

    /// Assemble the context
    pub fn build(self) -> Result<Context> {
        let namespace = self
            .namespace
            .clone()
            .or_else(|| self.group.default_namespace.clone())
            .ok_or_else(|| CoreError::MissingField {
                field: "namespace".to_string(),
            })?;

        let mut context = Context::new();
        context.append(keys::NAME, self.name.as_str());
        context.append(keys::NAMESPACE, namespace.as_str());
        context.append(keys::GROUP_NAME, self.group.name.as_str());
        context.append(keys::GROUP_LABELS, self.group.labels.clone());
        context.append(keys::GROUP_ANNOTATIONS, self.group.annotations.clone());

        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for source in self.shared {
            merged.extend(source);
        }
        for (key, value) in merged {
            if !context.append(key.as_str(), value) {
                tracing::warn!(key = %key, "shared setting collides with a reserved context key, skipping");
            }
        }

        if let Some(length) = self.short_id_length {
            let id = short_id(&namespace, &self.name, length);
            if !context.append(keys::SHORT_ID, id) {
                tracing::warn!("shared settings already define shortId, keeping it");
            }
        }

        Ok(context)
    }
}

/// Deterministic short identifier for `(namespace, name)`
///
/// SHA-1 over the namespace then the name, SHA-512 over the SHA-1 hex digest,
/// the leading 8 hex characters read as an integer, its decimal text base64
/// encoded, stripped of `+`, `/` and `=`, truncated and lowercased.
pub fn short_id(namespace: &str, name: &str, length: usize) -> String {
    let mut hasher = Sha1::new();
    hasher.update(namespace.as_bytes());
    hasher.update(name.as_bytes());
    let first = hex::encode(hasher.finalize());

    let second = hex::encode(Sha512::digest(first.as_bytes()));
    let number = u64::from_str_radix(&second[..8], 16).unwrap_or_default();

    let encoded = base64::engine::general_purpose::STANDARD.encode(number.to_string());
    encoded
        .chars()
        .filter(|c| !matches!(c, '+' | '/' | '='))
        .take(length)
        .collect::<String>()
        .to_lowercase()
}
