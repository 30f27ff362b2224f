//! Composition keys and the per-factory registration table

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable descriptor identifying a composition.
///
/// * `default` keys are applied automatically and are never accepted as an
///   explicit request.
/// * At most one `single` key may be applied within one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositionKey {
    name: String,
    #[serde(default)]
    default: bool,
    #[serde(default)]
    single: bool,
}

impl CompositionKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: false,
            single: false,
        }
    }

    /// Marks the key as exclusive with every other single key.
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Marks the key as applied automatically.
    pub fn applied_by_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.default
    }

    pub fn is_single(&self) -> bool {
        self.single
    }
}

impl std::fmt::Display for CompositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Name to key lookup table owned by a factory.
///
/// A key can be registered under several names. Registration order is kept so
/// that default keys apply deterministically.
#[derive(Debug, Clone, Default)]
pub struct KeyTable {
    keys: Vec<CompositionKey>,
    /// (registered name, index into `keys`) in registration order
    entries: Vec<(String, usize)>,
    by_name: HashMap<String, usize>,
}

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` under its own name.
    pub fn register_key(&mut self, key: CompositionKey) {
        let name = key.name().to_string();
        self.register_named_key(name, key);
    }

    /// Registers `key` under `name`. Re-registering a name replaces its key.
    pub fn register_named_key(&mut self, name: impl Into<String>, key: CompositionKey) {
        let name = name.into();
        let index = match self.keys.iter().position(|existing| *existing == key) {
            Some(index) => index,
            None => {
                self.keys.push(key);
                self.keys.len() - 1
            }
        };

        if self.by_name.insert(name.clone(), index).is_some() {
            self.entries.retain(|(existing, _)| *existing != name);
        }
        self.entries.push((name, index));
    }

    /// Builder form of [`KeyTable::register_key`].
    pub fn with_key(mut self, key: CompositionKey) -> Self {
        self.register_key(key);
        self
    }

    /// Builder form of [`KeyTable::register_named_key`].
    pub fn with_named_key(mut self, name: impl Into<String>, key: CompositionKey) -> Self {
        self.register_named_key(name, key);
        self
    }

    /// Returns the key registered under `name`.
    pub fn by_name(&self, name: &str) -> Option<&CompositionKey> {
        self.by_name.get(name).map(|&index| &self.keys[index])
    }

    /// Returns the first name `key` was registered under.
    pub fn name_of(&self, key: &CompositionKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, index)| self.keys[*index] == *key)
            .map(|(name, _)| name.as_str())
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Distinct keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &CompositionKey> {
        self.keys.iter()
    }

    pub fn defaults(&self) -> impl Iterator<Item = &CompositionKey> {
        self.keys.iter().filter(|key| key.is_default())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> KeyTable {
        KeyTable::new()
            .with_key(CompositionKey::new("port-mapping").single())
            .with_key(CompositionKey::new("environment").applied_by_default())
            .with_named_key("ports", CompositionKey::new("port-mapping").single())
    }

    #[test]
    fn test_lookup_by_name_and_alias() {
        let table = table();
        let key = table.by_name("port-mapping").unwrap();
        assert!(key.is_single());
        assert!(!key.is_default());
        assert_eq!(table.by_name("ports"), Some(key));
        assert!(table.by_name("volume-mount").is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_reverse_lookup_prefers_first_name() {
        let table = table();
        let key = CompositionKey::new("port-mapping").single();
        assert_eq!(table.name_of(&key), Some("port-mapping"));
        assert_eq!(table.name_of(&CompositionKey::new("unknown")), None);
    }

    #[test]
    fn test_defaults_keep_registration_order() {
        let table = KeyTable::new()
            .with_key(CompositionKey::new("b").applied_by_default())
            .with_key(CompositionKey::new("a"))
            .with_key(CompositionKey::new("c").applied_by_default());
        let defaults: Vec<_> = table.defaults().map(CompositionKey::name).collect();
        assert_eq!(defaults, vec!["b", "c"]);
    }

    #[test]
    fn test_reregistering_name_replaces_key() {
        let mut table = KeyTable::new().with_key(CompositionKey::new("motd"));
        table.register_named_key("motd", CompositionKey::new("server-properties"));
        assert_eq!(table.by_name("motd").map(CompositionKey::name), Some("server-properties"));
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["motd"]);
    }
}
