#![forbid(unsafe_code)]

//! Key manager with named key store.

use crate::key::{KeyHandle, KeyKind, KeyUsage};
use sigill_core::{Error, Result};

/// A collection of keys consulted during signature processing.
#[derive(Debug, Clone, Default)]
pub struct KeysManager {
    keys: Vec<KeyHandle>,
}

impl KeysManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, key: KeyHandle) {
        self.keys.push(key);
    }

    /// Insert a key at the front, so it becomes the default key.
    pub fn insert_key_first(&mut self, key: KeyHandle) {
        self.keys.insert(0, key);
    }

    pub fn find_by_name(&self, name: &str) -> Option<&KeyHandle> {
        self.keys.iter().find(|k| k.name() == Some(name))
    }

    /// First key permitting `usage`.
    pub fn find_by_usage(&self, usage: KeyUsage) -> Option<&KeyHandle> {
        self.keys.iter().find(|k| k.permits(usage))
    }

    /// First key of `kind` permitting `usage`.
    pub fn find(&self, kind: KeyKind, usage: KeyUsage) -> Option<&KeyHandle> {
        self.keys
            .iter()
            .find(|k| k.kind() == kind && k.permits(usage))
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeyHandle> {
        self.keys.iter()
    }

    /// The first key, for single-key setups.
    pub fn first_key(&self) -> Result<&KeyHandle> {
        self.keys
            .first()
            .ok_or_else(|| Error::KeyNotFound("no keys in manager".into()))
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
    use crate::key::KeyMaterial;

    fn secret(kind: KeyKind, name: &str) -> KeyHandle {
        let material = match kind {
            KeyKind::Aes => KeyMaterial::Aes(vec![0; 16]),
            _ => KeyMaterial::Hmac(vec![1; 20]),
        };
        KeyHandle::new(material, KeyUsage::ANY).with_name(name)
    }

    #[test]
    fn test_lookup() {
        let mut manager = KeysManager::new();
        assert!(matches!(manager.first_key(), Err(Error::KeyNotFound(_))));

        manager.add_key(secret(KeyKind::Hmac, "mac"));
        manager.add_key(secret(KeyKind::Aes, "aes"));
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.find_by_name("aes").unwrap().kind(), KeyKind::Aes);
        assert!(manager.find_by_name("none").is_none());
        assert_eq!(manager.find(KeyKind::Aes, KeyUsage::DECRYPT).unwrap().name(), Some("aes"));
        assert_eq!(manager.first_key().unwrap().name(), Some("mac"));

        manager.insert_key_first(secret(KeyKind::Aes, "front"));
        assert_eq!(manager.first_key().unwrap().name(), Some("front"));
        assert_eq!(manager.find_by_usage(KeyUsage::SIGN).unwrap().name(), Some("front"));
        assert_eq!(manager.keys().count(), 3);
    }
}
