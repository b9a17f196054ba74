// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::registry::{Registry, RegistryError};

/// Registry kept in process memory. Clones share the same entries.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    values: Arc<RwLock<BTreeMap<String, String>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    pub fn entries(&self) -> BTreeMap<String, String> {
        self.values.read().clone()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn set_value(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        let mut values = self.values.write();
        if value.is_empty() {
            values.remove(key);
        } else {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_value_removes_entry() {
        let registry = InMemoryRegistry::new();
        registry.set_value("host-0/address", "tcp://a").await.unwrap();
        assert_eq!(registry.get("host-0/address").as_deref(), Some("tcp://a"));

        registry.set_value("host-0/address", "").await.unwrap();
        assert!(registry.get("host-0/address").is_none());
        assert!(registry.entries().is_empty());
    }
}
