// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hash-striped advisory lock keyed by string.
//!
//! A key selects one of a fixed number of mutexes by hash. Unrelated keys
//! that land on the same stripe serialize needlessly but never deadlock,
//! and memory stays bounded regardless of how many keys are seen.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

/// Stripe count used by [`KeyMutex::default`].
pub const DEFAULT_STRIPES: usize = 64;

pub struct KeyMutex {
    stripes: Vec<Mutex<()>>,
}

impl KeyMutex {
    /// Create a lock table with `stripes` independent mutexes (at least one).
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Wait for the stripe owning `key`. Held until the guard is dropped.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(key)].lock().await
    }

    /// Stripe index for `key`.
    pub fn stripe_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }
}

impl Default for KeyMutex {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn zero_stripes_is_clamped() {
        let locks = KeyMutex::new(0);
        assert_eq!(locks.stripes(), 1);
        assert_eq!(locks.stripe_of("anything"), 0);
    }

    #[test]
    fn stripe_selection_is_stable() {
        let locks = KeyMutex::default();
        assert_eq!(locks.stripe_of("vol-1"), locks.stripe_of("vol-1"));
        assert!(locks.stripe_of("vol-1") < DEFAULT_STRIPES);
    }

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyMutex::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("vol-1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_stripes_do_not_block() {
        let locks = KeyMutex::new(1024);
        let first = "vol-a";
        let second = (0..)
            .map(|i| format!("vol-{i}"))
            .find(|k| locks.stripe_of(k) != locks.stripe_of(first))
            .unwrap();

        let _held = locks.lock(first).await;
        let other = tokio::time::timeout(Duration::from_millis(100), locks.lock(&second)).await;
        assert!(other.is_ok());
    }
}
