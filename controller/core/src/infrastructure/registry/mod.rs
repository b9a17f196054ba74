// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Registry Infrastructure Module
//!
//! Concrete implementations of the [`Registry`] trait.

pub mod http;
pub mod memory;

pub use http::HttpRegistry;
pub use memory::InMemoryRegistry;

use std::sync::Arc;

use crate::domain::registry::{Registry, RegistryError};

/// Build the registry client for a configured endpoint
pub fn create_registry(endpoint: &str) -> Result<Arc<dyn Registry>, RegistryError> {
    Ok(Arc::new(HttpRegistry::new(endpoint)?))
}
