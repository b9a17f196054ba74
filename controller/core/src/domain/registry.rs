// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Registry Contract
//!
//! The cluster-wide registry maps `<controller id>/<leaf>` keys to values.
//! Controllers announce themselves by writing their reachable address under
//! [`ADDRESS_LEAF`]; an empty value removes the entry.

use async_trait::async_trait;
use thiserror::Error;

/// Leaf key holding a controller's externally reachable address.
pub const ADDRESS_LEAF: &str = "address";

/// Build the registry key for one of a controller's values.
pub fn controller_key(controller_id: &str, leaf: &str) -> String {
    format!("{controller_id}/{leaf}")
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid registry endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("registry unreachable: {0}")]
    Unreachable(String),

    #[error("registry rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Write access to the registry.
///
/// Implementations must not cache connections between calls: the registry
/// may become unreachable and come back under the same address.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Set `key` to `value`. An empty `value` deletes the entry.
    async fn set_value(&self, key: &str, value: &str) -> Result<(), RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_key_layout() {
        assert_eq!(controller_key("host-0", ADDRESS_LEAF), "host-0/address");
    }
}
