// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP Registry Client
//!
//! Writes registry values with `PUT {endpoint}/v1/values/{key}` and body
//! `{"value": "..."}`. Every call builds its own client with idle pooling
//! disabled, so a registry that went away and came back under the same
//! address is dialed afresh instead of through a dead pooled connection.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::domain::registry::{Registry, RegistryError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SetValueBody<'a> {
    value: &'a str,
}

pub struct HttpRegistry {
    /// Base URL without trailing slash (e.g., "http://registry:8080")
    endpoint: String,
    timeout: Duration,
}

impl HttpRegistry {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, RegistryError> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(RegistryError::InvalidEndpoint(endpoint));
        }
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_url(&self, key: &str) -> String {
        format!("{}/v1/values/{}", self.endpoint, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn set_value(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| RegistryError::Unreachable(e.to_string()))?;

        let url = self.build_url(key);
        debug!("PUT {} = {:?}", url, value);

        let response = client
            .put(&url)
            .json(&SetValueBody { value })
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            status => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP {}", status));
                Err(RegistryError::Rejected {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn rejects_non_http_endpoint() {
        assert!(matches!(
            HttpRegistry::new("tcp://registry:8080"),
            Err(RegistryError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let registry = HttpRegistry::new("http://registry:8080/").unwrap();
        assert_eq!(registry.build_url("host-0/address"), "http://registry:8080/v1/values/host-0/address");
    }

    #[tokio::test]
    async fn puts_value() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/v1/values/host-0/address")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({"value": "tcp://10.0.0.5:8999"})))
            .with_status(204)
            .create_async()
            .await;

        let registry = HttpRegistry::new(server.url()).unwrap();
        registry.set_value("host-0/address", "tcp://10.0.0.5:8999").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn surfaces_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/v1/values/host-0/address")
            .with_status(403)
            .with_body("read-only registry")
            .create_async()
            .await;

        let registry = HttpRegistry::new(server.url()).unwrap();
        let err = registry.set_value("host-0/address", "x").await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::Rejected {
                status: 403,
                message: "read-only registry".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_registry() {
        // Port 1 on loopback refuses connections.
        let registry = HttpRegistry::new("http://127.0.0.1:1")
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        let err = registry.set_value("host-0/address", "x").await.unwrap_err();
        assert!(matches!(err, RegistryError::Unreachable(_)));
    }
}
