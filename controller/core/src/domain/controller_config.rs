// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Controller Configuration Types
//
// Defines the configuration schema for an OIM controller, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Controller identity and announced address
// - SPDK socket and vhost SCSI controller wiring
// - Registry endpoint and re-registration delay
// - Server and observability settings

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::volume::PciAddress;

pub const API_VERSION: &str = "oim.io/v1";
pub const KIND: &str = "ControllerConfig";

/// Top-level Kubernetes-style controller configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfigManifest {
    /// API version (must be "oim.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ControllerConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: ControllerConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfigSpec {
    pub controller: ControllerIdentity,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub vhost: VhostConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerIdentity {
    /// Registry key prefix for this controller
    pub id: String,

    /// Address other components use to reach this controller, e.g.
    /// "tcp://10.0.0.5:8999". Required when a registry is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// SPDK JSON-RPC Unix socket. Without it the controller runs
    /// disconnected and every operation fails with a configuration error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VhostConfig {
    /// Name of the vhost SCSI controller volumes are attached to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_name: Option<String>,

    /// PCI address of the hardware fronting that controller, "DDDD:BB:DD.F".
    /// Unknown fields may be written as "*"; "" means fully unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pci_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry base URL, e.g. "http://registry:8080"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Delay between registration attempts
    #[serde(default = "default_registry_delay")]
    pub delay_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            delay_seconds: default_registry_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Transport credentials for the API server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,

    pub key_path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_registry_delay() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8999
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ControllerConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "oim-controller".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname.clone(),
                labels: None,
            },
            spec: ControllerConfigSpec {
                controller: ControllerIdentity {
                    id: hostname,
                    address: None,
                },
                backend: BackendConfig::default(),
                vhost: VhostConfig::default(),
                registry: RegistryConfig::default(),
                server: ServerConfig::default(),
                observability: None,
            },
        }
    }
}

impl ControllerConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. OIM_CONFIG_PATH environment variable
    /// 2. ./oim-controller.yaml (working directory)
    /// 3. ~/.oim/controller.yaml (user home)
    /// 4. /etc/oim/controller.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("OIM_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./oim-controller.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".oim").join("controller.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/oim/controller.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .with_context(|| format!("Failed to load config at {:?}", path))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("OIM_SPDK_SOCKET") {
            tracing::info!("Environment override: OIM_SPDK_SOCKET={}", val);
            self.spec.backend.socket_path = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("OIM_VHOST_CONTROLLER") {
            tracing::info!("Environment override: OIM_VHOST_CONTROLLER={}", val);
            self.spec.vhost.controller_name = Some(val);
        }
        if let Some(val) = lookup("OIM_VHOST_PCI") {
            tracing::info!("Environment override: OIM_VHOST_PCI={}", val);
            self.spec.vhost.pci_address = Some(val);
        }
        if let Some(val) = lookup("OIM_REGISTRY_ENDPOINT") {
            tracing::info!("Environment override: OIM_REGISTRY_ENDPOINT={}", val);
            self.spec.registry.endpoint = Some(val);
        }
    }

    /// Parsed PCI address; `None` when not configured at all
    pub fn pci_address(&self) -> anyhow::Result<Option<PciAddress>> {
        self.spec
            .vhost
            .pci_address
            .as_deref()
            .map(|text| text.parse::<PciAddress>().map_err(anyhow::Error::from))
            .transpose()
    }

    pub fn registry_delay(&self) -> Duration {
        Duration::from_secs(self.spec.registry.delay_seconds)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.controller.id.is_empty() {
            anyhow::bail!("spec.controller.id cannot be empty");
        }

        if self.spec.registry.endpoint.is_some() {
            let address = self.spec.controller.address.as_deref().unwrap_or_default();
            if address.is_empty() {
                anyhow::bail!("spec.controller.address is required when spec.registry.endpoint is set");
            }
            if self.spec.registry.delay_seconds == 0 {
                anyhow::bail!("spec.registry.delay_seconds must be greater than zero");
            }
        }

        if let Some(name) = &self.spec.vhost.controller_name {
            if name.is_empty() {
                anyhow::bail!("spec.vhost.controller_name cannot be empty when set");
            }
        }

        self.pci_address().context("spec.vhost.pci_address")?;

        if let Some(tls) = &self.spec.server.tls {
            if tls.cert_path.is_empty() || tls.key_path.is_empty() {
                anyhow::bail!("spec.server.tls requires both cert_path and key_path");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apiVersion: oim.io/v1
kind: ControllerConfig
metadata:
  name: host-0
spec:
  controller:
    id: host-0
    address: tcp://10.0.0.5:8999
  backend:
    socket_path: /var/tmp/spdk.sock
  vhost:
    controller_name: vhost.0
    pci_address: "0000:00:15.0"
  registry:
    endpoint: http://registry:8080
"#;

    #[test]
    fn test_default_manifest() {
        let manifest = ControllerConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert!(!manifest.metadata.name.is_empty());
        assert!(manifest.spec.backend.socket_path.is_none());
        assert_eq!(manifest.registry_delay(), Duration::from_secs(60));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let manifest = ControllerConfigManifest::from_yaml_str(SAMPLE).unwrap();
        manifest.validate().unwrap();

        assert_eq!(manifest.spec.vhost.controller_name.as_deref(), Some("vhost.0"));
        assert_eq!(
            manifest.pci_address().unwrap(),
            Some(PciAddress::new(0, 0, 0x15, 0))
        );
        assert_eq!(manifest.spec.server.port, 8999);
        assert_eq!(manifest.spec.registry.delay_seconds, 60);
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("controller.yaml");

        let manifest = ControllerConfigManifest::from_yaml_str(SAMPLE).unwrap();
        manifest.to_yaml_file(&path).unwrap();

        let loaded = ControllerConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.controller.id, "host-0");
        assert_eq!(
            loaded.spec.registry.endpoint.as_deref(),
            Some("http://registry:8080")
        );
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let result = ControllerConfigManifest::load_or_default(Some(PathBuf::from(
            "/nonexistent/oim-controller.yaml",
        )));
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides() {
        let mut manifest = ControllerConfigManifest::default();
        let vars = HashMap::from([
            ("OIM_SPDK_SOCKET", "/run/spdk.sock"),
            ("OIM_VHOST_CONTROLLER", "vhost.1"),
            ("OIM_VHOST_PCI", "*:*:*.*"),
        ]);
        manifest.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(
            manifest.spec.backend.socket_path,
            Some(PathBuf::from("/run/spdk.sock"))
        );
        assert_eq!(manifest.spec.vhost.controller_name.as_deref(), Some("vhost.1"));
        assert_eq!(manifest.pci_address().unwrap(), Some(PciAddress::unknown()));
        assert!(manifest.spec.registry.endpoint.is_none());
    }

    #[test]
    fn test_validation() {
        let mut manifest = ControllerConfigManifest::from_yaml_str(SAMPLE).unwrap();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "WrongKind".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.controller.id = String::new();
        assert!(manifest.validate().is_err());
        manifest.spec.controller.id = "host-0".to_string();

        // Registry requires an address to announce
        manifest.spec.controller.address = None;
        assert!(manifest.validate().is_err());
        manifest.spec.controller.address = Some("tcp://10.0.0.5:8999".to_string());

        manifest.spec.vhost.pci_address = Some("not-a-pci-address".to_string());
        assert!(manifest.validate().is_err());
        manifest.spec.vhost.pci_address = Some("0000:00:15.0".to_string());

        manifest.spec.server.tls = Some(TlsConfig {
            cert_path: "/etc/oim/tls.crt".to_string(),
            key_path: String::new(),
            ca_path: None,
        });
        assert!(manifest.validate().is_err());
    }
}
