/**
 * instance_config.rs
 * Parser for .slotlock.yaml files (YAML format)
 *
 * Format:
 * ```yaml
 * apiVersion: slotlock/v1
 * kind: InstanceConfig
 * metadata:
 *   clientType: spoon
 * spec:
 *   instancePortBase: 10000
 *   maxInstances: 1000
 *   cacheParentFolder: ./cache
 *   ports:
 *     - id: http
 *       basePort: 9050
 * ```
 *
 * Everything under `spec` except `ports` has a default.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::SlotError;

pub const API_VERSION: &str = "slotlock/v1";
pub const KIND: &str = "InstanceConfig";

/// Default config file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = ".slotlock.yaml";

/// First slot port is `DEFAULT_INSTANCE_PORT_BASE + 1`
pub const DEFAULT_INSTANCE_PORT_BASE: u16 = 10000;
pub const DEFAULT_MAX_INSTANCES: u32 = 1000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;

/// .slotlock.yaml file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: Spec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Selects the cache sub-root (e.g. "spoon", "kitchen", "carte")
    pub client_type: String,
}

/// A dependent service port, assigned as `base_port + instance_number`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    pub id: String,
    pub base_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    #[serde(default = "default_instance_port_base")]
    pub instance_port_base: u16,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
    #[serde(default = "default_cache_parent_folder")]
    pub cache_parent_folder: PathBuf,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Treat a failed cache directory assignment as fatal
    #[serde(default)]
    pub require_cache_folder: bool,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

fn default_instance_port_base() -> u16 {
    DEFAULT_INSTANCE_PORT_BASE
}

fn default_max_instances() -> u32 {
    DEFAULT_MAX_INSTANCES
}

fn default_cache_parent_folder() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_probe_host() -> String {
    "localhost".to_string()
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for Spec {
    fn default() -> Self {
        Spec {
            instance_port_base: default_instance_port_base(),
            max_instances: default_max_instances(),
            cache_parent_folder: default_cache_parent_folder(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_host: default_probe_host(),
            bind_host: default_bind_host(),
            require_cache_folder: false,
            ports: Vec::new(),
        }
    }
}

impl InstanceConfig {
    /// Load a config file from the specified path
    ///
    /// # Example
    /// ```no_run
    /// use slotlock_core::InstanceConfig;
    ///
    /// let config = InstanceConfig::load(".slotlock.yaml").unwrap();
    /// println!("client type: {}", config.metadata.client_type);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SlotError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SlotError::FileNotFound(path.to_string_lossy().to_string()));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            SlotError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: InstanceConfig = serde_yaml::from_str(&content).map_err(|e| {
            SlotError::ParseError(format!("Invalid {} YAML: {}", path.display(), e))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Load `.slotlock.yaml` from a directory
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, SlotError> {
        Self::load(dir.as_ref().join(DEFAULT_CONFIG_FILE))
    }

    /// Validate config structure
    ///
    /// Ensures:
    /// - apiVersion is "slotlock/v1" and kind is "InstanceConfig"
    /// - clientType is non-empty
    /// - at least one slot fits below 65536
    /// - dependent port ids are unique and no base port collides with the slot base
    pub fn validate(&self) -> Result<(), SlotError> {
        if self.api_version != API_VERSION {
            return Err(SlotError::ValidationError(format!(
                "Invalid apiVersion: expected '{}', got '{}'",
                API_VERSION, self.api_version
            )));
        }

        if self.kind != KIND {
            return Err(SlotError::ValidationError(format!(
                "Invalid kind: expected '{}', got '{}'",
                KIND, self.kind
            )));
        }

        if self.metadata.client_type.trim().is_empty() {
            return Err(SlotError::ValidationError(
                "metadata.clientType cannot be empty".to_string(),
            ));
        }

        if self.spec.max_instances == 0 {
            return Err(SlotError::ValidationError(
                "spec.maxInstances must be at least 1".to_string(),
            ));
        }

        if self.spec.instance_port_base == u16::MAX {
            return Err(SlotError::ValidationError(format!(
                "spec.instancePortBase {} leaves no room for slot ports",
                self.spec.instance_port_base
            )));
        }

        let mut seen = HashSet::new();
        for port in &self.spec.ports {
            if port.id.is_empty() {
                return Err(SlotError::ValidationError(
                    "spec.ports[].id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(port.id.as_str()) {
                return Err(SlotError::ValidationError(format!(
                    "Duplicate port id '{}'",
                    port.id
                )));
            }
            if port.base_port == self.spec.instance_port_base {
                return Err(SlotError::ValidationError(format!(
                    "Port '{}' basePort {} collides with instancePortBase",
                    port.id, port.base_port
                )));
            }
        }

        Ok(())
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SlotError> {
        let yaml = serde_yaml::to_string(self).map_err(|e| {
            SlotError::SerializationError(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path.as_ref(), yaml).map_err(|e| {
            SlotError::ConfigError(format!(
                "Failed to write {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Config with default spec for a client type and no dependent ports
    pub fn default_for(client_type: &str) -> Self {
        InstanceConfig {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: Metadata {
                client_type: client_type.to_string(),
            },
            spec: Spec::default(),
        }
    }

    /// Builder-style helper to append a dependent port
    pub fn with_port(mut self, id: &str, base_port: u16) -> Self {
        self.spec.ports.push(PortConfig {
            id: id.to_string(),
            base_port,
            description: None,
        });
        self
    }

    /// Directory holding the `data-<N>` folders for this client type
    pub fn client_cache_root(&self) -> PathBuf {
        self.spec
            .cache_parent_folder
            .join(&self.metadata.client_type)
    }
}
