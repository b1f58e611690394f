//! Instance record - the resolved identity of one running process
//!
//! An `Instance` is created once at startup from an [`InstanceConfig`], then
//! filled in by the resolver (instance number, slot socket, assigned ports)
//! and the cache allocator (cache path, cache lock). The slot socket and the
//! cache lock are RAII handles: dropping the `Instance` releases both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use crate::cache::CacheLock;
use crate::config::{InstanceConfig, PortConfig};

/// A dependent port requested by the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortRequest {
    pub id: String,
    pub base_port: u16,
    /// `base_port + instance_number`, set only once the whole set validated
    pub assigned_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PortRequest {
    pub fn new(id: &str, base_port: u16) -> Self {
        PortRequest {
            id: id.to_string(),
            base_port,
            assigned_port: None,
            description: None,
        }
    }

    /// Port this request maps to for a candidate instance number
    ///
    /// Returns None when the sum does not fit a u16.
    pub fn port_for(&self, instance_number: u32) -> Option<u16> {
        u16::try_from(u32::from(self.base_port) + instance_number).ok()
    }
}

impl From<&PortConfig> for PortRequest {
    fn from(config: &PortConfig) -> Self {
        PortRequest {
            id: config.id.clone(),
            base_port: config.base_port,
            assigned_port: None,
            description: config.description.clone(),
        }
    }
}

/// Process-lifetime instance context
#[derive(Debug)]
pub struct Instance {
    instance_number: Option<u32>,
    instance_socket: Option<TcpListener>,
    ports: Vec<PortRequest>,
    cache_path: Option<PathBuf>,
    cache_lock: Option<CacheLock>,
    client_type: String,
    cache_parent_folder: PathBuf,
    resolved_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new<P: Into<PathBuf>>(client_type: &str, cache_parent_folder: P, ports: Vec<PortRequest>) -> Self {
        Instance {
            instance_number: None,
            instance_socket: None,
            ports,
            cache_path: None,
            cache_lock: None,
            client_type: client_type.to_string(),
            cache_parent_folder: cache_parent_folder.into(),
            resolved_at: None,
        }
    }

    pub fn from_config(config: &InstanceConfig) -> Self {
        Self::new(
            &config.metadata.client_type,
            config.spec.cache_parent_folder.clone(),
            config.spec.ports.iter().map(PortRequest::from).collect(),
        )
    }

    pub fn instance_number(&self) -> Option<u32> {
        self.instance_number
    }

    pub fn instance_socket(&self) -> Option<&TcpListener> {
        self.instance_socket.as_ref()
    }

    pub fn ports(&self) -> &[PortRequest] {
        &self.ports
    }

    /// Look up a dependent port request by id
    pub fn port(&self, id: &str) -> Option<&PortRequest> {
        self.ports.iter().find(|p| p.id == id)
    }

    /// Assigned port for a dependent service id
    pub fn assigned_port(&self, id: &str) -> Option<u16> {
        self.port(id).and_then(|p| p.assigned_port)
    }

    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    pub fn cache_lock(&self) -> Option<&CacheLock> {
        self.cache_lock.as_ref()
    }

    pub fn client_type(&self) -> &str {
        &self.client_type
    }

    pub fn cache_parent_folder(&self) -> &Path {
        &self.cache_parent_folder
    }

    pub fn is_resolved(&self) -> bool {
        self.instance_number.is_some()
    }

    /// Record a slot claim. The listener is the proof of ownership.
    pub(crate) fn claim_slot(&mut self, instance_number: u32, socket: TcpListener) {
        debug_assert!(self.instance_number.is_none(), "instance number is set once");
        self.instance_number = Some(instance_number);
        self.instance_socket = Some(socket);
    }

    /// Drop a tentative claim; closing the listener frees the slot
    pub(crate) fn release_slot(&mut self) {
        self.instance_number = None;
        self.instance_socket = None;
    }

    /// Assign every port in one step
    pub(crate) fn assign_ports(&mut self, assigned: Vec<u16>) {
        debug_assert_eq!(assigned.len(), self.ports.len());
        for (request, port) in self.ports.iter_mut().zip(assigned) {
            request.assigned_port = Some(port);
        }
        self.resolved_at = Some(Utc::now());
    }

    pub(crate) fn set_cache(&mut self, path: PathBuf, lock: Option<CacheLock>) {
        debug_assert!(self.cache_path.is_none(), "cache path is set once");
        self.cache_path = Some(path);
        self.cache_lock = lock;
    }

    /// Serializable snapshot for CLI output and downstream consumers
    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            instance_number: self.instance_number,
            client_type: self.client_type.clone(),
            slot_port: self
                .instance_socket
                .as_ref()
                .and_then(|s| s.local_addr().ok())
                .map(|addr| addr.port()),
            ports: self.ports.clone(),
            cache_path: self.cache_path.clone(),
            cache_locked: self.cache_lock.is_some(),
            pid: std::process::id(),
            resolved_at: self.resolved_at,
        }
    }
}

/// Snapshot of a resolved instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub instance_number: Option<u32>,
    pub client_type: String,
    pub slot_port: Option<u16>,
    pub ports: Vec<PortRequest>,
    pub cache_path: Option<PathBuf>,
    pub cache_locked: bool,
    pub pid: u32,
    pub resolved_at: Option<DateTime<Utc>>,
}
