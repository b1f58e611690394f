/**
 * resolver.rs
 * Instance number resolution using listening sockets as the slot lock
 *
 * Each running instance holds a listener on `instancePortBase + n`. A new
 * process walks n = 1, 2, 3, ... and:
 * - connect succeeds      -> slot n is held by a live instance, skip
 * - connect refused       -> bind the slot port immediately (the claim)
 * - anything else         -> inconclusive, skip without claiming
 *
 * A claimed slot is only kept if every dependent port `basePort + n` is free
 * too. Otherwise the listener is closed and the search resumes at n + 1.
 *
 * Dependent ports are only probed, never held. Another process can still take
 * one between the check and the moment the downstream service binds it.
 *
 * Example (instancePortBase = 10000, http basePort = 9050):
 * - Instance 1: slot 10001, http 9051
 * - Instance 2: slot 10002, http 9052
 */

use std::net::TcpListener;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache;
use crate::config::InstanceConfig;
use crate::errors::{Result, SlotError};
use crate::instance::Instance;
use crate::port::probe::{PortProbe, PortState, TcpProbe};

/// Strategy for giving an `Instance` its identity, ports and cache folder
pub trait InstanceResolver {
    fn resolve_instance(&self, instance: &mut Instance) -> Result<()>;
}

/// Resolves instance numbers by binding `instance_port_base + n`
pub struct ServerSocketResolver<P = TcpProbe> {
    probe: P,
    instance_port_base: u16,
    max_instances: u32,
    bind_host: String,
    require_cache_folder: bool,
}

impl ServerSocketResolver<TcpProbe> {
    /// Create a resolver probing over TCP as configured
    pub fn new(config: &InstanceConfig) -> Self {
        let probe = TcpProbe::new(
            &config.spec.probe_host,
            Duration::from_millis(config.spec.probe_timeout_ms),
        );
        Self::with_probe(config, probe)
    }
}

impl<P: PortProbe> ServerSocketResolver<P> {
    pub fn with_probe(config: &InstanceConfig, probe: P) -> Self {
        ServerSocketResolver {
            probe,
            instance_port_base: config.spec.instance_port_base,
            max_instances: config.spec.max_instances,
            bind_host: config.spec.bind_host.clone(),
            require_cache_folder: config.spec.require_cache_folder,
        }
    }

    pub fn instance_port_base(&self) -> u16 {
        self.instance_port_base
    }

    pub fn max_instances(&self) -> u32 {
        self.max_instances
    }

    /// Slot port for an instance number, None past 65535
    pub fn slot_port(&self, instance_number: u32) -> Option<u16> {
        u16::try_from(u32::from(self.instance_port_base) + instance_number).ok()
    }

    /// Claim an instance number whose dependent ports are all free
    ///
    /// Fills `instance_number`, `instance_socket` and every `assigned_port`,
    /// or leaves all of them unset and returns `ResolutionExhausted`.
    pub fn resolve_slot(&self, instance: &mut Instance) -> Result<u32> {
        // A free slot port is not enough: every port derived from the number
        // must be free as well, otherwise the number is abandoned.
        let mut latest_offset_tried = 0;
        loop {
            let instance_number = self.resolve_instance_number(instance, latest_offset_tried)?;
            if self.resolve_ports(instance) {
                return Ok(instance_number);
            }

            debug!(
                instance_number,
                "Dependent port in use, releasing slot and trying the next instance number"
            );
            instance.release_slot();
            latest_offset_tried = instance_number;
        }
    }

    /// Find and bind the first free slot after `latest_offset_tried`
    fn resolve_instance_number(&self, instance: &mut Instance, latest_offset_tried: u32) -> Result<u32> {
        debug!(
            start = latest_offset_tried + 1,
            ceiling = self.max_instances,
            "Attempting to resolve available instance number by way of server socket"
        );

        for test_instance in (latest_offset_tried + 1)..=self.max_instances {
            let Some(candidate) = self.slot_port(test_instance) else {
                warn!(test_instance, "Slot port exceeds 65535, stopping search");
                break;
            };

            match self.probe.probe(candidate) {
                Ok(PortState::Occupied) => {
                    debug!(test_instance, port = candidate, "Slot held by a live instance");
                }
                Ok(PortState::Free) => match TcpListener::bind((self.bind_host.as_str(), candidate)) {
                    Ok(socket) => {
                        instance.claim_slot(test_instance, socket);
                        debug!(test_instance, port = candidate, "Instance slot claimed");
                        return Ok(test_instance);
                    }
                    Err(e) => {
                        // Another process bound it between our probe and bind
                        error!(test_instance, port = candidate, error = %e, "Error creating slot listener");
                    }
                },
                Err(e) => {
                    let err = SlotError::TransientProbe(format!("port {}: {}", candidate, e));
                    debug!(test_instance, error = %err, "Skipping candidate");
                }
            }
        }

        Err(SlotError::ResolutionExhausted {
            ceiling: self.max_instances,
            base_port: self.instance_port_base,
        })
    }

    /// Check every dependent port for the claimed number, assign all or none
    fn resolve_ports(&self, instance: &mut Instance) -> bool {
        let Some(instance_number) = instance.instance_number() else {
            return false;
        };

        let mut assigned = Vec::with_capacity(instance.ports().len());
        for request in instance.ports() {
            let Some(port) = request.port_for(instance_number) else {
                debug!(id = %request.id, base_port = request.base_port, "Dependent port exceeds 65535");
                return false;
            };
            if !self.probe.is_available(port) {
                debug!(id = %request.id, port, "Dependent port unavailable");
                return false;
            }
            assigned.push(port);
        }

        instance.assign_ports(assigned);
        true
    }

    /// Slot numbers currently held by live instances (probe only)
    pub fn occupied_slots(&self) -> Vec<u32> {
        (1..=self.max_instances)
            .map_while(|n| self.slot_port(n).map(|port| (n, port)))
            .filter(|(_, port)| matches!(self.probe.probe(*port), Ok(PortState::Occupied)))
            .map(|(n, _)| n)
            .collect()
    }
}

impl<P: PortProbe> InstanceResolver for ServerSocketResolver<P> {
    fn resolve_instance(&self, instance: &mut Instance) -> Result<()> {
        let instance_number = self.resolve_slot(instance)?;
        info!(
            instance_number,
            client_type = instance.client_type(),
            "Instance resolved"
        );

        // Ports are settled; now pick a cache folder nobody else holds
        match cache::try_assign_cache_folder(instance) {
            Ok(path) => {
                info!(path = %path.display(), "Cache folder assigned");
            }
            Err(e) if self.require_cache_folder => return Err(e),
            Err(e) => {
                error!(error = %e, "Error creating data cache folder, continuing without one");
            }
        }

        Ok(())
    }
}
