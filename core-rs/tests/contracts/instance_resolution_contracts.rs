// Instance Resolution Contract Tests
//
// These tests pin INVARIANTS of slot resolution that every running copy of a
// client relies on. Each one states what breaks for other instances if it fails.

#[path = "../support/mod.rs"]
mod support;

use slotlock_core::{Instance, InstanceResolver, ServerSocketResolver, SlotError};
use std::net::TcpListener;
use tempfile::TempDir;

/// WHY: Instance numbers start at 1, never 0
/// REASON: Offset 0 would put dependent ports on their bare base ports,
///         which other tools commonly use as defaults
/// BREAKS: Collisions with non-instanced services on the base ports
#[test]
fn first_instance_number_is_one() {
    let temp = TempDir::new().unwrap();
    let base = support::free_port_base(520);
    let config = support::config_for(temp.path(), base, 10);

    let mut instance = Instance::from_config(&config);
    ServerSocketResolver::new(&config).resolve_instance(&mut instance).unwrap();

    assert_eq!(instance.instance_number(), Some(1));
    // Nobody holds base + 0
    assert!(TcpListener::bind(("127.0.0.1", base)).is_ok());
}

/// WHY: The slot listener IS the ownership token
/// REASON: Other instances detect a live slot only by connecting to it
/// BREAKS: Two live instances sharing a number if the listener is not held
#[test]
fn resolved_slot_port_is_held_open() {
    let temp = TempDir::new().unwrap();
    let base = support::free_port_base(520);
    let config = support::config_for(temp.path(), base, 10);

    let mut instance = Instance::from_config(&config);
    ServerSocketResolver::new(&config).resolve_instance(&mut instance).unwrap();
    let n = instance.instance_number().unwrap() as u16;

    assert!(TcpListener::bind(("127.0.0.1", base + n)).is_err());

    drop(instance);
    assert!(TcpListener::bind(("127.0.0.1", base + n)).is_ok());
}

/// WHY: assignedPort == basePort + instanceNumber for every request
/// REASON: Downstream services and their clients derive ports the same way
/// BREAKS: Clients connecting to another instance's services
#[test]
fn assigned_ports_follow_instance_number() {
    let temp = TempDir::new().unwrap();
    let base = support::free_port_base(720);
    let config = support::config_for(temp.path(), base, 10)
        .with_port("jmx", base + 600)
        .with_port("debug", base + 700);

    let mut instance = Instance::from_config(&config);
    ServerSocketResolver::new(&config).resolve_instance(&mut instance).unwrap();
    let n = instance.instance_number().unwrap();

    for request in instance.ports() {
        assert_eq!(request.assigned_port, request.port_for(n));
        assert_eq!(request.assigned_port.unwrap() as u32, request.base_port as u32 + n);
    }
}

/// WHY: A free slot with a squatted dependent port is NOT a valid instance
/// REASON: The instance would start with a port it cannot bind
/// BREAKS: Startup failures of downstream services
#[test]
fn dependent_port_conflict_moves_to_next_number() {
    let temp = TempDir::new().unwrap();
    let base = support::free_port_base(520);
    let config = support::config_for(temp.path(), base, 10);
    let _squatter = support::occupy(base + 501);

    let mut instance = Instance::from_config(&config);
    ServerSocketResolver::new(&config).resolve_instance(&mut instance).unwrap();

    assert_ne!(instance.instance_number(), Some(1));
    let n = instance.instance_number().unwrap() as u16;
    assert_eq!(instance.assigned_port("http"), Some(base + 500 + n));
}

/// WHY: Exhaustion is the only failure surfaced, and it leaves no partial state
/// REASON: Callers treat it as fatal; a half-claimed slot would block others
/// BREAKS: Leaked slot listeners or stale assigned ports after a failed start
#[test]
fn exhaustion_is_reported_without_partial_state() {
    let temp = TempDir::new().unwrap();
    let base = support::free_port_base(520);
    let config = support::config_for(temp.path(), base, 4);
    let _held: Vec<_> = (1..=4).map(|n| support::occupy(base + n)).collect();

    let mut instance = Instance::from_config(&config);
    let err = ServerSocketResolver::new(&config)
        .resolve_instance(&mut instance)
        .unwrap_err();

    assert!(matches!(err, SlotError::ResolutionExhausted { ceiling: 4, base_port } if base_port == base));
    assert_eq!(instance.instance_number(), None);
    assert!(instance.instance_socket().is_none());
    assert!(instance.ports().iter().all(|p| p.assigned_port.is_none()));
    assert!(instance.cache_path().is_none());
}

/// WHY: Dependent ports are checked, not held
/// REASON: Holding them would keep the downstream service from binding them
/// KNOWN RACE: another process may take a dependent port between the check
///             and the downstream bind; this is accepted behaviour
#[test]
fn dependent_ports_are_not_held_after_resolution() {
    let temp = TempDir::new().unwrap();
    let base = support::free_port_base(520);
    let config = support::config_for(temp.path(), base, 10);

    let mut instance = Instance::from_config(&config);
    ServerSocketResolver::new(&config).resolve_instance(&mut instance).unwrap();
    let http = instance.assigned_port("http").unwrap();

    // Anyone, including a stranger, can still bind it
    let stolen = TcpListener::bind(("127.0.0.1", http));
    assert!(stolen.is_ok());
}
