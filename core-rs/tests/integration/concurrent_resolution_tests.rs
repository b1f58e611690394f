//! Integration tests for concurrent instance resolution
//!
//! Simulates several copies of a client starting at the same time against
//! the same slot range and cache root:
//! 1. Every resolver claims a distinct instance number
//! 2. Dependent ports follow the instance number
//! 3. Every resolver ends up with its own cache folder

#[path = "../support/mod.rs"]
mod support;

use slotlock_core::{resolve, Instance};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

#[test]
fn test_parallel_resolvers_get_distinct_numbers() {
    let temp = TempDir::new().unwrap();
    let workers = 8;
    let max_instances = 40;
    let base = support::free_port_base(500 + max_instances as u16);
    let config = support::config_for(temp.path(), base, max_instances);

    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let barrier = barrier.clone();
            let config = config.clone();
            thread::spawn(move || {
                barrier.wait();
                resolve(&config).expect("resolution should succeed")
            })
        })
        .collect();

    // Keep every instance alive until all numbers are compared
    let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let numbers: HashSet<u32> = instances.iter().map(|i| i.instance_number().unwrap()).collect();
    assert_eq!(numbers.len(), workers, "instance numbers must be pairwise distinct");
    assert!(numbers.iter().all(|n| *n >= 1 && *n <= max_instances));

    for instance in &instances {
        let n = instance.instance_number().unwrap();
        assert_eq!(instance.assigned_port("http"), Some(base + 500 + n as u16));
        let slot = instance.instance_socket().unwrap().local_addr().unwrap().port();
        assert_eq!(slot, base + n as u16);
    }

    let cache_paths: HashSet<_> = instances
        .iter()
        .map(|i| i.cache_path().unwrap().to_path_buf())
        .collect();
    assert_eq!(cache_paths.len(), workers, "cache folders must be exclusive");
}

#[test]
fn test_sequential_resolvers_stack_up() {
    let temp = TempDir::new().unwrap();
    let base = support::free_port_base(520);
    let config = support::config_for(temp.path(), base, 20);

    let first = resolve(&config).unwrap();
    let second = resolve(&config).unwrap();
    let third = resolve(&config).unwrap();

    assert_eq!(first.instance_number(), Some(1));
    assert_eq!(second.instance_number(), Some(2));
    assert_eq!(third.instance_number(), Some(3));
}

#[test]
fn test_released_slot_is_reused() {
    let temp = TempDir::new().unwrap();
    let base = support::free_port_base(520);
    let config = support::config_for(temp.path(), base, 20);

    let first = resolve(&config).unwrap();
    let second = resolve(&config).unwrap();
    assert_eq!(second.instance_number(), Some(2));
    let first_cache = first.cache_path().unwrap().to_path_buf();

    // Instance 1 exits; its slot and its cache folder become available again
    drop(first);

    let replacement = resolve(&config).unwrap();
    assert_eq!(replacement.instance_number(), Some(1));
    assert_eq!(replacement.cache_path().unwrap(), first_cache.as_path());
}

#[test]
fn test_squatted_dependent_port_is_skipped() {
    let temp = TempDir::new().unwrap();
    let base = support::free_port_base(520);
    let config = support::config_for(temp.path(), base, 20);

    // An unrelated process sits on http for instance 1 and 2
    let _squat1 = support::occupy(base + 501);
    let _squat2 = support::occupy(base + 502);

    let instance = resolve(&config).unwrap();
    assert_eq!(instance.instance_number(), Some(3));
    assert_eq!(instance.assigned_port("http"), Some(base + 503));

    // Abandoned slots 1 and 2 were released
    let _slot1 = support::occupy(base + 1);
    let _slot2 = support::occupy(base + 2);
}
