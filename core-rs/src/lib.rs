//! # slotlock core - coordinator-free local instance slots
//!
//! Gives each locally launched copy of an application a unique instance
//! number, a set of ports derived from it, and an exclusive cache folder.
//! Mutual exclusion comes from the OS alone:
//!
//! - a listening socket on `instancePortBase + n` holds slot `n`
//! - an advisory lock on `data-<N>/.lock` holds a cache folder
//!
//! Both are released when the owning [`Instance`] is dropped or the process
//! dies, so a crashed instance never leaves a slot or folder stuck.
//!
//! ## Layout
//!
//! ```text
//! slot ports      10001 10002 10003 ...     (held by live instances)
//! dependent ports base+1 base+2 base+3 ...   (probed, not held)
//! cache           <parent>/<clientType>/data-1/.lock
//!                                     /data-2/.lock
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use slotlock_core::{resolve, InstanceConfig};
//!
//! let config = InstanceConfig::default_for("spoon").with_port("http", 9050);
//! let instance = resolve(&config).unwrap();
//! println!("instance {:?} http {:?}", instance.instance_number(), instance.assigned_port("http"));
//! // keep `instance` alive for as long as the slot is needed
//! ```

pub mod errors;
pub mod config;
pub mod instance;
pub mod port;
pub mod cache;

pub use errors::{Result, SlotError};
pub use config::{InstanceConfig, PortConfig};
pub use instance::{Instance, InstanceSummary, PortRequest};
pub use port::{InstanceResolver, PortProbe, PortState, ServerSocketResolver, TcpProbe};
pub use cache::{assign_cache_folder, scan_cache_folders, CacheDirState, CacheDirStatus, CacheLock};

/// Version of the slotlock layout (slot ports + data-<N>/.lock folders)
pub const VERSION: &str = "0.4.2";

/// Build an `Instance` from config and resolve it with the server-socket strategy
pub fn resolve(config: &InstanceConfig) -> Result<Instance> {
    config.validate()?;
    let mut instance = Instance::from_config(config);
    ServerSocketResolver::new(config).resolve_instance(&mut instance)?;
    Ok(instance)
}
