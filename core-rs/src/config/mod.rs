/**
 * config module
 * YAML instance configuration (.slotlock.yaml)
 */

pub mod instance_config;

pub use instance_config::{InstanceConfig, Metadata, PortConfig, Spec};
