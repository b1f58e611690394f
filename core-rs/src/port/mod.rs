/**
 * port module
 * Instance slot resolution and dependent port validation
 */

pub mod probe;
pub mod resolver;

pub use probe::{PortProbe, PortState, TcpProbe};
pub use resolver::{InstanceResolver, ServerSocketResolver};
