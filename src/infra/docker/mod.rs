//! Container engine access: port selection, readiness detection and the engine seam.

pub mod logs;
pub mod ports;
pub mod runtime;

#[cfg(test)]
pub(crate) mod fake;

pub use logs::{wait_for_message, LogLines};
pub use ports::{is_port_available, PortAllocator};
pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime, LogStream};
