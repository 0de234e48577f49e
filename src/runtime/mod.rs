//! Renderer process runtime: port allocation, readiness, invocation and supervision.

pub mod invocation;
pub mod output;
pub mod paths;
pub mod ports;
pub mod readiness;
pub mod supervisor;

pub use invocation::{BinarySource, RendererCommand, RendererInvocation};
pub use paths::PublicPaths;
pub use ports::{PortError, PortLease, PortLedger};
pub use readiness::{ReadinessError, ReadinessProbe, TcpReadiness, wait_until_ready};
pub use supervisor::{RendererSupervisor, SupervisorConfig, SupervisorError};
