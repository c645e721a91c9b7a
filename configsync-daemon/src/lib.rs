//! configsync node daemon: scheduler, readiness gate, cluster broadcast,
//! node RPC listener and the local admin socket.

pub mod broadcast;
pub mod cluster;
mod error;
pub mod node;
pub mod paths;
pub mod protocol;
pub mod readiness;
mod runtime;
pub mod scheduler;
pub mod transport;

pub use broadcast::{BroadcastAck, Broadcaster};
pub use cluster::{ClusterFile, ClusterView, DynamicSettings, NodeInfo};
pub use error::{BroadcastError, ClusterError, DaemonError, TransportError};
pub use node::SyncNode;
pub use protocol::{
    request, request_status, send_request, DaemonRequest, DaemonResponse, NodeCommand,
    NodeOutcome, NodeRequest, NodeResponse,
};
pub use readiness::{GateState, ReadinessGate};
pub use runtime::{init_tracing, run, serve_node, start_blocking};
pub use scheduler::{ArmOutcome, Scheduler, SchedulerStats};
pub use transport::{NodeTransport, TcpTransport};
