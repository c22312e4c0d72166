pub mod algorithm;
pub mod broadcast_scheduler;
pub mod client_session;
pub mod constants;
pub mod errors;
pub mod job_formatter;
pub mod job_manager;
pub mod jsonrpc_event;
pub mod log_colors;
pub mod net_utils;
pub mod node_api;
pub mod prom;
pub mod rpc_client;
pub mod session_registry;
pub mod stratum_dispatcher;
pub mod stratum_listener;
pub mod stratum_server;

#[cfg(test)]
pub mod mock_node;

pub use algorithm::Algorithm;
pub use errors::*;
pub use node_api::{BlockTemplate, NodeApi, SubmitOutcome, SyncStatus};
pub use rpc_client::{Auth, NodeRpcClient};
pub use stratum_server::{BridgeConfig, BridgeServices, listen_and_serve_with_shutdown};
