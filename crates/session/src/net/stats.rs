use std::net::SocketAddr;

use serde::Serialize;

use super::connection::ConnectionState;

/// Per-connection traffic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Unreliable messages discarded because the packet was full.
    pub messages_dropped: u64,
    /// Sent packets whose tracker was reused before the peer confirmed them.
    pub packets_unconfirmed: u64,
}

/// Read-only view of one connection, for display by the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub index: u8,
    pub address: SocketAddr,
    pub network_id: String,
    pub state: ConnectionState,
    pub is_local: bool,
    pub rtt_seconds: f32,
    pub loss_fraction: f32,
    pub stats: NetworkStats,
}
