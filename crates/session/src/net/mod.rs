mod config;
mod connection;
mod handshake;
mod loopback;
mod message;
mod packet;
mod protocol;
mod registry;
mod session;
mod simulator;
mod stats;
mod tracking;
mod transport;

pub use config::{NetworkSimulation, SessionConfig};
pub use connection::{Connection, ConnectionState, FlushContext};
pub use loopback::{LoopbackNetwork, LoopbackSocket};
pub use message::{Message, MessageOptions, MessageType};
pub use packet::{FRAME_LENGTH_SIZE, PACKET_HEADER_SIZE, Packet, PacketError, PacketHeader};
pub use protocol::{
    ACK_HISTORY_BITS, CoreMessage, DEFAULT_PORT, INVALID_ACK, INVALID_CONNECTION_INDEX,
    INVALID_MESSAGE_INDEX, MAX_CONNECTIONS, MAX_MESSAGE_TYPES, MAX_PACKET_SIZE,
    MAX_TRACKED_PACKETS, RESERVED_MESSAGE_INDICES, next_ack, sequence_greater_than,
};
pub use registry::{MessageCallback, MessageRegistry, Sender};
pub use session::{LeaveReason, Session, SessionEvent, SessionState};
pub use simulator::NetworkSimulator;
pub use stats::{ConnectionInfo, NetworkStats};
pub use tracking::{
    MovingAverage, PacketTracker, ReceiveTracker, SentPacketTracker, acks_confirmed_by,
};
pub use transport::{DatagramSocket, UdpTransport};
