//! Peer-to-peer session layer over UDP.
//!
//! A [`Session`] owns one socket and a table of [`Connection`]s. Peers
//! exchange [`Packet`]s of typed [`Message`]s; every packet carries a 16-bit
//! ack plus feedback about the acks received from the other side, from which
//! round-trip time and loss are estimated. One peer hosts, others join
//! through a small handshake.

pub mod codec;
pub mod error;
pub mod net;

pub use codec::{ByteBuffer, CodecError, Endianness};
pub use error::{JoinError, SessionError};
pub use net::{
    Connection, ConnectionInfo, ConnectionState, DatagramSocket, LeaveReason, LoopbackNetwork,
    Message, MessageOptions, NetworkSimulation, NetworkStats, Packet, PacketError, PacketHeader,
    Sender, Session, SessionConfig, SessionEvent, SessionState, UdpTransport,
};
