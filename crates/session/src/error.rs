use std::io;
use std::net::IpAddr;

use crate::codec::CodecError;
use crate::net::{PacketError, SessionState};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not bind {ip} on ports {first}..={last}: {source}")]
    Bind {
        ip: IpAddr,
        first: u16,
        last: u16,
        #[source]
        source: io::Error,
    },
    #[error("join failed: {0}")]
    Join(#[from] JoinError),
    #[error("no message type named {0:?}")]
    UnknownMessageName(String),
    #[error("message type {0:?} requires a connection")]
    ConnectionRequired(String),
    #[error("no connection at index {0}")]
    NoSuchConnection(u8),
    #[error("message type table is full")]
    RegistryFull,
    #[error("message type {0:?} is already registered")]
    DuplicateMessageType(String),
    #[error("message {0:?} was written in a byte order other than the session's")]
    EndiannessMismatch(String),
    #[error("connectionless message type {0:?} needs a callback")]
    MissingCallback(String),
    #[error("operation not valid while {0:?}")]
    InvalidState(SessionState),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Why a join attempt ended without reaching the ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("peer is not hosting a session")]
    NotHost,
    #[error("host is not accepting joins")]
    Closed,
    #[error("host has no free connection slot")]
    Full,
    #[error("timed out waiting for the host")]
    Timeout,
}

impl JoinError {
    /// Code carried by a `join_deny` message. Timeouts never go on the wire.
    pub fn wire_code(self) -> Option<u8> {
        match self {
            JoinError::NotHost => Some(0),
            JoinError::Closed => Some(1),
            JoinError::Full => Some(2),
            JoinError::Timeout => None,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(JoinError::NotHost),
            1 => Some(JoinError::Closed),
            2 => Some(JoinError::Full),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_codes_roundtrip() {
        for reason in [JoinError::NotHost, JoinError::Closed, JoinError::Full] {
            let code = reason.wire_code().unwrap();
            assert_eq!(JoinError::from_wire_code(code), Some(reason));
        }
        assert_eq!(JoinError::Timeout.wire_code(), None);
        assert_eq!(JoinError::from_wire_code(9), None);
    }
}
