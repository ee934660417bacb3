use std::time::Instant;

use crate::codec::CodecError;
use crate::error::JoinError;

use super::connection::{Connection, ConnectionState};
use super::message::Message;
use super::protocol::{CoreMessage, INVALID_CONNECTION_INDEX, MAX_CONNECTIONS};
use super::registry::Sender;
use super::session::{LeaveReason, Session, SessionEvent, SessionState};

impl Session {
    pub(super) fn handle_core(
        &mut self,
        core: CoreMessage,
        mut message: Message,
        sender: &Sender,
        now: Instant,
    ) {
        match core {
            CoreMessage::Ping => self.on_ping(&message, sender),
            CoreMessage::Pong => self.events.push_back(SessionEvent::Pong {
                from: sender.address,
                payload: message.payload_bytes().to_vec(),
            }),
            CoreMessage::Heartbeat => {
                log::trace!("Heartbeat from {}", sender.address);
            }
            CoreMessage::JoinRequest => self.on_join_request(&mut message, sender, now),
            CoreMessage::JoinDeny => self.on_join_deny(&mut message, sender),
            CoreMessage::JoinAccept => self.on_join_accept(&mut message, sender),
            CoreMessage::JoinFinished => self.on_join_finished(sender),
            CoreMessage::UpdateConnection => self.on_update_connection(&mut message, sender),
        }
    }

    fn on_ping(&mut self, ping: &Message, sender: &Sender) {
        let mut pong = self.core_message(CoreMessage::Pong);
        if let Err(e) = pong.write_bytes(ping.payload_bytes()) {
            log::warn!("Could not build pong: {}", e);
            return;
        }
        if let Err(e) = self.send_unconnected(sender.address, &pong) {
            log::warn!("Failed to answer ping from {}: {}", sender.address, e);
        }
    }

    fn on_join_request(&mut self, request: &mut Message, sender: &Sender, now: Instant) {
        let network_id = match request.read_string() {
            Ok(network_id) => network_id,
            Err(e) => {
                log::warn!("Bad join request from {}: {}", sender.address, e);
                return;
            }
        };

        // A retried request from a peer that already has a slot: the earlier
        // acceptance may still be in flight, so queue it again.
        if self.is_host {
            if let Some(index) = self.remote_index_of(sender) {
                log::debug!(
                    "Repeated join request from {}, re-sending acceptance",
                    sender.address
                );
                self.queue_acceptance(index);
                return;
            }
        }

        let slot = match self.admission(sender) {
            Ok(index) => index,
            Err(reason) => {
                log::warn!(
                    "Denying join from {} ({:?}): {}",
                    sender.address,
                    network_id,
                    reason
                );
                self.send_denial(sender, reason);
                return;
            }
        };

        let mut connection = Connection::new(sender.address, self.config.send_hz, now);
        connection.set_index(slot);
        connection.set_network_id(network_id.clone());
        connection.set_state(ConnectionState::Connected);
        self.connections[slot as usize] = Some(connection);

        log::info!(
            "{:?} joined from {} as connection {}",
            network_id,
            sender.address,
            slot
        );
        self.queue_acceptance(slot);
        self.events.push_back(SessionEvent::ConnectionJoined {
            index: slot,
            address: sender.address,
            network_id,
        });
    }

    /// The slot a join request would be given, or why it is refused.
    fn admission(&self, sender: &Sender) -> Result<u8, JoinError> {
        if !self.is_host || self.state != SessionState::Ready {
            return Err(JoinError::NotHost);
        }
        if !self.config.listening {
            return Err(JoinError::Closed);
        }
        (0..self.config.max_connections)
            .find(|&index| self.connections[index as usize].is_none())
            .ok_or_else(|| {
                log::debug!("No free slot for {}", sender.address);
                JoinError::Full
            })
    }

    fn remote_index_of(&self, sender: &Sender) -> Option<u8> {
        self.connections()
            .find(|connection| !connection.is_local() && connection.address() == sender.address)
            .map(Connection::index)
    }

    fn send_denial(&mut self, sender: &Sender, reason: JoinError) {
        let Some(code) = reason.wire_code() else {
            return;
        };
        let mut deny = self.core_message(CoreMessage::JoinDeny);
        if let Err(e) = deny.write_u8(code) {
            log::warn!("Could not build join denial: {}", e);
            return;
        }
        if let Err(e) = self.send_unconnected(sender.address, &deny) {
            log::warn!("Failed to deny {}: {}", sender.address, e);
        }
    }

    fn build_acceptance(&self, index: u8) -> Result<(Message, Message), CodecError> {
        let mut accept = self.core_message(CoreMessage::JoinAccept);
        accept.write_string(&self.config.network_id)?;
        accept.write_u8(index)?;
        Ok((accept, self.core_message(CoreMessage::JoinFinished)))
    }

    /// Queues `join_accept` then `join_finished` on the connection at `index`
    /// and marks it ready.
    fn queue_acceptance(&mut self, index: u8) {
        let (accept, finished) = match self.build_acceptance(index) {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!("Could not build join acceptance: {}", e);
                return;
            }
        };
        if let Some(connection) = self.connections[index as usize].as_mut() {
            connection.send(accept);
            connection.send(finished);
            connection.set_state(ConnectionState::Ready);
        }
    }

    fn from_host(&self, sender: &Sender) -> bool {
        !self.is_host && sender.connection_index.is_some() && sender.connection_index == self.host_index
    }

    fn on_join_deny(&mut self, deny: &mut Message, sender: &Sender) {
        if self.state != SessionState::Connecting || Some(sender.address) != self.host_addr {
            log::debug!("Ignoring join denial from {}", sender.address);
            return;
        }
        match deny.read_u8().ok().and_then(JoinError::from_wire_code) {
            Some(reason) => self.fail_join(reason),
            None => log::warn!("Join denial from {} with an unknown reason", sender.address),
        }
    }

    fn on_join_accept(&mut self, accept: &mut Message, sender: &Sender) {
        if self.state != SessionState::Connecting || !self.from_host(sender) {
            log::debug!("Ignoring join acceptance from {}", sender.address);
            return;
        }
        let (host_id, index) = match (accept.read_string(), accept.read_u8()) {
            (Ok(host_id), Ok(index)) => (host_id, index),
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("Bad join acceptance from {}: {}", sender.address, e);
                return;
            }
        };
        if index == INVALID_CONNECTION_INDEX
            || index as usize >= MAX_CONNECTIONS
            || Some(index) == self.host_index
        {
            log::warn!("Host assigned unusable slot {}", index);
            return;
        }
        if self.connection(index).is_some() {
            log::warn!("Host assigned slot {} which is already taken", index);
            return;
        }
        let Some(mut me) = self.pending_self.take() else {
            return;
        };

        me.set_index(index);
        me.set_state(ConnectionState::Connected);
        self.connections[index as usize] = Some(me);
        self.my_index = Some(index);
        if let Some(host) = self
            .host_index
            .and_then(|host| self.connections[host as usize].as_mut())
        {
            host.set_network_id(host_id.clone());
        }
        log::info!("Accepted by {:?} as connection {}", host_id, index);
    }

    fn on_join_finished(&mut self, sender: &Sender) {
        if !self.from_host(sender) {
            log::debug!("Ignoring join finish from {}", sender.address);
            return;
        }
        self.advance_connecting();
        if self.state != SessionState::Joining {
            return;
        }

        for connection in self.connections.iter_mut().flatten() {
            connection.set_state(ConnectionState::Ready);
        }
        self.announce_local_state(ConnectionState::Ready);
        self.join_started_at = None;
        self.set_state(SessionState::Ready);
    }

    fn on_update_connection(&mut self, update: &mut Message, sender: &Sender) {
        let Some(index) = sender.connection_index else {
            return;
        };
        let state = match update.read_u8() {
            Ok(code) => ConnectionState::from_wire_code(code),
            Err(e) => {
                log::warn!("Bad connection update from {}: {}", sender.address, e);
                return;
            }
        };
        match state {
            Some(ConnectionState::Disconnected) => {
                self.remove_connection(index, LeaveReason::Disconnected)
            }
            Some(state) => {
                if let Some(connection) = self.connections[index as usize].as_mut() {
                    if connection.set_state(state) {
                        log::debug!("Connection {} is now {:?}", index, state);
                    }
                }
            }
            None => log::warn!("Unknown connection state from {}", sender.address),
        }
    }
}
