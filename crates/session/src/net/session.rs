use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::codec::CodecError;
use crate::error::{JoinError, SessionError};

use super::config::{NetworkSimulation, SessionConfig};
use super::connection::{Connection, ConnectionState, FlushContext};
use super::message::{Message, MessageOptions};
use super::packet::{PACKET_HEADER_SIZE, Packet, PacketError, PacketHeader};
use super::protocol::{CoreMessage, INVALID_CONNECTION_INDEX, MAX_CONNECTIONS, MAX_PACKET_SIZE};
use super::registry::{MessageCallback, MessageRegistry, Route, Sender};
use super::simulator::NetworkSimulator;
use super::stats::ConnectionInfo;
use super::transport::{DatagramSocket, UdpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    /// Socket bound, neither hosting nor joined.
    Bound,
    /// Waiting for the host to accept a join request.
    Connecting,
    /// Accepted, waiting for the host to finish the handshake.
    Joining,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Disconnected,
    TimedOut,
}

/// Things the application may want to react to, drained with
/// [`Session::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    ConnectionJoined {
        index: u8,
        address: SocketAddr,
        network_id: String,
    },
    ConnectionLeft {
        index: u8,
        address: SocketAddr,
        reason: LeaveReason,
    },
    JoinFailed(JoinError),
    Pong {
        from: SocketAddr,
        payload: Vec<u8>,
    },
}

/// One peer's view of a session: its socket, its connection table, and the
/// handshake state machine. Driven by calling [`Session::update`] regularly.
pub struct Session {
    pub(super) config: SessionConfig,
    pub(super) socket: Box<dyn DatagramSocket>,
    pub(super) local_addr: Option<SocketAddr>,
    pub(super) state: SessionState,
    pub(super) connections: Vec<Option<Connection>>,
    pub(super) my_index: Option<u8>,
    /// This peer's own connection while a join is waiting for an index.
    pub(super) pending_self: Option<Connection>,
    pub(super) host_index: Option<u8>,
    pub(super) host_addr: Option<SocketAddr>,
    pub(super) is_host: bool,
    pub(super) registry: MessageRegistry,
    pub(super) simulator: NetworkSimulator,
    pub(super) join_started_at: Option<Instant>,
    pub(super) last_join_request_at: Option<Instant>,
    pub(super) last_error: Option<SessionError>,
    pub(super) events: VecDeque<SessionEvent>,
    malformed_packets: u64,
    recv_buffer: Vec<u8>,
}

impl Session {
    /// A session over the operating system's UDP stack.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        Self::with_socket(config, Box::new(UdpTransport::new()))
    }

    pub fn with_socket(
        config: SessionConfig,
        socket: Box<dyn DatagramSocket>,
    ) -> Result<Self, SessionError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(SessionError::Config(errors.join("; ")));
        }

        let simulator = NetworkSimulator::new(config.simulation.clone());
        Ok(Self {
            config,
            socket,
            local_addr: None,
            state: SessionState::Disconnected,
            connections: (0..MAX_CONNECTIONS).map(|_| None).collect(),
            my_index: None,
            pending_self: None,
            host_index: None,
            host_addr: None,
            is_host: false,
            registry: MessageRegistry::new(),
            simulator,
            join_started_at: None,
            last_join_request_at: None,
            last_error: None,
            events: VecDeque::new(),
            malformed_packets: 0,
            // One spare byte so oversized datagrams are detectable.
            recv_buffer: vec![0u8; MAX_PACKET_SIZE + 1],
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn my_connection_index(&self) -> Option<u8> {
        self.my_index
    }

    pub fn host_connection_index(&self) -> Option<u8> {
        self.host_index
    }

    pub fn connection(&self, index: u8) -> Option<&Connection> {
        self.connections.get(index as usize).and_then(Option::as_ref)
    }

    pub fn my_connection(&self) -> Option<&Connection> {
        match self.my_index {
            Some(index) => self.connection(index),
            None => self.pending_self.as_ref(),
        }
    }

    pub fn host_connection(&self) -> Option<&Connection> {
        self.host_index.and_then(|index| self.connection(index))
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().flatten()
    }

    pub fn connection_infos(&self) -> Vec<ConnectionInfo> {
        self.connections().map(Connection::info).collect()
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    pub fn is_listening(&self) -> bool {
        self.config.listening
    }

    /// Whether a host accepts new join requests.
    pub fn set_listening(&mut self, listening: bool) {
        self.config.listening = listening;
    }

    pub fn simulation(&self) -> &NetworkSimulation {
        self.simulator.settings()
    }

    pub fn set_simulation(&mut self, simulation: NetworkSimulation) {
        self.config.simulation = simulation.clone();
        self.simulator.set_settings(simulation);
    }

    /// Datagrams discarded for failing structural validation.
    pub fn malformed_packets(&self) -> u64 {
        self.malformed_packets
    }

    /// Takes the error that ended the last handshake or session, if any.
    pub fn take_error(&mut self) -> Option<SessionError> {
        self.last_error.take()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.events.drain(..)
    }

    pub fn register_message_type(
        &mut self,
        name: &str,
        options: MessageOptions,
        callback: Option<MessageCallback>,
    ) -> Result<u8, SessionError> {
        self.registry.register(name, options, callback)
    }

    /// Binds the socket to the first free port of the configured range.
    pub fn bind(&mut self) -> Result<SocketAddr, SessionError> {
        match self.state {
            SessionState::Disconnected => {}
            SessionState::Bound => {
                if let Some(addr) = self.local_addr {
                    return Ok(addr);
                }
            }
            state => return Err(SessionError::InvalidState(state)),
        }

        let ports = self.config.ports();
        let ip = self.config.bind_ip;
        match self.socket.bind(ip, ports.clone()) {
            Ok(addr) => {
                log::info!("Bound to {}", addr);
                self.local_addr = Some(addr);
                self.set_state(SessionState::Bound);
                Ok(addr)
            }
            Err(source) => {
                log::error!("Failed to bind {} on ports {:?}: {}", ip, ports, source);
                let (first, last) = (*ports.start(), *ports.end());
                self.last_error = Some(SessionError::Bind {
                    ip,
                    first,
                    last,
                    source: io::Error::new(source.kind(), source.to_string()),
                });
                Err(SessionError::Bind {
                    ip,
                    first,
                    last,
                    source,
                })
            }
        }
    }

    /// Starts hosting: this peer takes connection slot 0 and is ready
    /// immediately.
    pub fn host(&mut self) -> Result<(), SessionError> {
        self.host_at(Instant::now())
    }

    pub fn host_at(&mut self, now: Instant) -> Result<(), SessionError> {
        let addr = self.bind()?;

        let mut me = Connection::local(addr, &self.config.network_id, now);
        me.set_index(0);
        me.set_state(ConnectionState::Ready);
        self.connections[0] = Some(me);
        self.my_index = Some(0);
        self.host_index = Some(0);
        self.is_host = true;

        log::info!("Hosting session {:?} on {}", self.config.network_id, addr);
        self.set_state(SessionState::Ready);
        Ok(())
    }

    /// Starts joining the host at `host_addr`. Progress is made by
    /// [`Session::update`]; watch [`Session::state`] or the events.
    pub fn join(&mut self, host_addr: SocketAddr) -> Result<(), SessionError> {
        self.join_at(host_addr, Instant::now())
    }

    pub fn join_at(&mut self, host_addr: SocketAddr, now: Instant) -> Result<(), SessionError> {
        let addr = self.bind()?;

        let mut host = Connection::new(host_addr, self.config.send_hz, now);
        host.set_index(0);
        host.set_state(ConnectionState::Connected);
        self.connections[0] = Some(host);
        self.host_index = Some(0);
        self.host_addr = Some(host_addr);
        self.pending_self = Some(Connection::local(addr, &self.config.network_id, now));

        self.join_started_at = Some(now);
        self.last_join_request_at = None;
        log::info!("Joining session at {}", host_addr);
        self.set_state(SessionState::Connecting);
        Ok(())
    }

    /// Tells every peer this one is leaving, then tears the session down.
    pub fn disconnect(&mut self) {
        self.disconnect_at(Instant::now());
    }

    pub fn disconnect_at(&mut self, now: Instant) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if self.my_index.is_some() {
            self.announce_local_state(ConnectionState::Disconnected);
            self.flush_outgoing(now, true);
        }
        log::info!("Disconnecting");
        self.teardown(LeaveReason::Disconnected);
    }

    /// Runs one tick: receive, dispatch, handshake, timeouts, send.
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    pub fn update_at(&mut self, now: Instant) {
        if self.state == SessionState::Disconnected {
            return;
        }

        self.process_incoming(now);
        self.process_received_packets(now);

        if matches!(
            self.state,
            SessionState::Connecting | SessionState::Joining
        ) {
            self.update_joining(now);
        }
        if self.state == SessionState::Ready {
            self.check_timeouts(now);
        }
        if self.state != SessionState::Disconnected {
            self.flush_outgoing(now, false);
        }
    }

    /// A message of the named type, using the session's wire byte order.
    pub fn message(&self, name: &str) -> Message {
        Message::with_endianness(name, self.config.wire_endianness)
    }

    /// Queues `message` for the connection at `index`. Sending to this
    /// peer's own index delivers it locally.
    pub fn send(&mut self, index: u8, message: Message) -> Result<(), SessionError> {
        let message = self.bind_message(message)?;
        let connection = self
            .connections
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(SessionError::NoSuchConnection(index))?;
        if connection.is_local() {
            connection.deliver(message);
        } else {
            connection.send(message);
        }
        Ok(())
    }

    pub fn send_to_host(&mut self, message: Message) -> Result<(), SessionError> {
        let index = self
            .host_index
            .ok_or(SessionError::InvalidState(self.state))?;
        self.send(index, message)
    }

    /// Queues a copy of `message` for every remote connection. Returns how
    /// many were queued.
    pub fn broadcast(&mut self, message: Message) -> Result<usize, SessionError> {
        let message = self.bind_message(message)?;
        let mut count = 0;
        for connection in self.connections.iter_mut().flatten() {
            if !connection.is_local() {
                connection.send(message.clone());
                count += 1;
            }
        }
        Ok(count)
    }

    /// Next message delivered from the connection at `index`.
    pub fn receive(&mut self, index: u8) -> Option<Message> {
        self.connections
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .and_then(Connection::take_received)
    }

    /// Next delivered message from any connection, lowest index first.
    pub fn receive_any(&mut self) -> Option<(u8, Message)> {
        self.connections
            .iter_mut()
            .flatten()
            .find(|connection| connection.pending_received() > 0)
            .and_then(|connection| {
                let index = connection.index();
                connection.take_received().map(|message| (index, message))
            })
    }

    /// Sends a connectionless ping. The reply shows up as
    /// [`SessionEvent::Pong`].
    pub fn ping(&mut self, addr: SocketAddr, payload: &[u8]) -> Result<(), SessionError> {
        if self.state == SessionState::Disconnected {
            return Err(SessionError::InvalidState(self.state));
        }
        let mut message = self.core_message(CoreMessage::Ping);
        message.write_bytes(payload)?;
        self.send_unconnected(addr, &message)?;
        Ok(())
    }

    fn bind_message(&self, mut message: Message) -> Result<Message, SessionError> {
        let definition = self
            .registry
            .find(message.name())
            .ok_or_else(|| SessionError::UnknownMessageName(message.name().to_owned()))?;
        if message.payload().endianness() != self.config.wire_endianness {
            return Err(SessionError::EndiannessMismatch(message.name().to_owned()));
        }
        message.set_definition(definition);

        let frame = message.frame_size();
        if frame > MAX_PACKET_SIZE - PACKET_HEADER_SIZE {
            return Err(PacketError::TooLarge(frame).into());
        }
        Ok(message)
    }

    pub(super) fn core_message(&self, core: CoreMessage) -> Message {
        let mut message = Message::with_endianness(core.name(), self.config.wire_endianness);
        message.set_definition(self.registry.core(core));
        message
    }

    pub(super) fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        log::info!("Session {:?} -> {:?}", self.state, state);
        self.events.push_back(SessionEvent::StateChanged {
            from: self.state,
            to: state,
        });
        self.state = state;
    }

    fn process_incoming(&mut self, now: Instant) {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok(Some((size, addr))) => {
                    let bytes = self.recv_buffer[..size].to_vec();
                    if !self.simulator.enqueue_inbound(addr, bytes, now) {
                        log::trace!("Simulated loss of {} bytes from {}", size, addr);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Receive error: {}", e);
                    break;
                }
            }
        }
    }

    fn process_received_packets(&mut self, now: Instant) {
        for (addr, bytes) in self.simulator.take_inbound(now) {
            if self.state == SessionState::Disconnected {
                break;
            }
            self.handle_datagram(addr, &bytes, now);
        }
    }

    fn handle_datagram(&mut self, addr: SocketAddr, bytes: &[u8], now: Instant) {
        let mut packet = match Packet::from_datagram(bytes, self.config.wire_endianness) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Discarding datagram from {}: {}", addr, e);
                self.malformed_packets += 1;
                return;
            }
        };
        if !packet.is_valid() {
            log::warn!("Discarding malformed packet from {} ({} bytes)", addr, bytes.len());
            self.malformed_packets += 1;
            return;
        }
        let header = match packet.read_header() {
            Ok(header) => header,
            Err(e) => {
                log::warn!("Discarding packet from {}: {}", addr, e);
                self.malformed_packets += 1;
                return;
            }
        };

        let connection_index = self.bound_index(header.connection_index, addr);
        if let Some(connection) = connection_index.and_then(|i| self.connections[i as usize].as_mut())
        {
            connection.receive_packet(&header, bytes.len(), now);
        }

        let sender = Sender {
            address: addr,
            connection_index,
        };
        for _ in 0..header.message_count {
            match packet.read_message(&self.registry) {
                Ok(message) => self.dispatch(message, &sender, now),
                Err(PacketError::UnknownMessageType(index)) => {
                    log::debug!("Skipping unknown message type {} from {}", index, addr);
                }
                Err(e) => {
                    log::warn!("Malformed message from {}: {}", addr, e);
                    break;
                }
            }
            if self.state == SessionState::Disconnected {
                break;
            }
        }
    }

    /// The slot a packet belongs to: the header must name an existing remote
    /// connection whose address matches the sender.
    fn bound_index(&self, index: u8, addr: SocketAddr) -> Option<u8> {
        if index == INVALID_CONNECTION_INDEX {
            return None;
        }
        match self.connection(index) {
            Some(connection) if !connection.is_local() && connection.address() == addr => {
                Some(index)
            }
            _ => None,
        }
    }

    fn dispatch(&mut self, message: Message, sender: &Sender, now: Instant) {
        let Some(route) = self.registry.route(message.type_index()) else {
            return;
        };
        if message.options().requires_connection() && sender.connection_index.is_none() {
            log::debug!(
                "Dropping {:?} from {}: {}",
                message.name(),
                sender.address,
                SessionError::ConnectionRequired(message.name().to_owned())
            );
            return;
        }

        match route {
            Route::Core(core) => self.handle_core(core, message, sender, now),
            Route::Callback => {
                if self.registry.invoke(&message, sender) == Some(false) {
                    log::debug!(
                        "Callback for {:?} from {} did not consume it",
                        message.name(),
                        sender.address
                    );
                }
            }
            Route::Deliver => {
                if let Some(connection) = sender
                    .connection_index
                    .and_then(|index| self.connections[index as usize].as_mut())
                {
                    connection.deliver(message);
                }
            }
        }
    }

    fn update_joining(&mut self, now: Instant) {
        let Some(started) = self.join_started_at else {
            return;
        };
        self.advance_connecting();

        if now.saturating_duration_since(started) >= self.config.join_timeout() {
            self.fail_join(JoinError::Timeout);
            return;
        }

        if self.state != SessionState::Connecting {
            return;
        }
        let retry_due = self.last_join_request_at.is_none_or(|last| {
            now.saturating_duration_since(last) >= self.config.join_retry_interval()
        });
        if retry_due {
            if let Err(e) = self.queue_join_request() {
                log::warn!("Could not build join request: {}", e);
            }
            self.last_join_request_at = Some(now);
        }
    }

    fn queue_join_request(&mut self) -> Result<(), CodecError> {
        let mut request = self.core_message(CoreMessage::JoinRequest);
        request.write_string(&self.config.network_id)?;
        if let Some(host) = self
            .host_index
            .and_then(|index| self.connections[index as usize].as_mut())
        {
            log::debug!("Sending join request to {}", host.address());
            host.send(request);
        }
        Ok(())
    }

    /// CONNECTING becomes JOINING once this peer's own connection has been
    /// accepted.
    pub(super) fn advance_connecting(&mut self) {
        let accepted = self
            .my_index
            .and_then(|index| self.connection(index))
            .is_some_and(|me| me.state() == ConnectionState::Connected);
        if self.state == SessionState::Connecting && accepted {
            self.set_state(SessionState::Joining);
        }
    }

    fn check_timeouts(&mut self, now: Instant) {
        let timeout = self.config.connection_timeout();
        let expired: Vec<u8> = self
            .connections()
            .filter(|connection| !connection.is_local() && connection.is_timed_out(timeout, now))
            .map(Connection::index)
            .collect();
        for index in expired {
            log::warn!("Connection {} timed out", index);
            self.remove_connection(index, LeaveReason::TimedOut);
            if self.state == SessionState::Disconnected {
                break;
            }
        }
    }

    pub(super) fn flush_outgoing(&mut self, now: Instant, force: bool) {
        let ctx = FlushContext {
            now,
            local_index: self.my_index.unwrap_or(INVALID_CONNECTION_INDEX),
            max_send_hz: self.simulator.settings().max_send_hz,
            heartbeat_hz: self.config.heartbeat_hz,
            heartbeat: self
                .my_index
                .map(|_| self.registry.core(CoreMessage::Heartbeat)),
            endianness: self.config.wire_endianness,
            force,
        };

        let mut outgoing = Vec::new();
        for connection in self.connections.iter_mut().flatten() {
            if connection.is_local() {
                continue;
            }
            if let Some(packet) = connection.flush(&ctx) {
                outgoing.push((connection.address(), packet));
            }
        }
        for (addr, packet) in outgoing {
            if let Err(e) = self.socket.send_to(addr, packet.as_bytes()) {
                log::warn!("Failed to send {} bytes to {}: {}", packet.len(), addr, e);
            }
        }
    }

    /// Sends `message` alone in a packet outside any connection's ack stream.
    pub(super) fn send_unconnected(
        &mut self,
        addr: SocketAddr,
        message: &Message,
    ) -> Result<(), SessionError> {
        let header = PacketHeader {
            connection_index: self.my_index.unwrap_or(INVALID_CONNECTION_INDEX),
            ..PacketHeader::default()
        };
        let mut packet = Packet::with_header(header, self.config.wire_endianness);
        packet.write_message(message)?;
        self.socket.send_to(addr, packet.as_bytes())?;
        Ok(())
    }

    /// Queues `update_connection` carrying this peer's new state for every
    /// remote connection.
    pub(super) fn announce_local_state(&mut self, state: ConnectionState) {
        let mut update = self.core_message(CoreMessage::UpdateConnection);
        if let Err(e) = update.write_u8(state.wire_code()) {
            log::warn!("Could not build connection update: {}", e);
            return;
        }
        for connection in self.connections.iter_mut().flatten() {
            if !connection.is_local() {
                connection.send(update.clone());
            }
        }
    }

    /// Frees a connection slot. Losing the host, or this peer's own slot,
    /// ends the session.
    pub(super) fn remove_connection(&mut self, index: u8, reason: LeaveReason) {
        if !self.is_host && (Some(index) == self.host_index || Some(index) == self.my_index) {
            log::info!("Lost connection to host ({:?})", reason);
            self.teardown(reason);
            return;
        }
        if let Some(connection) = self.connections[index as usize].take() {
            log::info!(
                "Connection {} ({}, {:?}) left: {:?}",
                index,
                connection.address(),
                connection.network_id(),
                reason
            );
            self.events.push_back(SessionEvent::ConnectionLeft {
                index,
                address: connection.address(),
                reason,
            });
        }
    }

    pub(super) fn fail_join(&mut self, reason: JoinError) {
        log::warn!("Join failed: {}", reason);
        self.events.push_back(SessionEvent::JoinFailed(reason));
        self.last_error = Some(SessionError::Join(reason));
        self.teardown(LeaveReason::Disconnected);
    }

    /// Drops every connection and closes the socket.
    pub(super) fn teardown(&mut self, reason: LeaveReason) {
        for slot in self.connections.iter_mut() {
            if let Some(connection) = slot.take() {
                if !connection.is_local() {
                    self.events.push_back(SessionEvent::ConnectionLeft {
                        index: connection.index(),
                        address: connection.address(),
                        reason,
                    });
                }
            }
        }
        self.pending_self = None;
        self.my_index = None;
        self.host_index = None;
        self.host_addr = None;
        self.is_host = false;
        self.join_started_at = None;
        self.last_join_request_at = None;
        self.simulator.clear();
        self.socket.close();
        self.local_addr = None;
        self.set_state(SessionState::Disconnected);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Disconnected {
            self.disconnect();
        }
    }
}
