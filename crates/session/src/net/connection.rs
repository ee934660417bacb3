use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::codec::Endianness;

use super::message::{Message, MessageType};
use super::packet::{Packet, PacketHeader};
use super::protocol::{INVALID_ACK, INVALID_CONNECTION_INDEX, next_ack};
use super::stats::{ConnectionInfo, NetworkStats};
use super::tracking::{MovingAverage, ReceiveTracker, SentPacketTracker, acks_confirmed_by};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Ready,
}

impl ConnectionState {
    /// Code carried by `update_connection`.
    pub fn wire_code(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Ready => 2,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ConnectionState::Disconnected),
            1 => Some(ConnectionState::Connected),
            2 => Some(ConnectionState::Ready),
            _ => None,
        }
    }
}

/// What a connection needs from its session to build a packet.
#[derive(Debug, Clone, Copy)]
pub struct FlushContext<'a> {
    pub now: Instant,
    /// The sending peer's own slot, stamped into the packet header.
    pub local_index: u8,
    /// Session-wide send frequency cap. Non-positive means uncapped.
    pub max_send_hz: f32,
    pub heartbeat_hz: f32,
    /// Heartbeat type, when heartbeats should be sent at all.
    pub heartbeat: Option<&'a MessageType>,
    pub endianness: Endianness,
    /// Ignore the send interval.
    pub force: bool,
}

/// State kept for one remote peer (or for the local peer itself).
#[derive(Debug)]
pub struct Connection {
    index: u8,
    address: SocketAddr,
    network_id: String,
    state: ConnectionState,
    is_local: bool,
    send_hz: f32,
    next_sent_ack: u16,
    next_reliable_id: u16,
    received: ReceiveTracker,
    sent: SentPacketTracker,
    rtt: MovingAverage,
    loss: MovingAverage,
    outgoing_reliable: VecDeque<Message>,
    outgoing_unreliable: VecDeque<Message>,
    inbox: VecDeque<Message>,
    last_send_at: Option<Instant>,
    last_heartbeat_at: Option<Instant>,
    last_received_at: Instant,
    stats: NetworkStats,
}

impl Connection {
    pub fn new(address: SocketAddr, send_hz: f32, now: Instant) -> Self {
        Self {
            index: INVALID_CONNECTION_INDEX,
            address,
            network_id: String::new(),
            state: ConnectionState::Disconnected,
            is_local: false,
            send_hz,
            next_sent_ack: 0,
            next_reliable_id: 0,
            received: ReceiveTracker::new(),
            sent: SentPacketTracker::new(),
            rtt: MovingAverage::default(),
            loss: MovingAverage::default(),
            outgoing_reliable: VecDeque::new(),
            outgoing_unreliable: VecDeque::new(),
            inbox: VecDeque::new(),
            last_send_at: None,
            last_heartbeat_at: None,
            last_received_at: now,
            stats: NetworkStats::default(),
        }
    }

    /// The connection representing this peer in its own table.
    pub fn local(address: SocketAddr, network_id: &str, now: Instant) -> Self {
        let mut connection = Self::new(address, 0.0, now);
        connection.is_local = true;
        connection.network_id = network_id.to_owned();
        connection
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn set_index(&mut self, index: u8) {
        self.index = index;
    }

    pub fn has_index(&self) -> bool {
        self.index != INVALID_CONNECTION_INDEX
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn set_network_id(&mut self, network_id: impl Into<String>) {
        self.network_id = network_id.into();
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true if the state changed.
    pub fn set_state(&mut self, state: ConnectionState) -> bool {
        let changed = self.state != state;
        self.state = state;
        changed
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn send_hz(&self) -> f32 {
        self.send_hz
    }

    pub fn set_send_hz(&mut self, send_hz: f32) {
        self.send_hz = send_hz;
    }

    /// This connection's rate limited by the session cap.
    pub fn effective_send_hz(&self, max_send_hz: f32) -> f32 {
        if max_send_hz > 0.0 {
            self.send_hz.min(max_send_hz)
        } else {
            self.send_hz
        }
    }

    pub fn rtt_seconds(&self) -> f32 {
        self.rtt.value()
    }

    pub fn rtt_samples(&self) -> u64 {
        self.rtt.samples()
    }

    pub fn loss_fraction(&self) -> f32 {
        self.loss.value()
    }

    pub fn next_sent_ack(&self) -> u16 {
        self.next_sent_ack
    }

    pub fn highest_received_ack(&self) -> u16 {
        self.received.highest()
    }

    pub fn received_acks_history(&self) -> u16 {
        self.received.history()
    }

    pub fn sent_packets(&self) -> &SentPacketTracker {
        &self.sent
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn last_received_at(&self) -> Instant {
        self.last_received_at
    }

    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_received_at) > timeout
    }

    pub fn queued_messages(&self) -> usize {
        self.outgoing_reliable.len() + self.outgoing_unreliable.len()
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            index: self.index,
            address: self.address,
            network_id: self.network_id.clone(),
            state: self.state,
            is_local: self.is_local,
            rtt_seconds: self.rtt.value(),
            loss_fraction: self.loss.value(),
            stats: self.stats.clone(),
        }
    }

    /// Queues a bound message. Reliable types get the next reliable id.
    pub fn send(&mut self, mut message: Message) {
        debug_assert!(message.is_bound(), "message {:?} sent unbound", message.name());
        if message.is_reliable() {
            message.set_reliable_id(self.next_reliable_id);
            self.next_reliable_id = self.next_reliable_id.wrapping_add(1);
            self.outgoing_reliable.push_back(message);
        } else {
            self.outgoing_unreliable.push_back(message);
        }
    }

    /// Hands a received message to the application.
    pub fn deliver(&mut self, message: Message) {
        self.inbox.push_back(message);
    }

    pub fn take_received(&mut self) -> Option<Message> {
        self.inbox.pop_front()
    }

    pub fn pending_received(&self) -> usize {
        self.inbox.len()
    }

    /// Ack bookkeeping for a packet that arrived from this peer.
    pub fn receive_packet(&mut self, header: &PacketHeader, size: usize, now: Instant) {
        self.last_received_at = now;
        self.stats.packets_received += 1;
        self.stats.bytes_received += size as u64;
        self.stats.messages_received += header.message_count as u64;

        if header.ack == INVALID_ACK {
            return;
        }
        self.received.record_received(header.ack);

        for ack in acks_confirmed_by(header.highest_received_ack, header.received_acks_history) {
            self.confirm(ack, now);
        }
    }

    /// Marks a sent ack as received by the peer. Returns false if nothing
    /// was tracked for it.
    pub fn confirm(&mut self, ack: u16, now: Instant) -> bool {
        match self.sent.confirm(ack, now) {
            Some(rtt) => {
                self.rtt.add_sample(rtt.as_secs_f32());
                self.loss.add_sample(0.0);
                log::trace!(
                    "Ack {} confirmed by {} after {:.1} ms",
                    ack,
                    self.address,
                    rtt.as_secs_f32() * 1000.0
                );
                true
            }
            None => false,
        }
    }

    /// Builds the next packet for this peer, if the send interval has
    /// elapsed and there is anything to send.
    pub fn flush(&mut self, ctx: &FlushContext<'_>) -> Option<Packet> {
        let now = ctx.now;
        if !ctx.force {
            let hz = self.effective_send_hz(ctx.max_send_hz);
            if hz <= 0.0 {
                return None;
            }
            if let Some(last) = self.last_send_at {
                if now.saturating_duration_since(last) < interval(hz) {
                    return None;
                }
            }
        }

        let (highest, history) = self.received.ack_data();
        let ack = self.next_sent_ack;
        let mut packet = Packet::with_header(
            PacketHeader {
                connection_index: ctx.local_index,
                ack,
                highest_received_ack: highest,
                received_acks_history: history,
                message_count: 0,
            },
            ctx.endianness,
        );

        if let Some(heartbeat) = ctx.heartbeat.filter(|_| self.heartbeat_due(ctx)) {
            let mut message = Message::with_endianness(heartbeat.name.as_str(), ctx.endianness);
            message.set_definition(heartbeat);
            if packet.write_message(&message).is_ok() {
                self.last_heartbeat_at = Some(now);
            }
        }

        while let Some(message) = self.outgoing_reliable.front() {
            if packet.write_message(message).is_err() {
                break;
            }
            self.outgoing_reliable.pop_front();
        }

        while let Some(message) = self.outgoing_unreliable.pop_front() {
            if let Err(e) = packet.write_message(&message) {
                let dropped = 1 + self.outgoing_unreliable.len() as u64;
                log::debug!(
                    "Dropping {} unreliable message(s) to {}: {}",
                    dropped,
                    self.address,
                    e
                );
                self.stats.messages_dropped += dropped;
                self.outgoing_unreliable.clear();
                break;
            }
        }

        if packet.is_empty() {
            return None;
        }

        if let Some(lost) = self.sent.track(ack, now) {
            log::trace!("Ack {} to {} was never confirmed", lost.ack, self.address);
            self.loss.add_sample(1.0);
            self.stats.packets_unconfirmed += 1;
        }
        self.next_sent_ack = next_ack(ack);
        self.last_send_at = Some(now);
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += packet.len() as u64;
        self.stats.messages_sent += packet.message_count() as u64;

        Some(packet)
    }

    fn heartbeat_due(&self, ctx: &FlushContext<'_>) -> bool {
        if ctx.heartbeat_hz <= 0.0 {
            return false;
        }
        match self.last_heartbeat_at {
            None => true,
            Some(last) => {
                ctx.now.saturating_duration_since(last) >= interval(ctx.heartbeat_hz)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_next_sent_ack(&mut self, ack: u16) {
        self.next_sent_ack = ack;
    }
}

fn interval(hz: f32) -> Duration {
    Duration::from_secs_f64(1.0 / hz as f64)
}
