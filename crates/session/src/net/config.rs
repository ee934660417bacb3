use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Endianness;

use super::protocol::{DEFAULT_PORT, INVALID_CONNECTION_INDEX};

/// Artificial impairment applied to received datagrams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSimulation {
    /// Probability in `[0, 1]` that a datagram is discarded.
    pub loss_fraction: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    /// Upper bound on every connection's send frequency. Zero disables it.
    pub max_send_hz: f32,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for NetworkSimulation {
    fn default() -> Self {
        Self {
            loss_fraction: 0.0,
            min_latency_ms: 0,
            max_latency_ms: 0,
            max_send_hz: 60.0,
            seed: None,
        }
    }
}

impl NetworkSimulation {
    pub fn is_active(&self) -> bool {
        self.loss_fraction > 0.0 || self.max_latency_ms > 0
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(0.0..=1.0).contains(&self.loss_fraction) {
            errors.push(format!(
                "Simulated loss fraction must be within [0, 1], got {}",
                self.loss_fraction
            ));
        }
        if self.min_latency_ms > self.max_latency_ms {
            errors.push(format!(
                "Simulated latency range is inverted: {} > {} ms",
                self.min_latency_ms, self.max_latency_ms
            ));
        }
        if !self.max_send_hz.is_finite() || self.max_send_hz < 0.0 {
            errors.push("Simulated send frequency cap must be a non-negative number".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub bind_ip: IpAddr,
    /// First port tried when binding.
    pub port: u16,
    /// Number of consecutive ports tried, starting at `port`.
    pub port_range: u16,
    /// Identifier announced to peers during the join handshake.
    pub network_id: String,
    pub wire_endianness: Endianness,
    /// Default send frequency of new connections.
    pub send_hz: f32,
    pub heartbeat_hz: f32,
    pub join_retry_interval_secs: f32,
    pub join_timeout_secs: f32,
    pub connection_timeout_secs: f32,
    /// Connection slots a host hands out, including its own.
    pub max_connections: u8,
    /// Whether a host accepts join requests.
    pub listening: bool,
    pub simulation: NetworkSimulation,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            port_range: 8,
            network_id: "peer".to_string(),
            wire_endianness: Endianness::Little,
            send_hz: 20.0,
            heartbeat_hz: 2.0,
            join_retry_interval_secs: 0.25,
            join_timeout_secs: 10.0,
            connection_timeout_secs: 15.0,
            max_connections: INVALID_CONNECTION_INDEX,
            listening: true,
            simulation: NetworkSimulation::default(),
        }
    }
}

impl SessionConfig {
    pub fn ports(&self) -> RangeInclusive<u16> {
        let last = self
            .port
            .saturating_add(self.port_range.saturating_sub(1));
        self.port..=last
    }

    pub fn join_retry_interval(&self) -> Duration {
        Duration::from_secs_f32(self.join_retry_interval_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.join_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.connection_timeout_secs)
    }

    /// Human-readable problems; empty when the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.port_range == 0 {
            errors.push("Port range must contain at least one port".to_string());
        }
        if self.network_id.is_empty() {
            errors.push("Network id cannot be empty".to_string());
        }
        if !(self.send_hz.is_finite() && self.send_hz > 0.0) {
            errors.push(format!("Send frequency must be positive, got {}", self.send_hz));
        }
        if !(self.heartbeat_hz.is_finite() && self.heartbeat_hz >= 0.0) {
            errors.push(format!(
                "Heartbeat frequency must be non-negative, got {}",
                self.heartbeat_hz
            ));
        }
        for (name, secs) in [
            ("Join retry interval", self.join_retry_interval_secs),
            ("Join timeout", self.join_timeout_secs),
            ("Connection timeout", self.connection_timeout_secs),
        ] {
            if !(secs.is_finite() && secs > 0.0) {
                errors.push(format!("{} must be a positive number of seconds", name));
            }
        }
        if self.max_connections < 2 {
            errors.push("A session needs at least two connection slots".to_string());
        }

        errors.extend(self.simulation.validate());
        errors
    }
}
