use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::NetworkSimulation;

#[derive(Debug)]
struct DelayedPacket {
    release_time: Instant,
    /// Arrival order, so equal release times keep arrival order.
    order: u64,
    addr: SocketAddr,
    bytes: Vec<u8>,
}

impl PartialEq for DelayedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedPacket {}

impl PartialOrd for DelayedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Inbound delay queue applying simulated loss and latency.
///
/// Every received datagram goes through here, even with no impairment
/// configured; it is then released immediately.
#[derive(Debug)]
pub struct NetworkSimulator {
    settings: NetworkSimulation,
    rng: StdRng,
    inbound_queue: BinaryHeap<DelayedPacket>,
    next_order: u64,
}

impl NetworkSimulator {
    pub fn new(settings: NetworkSimulation) -> Self {
        let rng = Self::make_rng(settings.seed);
        Self {
            settings,
            rng,
            inbound_queue: BinaryHeap::new(),
            next_order: 0,
        }
    }

    fn make_rng(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    pub fn settings(&self) -> &NetworkSimulation {
        &self.settings
    }

    /// Replaces the impairment settings. Queued datagrams keep their
    /// release times.
    pub fn set_settings(&mut self, settings: NetworkSimulation) {
        if settings.seed.is_some() && settings.seed != self.settings.seed {
            self.rng = Self::make_rng(settings.seed);
        }
        self.settings = settings;
    }

    pub fn should_drop(&mut self) -> bool {
        let loss = self.settings.loss_fraction;
        if loss <= 0.0 {
            return false;
        }
        if loss >= 1.0 {
            return true;
        }
        self.rng.random::<f32>() < loss
    }

    pub fn delay(&mut self) -> Duration {
        let min = self.settings.min_latency_ms;
        let max = self.settings.max_latency_ms;
        let ms = if max <= min {
            min
        } else {
            self.rng.random_range(min..=max)
        };
        Duration::from_millis(ms as u64)
    }

    /// Queues a received datagram for release after the simulated latency.
    /// Returns false if it was discarded as simulated loss.
    pub fn enqueue_inbound(&mut self, addr: SocketAddr, bytes: Vec<u8>, now: Instant) -> bool {
        let release_time = if self.settings.is_active() {
            if self.should_drop() {
                return false;
            }
            now + self.delay()
        } else {
            now
        };
        self.inbound_queue.push(DelayedPacket {
            release_time,
            order: self.next_order,
            addr,
            bytes,
        });
        self.next_order += 1;
        true
    }

    /// Pops every datagram whose release time is at or before `now`, in
    /// release order.
    pub fn take_inbound(&mut self, now: Instant) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut packets = Vec::new();
        while self
            .inbound_queue
            .peek()
            .is_some_and(|delayed| delayed.release_time <= now)
        {
            if let Some(delayed) = self.inbound_queue.pop() {
                packets.push((delayed.addr, delayed.bytes));
            }
        }
        packets
    }

    pub fn pending(&self) -> usize {
        self.inbound_queue.len()
    }

    pub fn clear(&mut self) {
        self.inbound_queue.clear();
    }
}
