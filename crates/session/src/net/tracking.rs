use std::time::{Duration, Instant};

use super::protocol::{
    ACK_HISTORY_BITS, EMA_RETAIN, INVALID_ACK, MAX_TRACKED_PACKETS, sequence_greater_than,
};

/// "Sent ack N at time T", kept until N is confirmed or its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTracker {
    pub ack: u16,
    pub sent_at: Instant,
}

/// Ring of [`PacketTracker`]s indexed by `ack % MAX_TRACKED_PACKETS`.
#[derive(Debug)]
pub struct SentPacketTracker {
    slots: [Option<PacketTracker>; MAX_TRACKED_PACKETS],
}

impl Default for SentPacketTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SentPacketTracker {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_TRACKED_PACKETS],
        }
    }

    fn slot(ack: u16) -> usize {
        ack as usize % MAX_TRACKED_PACKETS
    }

    /// Records a sent packet. Returns the tracker it displaced if that one
    /// was never confirmed.
    pub fn track(&mut self, ack: u16, now: Instant) -> Option<PacketTracker> {
        self.slots[Self::slot(ack)].replace(PacketTracker { ack, sent_at: now })
    }

    /// Invalidates the tracker for `ack` and returns its round-trip time, or
    /// `None` if the slot holds another ack or was already confirmed.
    pub fn confirm(&mut self, ack: u16, now: Instant) -> Option<Duration> {
        let slot = &mut self.slots[Self::slot(ack)];
        match *slot {
            Some(tracker) if tracker.ack == ack => {
                *slot = None;
                Some(now.saturating_duration_since(tracker.sent_at))
            }
            _ => None,
        }
    }

    pub fn is_tracking(&self, ack: u16) -> bool {
        self.slots[Self::slot(ack)].is_some_and(|tracker| tracker.ack == ack)
    }

    pub fn pending_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

/// Receive side of the ack scheme: the newest ack seen and which of the
/// [`ACK_HISTORY_BITS`] acks below it have arrived. Bit `i` stands for ack
/// `highest - i - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveTracker {
    highest: u16,
    history: u16,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            highest: INVALID_ACK,
            history: 0,
        }
    }

    /// Returns false for duplicates, the sentinel, and acks too old to
    /// represent.
    pub fn record_received(&mut self, ack: u16) -> bool {
        if ack == INVALID_ACK {
            return false;
        }
        if self.highest == INVALID_ACK {
            self.highest = ack;
            self.history = 0;
            return true;
        }
        if ack == self.highest {
            return false;
        }

        if sequence_greater_than(ack, self.highest) {
            let shift = ack.wrapping_sub(self.highest);
            self.history = if shift > ACK_HISTORY_BITS {
                0
            } else {
                (((self.history as u32) << shift) | (1 << (shift - 1))) as u16
            };
            self.highest = ack;
            true
        } else {
            let behind = self.highest.wrapping_sub(ack);
            if behind > ACK_HISTORY_BITS {
                return false;
            }
            let bit = 1u16 << (behind - 1);
            if self.history & bit != 0 {
                return false;
            }
            self.history |= bit;
            true
        }
    }

    pub fn has_received(&self, ack: u16) -> bool {
        if self.highest == INVALID_ACK || ack == INVALID_ACK {
            return false;
        }
        if ack == self.highest {
            return true;
        }
        let behind = self.highest.wrapping_sub(ack);
        (1..=ACK_HISTORY_BITS).contains(&behind) && self.history & (1 << (behind - 1)) != 0
    }

    pub fn highest(&self) -> u16 {
        self.highest
    }

    pub fn history(&self) -> u16 {
        self.history
    }

    pub fn ack_data(&self) -> (u16, u16) {
        (self.highest, self.history)
    }
}

/// Acks a peer reports as received through a header's feedback fields.
pub fn acks_confirmed_by(highest: u16, history: u16) -> impl Iterator<Item = u16> {
    let bits = (0..ACK_HISTORY_BITS)
        .filter(move |&i| highest != INVALID_ACK && history & (1 << i) != 0)
        .map(move |i| highest.wrapping_sub(i + 1))
        .filter(|&ack| ack != INVALID_ACK);
    (highest != INVALID_ACK).then_some(highest).into_iter().chain(bits)
}

/// Exponential moving average keeping [`EMA_RETAIN`] of the old value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MovingAverage {
    value: f32,
    samples: u64,
}

impl MovingAverage {
    pub fn add_sample(&mut self, sample: f32) {
        self.value = EMA_RETAIN * self.value + (1.0 - EMA_RETAIN) * sample;
        self.samples += 1;
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_tracker_bitfield() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(1);
        tracker.record_received(2);
        tracker.record_received(3);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield, 0b11);
    }

    #[test]
    fn test_receive_tracker_out_of_order() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(3);
        tracker.record_received(1);
        tracker.record_received(2);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield, 0b11);
    }

    #[test]
    fn test_gap_leaves_hole() {
        let mut tracker = ReceiveTracker::new();
        tracker.record_received(10);
        tracker.record_received(13);

        assert_eq!(tracker.ack_data(), (13, 0b100));
        assert!(tracker.has_received(10));
        assert!(!tracker.has_received(11));
        assert!(!tracker.has_received(12));
    }

    #[test]
    fn test_duplicate_detection() {
        let mut tracker = ReceiveTracker::new();

        assert!(tracker.record_received(1));
        assert!(!tracker.record_received(1));
        assert!(tracker.record_received(2));
        assert!(!tracker.record_received(1));
        assert!(!tracker.record_received(INVALID_ACK));
    }

    #[test]
    fn test_large_jump_clears_history() {
        let mut tracker = ReceiveTracker::new();
        tracker.record_received(1);
        tracker.record_received(2);
        tracker.record_received(40);
        assert_eq!(tracker.ack_data(), (40, 0));
        assert!(!tracker.record_received(20));
    }

    #[test]
    fn test_jump_of_exactly_history_width() {
        let mut tracker = ReceiveTracker::new();
        tracker.record_received(0);
        tracker.record_received(16);
        assert_eq!(tracker.history(), 1 << 15);
        assert!(tracker.has_received(0));
    }

    #[test]
    fn test_wraparound_receive() {
        let mut tracker = ReceiveTracker::new();
        tracker.record_received(0xFFFD);
        tracker.record_received(0xFFFE);
        tracker.record_received(0);
        assert_eq!(tracker.highest(), 0);
        assert!(tracker.has_received(0xFFFE));
        assert!(tracker.has_received(0xFFFD));
    }

    #[test]
    fn test_acks_confirmed_by_feedback() {
        let acks: Vec<u16> = acks_confirmed_by(8, 0b1_0001).collect();
        assert_eq!(acks, vec![8, 7, 3]);
        assert_eq!(acks_confirmed_by(INVALID_ACK, 0xFFFF).count(), 0);
    }

    #[test]
    fn test_sent_tracker_confirm_once() {
        let start = Instant::now();
        let mut trackers = SentPacketTracker::new();
        assert!(trackers.track(5, start).is_none());

        let rtt = trackers.confirm(5, start + Duration::from_millis(40));
        assert_eq!(rtt, Some(Duration::from_millis(40)));
        assert!(!trackers.is_tracking(5));
        assert_eq!(trackers.confirm(5, start + Duration::from_millis(50)), None);
    }

    #[test]
    fn test_sent_tracker_wraparound_overwrite() {
        let start = Instant::now();
        let mut trackers = SentPacketTracker::new();
        trackers.track(1, start);

        let displaced = trackers.track(1 + MAX_TRACKED_PACKETS as u16, start);
        assert_eq!(displaced.map(|t| t.ack), Some(1));
        assert_eq!(trackers.confirm(1, start), None);
        assert!(trackers.is_tracking(1 + MAX_TRACKED_PACKETS as u16));
    }

    #[test]
    fn test_moving_average_weights() {
        let mut average = MovingAverage::default();
        average.add_sample(1.0);
        assert!((average.value() - 0.1).abs() < 1e-6);
        average.add_sample(1.0);
        assert!((average.value() - 0.19).abs() < 1e-6);
        assert_eq!(average.samples(), 2);
    }
}
