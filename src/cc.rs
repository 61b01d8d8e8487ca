// This implementation of TCP-Reno-style congestion control has been informed by:
// https://intronetworks.cs.luc.edu/current/html/reno.html

//            base          next       base+floor(cwnd)
//            v             v          v
// -----------##############__________--------> sequence numbers
// ***********
//
// *: acknowledged
// #: in flight (sent at least once, not yet acknowledged)
// _: eligible for transmission
//
// A timeout pulls `next` back to the shrunken window. Packets between `next` and `sent` went out
// before the timeout and become eligible again as the window reopens.

use std::collections::VecDeque;
use std::ops::Range;

/// Number of duplicate ACKs which signal a loss and trigger fast recovery.
pub const DUPLICATE_ACK_THRESHOLD: u32 = 3;

const Q16_ONE: u64 = 1 << 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

/// How an incoming ACK value was interpreted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AckKind {
    /// Acknowledged at least one new packet.
    New,
    /// Repeated the most recent cumulative ACK.
    Duplicate,
    /// Reordered behind a newer ACK, or acknowledges packets never sent. Ignored.
    Ignored,
}

/// Sender-side congestion state: window, threshold, mode, and the edges of the in-flight window.
///
/// Window and threshold are stored in Q16 fixed point.
pub struct CongestionController {
    mode: Mode,
    cwnd_q16: u64,
    ssthresh_q16: u64,

    duplicate_ack_count: u32,
    last_ack_seen: u64,

    // Lowest unacknowledged sequence number
    base_id: u64,
    // One past the highest sequence number in flight
    next_id: u64,
    // One past the highest sequence number ever sent
    sent_id: u64,
    // Total number of packets in the transfer
    packet_count: u64,

    retransmit_queue: VecDeque<u64>,
}

impl CongestionController {
    pub fn new(initial_window: u32, initial_threshold: u32, packet_count: u64) -> Self {
        assert!(initial_window >= 1, "initial window must be at least one packet");

        Self {
            mode: Mode::SlowStart,
            cwnd_q16: u64::from(initial_window) * Q16_ONE,
            ssthresh_q16: u64::from(initial_threshold) * Q16_ONE,

            duplicate_ack_count: 0,
            last_ack_seen: 0,

            base_id: 0,
            next_id: 0,
            sent_id: 0,
            packet_count,

            retransmit_queue: VecDeque::new(),
        }
    }

    /// Dispatches an ACK to [`Self::on_new_ack`] or [`Self::on_duplicate_ack`] based on its
    /// comparison with the last ACK seen.
    pub fn on_ack(&mut self, ack_seq: u64) -> AckKind {
        if ack_seq == self.last_ack_seen {
            self.on_duplicate_ack(ack_seq);
            AckKind::Duplicate
        } else if ack_seq > self.last_ack_seen && ack_seq <= self.sent_id {
            self.on_new_ack(ack_seq);
            AckKind::New
        } else {
            AckKind::Ignored
        }
    }

    /// Handles an ACK strictly greater than the last one seen. The caller is responsible for
    /// restarting its retransmission timer.
    pub fn on_new_ack(&mut self, ack_seq: u64) {
        debug_assert!(ack_seq > self.last_ack_seen);
        debug_assert!(ack_seq <= self.sent_id);

        let acked = ack_seq - self.last_ack_seen;

        match self.mode {
            Mode::SlowStart => {
                // Grow by one packet per packet acknowledged [19.2]
                self.cwnd_q16 = self.cwnd_q16.saturating_add(acked.saturating_mul(Q16_ONE));

                if self.cwnd_q16 >= self.ssthresh_q16 {
                    self.mode = Mode::CongestionAvoidance;
                }
            }
            Mode::CongestionAvoidance => {
                // Add 1/floor(cwnd) per packet acknowledged [19.2.1]. Rounding up ensures a full
                // window of acks grows floor(cwnd) by one.
                for _ in 0..acked {
                    let cwnd_int = (self.cwnd_q16 / Q16_ONE).max(1);
                    let increment_q16 = (Q16_ONE + cwnd_int - 1) / cwnd_int;
                    self.cwnd_q16 = self.cwnd_q16.saturating_add(increment_q16);
                }
            }
            Mode::FastRecovery => {
                // Deflate the window back to the threshold
                self.cwnd_q16 = self.ssthresh_q16.max(Q16_ONE);
                self.mode = Mode::CongestionAvoidance;
            }
        }

        self.last_ack_seen = ack_seq;
        self.base_id = ack_seq;
        // May acknowledge packets sent before a timeout pulled the window back
        self.next_id = self.next_id.max(ack_seq);
        self.duplicate_ack_count = 0;
    }

    /// Handles an ACK equal to the last one seen.
    pub fn on_duplicate_ack(&mut self, ack_seq: u64) {
        debug_assert_eq!(ack_seq, self.last_ack_seen);

        self.duplicate_ack_count = self.duplicate_ack_count.saturating_add(1);

        match self.mode {
            Mode::FastRecovery => {
                // Each further duplicate means another packet has left the network
                self.cwnd_q16 = self.cwnd_q16.saturating_add(Q16_ONE);
                self.schedule_retransmit(self.base_id);
            }
            Mode::SlowStart | Mode::CongestionAvoidance => {
                if self.duplicate_ack_count == DUPLICATE_ACK_THRESHOLD {
                    self.ssthresh_q16 = self.cwnd_q16 / 2;
                    self.cwnd_q16 =
                        self.ssthresh_q16 + u64::from(DUPLICATE_ACK_THRESHOLD) * Q16_ONE;
                    self.mode = Mode::FastRecovery;
                    self.schedule_retransmit(self.base_id);
                }
            }
        }
    }

    /// Handles expiry of the retransmission timer. The caller is responsible for restarting its
    /// retransmission timer.
    pub fn on_timeout(&mut self) {
        // The pipe has drained, start over in slow start [19.2.2]
        self.ssthresh_q16 = self.cwnd_q16 / 2;
        self.cwnd_q16 = Q16_ONE;
        self.duplicate_ack_count = 0;
        self.mode = Mode::SlowStart;

        if self.base_id < self.next_id {
            // Only the base stays in flight; the rest is resent as the window reopens
            self.next_id = self.next_id.min(self.base_id + self.window()).max(self.base_id + 1);
            self.schedule_retransmit(self.base_id);
        }
    }

    fn schedule_retransmit(&mut self, seq: u64) {
        if !self.retransmit_queue.contains(&seq) {
            self.retransmit_queue.push_back(seq);
        }
    }

    /// Pops the next packet awaiting retransmission, skipping any that were acknowledged since
    /// being scheduled.
    pub fn pop_retransmit(&mut self) -> Option<u64> {
        while let Some(seq) = self.retransmit_queue.pop_front() {
            if seq >= self.base_id && seq < self.next_id {
                return Some(seq);
            }
        }

        None
    }

    /// Packets allowed to leave the sender: `[highest_sent + 1, base + floor(cwnd))`, capped by
    /// the packet count. After a timeout this may include packets which were sent before.
    pub fn packets_eligible_for_send(&self) -> Range<u64> {
        let window_end = self
            .base_id
            .saturating_add(self.cwnd_q16 / Q16_ONE)
            .min(self.packet_count);

        self.next_id..window_end.max(self.next_id)
    }

    /// Records the transmission of an eligible `seq`.
    pub fn mark_sent(&mut self, seq: u64) {
        debug_assert!(self.packets_eligible_for_send().contains(&seq));

        self.next_id = self.next_id.max(seq + 1);
        self.sent_id = self.sent_id.max(seq + 1);
    }

    /// Returns true if `seq` has been sent at least once.
    pub fn was_sent(&self, seq: u64) -> bool {
        seq < self.sent_id
    }

    /// Lowers the packet count after the data source ended early. Packets already sent are kept.
    pub fn truncate(&mut self, packet_count: u64) {
        self.packet_count = packet_count.max(self.sent_id).min(self.packet_count);
    }

    /// Returns true once every packet has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.base_id >= self.packet_count
    }

    pub fn has_in_flight(&self) -> bool {
        self.base_id < self.next_id
    }

    /// Sequence numbers currently in flight: `[base, highest_sent + 1)`.
    pub fn in_flight(&self) -> Range<u64> {
        self.base_id..self.next_id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn window_size(&self) -> f64 {
        self.cwnd_q16 as f64 / Q16_ONE as f64
    }

    /// Integer number of packets the window permits in flight.
    pub fn window(&self) -> u64 {
        self.cwnd_q16 / Q16_ONE
    }

    pub fn slow_start_threshold(&self) -> f64 {
        self.ssthresh_q16 as f64 / Q16_ONE as f64
    }

    pub fn duplicate_ack_count(&self) -> u32 {
        self.duplicate_ack_count
    }

    pub fn last_ack_seen(&self) -> u64 {
        self.last_ack_seen
    }

    pub fn base_sequence(&self) -> u64 {
        self.base_id
    }

    /// Right edge of the in-flight window, if anything is or was in flight.
    pub fn highest_sent(&self) -> Option<u64> {
        self.next_id.checked_sub(1)
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }
}
