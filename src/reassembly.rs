use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::packet::Packet;

/// Holds out-of-order DATA packets until the gap before them fills, then delivers their payloads
/// in sequence order exactly once.
///
/// ```text
///   next
///   v
/// __ _ # # _ # ____ sequence numbers
///
/// #: buffered, awaiting delivery
/// ```
#[derive(Default)]
pub struct ReassemblyBuffer {
    // Min-heap on sequence number; may hold repeats until they are drained
    heap: BinaryHeap<Reverse<Packet>>,
    next_expected: u64,

    delivered_count: u64,
    discarded_count: u64,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    /// Buffers a DATA packet. Packets which were already delivered are discarded immediately.
    /// Returns true if the packet was buffered.
    pub fn accept(&mut self, packet: Packet) -> bool {
        if packet.sequence_number < self.next_expected {
            self.discarded_count += 1;
            return false;
        }

        self.heap.push(Reverse(packet));
        true
    }

    /// Delivers every buffered packet contiguous with the next expected sequence number, in order,
    /// and discards repeats of packets already delivered. Returns the number of packets delivered.
    pub fn drain<F, E>(&mut self, mut deliver: F) -> Result<u64, E>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
    {
        let mut delivered = 0;

        while let Some(Reverse(top)) = self.heap.peek() {
            if top.sequence_number > self.next_expected {
                // Gap; wait for the missing packet
                break;
            }

            if top.sequence_number == self.next_expected {
                // Only released from the heap once the payload is out
                deliver(&top.payload)?;

                self.next_expected += 1;
                self.delivered_count += 1;
                delivered += 1;
            } else {
                self.discarded_count += 1;
            }

            self.heap.pop();
        }

        Ok(delivered)
    }

    /// Cumulative acknowledgement: every sequence number below this value has been delivered.
    pub fn ack_value(&self) -> u64 {
        self.next_expected
    }

    /// Number of packets held, including repeats not yet purged.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count
    }

    /// Number of repeated packets thrown away, either on arrival or while draining.
    pub fn discarded_count(&self) -> u64 {
        self.discarded_count
    }
}
