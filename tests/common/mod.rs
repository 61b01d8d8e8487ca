use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rdt::packet::{Packet, PacketKind};
use rdt::receiver::ReceiverCore;
use rdt::socket::{DatagramRx, DatagramTx};
use rdt::time::Clock;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

/// Clock which only moves when told to. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now_ms: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Faults {
    /// Probability that a datagram from the sender is lost.
    pub data_loss: f64,
    /// Probability that a datagram from the receiver is lost.
    pub ack_loss: f64,
    /// Probability that a datagram from the receiver is delivered twice.
    pub ack_duplicate: f64,
    /// Probability that a datagram from the receiver overtakes every reply still queued.
    pub ack_reorder: f64,
    /// Probability that a datagram from the sender is delivered twice.
    pub duplicate: f64,
    /// Probability that a datagram from the sender is held back and delivered after the next one.
    pub reorder: f64,
    /// The first transmission of each of these DATA sequence numbers is lost.
    pub drop_data_once: Vec<u64>,
}

#[derive(Default)]
struct Replies {
    datagrams: Vec<Box<[u8]>>,
}

impl DatagramTx for Replies {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.datagrams.push(datagram.into());
        Ok(())
    }
}

/// In-memory network with a receiver at the far end. Delivery is instantaneous; time only passes
/// when the sender waits with nothing in flight towards it, in which case the clock jumps to the
/// end of the wait.
pub struct SimNetwork {
    clock: ManualClock,
    payload_size_max: usize,
    receiver: ReceiverCore,
    rng: StdRng,
    faults: Faults,
    // Datagrams on their way to the sender
    inbound: VecDeque<Box<[u8]>>,
    // Datagrams on their way to the receiver, held back for reordering
    held: Vec<Box<[u8]>>,

    /// Everything the receiver wrote.
    pub output: Vec<u8>,
    /// Sequence number of every DATA transmission, in order, whether or not it was lost.
    pub data_sent: Vec<u64>,
    /// ACK values the receiver produced in response to DATA, in order.
    pub data_acks: Vec<u64>,
    /// Number of FIN transmissions by the sender.
    pub fins_sent: usize,
}

impl SimNetwork {
    pub fn new(clock: ManualClock, payload_size_max: usize, faults: Faults, seed: u64) -> Self {
        Self {
            clock,
            payload_size_max,
            receiver: ReceiverCore::new(payload_size_max),
            rng: StdRng::seed_from_u64(seed),
            faults,
            inbound: VecDeque::new(),
            held: Vec::new(),
            output: Vec::new(),
            data_sent: Vec::new(),
            data_acks: Vec::new(),
            fins_sent: 0,
        }
    }

    pub fn receiver(&self) -> &ReceiverCore {
        &self.receiver
    }

    fn deliver(&mut self, datagram: &[u8]) {
        let mut replies = Replies::default();

        self.receiver
            .handle_frame(datagram, &mut self.output, &mut replies)
            .unwrap();

        let is_data = Packet::from_record(datagram, self.payload_size_max)
            .is_some_and(|packet| packet.kind.contains(PacketKind::DATA));

        for reply in replies.datagrams {
            let packet = Packet::from_record(&reply, self.payload_size_max).unwrap();

            if is_data && packet.kind.contains(PacketKind::ACK) {
                self.data_acks.push(packet.sequence_number);
            }

            if self.rng.gen_bool(self.faults.ack_loss) {
                continue;
            }

            let copies = if self.rng.gen_bool(self.faults.ack_duplicate) {
                2
            } else {
                1
            };

            for _ in 0..copies {
                if self.rng.gen_bool(self.faults.ack_reorder) {
                    self.inbound.push_front(reply.clone());
                } else {
                    self.inbound.push_back(reply.clone());
                }
            }
        }
    }

    fn release_held(&mut self) {
        for datagram in std::mem::take(&mut self.held) {
            self.deliver(&datagram);
        }
    }
}

impl DatagramTx for SimNetwork {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let packet = Packet::from_record(datagram, self.payload_size_max)
            .expect("sender produced a malformed record");

        if packet.kind.contains(PacketKind::DATA) {
            self.data_sent.push(packet.sequence_number);

            let seq = packet.sequence_number;
            if let Some(idx) = self.faults.drop_data_once.iter().position(|&s| s == seq) {
                self.faults.drop_data_once.remove(idx);
                return Ok(());
            }
        }

        if packet.kind.contains(PacketKind::FIN) {
            self.fins_sent += 1;
        }

        if self.rng.gen_bool(self.faults.data_loss) {
            return Ok(());
        }

        let copies = if self.rng.gen_bool(self.faults.duplicate) {
            2
        } else {
            1
        };

        for _ in 0..copies {
            if self.rng.gen_bool(self.faults.reorder) {
                self.held.push(datagram.into());
            } else {
                self.deliver(datagram);
                self.release_held();
            }
        }

        Ok(())
    }
}

impl DatagramRx for SimNetwork {
    fn wait_for_datagram(
        &mut self,
        buffer: &mut [u8],
        timeout: Option<time::Duration>,
    ) -> io::Result<Option<usize>> {
        if self.inbound.is_empty() {
            self.release_held();
        }

        match self.inbound.pop_front() {
            Some(datagram) => {
                buffer[..datagram.len()].copy_from_slice(&datagram);
                Ok(Some(datagram.len()))
            }
            None => {
                let timeout = timeout.expect("wait would block forever");
                self.clock.advance(timeout.as_millis() as u64);
                Ok(None)
            }
        }
    }
}
