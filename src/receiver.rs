use std::fs;
use std::io::{self, Write};
use std::net;
use std::path::Path;

use super::error::{Error, Result};
use super::packet::{serial, Packet, PacketKind};
use super::reassembly::ReassemblyBuffer;
use super::socket::{self, DatagramRx, DatagramTx};
use super::time::{Clock, SystemClock, Timer};
use super::{validate_payload_size_max, FIN_REPEAT_COUNT, MAX_PACKET_SIZE};

/// Configuration for a [`Receiver`] object.
#[derive(Clone, Debug)]
pub struct Config {
    /// Largest payload carried by a single packet, in bytes. Must match the sender.
    ///
    /// Maximum value: 1,461 \
    /// Default value: 1,000
    pub payload_size_max: usize,

    /// Time to wait for the next datagram before giving up, in milliseconds. `None` waits
    /// indefinitely.
    ///
    /// Default value: None
    pub idle_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payload_size_max: MAX_PACKET_SIZE,
            idle_timeout_ms: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        validate_payload_size_max(self.payload_size_max)?;

        if self.idle_timeout_ms == Some(0) {
            return Err(Error::InvalidConfig("idle_timeout_ms == 0"));
        }

        Ok(())
    }
}

/// Outcome of handling a single datagram.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Receiving,
    /// A FIN arrived and has been answered. Nothing further will be delivered.
    Finished,
}

/// Summary of a completed receive.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReceiveReport {
    pub bytes_written: u64,
    pub packets_delivered: u64,
    pub duplicates_discarded: u64,
    pub acks_sent: u64,
}

/// Receiver state, independent of any socket or clock: feed it datagrams, it writes in-order
/// payloads to the sink and replies through the transport.
pub struct ReceiverCore {
    payload_size_max: usize,
    buffer: ReassemblyBuffer,
    // Always-allocated reply record
    send_buffer: Box<[u8]>,
    finished: bool,
    bytes_written: u64,
    acks_sent: u64,
}

impl ReceiverCore {
    pub fn new(payload_size_max: usize) -> Self {
        Self {
            payload_size_max,
            buffer: ReassemblyBuffer::new(),
            send_buffer: vec![0; serial::record_size(payload_size_max)].into_boxed_slice(),
            finished: false,
            bytes_written: 0,
            acks_sent: 0,
        }
    }

    /// Processes one inbound datagram.
    ///
    /// DATA is buffered and everything contiguous is written to `sink`. Every well-formed
    /// datagram is accepted as the reply target and answered with a cumulative ACK; a FIN is
    /// additionally answered with [`FIN_REPEAT_COUNT`] FIN packets. Malformed datagrams are
    /// dropped without reply, as is anything arriving after the FIN.
    pub fn handle_frame<W, T>(&mut self, frame_bytes: &[u8], sink: &mut W, tx: &mut T) -> Result<Status>
    where
        W: Write + ?Sized,
        T: DatagramTx + ?Sized,
    {
        if self.finished {
            return Ok(Status::Finished);
        }

        let Some(packet) = Packet::from_record(frame_bytes, self.payload_size_max) else {
            log::warn!("discarding malformed datagram ({} bytes)", frame_bytes.len());
            return Ok(Status::Receiving);
        };

        log::trace!("-> {:?} {}", packet.kind, packet.sequence_number);

        tx.accept_source();

        let kind = packet.kind;

        if kind.contains(PacketKind::DATA) {
            self.buffer.accept(packet);

            let ref mut bytes_written = self.bytes_written;

            let delivered = self
                .buffer
                .drain(|payload| -> io::Result<()> {
                    sink.write_all(payload)?;
                    *bytes_written += payload.len() as u64;
                    Ok(())
                })
                .map_err(Error::Sink)?;

            if delivered > 0 {
                log::trace!("delivered {} packets", delivered);
            }
        }

        let ack_value = self.buffer.ack_value();

        self.send_control(&Packet::ack(ack_value), tx)?;
        self.acks_sent += 1;

        if kind.contains(PacketKind::FIN) {
            log::debug!("FIN received at {}, closing", ack_value);

            for _ in 0..FIN_REPEAT_COUNT {
                self.send_control(&Packet::fin(ack_value), tx)?;
            }

            self.finished = true;
            return Ok(Status::Finished);
        }

        Ok(Status::Receiving)
    }

    fn send_control<T>(&mut self, packet: &Packet, tx: &mut T) -> Result<()>
    where
        T: DatagramTx + ?Sized,
    {
        let len = packet.write_record(&mut self.send_buffer, self.payload_size_max)?;

        log::trace!("<- {:?} {}", packet.kind, packet.sequence_number);

        tx.send(&self.send_buffer[..len]).map_err(Error::Transport)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Cumulative ACK value: every packet below this has been written to the sink.
    pub fn ack_value(&self) -> u64 {
        self.buffer.ack_value()
    }

    pub fn report(&self) -> ReceiveReport {
        ReceiveReport {
            bytes_written: self.bytes_written,
            packets_delivered: self.buffer.delivered_count(),
            duplicates_discarded: self.buffer.discarded_count(),
            acks_sent: self.acks_sent,
        }
    }
}

/// Receiving end of a transfer.
pub struct Receiver<T, C = SystemClock> {
    transport: T,
    clock: C,
    idle_timeout_ms: Option<u64>,
    core: ReceiverCore,
    // Always-allocated receive buffer, one byte longer than a record so that oversized datagrams
    // are not truncated into something valid
    recv_buffer: Box<[u8]>,
}

impl Receiver<socket::ListeningSocket> {
    /// Binds a UDP socket to the provided address and returns a receiver waiting on it.
    pub fn bind<A>(bind_address: A, config: Config) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        config.validate()?;

        let socket = socket::ListeningSocket::bind(bind_address).map_err(Error::Transport)?;

        Self::with_transport(socket, SystemClock::new(), config)
    }

    /// Returns the local address of the internal UDP socket.
    pub fn local_addr(&self) -> net::SocketAddr {
        self.transport.local_addr()
    }
}

impl<T, C> Receiver<T, C>
where
    T: DatagramTx + DatagramRx,
    C: Clock,
{
    pub fn with_transport(transport: T, clock: C, config: Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            transport,
            clock,
            idle_timeout_ms: config.idle_timeout_ms,
            core: ReceiverCore::new(config.payload_size_max),
            recv_buffer: vec![0; serial::record_size(config.payload_size_max) + 1]
                .into_boxed_slice(),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Receives until the sender's FIN, writing the reassembled stream to `sink`.
    pub fn run<W>(&mut self, mut sink: W) -> Result<ReceiveReport>
    where
        W: Write,
    {
        let mut idle_timer = Timer::default();
        let mut last_heard_ms = self.clock.now_ms();

        if let Some(timeout_ms) = self.idle_timeout_ms {
            idle_timer.set(last_heard_ms + timeout_ms);
        }

        while !self.core.is_finished() {
            let now_ms = self.clock.now_ms();

            if idle_timer.expired(now_ms) {
                return Err(Error::Timeout {
                    elapsed_ms: now_ms - last_heard_ms,
                });
            }

            let wait_timeout = idle_timer.remaining(now_ms);

            let received = self
                .transport
                .wait_for_datagram(&mut self.recv_buffer, wait_timeout)
                .map_err(Error::Transport)?;

            if let Some(len) = received {
                last_heard_ms = self.clock.now_ms();

                if let Some(timeout_ms) = self.idle_timeout_ms {
                    idle_timer.set(last_heard_ms + timeout_ms);
                }

                let frame_bytes = &self.recv_buffer[..len];

                self.core
                    .handle_frame(frame_bytes, &mut sink, &mut self.transport)?;
            }
        }

        sink.flush().map_err(Error::Sink)?;

        let report = self.core.report();

        log::info!(
            "received {} bytes in {} packets ({} duplicates, {} acks sent)",
            report.bytes_written,
            report.packets_delivered,
            report.duplicates_discarded,
            report.acks_sent
        );

        Ok(report)
    }
}

/// Listens on `port` on all interfaces and writes the received stream to `path`. The file is
/// removed again if the transfer fails.
pub fn receive_file<P>(port: u16, path: P, config: Config) -> Result<ReceiveReport>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let mut receiver = Receiver::bind((net::Ipv4Addr::UNSPECIFIED, port), config)?;

    let file = fs::File::create(path).map_err(|source| Error::File {
        path: path.to_owned(),
        source,
    })?;

    log::info!(
        "receiving {} on {}",
        path.display(),
        receiver.local_addr()
    );

    let result = receiver.run(io::BufWriter::new(file));

    if result.is_err() {
        if let Err(err) = fs::remove_file(path) {
            log::warn!("failed to remove {}: {}", path.display(), err);
        }
    }

    result
}
