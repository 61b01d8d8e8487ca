use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::net;
use std::path::Path;
use std::time;

use super::cc::{AckKind, CongestionController, Mode};
use super::error::{Error, Result};
use super::packet::{serial, Packet, PacketKind};
use super::socket::{self, DatagramRx, DatagramTx};
use super::time::{Clock, SystemClock, Timer};
use super::{validate_payload_size_max, FIN_REPEAT_COUNT, MAX_PACKET_SIZE};

const RETRANSMISSION_TIMEOUT_DEFAULT_MS: u64 = 500;

const INITIAL_WINDOW_DEFAULT: u32 = 1;
const INITIAL_THRESHOLD_DEFAULT: u32 = 64;

const CONNECTION_TIMEOUT_DEFAULT_MS: u64 = 10_000;

/// Configuration for a [`Sender`] object.
#[derive(Clone, Debug)]
pub struct Config {
    /// Largest payload carried by a single packet, in bytes. Must match the receiver.
    ///
    /// Maximum value: 1,461 \
    /// Default value: 1,000
    pub payload_size_max: usize,

    /// Time without a new ACK after which the oldest unacknowledged packet is considered lost, in
    /// milliseconds.
    ///
    /// Default value: 500
    pub retransmission_timeout_ms: u64,

    /// Congestion window at the start of the transfer, in packets.
    ///
    /// Minimum value: 1 \
    /// Default value: 1
    pub initial_window: u32,

    /// Slow start threshold at the start of the transfer, in packets.
    ///
    /// Default value: 64
    pub initial_threshold: u32,

    /// Time without any reply from the receiver after which the transfer is abandoned, in
    /// milliseconds. Must be at least `retransmission_timeout_ms`.
    ///
    /// Default value: 10,000
    pub connection_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payload_size_max: MAX_PACKET_SIZE,
            retransmission_timeout_ms: RETRANSMISSION_TIMEOUT_DEFAULT_MS,
            initial_window: INITIAL_WINDOW_DEFAULT,
            initial_threshold: INITIAL_THRESHOLD_DEFAULT,
            connection_timeout_ms: CONNECTION_TIMEOUT_DEFAULT_MS,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        validate_payload_size_max(self.payload_size_max)?;

        if self.retransmission_timeout_ms == 0 {
            return Err(Error::InvalidConfig("retransmission_timeout_ms == 0"));
        }
        if self.initial_window == 0 {
            return Err(Error::InvalidConfig("initial_window == 0"));
        }
        if self.connection_timeout_ms < self.retransmission_timeout_ms {
            return Err(Error::InvalidConfig(
                "connection_timeout_ms < retransmission_timeout_ms",
            ));
        }

        Ok(())
    }
}

/// Summary of a completed send.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SendReport {
    pub packet_count: u64,
    pub bytes_sent: u64,
    /// DATA packets sent, retransmissions included.
    pub transmissions: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub fast_recoveries: u64,
    pub duplicate_acks: u64,
    /// Whether the receiver answered the FIN. The data was delivered either way.
    pub fin_acknowledged: bool,
    pub elapsed_ms: u64,
}

struct Transfer<R> {
    cc: CongestionController,
    source: io::Take<R>,
    // Sent at least once and not yet acknowledged, keyed by sequence number
    unacked: BTreeMap<u64, Packet>,
    // Pending RTO timer event
    rto_timer: Timer,
    // Time of the most recent datagram from the receiver
    last_heard_ms: u64,
    report: SendReport,
}

impl<R> Transfer<R>
where
    R: Read,
{
    /// Reads the chunk for `seq`. Returns `None` once the source is exhausted.
    fn read_chunk(&mut self, seq: u64, payload_size_max: usize) -> Result<Option<Packet>> {
        let mut chunk = Vec::with_capacity(payload_size_max);

        (&mut self.source)
            .take(payload_size_max as u64)
            .read_to_end(&mut chunk)
            .map_err(Error::Source)?;

        if chunk.is_empty() {
            return Ok(None);
        }

        self.report.bytes_sent += chunk.len() as u64;

        Ok(Some(Packet::data(seq, chunk.into_boxed_slice())))
    }
}

/// Sending end of a transfer.
pub struct Sender<T, C = SystemClock> {
    config: Config,
    transport: T,
    clock: C,
    // Always-allocated outbound record
    send_buffer: Box<[u8]>,
    // Always-allocated receive buffer, one byte longer than a record so that oversized datagrams
    // are not truncated into something valid
    recv_buffer: Box<[u8]>,
}

impl Sender<socket::ConnectedSocket> {
    /// Binds a UDP socket to an ephemeral address and directs it at the receiver at the provided
    /// address. Nothing is sent until [`Sender::run`] is called.
    pub fn connect<A>(receiver_addr: A, config: Config) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        config.validate()?;

        let socket = socket::ConnectedSocket::connect(receiver_addr).map_err(Error::Transport)?;

        Self::with_transport(socket, SystemClock::new(), config)
    }

    /// Returns the local address of the internal UDP socket.
    pub fn local_addr(&self) -> net::SocketAddr {
        self.transport.local_addr()
    }

    /// Returns the receiver address for this transfer.
    pub fn receiver_addr(&self) -> net::SocketAddr {
        self.transport.peer_addr()
    }
}

impl<T, C> Sender<T, C>
where
    T: DatagramTx + DatagramRx,
    C: Clock,
{
    pub fn with_transport(transport: T, clock: C, config: Config) -> Result<Self> {
        config.validate()?;

        let record_size = serial::record_size(config.payload_size_max);

        Ok(Self {
            config,
            transport,
            clock,
            send_buffer: vec![0; record_size].into_boxed_slice(),
            recv_buffer: vec![0; record_size + 1].into_boxed_slice(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Transfers the first `byte_count` bytes of `source`, returning once every packet has been
    /// acknowledged and the FIN exchange has finished. If `source` ends early, only what it
    /// produced is transferred.
    pub fn run<R>(&mut self, source: R, byte_count: u64) -> Result<SendReport>
    where
        R: Read,
    {
        let payload_size_max = self.config.payload_size_max;
        let packet_count = byte_count.div_ceil(payload_size_max as u64);

        let start_ms = self.clock.now_ms();

        let mut transfer = Transfer {
            cc: CongestionController::new(
                self.config.initial_window,
                self.config.initial_threshold,
                packet_count,
            ),
            source: source.take(byte_count),
            unacked: BTreeMap::new(),
            rto_timer: Timer::default(),
            last_heard_ms: start_ms,
            report: SendReport::default(),
        };

        log::info!("sending {} bytes in {} packets", byte_count, packet_count);

        while !transfer.cc.is_complete() {
            let silent_ms = self.clock.now_ms() - transfer.last_heard_ms;

            if silent_ms >= self.config.connection_timeout_ms {
                return Err(Error::Timeout {
                    elapsed_ms: silent_ms,
                });
            }

            self.send_new_packets(&mut transfer)?;

            if transfer.cc.is_complete() {
                // Source ended before anything remained in flight
                break;
            }

            self.send_retransmissions(&mut transfer)?;

            let now_ms = self.clock.now_ms();

            let connection_remaining = time::Duration::from_millis(
                self.config
                    .connection_timeout_ms
                    .saturating_sub(now_ms - transfer.last_heard_ms),
            );

            let wait_timeout = match transfer.rto_timer.remaining(now_ms) {
                Some(rto_remaining) => rto_remaining.min(connection_remaining),
                None => connection_remaining,
            };

            let received = self
                .transport
                .wait_for_datagram(&mut self.recv_buffer, Some(wait_timeout))
                .map_err(Error::Transport)?;

            if let Some(len) = received {
                self.handle_frame(len, &mut transfer);
            }

            let now_ms = self.clock.now_ms();

            if transfer.rto_timer.expired(now_ms) {
                transfer.report.timeouts += 1;

                transfer.cc.on_timeout();

                log::debug!(
                    "timeout at base {}, window {:.2} threshold {:.2}",
                    transfer.cc.base_sequence(),
                    transfer.cc.window_size(),
                    transfer.cc.slow_start_threshold()
                );

                transfer.rto_timer.set(now_ms + self.config.retransmission_timeout_ms);
            }
        }

        transfer.report.packet_count = transfer.cc.packet_count();

        log::debug!("all {} packets acknowledged", transfer.report.packet_count);

        transfer.report.fin_acknowledged = self.finish(transfer.report.packet_count)?;

        if !transfer.report.fin_acknowledged {
            log::warn!("no FIN reply from receiver");
        }

        transfer.report.elapsed_ms = self.clock.now_ms() - start_ms;

        let report = transfer.report;

        log::info!(
            "sent {} bytes in {} packets ({} retransmissions, {} timeouts, {} fast recoveries) in {} ms",
            report.bytes_sent,
            report.packet_count,
            report.retransmissions,
            report.timeouts,
            report.fast_recoveries,
            report.elapsed_ms
        );

        Ok(report)
    }

    fn send_new_packets<R>(&mut self, transfer: &mut Transfer<R>) -> Result<()>
    where
        R: Read,
    {
        for seq in transfer.cc.packets_eligible_for_send() {
            if transfer.cc.was_sent(seq) {
                // Sent before a timeout pulled the window back
                if let Some(packet) = transfer.unacked.get(&seq) {
                    log::trace!("resending {}", seq);

                    self.send_packet(packet)?;

                    transfer.report.retransmissions += 1;
                }
            } else {
                let Some(packet) = transfer.read_chunk(seq, self.config.payload_size_max)? else {
                    log::debug!("source ended after {} packets", seq);
                    transfer.cc.truncate(seq);
                    break;
                };

                self.send_packet(&packet)?;

                transfer.unacked.insert(seq, packet);
            }

            transfer.cc.mark_sent(seq);
            transfer.report.transmissions += 1;

            if !transfer.rto_timer.is_set() {
                let now_ms = self.clock.now_ms();
                transfer.rto_timer.set(now_ms + self.config.retransmission_timeout_ms);
            }
        }

        Ok(())
    }

    fn send_retransmissions<R>(&mut self, transfer: &mut Transfer<R>) -> Result<()> {
        while let Some(seq) = transfer.cc.pop_retransmit() {
            if let Some(packet) = transfer.unacked.get(&seq) {
                log::debug!("retransmitting {}", seq);

                self.send_packet(packet)?;

                transfer.report.transmissions += 1;
                transfer.report.retransmissions += 1;
            }
        }

        Ok(())
    }

    fn handle_frame<R>(&self, len: usize, transfer: &mut Transfer<R>) {
        let frame_bytes = &self.recv_buffer[..len];

        let Some(packet) = Packet::from_record(frame_bytes, self.config.payload_size_max) else {
            log::warn!("discarding malformed datagram ({} bytes)", len);
            return;
        };

        log::trace!("-> {:?} {}", packet.kind, packet.sequence_number);

        let now_ms = self.clock.now_ms();

        transfer.last_heard_ms = now_ms;

        if !packet.kind.contains(PacketKind::ACK) {
            return;
        }

        let ack_seq = packet.sequence_number;
        let mode_before = transfer.cc.mode();

        match transfer.cc.on_ack(ack_seq) {
            AckKind::New => {
                // Release everything below the cumulative ACK
                transfer.unacked = transfer.unacked.split_off(&ack_seq);

                if transfer.cc.has_in_flight() {
                    transfer.rto_timer.set(now_ms + self.config.retransmission_timeout_ms);
                } else {
                    transfer.rto_timer.unset();
                }

                if transfer.cc.mode() != mode_before {
                    log::debug!(
                        "{:?} -> {:?}, window {:.2}",
                        mode_before,
                        transfer.cc.mode(),
                        transfer.cc.window_size()
                    );
                }
            }
            AckKind::Duplicate => {
                transfer.report.duplicate_acks += 1;

                if transfer.cc.mode() == Mode::FastRecovery && mode_before != Mode::FastRecovery {
                    transfer.report.fast_recoveries += 1;

                    log::debug!(
                        "fast recovery at {}, window {:.2} threshold {:.2}",
                        ack_seq,
                        transfer.cc.window_size(),
                        transfer.cc.slow_start_threshold()
                    );
                }
            }
            AckKind::Ignored => {
                log::trace!("ignoring ack {}", ack_seq);
            }
        }
    }

    /// Best-effort close: sends FIN up to [`FIN_REPEAT_COUNT`] times, one retransmission timeout
    /// apart, until the receiver answers with a FIN of its own.
    fn finish(&mut self, fin_seq: u64) -> Result<bool> {
        let fin = Packet::fin(fin_seq);

        for _ in 0..FIN_REPEAT_COUNT {
            self.send_packet(&fin)?;

            let mut timer = Timer::default();
            timer.set(self.clock.now_ms() + self.config.retransmission_timeout_ms);

            loop {
                let now_ms = self.clock.now_ms();

                if timer.expired(now_ms) {
                    break;
                }

                let received = self
                    .transport
                    .wait_for_datagram(&mut self.recv_buffer, timer.remaining(now_ms))
                    .map_err(Error::Transport)?;

                if let Some(len) = received {
                    let reply = Packet::from_record(
                        &self.recv_buffer[..len],
                        self.config.payload_size_max,
                    );

                    if reply.is_some_and(|packet| packet.kind.contains(PacketKind::FIN)) {
                        log::debug!("FIN answered");
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let len = packet.write_record(&mut self.send_buffer, self.config.payload_size_max)?;

        log::trace!("<- {:?} {}", packet.kind, packet.sequence_number);

        self.transport
            .send(&self.send_buffer[..len])
            .map_err(Error::Transport)
    }
}

/// Sends the first `byte_count` bytes of the file at `path` to the receiver at `receiver_addr`.
pub fn send_file<A, P>(
    receiver_addr: A,
    path: P,
    byte_count: u64,
    config: Config,
) -> Result<SendReport>
where
    A: net::ToSocketAddrs,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let file = fs::File::open(path).map_err(|source| Error::File {
        path: path.to_owned(),
        source,
    })?;

    let mut sender = Sender::connect(receiver_addr, config)?;

    log::info!(
        "sending {} to {} from {}",
        path.display(),
        sender.receiver_addr(),
        sender.local_addr()
    );

    sender.run(io::BufReader::new(file), byte_count)
}
