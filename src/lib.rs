/*

https://intronetworks.cs.luc.edu/current/html/reno.html

rdt transfers a single file, in one direction, over UDP. There is no connection handshake: the
sender starts streaming DATA packets immediately, and the receiver replies to whichever address
sent the most recent well-formed datagram.

# Packets

Every datagram is a fixed-size record of 11 header bytes plus `payload_size_max` payload bytes:

  [kind u8][sequence_number u64][payload_length u16][payload, zero padded]

Integers are big-endian. The kind byte is a set of flags (DATA = 0x02, ACK = 0x04, FIN = 0x08). A
datagram of any other length, an empty or unknown kind, or a payload length beyond the maximum is
dropped on receipt as if it had been lost.

DATA sequence numbers index file chunks: chunk N holds bytes [N * payload_size_max,
(N + 1) * payload_size_max). ACK sequence numbers are cumulative: the next chunk the receiver
needs.

# Congestion window

The sender follows TCP Reno. In slow start, each newly acknowledged packet increases cwnd by:

  cwnd <- cwnd + 1

Once cwnd reaches ssthresh, congestion avoidance takes over, and each newly acknowledged packet
increases cwnd by:

  cwnd <- cwnd + 1/floor(cwnd)

Three duplicate ACKs signal a lost packet. The window is halved and inflated by the three packets
known to have left the network, and the lost packet (the window base) is resent:

  ssthresh <- cwnd / 2
  cwnd <- ssthresh + 3

In fast recovery, each further duplicate inflates cwnd by one and schedules the base again. The
first new ACK deflates cwnd back to ssthresh and resumes congestion avoidance.

Whenever the retransmission timer expires (no new ACK for 1 RTO), the base is resent and:

  ssthresh <- cwnd / 2
  cwnd <- 1

The right edge of the in-flight window is pulled back to base + 1. Packets beyond it which were
already sent are resent from the unacknowledged set as slow start reopens the window, so a burst of
losses costs a single timeout.

# Reordering

The receiver holds packets in a min-heap and delivers them once the gap before them fills:

next
v
_ b c _ _ => _ b c _ _  hold b, c; ack a

next
v
a b c _ _ => _ _ _ _ _  deliver a, b, c; ack d

Repeats are discarded, whether they arrive after delivery or sit in the heap alongside the
original. Every well-formed datagram is acknowledged, so a repeat of an old packet produces a
duplicate ACK.

# Termination

Once every packet is acknowledged, the sender sends a FIN carrying the packet count and waits one
RTO for a reply, up to three times. The receiver answers a FIN with its final ACK followed by three
FINs, since any one of them may be lost, and stops. The exchange is best-effort: a sender that
hears nothing back still reports success, as all data was acknowledged.

*/

pub mod cc;
pub mod error;
pub mod packet;
pub mod reassembly;
pub mod receiver;
pub mod sender;
pub mod socket;
pub mod time;

pub use error::{Error, Result};
pub use packet::{Packet, PacketKind};
pub use receiver::{receive_file, ReceiveReport, Receiver};
pub use sender::{send_file, SendReport, Sender};

/// Default largest payload carried by one packet, in bytes.
pub const MAX_PACKET_SIZE: usize = 1000;

/// Number of FIN packets the receiver sends in reply, and the number of FIN attempts the sender
/// makes.
pub const FIN_REPEAT_COUNT: usize = 3;

fn validate_payload_size_max(payload_size_max: usize) -> Result<()> {
    if payload_size_max == 0 {
        return Err(Error::InvalidConfig("payload_size_max == 0"));
    }

    if packet::serial::record_size(payload_size_max) > socket::FRAME_SIZE_MAX {
        return Err(Error::InvalidConfig(
            "payload_size_max too large for a single datagram",
        ));
    }

    Ok(())
}
