pub mod serial;

use std::cmp::Ordering;
use std::fmt;
use std::ops::BitOr;

use super::error::{Error, Result};

/// Set of packet kind flags. The protocol only ever sets exactly one flag per packet, but the wire
/// format permits combinations.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct PacketKind(u8);

impl PacketKind {
    pub const DATA: Self = Self(1 << 1);
    pub const ACK: Self = Self(1 << 2);
    pub const FIN: Self = Self(1 << 3);

    const ALL_BITS: u8 = Self::DATA.0 | Self::ACK.0 | Self::FIN.0;

    /// Returns `None` for an empty set or for any unknown bit.
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits == 0 || bits & !Self::ALL_BITS != 0 {
            return None;
        }

        Some(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PacketKind {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = [(Self::DATA, "DATA"), (Self::ACK, "ACK"), (Self::FIN, "FIN")];

        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        if first {
            f.write_str("(empty)")?;
        }

        Ok(())
    }
}

/// The unit of exchange between sender and receiver.
///
/// For DATA packets `sequence_number` is the zero-based index of the file chunk carried in
/// `payload`. For ACK packets it is the cumulative acknowledgement: the next sequence number the
/// receiver expects.
///
/// Equality and ordering consider `sequence_number` only.
#[derive(Clone, Debug)]
pub struct Packet {
    pub sequence_number: u64,
    pub kind: PacketKind,
    pub payload: Box<[u8]>,
}

impl Packet {
    pub fn data(sequence_number: u64, payload: Box<[u8]>) -> Self {
        Self {
            sequence_number,
            kind: PacketKind::DATA,
            payload,
        }
    }

    pub fn ack(ack_value: u64) -> Self {
        Self {
            sequence_number: ack_value,
            kind: PacketKind::ACK,
            payload: Box::default(),
        }
    }

    pub fn fin(sequence_number: u64) -> Self {
        Self {
            sequence_number,
            kind: PacketKind::FIN,
            payload: Box::default(),
        }
    }

    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }

    /// Encodes this packet as a freshly allocated wire record. Returns `None` if the payload
    /// exceeds `payload_size_max`.
    pub fn to_record(&self, payload_size_max: usize) -> Option<Box<[u8]>> {
        let mut buffer = vec![0; serial::record_size(payload_size_max)].into_boxed_slice();
        serial::write_record(&mut buffer, self, payload_size_max)?;
        Some(buffer)
    }

    /// Encodes this packet into `buffer`, which must be exactly one record long. Returns the
    /// number of bytes written.
    pub fn write_record(&self, buffer: &mut [u8], payload_size_max: usize) -> Result<usize> {
        serial::write_record(buffer, self, payload_size_max).ok_or(Error::Encode {
            sequence_number: self.sequence_number,
            payload_len: self.payload.len(),
        })
    }

    /// Decodes a wire record, see [`serial::read_record`].
    pub fn from_record(record: &[u8], payload_size_max: usize) -> Option<Self> {
        serial::read_record(record, payload_size_max)
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.sequence_number == other.sequence_number
    }
}

impl Eq for Packet {}

impl PartialOrd for Packet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Packet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence_number.cmp(&other.sequence_number)
    }
}
