use super::*;

pub const RECORD_KIND_SIZE: usize = 1;
pub const RECORD_SEQUENCE_SIZE: usize = 8;
pub const RECORD_LENGTH_SIZE: usize = 2;
pub const RECORD_HEADER_SIZE: usize = RECORD_KIND_SIZE + RECORD_SEQUENCE_SIZE + RECORD_LENGTH_SIZE;

/// Largest payload length representable in the record header.
pub const PAYLOAD_SIZE_LIMIT: usize = u16::MAX as usize;

/// Reads big-endian integers from the front of a byte slice. Callers verify the slice is long
/// enough before reading.
pub struct Reader<'a> {
    buffer: &'a [u8],
    bytes_read: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut bytes = [0; N];
        bytes.copy_from_slice(&self.buffer[self.bytes_read..self.bytes_read + N]);
        self.bytes_read += N;
        bytes
    }

    pub fn read_u8(&mut self) -> u8 {
        u8::from_be_bytes(self.take())
    }

    pub fn read_u16(&mut self) -> u16 {
        u16::from_be_bytes(self.take())
    }

    pub fn read_u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take())
    }

    pub fn read_slice(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.buffer[self.bytes_read..self.bytes_read + len];
        self.bytes_read += len;
        slice
    }
}

/// Writes big-endian integers to the front of a byte slice. Callers verify the slice is long
/// enough before writing.
pub struct Writer<'a> {
    buffer: &'a mut [u8],
    bytes_written: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn write_slice(&mut self, bytes: &[u8]) {
        self.buffer[self.bytes_written..self.bytes_written + bytes.len()].copy_from_slice(bytes);
        self.bytes_written += bytes.len();
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_slice(&value.to_be_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_slice(&value.to_be_bytes());
    }
}

/// Size of a complete wire record for the given maximum payload size.
pub const fn record_size(payload_size_max: usize) -> usize {
    RECORD_HEADER_SIZE + payload_size_max
}

/// Encodes a packet into a zero-padded record of exactly `record_size(payload_size_max)` bytes.
/// Returns `None` if `buffer` has the wrong size or the payload does not fit.
pub fn write_record(buffer: &mut [u8], packet: &Packet, payload_size_max: usize) -> Option<usize> {
    let size = record_size(payload_size_max);

    if buffer.len() != size || packet.payload.len() > payload_size_max.min(PAYLOAD_SIZE_LIMIT) {
        return None;
    }

    let mut wr = Writer::new(buffer);

    wr.write_u8(packet.kind.bits());
    wr.write_u64(packet.sequence_number);
    wr.write_u16(packet.payload.len() as u16);

    debug_assert_eq!(wr.bytes_written(), RECORD_HEADER_SIZE);

    wr.write_slice(&packet.payload);

    // Padding must not leak whatever the buffer held before
    let padding_begin = wr.bytes_written();
    buffer[padding_begin..].fill(0);

    Some(size)
}

/// Decodes a record. Anything other than a well-formed record of exactly the expected size is
/// rejected.
pub fn read_record(record: &[u8], payload_size_max: usize) -> Option<Packet> {
    if record.len() != record_size(payload_size_max) {
        return None;
    }

    let mut rd = Reader::new(record);

    let kind = PacketKind::from_bits(rd.read_u8())?;
    let sequence_number = rd.read_u64();
    let payload_len = rd.read_u16() as usize;

    debug_assert_eq!(rd.bytes_read(), RECORD_HEADER_SIZE);

    if payload_len > payload_size_max {
        return None;
    }

    let payload = rd.read_slice(payload_len).into();

    Some(Packet {
        sequence_number,
        kind,
        payload,
    })
}
