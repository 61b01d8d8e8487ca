use std::io;
use std::path::PathBuf;

/// Errors which abort a transfer.
///
/// Lost, reordered, duplicated or malformed datagrams are not errors; they are handled by the
/// protocol. Likewise a retransmission timeout is an ordinary event.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket creation, bind, send or receive failed.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// The source or destination file could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading from the data source failed mid-transfer.
    #[error("failed to read source data: {0}")]
    Source(#[source] io::Error),

    /// Writing to the output failed.
    #[error("failed to write output: {0}")]
    Sink(#[source] io::Error),

    /// The peer was silent for longer than the configured timeout.
    #[error("peer silent for {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A packet did not fit the configured record size. Indicates a bug, not a network fault.
    #[error("packet {sequence_number} with {payload_len} byte payload does not fit in a record")]
    Encode {
        sequence_number: u64,
        payload_len: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
