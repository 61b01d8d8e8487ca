use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Sends the first BYTES bytes of FILE to an rdt receiver.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Receiver host name or address.
    host: String,

    /// Receiver UDP port.
    port: u16,

    /// File to send.
    file: PathBuf,

    /// Number of bytes to send from the start of FILE.
    bytes: u64,

    /// Largest payload per packet, in bytes. Must match the receiver.
    #[arg(long, default_value_t = rdt::MAX_PACKET_SIZE)]
    payload_size: usize,

    /// Retransmission timeout, in milliseconds.
    #[arg(long, default_value_t = 500)]
    rto_ms: u64,

    /// Initial slow start threshold, in packets.
    #[arg(long, default_value_t = 64)]
    initial_threshold: u32,

    /// Give up after this long without hearing from the receiver, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    connection_timeout_ms: u64,
}

fn main() -> ExitCode {
    // RUST_LOG controls verbosity
    env_logger::init();

    let args = Args::parse();

    let config = rdt::sender::Config {
        payload_size_max: args.payload_size,
        retransmission_timeout_ms: args.rto_ms,
        initial_threshold: args.initial_threshold,
        connection_timeout_ms: args.connection_timeout_ms,
        ..Default::default()
    };

    match rdt::send_file((args.host.as_str(), args.port), &args.file, args.bytes, config) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
