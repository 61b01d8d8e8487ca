use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Receives a file from an rdt sender and writes it to FILE.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// UDP port to listen on.
    port: u16,

    /// Destination file. Removed again if the transfer fails.
    file: PathBuf,

    /// Largest payload per packet, in bytes. Must match the sender.
    #[arg(long, default_value_t = rdt::MAX_PACKET_SIZE)]
    payload_size: usize,

    /// Give up after this long without a datagram, in milliseconds. Waits forever if omitted.
    #[arg(long)]
    idle_timeout_ms: Option<u64>,
}

fn main() -> ExitCode {
    // RUST_LOG controls verbosity
    env_logger::init();

    let args = Args::parse();

    let config = rdt::receiver::Config {
        payload_size_max: args.payload_size,
        idle_timeout_ms: args.idle_timeout_ms,
    };

    match rdt::receive_file(args.port, &args.file, config) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
