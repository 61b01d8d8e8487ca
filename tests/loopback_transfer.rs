#[allow(dead_code)]
mod common;

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("rdt-{}-{}", std::process::id(), name))
}

#[test]
fn loopback_transfer() {
    common::init_logging();

    let receiver_port = 10101;

    let source = common::random_bytes(345_678, 11);
    let byte_count = source.len() as u64;

    // Bound before the sender starts so that nothing is refused
    let mut receiver = rdt::Receiver::bind(("127.0.0.1", receiver_port), Default::default())
        .expect("failed to create rdt receiver");

    let receive_thread = thread::spawn(move || {
        let mut output = Vec::new();
        let report = receiver.run(&mut output).unwrap();
        (report, output)
    });

    let mut sender = rdt::Sender::connect(("127.0.0.1", receiver_port), Default::default())
        .expect("failed to create rdt sender");

    let send_report = sender.run(&source[..], byte_count).unwrap();

    let (receive_report, output) = receive_thread.join().unwrap();

    assert_eq!(send_report.packet_count, 346);
    assert_eq!(send_report.bytes_sent, byte_count);
    assert_eq!(receive_report.bytes_written, byte_count);
    assert_eq!(receive_report.packets_delivered, 346);

    assert_eq!(md5::compute(&output), md5::compute(&source));
}

#[test]
fn loopback_file_transfer() {
    common::init_logging();

    let receiver_port = 10102;

    let source_path = temp_path("loopback-source");
    let output_path = temp_path("loopback-output");

    let source = common::random_bytes(50_000, 12);
    fs::write(&source_path, &source).unwrap();

    let receive_path = output_path.clone();
    let receive_config = rdt::receiver::Config {
        idle_timeout_ms: Some(10_000),
        ..Default::default()
    };
    let receive_thread = thread::spawn(move || {
        rdt::receive_file(receiver_port, receive_path, receive_config)
    });

    // A sender which starts early only loses its first datagrams
    thread::sleep(time::Duration::from_millis(100));

    // Only part of the file
    let send_report = rdt::send_file(
        ("127.0.0.1", receiver_port),
        &source_path,
        40_500,
        Default::default(),
    )
    .unwrap();

    let receive_report = receive_thread.join().unwrap().unwrap();

    assert_eq!(send_report.packet_count, 41);
    assert_eq!(receive_report.bytes_written, 40_500);

    let output = fs::read(&output_path).unwrap();
    assert_eq!(md5::compute(&output), md5::compute(&source[..40_500]));

    fs::remove_file(&source_path).unwrap();
    fs::remove_file(&output_path).unwrap();
}

#[test]
fn failed_receive_leaves_no_file() {
    common::init_logging();

    let receiver_port = 10103;

    let output_path = temp_path("idle-output");

    let config = rdt::receiver::Config {
        idle_timeout_ms: Some(200),
        ..Default::default()
    };

    let result = rdt::receive_file(receiver_port, &output_path, config);

    assert!(matches!(result, Err(rdt::Error::Timeout { .. })));
    assert!(!output_path.exists());
}

#[test]
fn no_receiver() {
    common::init_logging();

    // Nothing listens here; refusals count as loss until the connection times out
    let config = rdt::sender::Config {
        retransmission_timeout_ms: 100,
        connection_timeout_ms: 500,
        ..Default::default()
    };

    let mut sender = rdt::Sender::connect(("127.0.0.1", 10104), config)
        .expect("failed to create rdt sender");

    let begin = time::Instant::now();
    let result = sender.run(&[0u8; 5_000][..], 5_000);

    assert!(matches!(result, Err(rdt::Error::Timeout { .. })));
    assert!(begin.elapsed() >= time::Duration::from_millis(500));
}
