use std::{
    io::{Read, Write},
    thread,
    time::{Duration, Instant},
};

use rand::Rng;
use shaper::{pipe, RateOptions, RateShaper, Streams};

#[test]
fn rate_limited_writer_real_time() {
    let _ = tracing_subscriber::fmt::try_init();

    // 500 bytes every 10ms.
    let (tx, mut rx) = pipe(64 * 1024);
    let mut writer = Streams::rate_limited_writer(tx, 50_000.0, RateOptions::default()).unwrap();
    assert_eq!(writer.byte_rate(), 500);

    let mut payload = vec![0u8; 10_000];
    rand::thread_rng().fill(&mut payload[..]);

    let start = Instant::now();
    writer.write_all(&payload).unwrap();
    let elapsed = start.elapsed();

    // 500 bytes are available immediately, the remaining 9500 take 19 ticks.
    assert!(elapsed >= Duration::from_millis(150), "took only {elapsed:?}");

    writer.close().unwrap();

    let mut received = Vec::new();
    rx.read_to_end(&mut received).unwrap();
    assert_eq!(received, payload);
}

#[test]
fn rate_limited_reader_real_time() {
    let _ = tracing_subscriber::fmt::try_init();

    let (mut tx, rx) = pipe(64 * 1024);

    let mut payload = vec![0u8; 4_000];
    rand::thread_rng().fill(&mut payload[..]);

    let producer = {
        let payload = payload.clone();
        thread::spawn(move || {
            tx.write_all(&payload).unwrap();
        })
    };

    let mut reader = Streams::rate_limited_reader(rx, 20_000.0, RateOptions::default()).unwrap();
    assert_eq!(reader.byte_rate(), 200);

    let start = Instant::now();
    let mut received = Vec::new();
    reader.read_to_end(&mut received).unwrap();
    let elapsed = start.elapsed();

    producer.join().unwrap();

    // 200 bytes every 10ms.
    assert!(elapsed >= Duration::from_millis(150), "took only {elapsed:?}");
    assert_eq!(received, payload);
}

#[test]
fn rate_change_takes_effect() {
    let (tx, mut rx) = pipe(64 * 1024);
    let mut writer = Streams::rate_limited_writer(tx, 1_000.0, RateOptions::default()).unwrap();

    // 10 bytes every 10ms would take seconds; raise the budget before writing.
    writer.set_byte_rate(10_000);

    let start = Instant::now();
    writer.write_all(&[1; 20_000]).unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));

    writer.close().unwrap();

    let mut received = Vec::new();
    rx.read_to_end(&mut received).unwrap();
    assert_eq!(received.len(), 20_000);
}
