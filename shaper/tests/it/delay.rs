use std::{
    io::{Read, Write},
    thread,
    time::{Duration, Instant},
};

use shaper::{pipe, DelayOptions, DelayShaper, Streams};

#[test]
fn delayed_writer_real_time() {
    let _ = tracing_subscriber::fmt::try_init();

    let (tx, mut rx) = pipe(64 * 1024);
    let mut writer =
        Streams::delayed_writer(tx, Duration::from_millis(100), DelayOptions::default()).unwrap();
    assert_eq!(writer.delay(), 20);

    let start = Instant::now();
    writer.write_all(b"hello").unwrap();

    let mut buf = [0u8; 5];
    rx.read_exact(&mut buf).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(&buf, b"hello");
    assert!(elapsed >= Duration::from_millis(90), "arrived after only {elapsed:?}");

    writer.close().unwrap();
}

#[test]
fn delayed_reader_real_time() {
    let _ = tracing_subscriber::fmt::try_init();

    let (mut tx, rx) = pipe(64 * 1024);
    let options = DelayOptions::default().with_eof_detection(true);
    let mut reader = Streams::delayed_reader(rx, Duration::from_millis(100), options).unwrap();

    let start = Instant::now();
    let producer = thread::spawn(move || {
        tx.write_all(b"delayed").unwrap();
    });

    let mut received = Vec::new();
    reader.read_to_end(&mut received).unwrap();
    let elapsed = start.elapsed();

    producer.join().unwrap();

    assert_eq!(received, b"delayed");
    assert!(elapsed >= Duration::from_millis(90), "arrived after only {elapsed:?}");
}

#[test]
fn zero_delay_passes_through() {
    let (tx, mut rx) = pipe(1024);
    let mut writer = Streams::delayed_writer(tx, Duration::ZERO, DelayOptions::default()).unwrap();
    assert_eq!(writer.delay(), 0);

    writer.write_all(b"now").unwrap();

    let mut buf = [0u8; 3];
    rx.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"now");
}

#[test]
fn zero_delay_reader_is_not_held_back() {
    let (mut tx, rx) = pipe(1024);
    let mut reader = Streams::delayed_reader(rx, Duration::ZERO, DelayOptions::default()).unwrap();

    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        tx.write_all(b"!").unwrap();
    });

    let start = Instant::now();
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).unwrap();
    let elapsed = start.elapsed();

    producer.join().unwrap();

    assert_eq!(&buf, b"!");
    assert!(elapsed < Duration::from_millis(200), "read took {elapsed:?}");
}
