use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use rand::Rng;
use shaper::{
    pipe, DelayCalculator, DelayOptions, DelayedReader, DelayedWriter, RateCalculator,
    RateLimitWriter, RateOptions, RealTimeClock, SimulationClock, Source, TickSource,
};

/// A rate-limited, delayed writer on one end of a loopback connection and a delayed reader with
/// end-of-stream detection on the other.
#[test]
fn shaped_tcp_round_trip() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut payload = vec![0u8; 16 * 1024];
    rand::thread_rng().fill(&mut payload[..]);

    let server = thread::spawn(move || {
        let (socket, _) = listener.accept().unwrap();

        let delay = DelayCalculator::default().calculate(20_000_000);
        let clock = Arc::new(RealTimeClock::new(delay.interval_ns));
        let options = DelayOptions::default().with_delay(delay.ticks).with_eof_detection(true);
        let mut reader = DelayedReader::new(socket, clock.clone(), options);
        clock.start().unwrap();

        let mut received = Vec::new();
        reader.read_to_end(&mut received).unwrap();
        reader.close().unwrap();
        received
    });

    let socket = TcpStream::connect(addr).unwrap();

    // Both shapers share one clock, so the rate decides the tick interval.
    let rate = RateCalculator::calculate(400_000.0).unwrap();
    let clock = Arc::new(RealTimeClock::new(rate.interval_ns));
    let delayed = DelayedWriter::new(socket, clock.clone(), DelayOptions::default().with_delay(3));
    let options = RateOptions::default().with_byte_rate(rate.bytes_per_tick).with_prescale(rate.prescale);
    let mut writer = RateLimitWriter::new(delayed, clock.clone(), options);
    clock.start().unwrap();

    writer.write_all(&payload).unwrap();
    writer.get_ref().drain().unwrap();
    writer.close().unwrap();

    let received = server.join().unwrap();
    assert_eq!(received.len(), payload.len());
    assert_eq!(received, payload);
}

/// A rate limiter feeding a delay line on a simulated clock: bytes leave at the budget's pace,
/// each shifted by the delay.
#[test]
fn rate_then_delay_on_simulation_clock() {
    let clock = Arc::new(SimulationClock::new());
    clock.advance();

    let (tx, mut rx) = pipe(1024);
    let delayed = DelayedWriter::new(
        tx,
        clock.clone(),
        DelayOptions::default().with_delay(5).with_buffer_size(256).with_blocking(false),
    );
    let options = RateOptions::default().with_byte_rate(10).with_blocking(false);
    let mut writer = RateLimitWriter::new(delayed, clock.clone(), options);

    let payload: Vec<u8> = (0..30).collect();
    let mut written = 0;
    let mut arrivals = Vec::new();

    for _ in 0..12 {
        if written < payload.len() {
            written += writer.write(&payload[written..]).unwrap();
        }

        clock.advance();
        arrivals.push(rx.available().unwrap());
    }

    assert_eq!(written, payload.len());

    // Ten bytes per tick leave the limiter, each batch five ticks later.
    assert_eq!(&arrivals[..4], &[0, 0, 0, 0]);
    assert_eq!(arrivals[4], 10);
    assert_eq!(arrivals[5], 20);
    assert_eq!(arrivals[6], 30);

    let mut received = vec![0u8; 30];
    rx.read_exact(&mut received).unwrap();
    assert_eq!(received, payload);

    assert_eq!(clock.current_tick(), 13);
}
