//! A TCP proxy that shapes traffic in both directions.
//!
//! ```text
//! cargo run --example proxy -- 127.0.0.1:4000 127.0.0.1:5000 100000 50
//! ```
//!
//! forwards connections on port 4000 to port 5000 at 100 kB/s with 50ms of added latency.

use std::{
    io::{self, Write},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

use shaper::{DelayOptions, RateOptions, Sink, Streams};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> io::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let mut args = std::env::args().skip(1);
    let listen: SocketAddr = parse(args.next(), "127.0.0.1:4000")?;
    let upstream: SocketAddr = parse(args.next(), "127.0.0.1:5000")?;
    let rate: f64 = parse(args.next(), "100000")?;
    let delay = Duration::from_millis(parse(args.next(), "50")?);

    let listener = TcpListener::bind(listen).await?;
    info!(%listen, %upstream, rate, ?delay, "Proxy listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        info!(%peer, "Accepted connection");

        let client = socket.into_std()?;
        client.set_nonblocking(false)?;

        tokio::task::spawn_blocking(move || {
            if let Err(e) = serve(client, upstream, rate, delay) {
                error!(%peer, err = ?e, "Connection failed");
            }

            info!(%peer, "Connection closed");
        });
    }
}

/// Shapes both directions of one connection until either side hangs up.
fn serve(client: TcpStream, upstream: SocketAddr, rate: f64, delay: Duration) -> io::Result<()> {
    let server = TcpStream::connect(upstream)?;

    let inbound = forward(client.try_clone()?, server.try_clone()?, rate, delay)?;
    let outbound = forward(server, client, rate, delay)?;

    for direction in [inbound, outbound] {
        if direction.join().is_err() {
            error!("Forwarding thread panicked");
        }
    }

    Ok(())
}

/// Copies `from` into `to` on a new thread, throttled to `rate` bytes per second and delayed by
/// `delay`.
fn forward(
    from: TcpStream,
    to: TcpStream,
    rate: f64,
    delay: Duration,
) -> io::Result<std::thread::JoinHandle<()>> {
    let limited = Streams::rate_limited_writer(to, rate, RateOptions::default()).map_err(io::Error::other)?;
    let mut writer =
        Streams::delayed_writer(limited, delay, DelayOptions::default()).map_err(io::Error::other)?;
    let mut reader = from;

    std::thread::Builder::new().name("proxy-forward".to_string()).spawn(move || {
        let result = io::copy(&mut reader, &mut writer)
            .and_then(|copied| writer.flush().map(|_| copied))
            .and_then(|copied| writer.drain().map(|_| copied));

        match result {
            Ok(copied) => info!(copied, "Direction finished"),
            Err(e) => error!(err = ?e, "Forwarding failed"),
        }

        if let Err(e) = Sink::close(&mut writer) {
            error!(err = ?e, "Failed to close writer");
        }
    })
}

fn parse<T: std::str::FromStr>(arg: Option<String>, default: &str) -> io::Result<T> {
    arg.as_deref()
        .unwrap_or(default)
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid argument"))
}
