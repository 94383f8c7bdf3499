//! Fan-out channel server demo with a synthetic producer
//!
//! Run with: cargo run --example fanout_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example fanout_server                  # binds to 0.0.0.0:15000
//!   cargo run --example fanout_server 127.0.0.1:15001  # binds to 127.0.0.1:15001
//!
//! A producer task feeds counter-stamped chunks into the channel's fan-out
//! sink at roughly frame rate. Connect any number of consumers and watch them
//! all receive the same bytes:
//!
//!   nc 127.0.0.1 15000 | xxd | head
//!
//! Slow consumers (e.g. `nc ... | pv -L 1k`) get evicted once their queue of
//! pending chunks exceeds the channel's buffers-max limit, without affecting
//! the other consumers. Stop with ctrl-c.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing_subscriber::EnvFilter;

use avfan_rs::{ChannelConfig, ChannelDescriptor, ChannelKind, FanoutSink, OutputServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:15000".to_string())
        .parse()?;

    let descriptor = ChannelDescriptor::new("mix", ChannelKind::AudioVideo { audio_streams: 2 }, 500);
    let sink = Arc::new(FanoutSink::new(&descriptor));
    let config = ChannelConfig::with_addr(addr);
    let server = OutputServer::new(config, descriptor, Arc::clone(&sink));

    // Synthetic producer: one 4KiB chunk every 33ms, stamped with a counter
    let producer_sink = Arc::clone(&sink);
    let producer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(33));
        let mut counter: u64 = 0;

        loop {
            ticker.tick().await;

            let mut chunk = vec![0u8; 4096];
            chunk[..8].copy_from_slice(&counter.to_be_bytes());
            producer_sink.feed(Bytes::from(chunk)).await;

            counter += 1;
        }
    });

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    producer.abort();
    sink.shutdown().await;

    tracing::info!(
        stats = ?server.stats().snapshot(),
        "Channel stopped"
    );

    result.map_err(Into::into)
}
