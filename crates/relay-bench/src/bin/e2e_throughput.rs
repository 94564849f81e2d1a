//! End-to-end routing throughput benchmark for Relay.
//!
//! Connects pairs of clients to a running server. The first client of each
//! pair sends addressed messages to the second as fast as it can; the
//! benchmark counts forwarded messages received and delivery acknowledgements.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:3000/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Default)]
struct Counters {
    forwarded: AtomicU64,
    acknowledged: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.forwarded.store(0, Ordering::SeqCst);
        self.acknowledged.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_pairs = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(8);
    let url = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║          Relay End-to-End Routing Benchmark                  ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_routing_benchmark(num_pairs, url).await;
}

async fn run_routing_benchmark(num_pairs: usize, url: String) {
    println!("Routing benchmark: {} sender/receiver pairs at {}", num_pairs, url);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(num_pairs * 2 + 1));
    let mut handles = Vec::new();

    for pair in 0..num_pairs {
        let receiver = format!("bench-recv-{pair}");
        let sender = format!("bench-send-{pair}");

        let (url_r, counters_r, barrier_r) = (url.clone(), counters.clone(), barrier.clone());
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_receiver(&url_r, &receiver, counters_r, barrier_r).await {
                eprintln!("Receiver {} error: {}", receiver, e);
            }
        }));

        let (url_s, counters_s, barrier_s) = (url.clone(), counters.clone(), barrier.clone());
        handles.push(tokio::spawn(async move {
            let target = format!("bench-recv-{pair}");
            if let Err(e) = run_sender(&url_s, &sender, &target, counters_s, barrier_s).await {
                eprintln!("Sender {} error: {}", sender, e);
            }
        }));
    }

    barrier.wait().await;
    println!("All {} clients registered", num_pairs * 2);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    counters.reset();
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let forwarded = counters.forwarded.load(Ordering::SeqCst);
    let acknowledged = counters.acknowledged.load(Ordering::SeqCst);
    let failed = counters.failed.load(Ordering::SeqCst);
    let per_sec = forwarded as f64 / elapsed.as_secs_f64();

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Pairs:                {:>10}                           ║", num_pairs);
    println!("║  Duration:             {:>10.2}s                          ║", elapsed.as_secs_f64());
    println!("║  Forwarded:            {:>10}                           ║", forwarded);
    println!("║  Acknowledged:         {:>10}                           ║", acknowledged);
    println!("║  Failed deliveries:    {:>10}                           ║", failed);
    println!("║  Throughput:           {:>10.0} msg/s                    ║", per_sec);
    println!("║  Per-Pair:             {:>10.0} msg/s                    ║", per_sec / num_pairs as f64);
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

/// Connect and register, returning once the registration is acknowledged.
async fn connect(
    url: &str,
    identity: &str,
) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, BoxError> {
    let (mut ws, _) = connect_async(url).await?;
    let register = json!({"type": "register", "username": identity});
    ws.send(Message::Text(register.to_string())).await?;

    while let Some(message) = ws.next().await {
        if let Message::Text(text) = message? {
            let frame: Value = serde_json::from_str(&text)?;
            if frame["type"] == "registered" {
                return Ok(ws);
            }
        }
    }
    Err("connection closed before registration".into())
}

async fn run_receiver(
    url: &str,
    identity: &str,
    counters: Arc<Counters>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let mut ws = connect(url, identity).await?;
    barrier.wait().await;

    while let Some(message) = ws.next().await {
        if let Message::Text(text) = message? {
            // Presence updates arrive here too; only forwarded messages count.
            if text.starts_with(r#"{"type":"message""#) {
                counters.forwarded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    Ok(())
}

async fn run_sender(
    url: &str,
    identity: &str,
    target: &str,
    counters: Arc<Counters>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let ws = connect(url, identity).await?;
    let (mut sink, mut stream) = ws.split();
    barrier.wait().await;

    let ack_counters = counters.clone();
    let ack_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if let Message::Text(text) = message {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                if frame["type"] == "delivery_status" {
                    if frame["delivered"] == true {
                        ack_counters.acknowledged.fetch_add(1, Ordering::Relaxed);
                    } else {
                        ack_counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    let channel = format!("chat.user.{target}");
    let mut seq = 0u64;
    loop {
        let envelope = json!({
            "event": "bench.message",
            "channel": channel,
            "data": {"user": identity, "messageId": seq, "text": "x"}
        });
        seq += 1;
        if sink.send(Message::Text(envelope.to_string())).await.is_err() {
            break;
        }
        // Small yield to not starve the ack task
        tokio::task::yield_now().await;
    }

    ack_task.abort();
    Ok(())
}
