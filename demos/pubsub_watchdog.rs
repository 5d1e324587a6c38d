//! # Pubsub with a Watchdog
//!
//! Two replicas share one loopback server. One subscribes, the other
//! publishes, and a watchdog checks the notification path on the first.
//! At the end the pubsub metrics are gathered through a Prometheus registry.
//!
//! ## Run
//! ```bash
//! RUST_LOG=notifybus=debug cargo run --example pubsub_watchdog
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use notifybus::{
    Delivery, ListenerWithErrFn, LoopbackHub, Pubsub, PubsubBuilder, PubsubConfig, PubsubError,
    Watchdog, WatchdogConfig,
};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let hub = LoopbackHub::new();
    let replica_a = PubsubBuilder::new(PubsubConfig::default())
        .with_transport(hub.connect())
        .build()?;
    let replica_b = PubsubBuilder::new(PubsubConfig::default())
        .with_transport(hub.connect())
        .build()?;

    let watchdog = Watchdog::new(
        Arc::new(replica_a.clone()),
        WatchdogConfig {
            heartbeat: Duration::from_millis(100),
            timeout: Duration::from_millis(500),
        },
    );

    let listener = ListenerWithErrFn::arc(
        "printer",
        |_ctx: CancellationToken, delivery: Delivery| async move {
            match delivery {
                Ok(msg) => println!(" ├─► got {:?}", String::from_utf8_lossy(&msg)),
                Err(PubsubError::DroppedMessages) => println!(" ├─► some messages were lost"),
                Err(err) => println!(" ├─► error: {err}"),
            }
        },
    );
    let sub = replica_a.subscribe_with_err("orders", listener).await?;

    for i in 0..5 {
        let msg = Bytes::from(format!("order #{i}"));
        replica_b.publish("orders", &msg).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    tokio::select! {
        _ = watchdog.timeout() => println!(" └─► watchdog timed out"),
        _ = tokio::time::sleep(Duration::from_secs(1)) => println!(" └─► watchdog healthy"),
    }

    let latency = replica_a.measure_latency().await?;
    println!();
    println!("Latency: send {:?}, recv {:?}", latency.send, latency.recv);

    let registry = prometheus::Registry::new();
    registry.register(Box::new(replica_a.clone()))?;
    println!();
    println!("Metrics:");
    for family in registry.gather() {
        for metric in family.get_metric() {
            let labels: Vec<String> = metric
                .get_label()
                .iter()
                .map(|l| format!("{}={}", l.get_name(), l.get_value()))
                .collect();
            let value = match family.get_field_type() {
                prometheus::proto::MetricType::COUNTER => metric.get_counter().get_value(),
                _ => metric.get_gauge().get_value(),
            };
            println!(" ├─► {} {{{}}} {}", family.get_name(), labels.join(","), value);
        }
    }

    sub.cancel().await;
    watchdog.close().await;
    replica_b.close().await?;
    replica_a.close().await?;
    Ok(())
}
