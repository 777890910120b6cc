//! Example: Streaming FSR Readings
//!
//! This example connects to a sensor over BLE, subscribes to the Nordic UART
//! TX characteristic and prints every reading until Ctrl-C is pressed.
//!
//! Run with: `cargo run --example stream_sensor -- <DEVICE_ADDRESS_OR_NAME>`

use std::env;
use std::sync::Arc;

use fsrlink_core::{BleRadio, LinkEvent, LinkOptions, LinkStateMachine, ReadingSink};
use fsrlink_types::uuids::{NUS_SERVICE, NUS_TX};
use fsrlink_types::{DeviceId, SensorReading, SubscriptionTarget};

struct PrintSink;

impl ReadingSink for PrintSink {
    fn deliver(&self, reading: SensorReading) {
        println!(
            "  {:<6} {:>10.2}  ({})",
            reading.sensor_name, reading.value, reading.observed_at
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let identifier = if args.len() > 1 {
        &args[1]
    } else {
        eprintln!("Usage: {} <DEVICE_ADDRESS_OR_NAME>", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} AA:BB:CC:DD:EE:FF", args[0]);
        eprintln!("  {} \"FSR Glove\"", args[0]);
        std::process::exit(1);
    };

    let link = LinkStateMachine::new(
        Arc::new(BleRadio::default()),
        Arc::new(PrintSink),
        LinkOptions::default(),
    );

    let mut events = link.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let LinkEvent::StateChanged { state, .. } = event {
                println!("Link: {state}");
            }
        }
    });

    println!("Connecting to {}...", identifier);
    let target = SubscriptionTarget::new(NUS_SERVICE, NUS_TX);
    link.start(DeviceId::new(identifier.as_str())?, target).await?;

    tokio::signal::ctrl_c().await?;
    println!();
    println!("Stopping...");
    link.stop().await;

    Ok(())
}
