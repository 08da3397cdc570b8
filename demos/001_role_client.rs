//! Role preset client with reconnect.
//!
//! Demonstrates:
//! - Spawning a merchant client from a role preset
//! - Automatic authentication and channel subscription
//! - Reconnect with backoff after a dropped connection
//! - Subscription replay after re-authentication
//!
//! Usage:
//!   cargo run --example 001_role_client
//!   cargo run --example 001_role_client -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::{Args, DEMO_URL};
use paygate_realtime::{ClientEvent, MemoryConnector, RealtimeClient, Result, Role};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    println!("=== 001: Role Client ===\n");

    let (connector, mut listener) = MemoryConnector::new();

    // ========================================================================
    // Spawn Client
    // ========================================================================

    println!("[1] Spawning merchant client...");
    let client = RealtimeClient::for_role(DEMO_URL, Role::Merchant)
        .connector(connector)
        .credentials("merchant-token", "merchant-42")
        .reconnect_interval(Duration::from_millis(200))
        .spawn()
        .await?;
    let mut events = client.events();
    println!("        ✓ Status: {}", client.status());
    println!("        Pending: {:?}\n", client.pending_subscriptions());

    // ========================================================================
    // Handshake
    // ========================================================================

    println!("[2] Serving handshake...");
    let Some(mut server) = listener.accept().await else {
        return Ok(());
    };
    common::serve_handshake(&mut server).await;
    wait_subscribed(&mut events).await;
    println!("        ✓ Status: {}", client.status());
    println!("        Active: {:?}\n", client.active_subscriptions());

    // ========================================================================
    // Dropped Connection
    // ========================================================================

    println!("[3] Dropping the connection...");
    server.drop_connection();

    let Some(mut server) = listener.accept().await else {
        return Ok(());
    };
    println!("        ✓ Reconnected (attempts so far: {})", client.metrics().reconnect_count);
    common::serve_handshake(&mut server).await;
    wait_subscribed(&mut events).await;
    println!("        ✓ Replayed: {:?}\n", client.active_subscriptions());

    // ========================================================================
    // Disconnect
    // ========================================================================

    println!("[4] Disconnecting...");
    client.disconnect();
    let metrics = client.metrics();
    println!("        ✓ Status: {}", client.status());
    println!(
        "        Sent {} / received {} envelopes",
        metrics.messages_sent, metrics.messages_received
    );

    println!("\n=== Done ===");
    Ok(())
}

async fn wait_subscribed(events: &mut tokio::sync::broadcast::Receiver<ClientEvent>) {
    while let Ok(event) = events.recv().await {
        println!("        event: {}", event.name());
        if matches!(event, ClientEvent::Subscribed(_)) {
            return;
        }
    }
}
