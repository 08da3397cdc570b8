//! Domain message handlers.
//!
//! Demonstrates:
//! - Registering handlers per message type
//! - Reading typed payloads from routed messages
//! - Queueing sends before connecting
//! - Observing unknown message types through the event stream
//!
//! Usage:
//!   cargo run --example 002_domain_handlers
//!   cargo run --example 002_domain_handlers -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Args, DEMO_URL};
use paygate_realtime::{
    Channel, ClientEvent, InboundMessage, MemoryConnector, MessageType, RealtimeClient, Result,
};
use serde_json::json;

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
    println!("=== 002: Domain Handlers ===\n");

    let (connector, mut listener) = MemoryConnector::new();
    let handled = Arc::new(AtomicUsize::new(0));

    // ========================================================================
    // Build Client
    // ========================================================================

    println!("[1] Building client with handlers...");
    let counter = Arc::clone(&handled);
    let client = RealtimeClient::builder()
        .url(DEMO_URL)
        .connector(connector)
        .credentials("user-token", "user-7")
        .on(MessageType::TransactionUpdate, move |routed| {
            if let InboundMessage::TransactionUpdate(update) = &routed.message {
                println!("        handler: transaction {} is {}", update.transaction_id, update.status);
            }
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .build()?;

    let counter = Arc::clone(&handled);
    client.on(MessageType::BalanceUpdate, move |routed| {
        if let InboundMessage::BalanceUpdate(balance) = &routed.message {
            println!("        handler: {} balance {:?}", balance.currency, balance.available);
        }
        counter.fetch_add(1, Ordering::Relaxed);
    })?;
    println!("        ✓ Handlers registered\n");

    // ========================================================================
    // Queue Before Connect
    // ========================================================================

    println!("[2] Queueing before connect...");
    client.subscribe(&[Channel::UserTransactions, Channel::UserBalances])?;
    let id = client.send(MessageType::UserNotification, json!({ "read": ["n-1", "n-2"] }))?;
    println!("        ✓ Queued {id} ({} waiting)\n", client.queued_messages());

    // ========================================================================
    // Connect and Serve
    // ========================================================================

    println!("[3] Connecting...");
    let mut events = client.events();
    client.connect().await?;
    let Some(mut server) = listener.accept().await else {
        return Ok(());
    };

    if let Some(flushed) = common::next_envelope(&mut server).await {
        println!("        server <- {} {}", flushed.kind, flushed.payload);
    }
    common::serve_handshake(&mut server).await;

    server.send(
        MessageType::TransactionUpdate,
        json!({ "transactionId": "tx-1001", "status": "completed", "amount": 42.5, "currency": "USD" }),
    );
    server.send(
        MessageType::BalanceUpdate,
        json!({ "currency": "USD", "available": 1042.5, "pending": 0 }),
    );
    server.send_text(json!({ "id": "srv-9", "type": "loyalty_points", "payload": {} }).to_string());

    // ========================================================================
    // Observe
    // ========================================================================

    println!("\n[4] Observing events...");
    let observe = async {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::Unhandled(raw) => {
                    println!("        unhandled type {:?}", raw.kind);
                    break;
                }
                other => println!("        event: {}", other.name()),
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(5), observe).await;

    println!("\n        ✓ Handled {} domain messages", handled.load(Ordering::Relaxed));
    client.disconnect();

    println!("\n=== Done ===");
    Ok(())
}
