//! Shared utilities for demos.
//!
//! Provides common functionality used across all demos:
//! - Command-line argument parsing
//! - Logging initialization
//! - A scripted in-memory server end

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use paygate_realtime::{Envelope, MemoryPeer, MessageType};
use serde_json::{Value, json};
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

/// URL handed to the in-memory connector.
pub const DEMO_URL: &str = "ws://dashboard.local/realtime";

/// Bound on every wait for the client.
const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for demos.
#[derive(Debug, Clone)]
pub struct Args {
    pub debug: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "paygate_realtime=debug"
    } else {
        "paygate_realtime=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Waits for the next non-heartbeat envelope the client wrote.
pub async fn next_envelope(peer: &mut MemoryPeer) -> Option<Envelope> {
    timeout(WAIT, async {
        loop {
            let envelope = peer.recv_envelope().await?;
            if envelope.kind != MessageType::Heartbeat {
                return Some(envelope);
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Plays the server side of the handshake: accepts the credentials and
/// acknowledges the first subscription request.
///
/// Returns the acknowledged channels.
pub async fn serve_handshake(peer: &mut MemoryPeer) -> Option<Value> {
    let auth = next_envelope(peer).await?;
    println!("        server <- {} ({})", auth.kind, auth.payload["userId"]);
    peer.send(
        MessageType::Authentication,
        json!({
            "success": true,
            "userId": auth.payload["userId"],
            "sessionId": auth.payload["sessionId"],
            "permissions": ["read"],
        }),
    );

    let subscription = next_envelope(peer).await?;
    let channels = subscription.payload["channels"].clone();
    println!("        server <- {} {channels}", subscription.kind);
    peer.send(
        MessageType::Subscription,
        json!({ "success": true, "channels": channels }),
    );
    Some(channels)
}
