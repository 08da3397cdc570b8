//! Connection lifecycle, subscriptions and inbound routing.
//!
//! # Architecture
//!
//! ```text
//! RealtimeClient ──lock──► Session ◄──lock── driver task ◄── TransportEvent
//!                            │                   │
//!                            ▼                   ▼
//!                        FrameSink         MessageRouter ──► domain handlers
//!                            │
//!                            ▼
//!                        EventBus ──► ClientEvent subscribers
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `manager` | [`Session`] state machine |
//! | `driver` | Per-run I/O task: inbound pump, heartbeat, reconnect |
//! | `backoff` | Reconnect delay policy |
//! | `queue` | Outbound queue with retry accounting |
//! | `registry` | Active/pending channel sets |
//! | `router` | Inbound classification and handler dispatch |
//! | `events` | [`ClientEvent`] and the broadcast bus |
//! | `clock` | Injectable wall clock |
//! | `state` | Status, state snapshot, metrics |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect backoff policy.
pub mod backoff;

/// Wall-clock abstraction.
pub mod clock;

/// Driver task.
pub mod driver;

/// Client events.
pub mod events;

/// Connection manager.
pub mod manager;

/// Outbound queue.
pub mod queue;

/// Subscription registry.
pub mod registry;

/// Inbound classification and dispatch.
pub mod router;

/// Status, state and metrics.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{ClientEvent, EventBus};
pub use manager::{Credentials, Session, SessionSettings};
pub use queue::{OutboundQueue, QueuedEnvelope};
pub use registry::SubscriptionRegistry;
pub use router::{MessageHandler, MessageRouter, RoutedMessage};
pub use state::{ConnectionState, ConnectionStatus, Metrics};
