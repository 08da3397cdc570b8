//! Driver task.
//!
//! One task per run owns the inbound side of the transport and the timers:
//!
//! - Inbound frames are fed to the [`Session`], domain messages are then
//!   dispatched by the [`MessageRouter`] outside the session lock. A panicking
//!   handler loses its message and is reported as [`Error::Handler`]
//! - The heartbeat interval ticks while the transport is open
//! - On close, the session decides between stopping and reconnecting; the
//!   backoff sleep and the reopen both race the run's cancellation token
//!
//! `disconnect()` cancels the token, which ends the task at its next await
//! point, including mid-backoff.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{CLOSE_ABNORMAL, Connector, FrameStream, Transport, TransportEvent};

use super::manager::{CloseAction, RunTicket, Session};
use super::router::{MessageRouter, RoutedMessage};

// ============================================================================
// DriverContext
// ============================================================================

/// Everything a run needs, shared with the facade.
#[derive(Clone)]
pub struct DriverContext {
    /// Connection manager.
    pub session: Arc<Mutex<Session>>,
    /// Domain handlers.
    pub router: Arc<MessageRouter>,
    /// Opens transports.
    pub connector: Arc<dyn Connector>,
    /// Endpoint.
    pub url: String,
    /// Bound on each open.
    pub timeout: Duration,
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
}

impl DriverContext {
    /// Opens a transport within the configured timeout.
    ///
    /// Returns `None` if `cancel` fires first.
    pub async fn open(&self, cancel: &CancellationToken) -> Option<Result<Transport>> {
        tokio::select! {
            biased;

            () = cancel.cancelled() => None,

            opened = timeout(self.timeout, self.connector.open(&self.url)) => Some(
                opened
                    .map_err(|_| Error::connection_timeout(self.timeout.as_millis() as u64))
                    .and_then(|result| result),
            ),
        }
    }

    /// Spawns the driver for a run whose transport just opened.
    pub fn spawn(&self, ticket: RunTicket, events: FrameStream) -> JoinHandle<()> {
        tokio::spawn(run(self.clone(), ticket, events))
    }
}

// ============================================================================
// Run Loop
// ============================================================================

async fn run(ctx: DriverContext, ticket: RunTicket, mut events: FrameStream) {
    debug!(run = ticket.id, "Driver started");

    loop {
        let Some((code, reason)) = pump(&ctx, &ticket, &mut events).await else {
            break;
        };

        let mut action = ctx.session.lock().on_closed(ticket.id, code, &reason);

        // Backoff and reopen until a transport opens or the run ends
        let reopened = loop {
            let CloseAction::Reconnect(delay) = action else {
                break None;
            };

            tokio::select! {
                biased;
                () = ticket.cancel.cancelled() => break None,
                () = sleep(delay) => {}
            }

            if !ctx.session.lock().begin_reconnect(ticket.id) {
                break None;
            }

            match ctx.open(&ticket.cancel).await {
                None => break None,
                Some(Ok(transport)) => break Some(transport),
                Some(Err(e)) => {
                    action = ctx.session.lock().on_reconnect_failed(ticket.id, e);
                }
            }
        };

        let Some(transport) = reopened else {
            break;
        };
        if !ctx.session.lock().on_open(ticket.id, transport.sink) {
            break;
        }
        events = transport.events;
    }

    debug!(run = ticket.id, "Driver stopped");
}

/// Runs one open transport until it closes.
///
/// Returns the close code and reason, or `None` if the run was cancelled.
async fn pump(
    ctx: &DriverContext,
    ticket: &RunTicket,
    events: &mut FrameStream,
) -> Option<(u16, String)> {
    let period = ctx.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = ticket.cancel.cancelled() => return None,

            event = events.recv() => match event {
                Some(TransportEvent::Text(text)) => {
                    let routed = ctx.session.lock().handle_text(ticket.id, &text);
                    if let Some(routed) = routed {
                        dispatch(ctx, ticket.id, &routed);
                    }
                }
                Some(TransportEvent::Closed { code, reason }) => return Some((code, reason)),
                None => return Some((CLOSE_ABNORMAL, "transport dropped".to_string())),
            },

            _ = heartbeat.tick() => {
                ctx.session.lock().heartbeat(ticket.id);
            }
        }
    }
}

/// Runs the domain handler for `routed`, containing a panic to that message.
fn dispatch(ctx: &DriverContext, run: u64, routed: &RoutedMessage) {
    let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| ctx.router.dispatch(routed))) else {
        return;
    };

    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    ctx.session.lock().on_handler_panic(run, routed.kind(), message);
}
