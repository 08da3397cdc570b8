//! Outbound queue.
//!
//! Holds envelopes submitted while the transport is not open. The queue is
//! drained in FIFO order by the session as soon as a transport opens, under
//! the same lock as new sends, so queued envelopes always reach the wire
//! first.
//!
//! An envelope whose write fails goes back to the front with its retry count
//! incremented. Once the count exceeds `max_retries` the envelope is dropped.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::protocol::Envelope;

// ============================================================================
// Constants
// ============================================================================

/// Default per-envelope retry ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default queue bound.
pub const DEFAULT_MAX_QUEUE_LEN: usize = 1000;

// ============================================================================
// QueuedEnvelope
// ============================================================================

/// An envelope waiting for an open transport.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEnvelope {
    /// The envelope to write.
    pub envelope: Envelope,
    /// Time the envelope was queued.
    pub enqueued_at: DateTime<Utc>,
    /// Failed writes so far.
    pub retry_count: u32,
    /// Failed writes tolerated before the envelope is dropped.
    pub max_retries: u32,
}

impl QueuedEnvelope {
    /// Returns `true` once the envelope has used up its retries.
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.retry_count > self.max_retries
    }
}

// ============================================================================
// RetryOutcome
// ============================================================================

/// Result of handing a failed write back to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// Put back at the front of the queue.
    Requeued,
    /// Retries exhausted; the envelope left the queue for good.
    Dropped(QueuedEnvelope),
}

// ============================================================================
// OutboundQueue
// ============================================================================

/// Bounded FIFO of [`QueuedEnvelope`]s.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    items: VecDeque<QueuedEnvelope>,
    capacity: usize,
    max_retries: u32,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_LEN, DEFAULT_MAX_RETRIES)
    }
}

impl OutboundQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(capacity: usize, max_retries: u32) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            max_retries,
        }
    }

    /// Appends an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] if the queue is at capacity.
    pub fn push(&mut self, envelope: Envelope, at: DateTime<Utc>) -> Result<()> {
        if self.items.len() >= self.capacity {
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }

        self.items.push_back(QueuedEnvelope {
            envelope,
            enqueued_at: at,
            retry_count: 0,
            max_retries: self.max_retries,
        });
        Ok(())
    }

    /// Appends an envelope whose first write already failed.
    ///
    /// Ignores the capacity bound: the envelope was accepted earlier.
    pub fn push_failed(&mut self, envelope: Envelope, at: DateTime<Utc>) -> RetryOutcome {
        let item = QueuedEnvelope {
            envelope,
            enqueued_at: at,
            retry_count: 1,
            max_retries: self.max_retries,
        };
        if item.is_exhausted() {
            return RetryOutcome::Dropped(item);
        }
        self.items.push_back(item);
        RetryOutcome::Requeued
    }

    /// Removes the oldest envelope.
    #[inline]
    pub fn pop(&mut self) -> Option<QueuedEnvelope> {
        self.items.pop_front()
    }

    /// Hands back an envelope whose write failed.
    pub fn retry(&mut self, mut item: QueuedEnvelope) -> RetryOutcome {
        item.retry_count += 1;
        if item.is_exhausted() {
            return RetryOutcome::Dropped(item);
        }
        self.items.push_front(item);
        RetryOutcome::Requeued
    }

    /// Returns the number of queued envelopes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the queue bound.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates over queued envelopes, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedEnvelope> {
        self.items.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::MessageType;

    fn envelope(n: u64) -> Envelope {
        Envelope::new(MessageType::SystemAlert, json!({ "n": n }), Utc::now())
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = OutboundQueue::default();
        for n in 1..=3 {
            queue.push(envelope(n), Utc::now()).expect("push");
        }

        let order: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|item| item.envelope.payload["n"].as_u64().expect("n"))
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_capacity() {
        let mut queue = OutboundQueue::new(2, 3);
        queue.push(envelope(1), Utc::now()).expect("push");
        queue.push(envelope(2), Utc::now()).expect("push");

        let err = queue.push(envelope(3), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_retry_keeps_front_position() {
        let mut queue = OutboundQueue::default();
        queue.push(envelope(1), Utc::now()).expect("push");
        queue.push(envelope(2), Utc::now()).expect("push");

        let first = queue.pop().expect("first");
        assert_eq!(queue.retry(first), RetryOutcome::Requeued);

        let again = queue.pop().expect("again");
        assert_eq!(again.envelope.payload["n"], 1);
        assert_eq!(again.retry_count, 1);
    }

    #[test]
    fn test_retry_drops_after_max_retries() {
        let mut queue = OutboundQueue::new(10, 2);
        queue.push(envelope(1), Utc::now()).expect("push");

        for _ in 0..2 {
            let item = queue.pop().expect("item");
            assert_eq!(queue.retry(item), RetryOutcome::Requeued);
        }

        let item = queue.pop().expect("item");
        let RetryOutcome::Dropped(dropped) = queue.retry(item) else {
            panic!("expected drop");
        };
        assert_eq!(dropped.retry_count, 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_failed_with_zero_retries_drops() {
        let mut queue = OutboundQueue::new(10, 0);
        assert!(matches!(
            queue.push_failed(envelope(1), Utc::now()),
            RetryOutcome::Dropped(_)
        ));
        assert!(queue.is_empty());
    }
}
