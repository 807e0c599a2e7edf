//! Mutation event fan-out.
//!
//! Every successful write publishes a [`MutationEvent`] onto a bounded
//! channel (overflow drops, counted) and into a ring buffer of recent
//! events for polling via `get_mutations`.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::daemon::metrics::Metrics;
use crate::daemon::protocol::MutationEvent;

/// Default bounded-channel capacity.
pub const DEFAULT_BUFFER: usize = 512;
/// Default ring-buffer capacity for polling.
pub const DEFAULT_RING: usize = 100;

/// Publisher half of the mutation bus.
#[derive(Debug)]
pub struct MutationBus {
    tx: mpsc::Sender<MutationEvent>,
    ring: RwLock<VecDeque<MutationEvent>>,
    ring_capacity: usize,
    metrics: Arc<Metrics>,
}

impl MutationBus {
    /// Create the bus; the receiver is handed to whatever consumes live
    /// events (detached export, test harnesses).
    #[must_use]
    pub fn new(
        buffer: usize,
        ring_capacity: usize,
        metrics: Arc<Metrics>,
    ) -> (Self, mpsc::Receiver<MutationEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                ring: RwLock::new(VecDeque::with_capacity(ring_capacity)),
                ring_capacity,
                metrics,
            },
            rx,
        )
    }

    /// Publish an event. The channel send never blocks; a full channel
    /// drops the event and bumps the drop counter. The ring always keeps
    /// the newest events.
    pub fn publish(&self, kind: &str, issue_id: &str) {
        let event = MutationEvent {
            kind: kind.to_string(),
            issue_id: issue_id.to_string(),
            timestamp: Utc::now(),
        };

        {
            let mut ring = self.ring.write();
            if ring.len() >= self.ring_capacity {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        if self.tx.try_send(event).is_err() {
            self.metrics.mutation_dropped();
        }
    }

    /// The last N events, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<MutationEvent> {
        self.ring.read().iter().cloned().collect()
    }
}
