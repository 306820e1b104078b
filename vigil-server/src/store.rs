//! Bounded, concurrent event store
//!
//! Single insertion-ordered collection shared by every capture worker and the
//! event protocol server. Capacity exhaustion is a backpressure state, not an
//! error: under the default [`OverflowPolicy::Pause`] the append that fills the
//! store also pauses it, and later appends are rejected until a consumer
//! drains or clears it.
//!
//! # Locking
//!
//! One `tokio::sync::RwLock` guards both the sequence and the `paused` flag,
//! so every state transition happens under a single write guard. Reads
//! (`peek_last`, `size`, `is_paused`) take the read guard and may overlap.

use serde::Deserialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vigil_common::DetectionEvent;

use crate::error::{Error, Result};

/// Default store capacity
pub const DEFAULT_CAPACITY: usize = 1000;

/// What happens when an append finds the store full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Store the filling event, then reject appends until drained
    #[default]
    Pause,
    /// Evict the oldest event to make room; never pauses
    ///
    /// Alternative mode: events can be lost under sustained overload.
    DropOldest,
}

/// Result of [`EventStore::append`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Event stored, store still below capacity
    Stored,
    /// Event stored and the store is now full and paused
    StoredAndPaused,
    /// Event stored after evicting the oldest event (drop-oldest mode)
    StoredEvictedOldest,
    /// Store is paused; event discarded
    Rejected,
}

impl AppendOutcome {
    /// True when the event made it into the store
    pub fn is_stored(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

struct StoreInner {
    events: VecDeque<DetectionEvent>,
    paused: bool,
}

/// Bounded FIFO of pending detection events
pub struct EventStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl EventStore {
    /// Create a store holding at most `capacity` events
    ///
    /// # Errors
    /// `InvalidInput` when `capacity` is zero.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidInput(
                "Event store capacity must be at least 1".to_string(),
            ));
        }

        debug!(
            "Creating event store: capacity={}, policy={:?}",
            capacity, policy
        );

        Ok(Self {
            inner: RwLock::new(StoreInner {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                paused: false,
            }),
            capacity,
            policy,
        })
    }

    /// Create a pause-on-overflow store holding at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::new(capacity, OverflowPolicy::Pause)
    }

    /// Append one event, applying the overflow policy
    pub async fn append(&self, event: DetectionEvent) -> AppendOutcome {
        let mut inner = self.inner.write().await;

        if inner.paused {
            debug!(
                "Event store paused, rejecting event from {}",
                event.source_id
            );
            return AppendOutcome::Rejected;
        }

        match self.policy {
            OverflowPolicy::Pause => {
                inner.events.push_back(event);
                if inner.events.len() >= self.capacity {
                    inner.paused = true;
                    warn!(
                        "Event store reached capacity ({}), pausing ingestion until drained",
                        self.capacity
                    );
                    AppendOutcome::StoredAndPaused
                } else {
                    AppendOutcome::Stored
                }
            }
            OverflowPolicy::DropOldest => {
                let evicted = if inner.events.len() >= self.capacity {
                    inner.events.pop_front()
                } else {
                    None
                };
                inner.events.push_back(event);
                match evicted {
                    Some(old) => {
                        debug!("Event store full, evicted oldest event {}", old.artifact_name);
                        AppendOutcome::StoredEvictedOldest
                    }
                    None => AppendOutcome::Stored,
                }
            }
        }
    }

    /// Remove and return every pending event, resuming ingestion
    pub async fn drain_all(&self) -> Vec<DetectionEvent> {
        let mut inner = self.inner.write().await;

        let was_paused = inner.paused;
        inner.paused = false;
        let drained: Vec<DetectionEvent> = inner.events.drain(..).collect();

        if was_paused {
            info!("Event store drained ({} events), ingestion resumed", drained.len());
        } else {
            debug!("Event store drained ({} events)", drained.len());
        }

        drained
    }

    /// Remove and return the newest `n` events in insertion order
    ///
    /// Older events stay queued. A paused store stays paused unless the drain
    /// leaves it empty.
    pub async fn drain_last(&self, n: usize) -> Vec<DetectionEvent> {
        let mut inner = self.inner.write().await;

        let len = inner.events.len();
        let take = n.min(len);
        let drained: Vec<DetectionEvent> = inner.events.split_off(len - take).into();

        if inner.paused && inner.events.is_empty() {
            inner.paused = false;
            info!("Event store drained newest {} events, ingestion resumed", take);
        } else {
            debug!("Event store drained newest {} of {} events", take, len);
        }

        drained
    }

    /// Snapshot of the newest `n` events in insertion order, without mutation
    pub async fn peek_last(&self, n: usize) -> Vec<DetectionEvent> {
        let inner = self.inner.read().await;

        let skip = inner.events.len().saturating_sub(n);
        inner.events.iter().skip(skip).cloned().collect()
    }

    /// Number of pending events
    pub async fn size(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// True while appends are being rejected
    pub async fn is_paused(&self) -> bool {
        self.inner.read().await.paused
    }

    /// Discard every pending event and resume ingestion
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        let discarded = inner.events.len();
        inner.events.clear();
        inner.paused = false;
        info!("Event store cleared ({} events discarded)", discarded);
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured overflow policy
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}
