// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Live Update Bus
//!
//! Per-session fan-out of progress, previews, and errors to every connected
//! observer.
//!
//! ## Guarantees
//!
//! - **Causal order per session**: events are sequenced and delivered to
//!   each subscriber in publish order; `stage-completed(k)` always precedes
//!   `stage-started(k+1)`. Nothing is guaranteed across sessions.
//! - **Bounded queues**: each subscription buffers at most `queue_capacity`
//!   events (default 64). On overflow the slow subscriber is disconnected
//!   and its stream ends with a `too-slow` error; state can be reacquired by
//!   re-subscribing and consulting the journal.
//! - **Late subscribers**: a new subscription first receives a snapshot -
//!   the most recent stage lifecycle event and the last preview - before any
//!   live events.
//!
//! Publishing holds the channel lock only for non-blocking `try_send`s, so a
//! slow observer can never stall the scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use comicforge_domain::{EngineError, EventPayload, SessionEvent, SessionId};

/// Default per-subscription queue bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<SessionEvent>,
    too_slow: Arc<AtomicBool>,
}

struct ChannelState {
    sequence: u64,
    next_subscriber_id: u64,
    subscribers: Vec<Subscriber>,
    /// Most recent stage lifecycle event, replayed to late subscribers.
    last_stage_event: Option<SessionEvent>,
    /// Most recent preview event, replayed to late subscribers.
    last_preview: Option<SessionEvent>,
    /// Set once a terminal event has been published.
    closed: bool,
}

/// One subscriber's view of a session's event stream.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<SessionEvent>,
    too_slow: Arc<AtomicBool>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// `Ok(None)` means the stream ended normally (terminal event published
    /// or channel dropped); `Err(too-slow)` means this subscriber was
    /// disconnected for falling behind.
    pub async fn recv(&mut self) -> Result<Option<SessionEvent>, EngineError> {
        match self.rx.recv().await {
            Some(event) => Ok(Some(event)),
            None => {
                if self.too_slow.load(Ordering::SeqCst) {
                    Err(EngineError::TooSlow("subscription queue overflowed".to_string()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Drains events until the stream ends, collecting everything received.
    pub async fn collect_to_end(mut self) -> Result<Vec<SessionEvent>, EngineError> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await? {
            events.push(event);
        }
        Ok(events)
    }
}

/// Engine-wide registry of per-session channels.
pub struct UpdateBus {
    channels: RwLock<HashMap<SessionId, Arc<Mutex<ChannelState>>>>,
    queue_capacity: usize,
}

impl UpdateBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(2),
        }
    }

    /// Opens the channel for a newly admitted session.
    pub fn register(&self, session_id: SessionId) {
        self.channels.write().entry(session_id).or_insert_with(|| {
            Arc::new(Mutex::new(ChannelState {
                sequence: 0,
                next_subscriber_id: 0,
                subscribers: Vec::new(),
                last_stage_event: None,
                last_preview: None,
                closed: false,
            }))
        });
    }

    /// Removes a session's channel after retention elapses.
    pub fn drop_channel(&self, session_id: SessionId) {
        self.channels.write().remove(&session_id);
    }

    fn channel(&self, session_id: SessionId) -> Result<Arc<Mutex<ChannelState>>, EngineError> {
        self.channels
            .read()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(format!("{}", session_id)))
    }

    /// Publishes an event, assigning the next sequence number and fanning
    /// out to all subscribers. Returns the sequenced event.
    pub fn publish(&self, session_id: SessionId, payload: EventPayload) -> Result<SessionEvent, EngineError> {
        let channel = self.channel(session_id)?;
        let mut state = channel.lock();

        let event = SessionEvent::new(session_id, state.sequence, payload);
        state.sequence += 1;

        match &event.payload {
            EventPayload::PreviewAvailable { .. } => state.last_preview = Some(event.clone()),
            EventPayload::StageStarted { .. }
            | EventPayload::StageCompleted { .. }
            | EventPayload::AwaitingFeedback { .. }
            | EventPayload::PipelineCompleted { .. }
            | EventPayload::PipelineCancelled { .. }
            | EventPayload::PipelineFailed { .. } => state.last_stage_event = Some(event.clone()),
            _ => {}
        }

        // Fan out without blocking; drop whoever cannot keep up.
        let mut dropped = Vec::new();
        for subscriber in &state.subscribers {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    subscriber.too_slow.store(true, Ordering::SeqCst);
                    dropped.push(subscriber.id);
                    warn!(session = %session_id, subscriber = subscriber.id, "disconnecting slow subscriber");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(subscriber.id),
            }
        }
        if !dropped.is_empty() {
            state.subscribers.retain(|s| !dropped.contains(&s.id));
        }

        if event.payload.is_terminal() {
            state.closed = true;
            // Dropping the senders ends every stream after it drains.
            state.subscribers.clear();
            debug!(session = %session_id, "channel closed after terminal event");
        }

        Ok(event)
    }

    /// Subscribes to a session, receiving the snapshot first.
    pub fn subscribe(&self, session_id: SessionId) -> Result<Subscription, EngineError> {
        let channel = self.channel(session_id)?;
        let mut state = channel.lock();

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let too_slow = Arc::new(AtomicBool::new(false));

        // Snapshot: current stage, then last preview. Capacity is at least
        // two, so these sends cannot fail.
        if let Some(event) = &state.last_stage_event {
            let _ = tx.try_send(event.clone());
        }
        if let Some(event) = &state.last_preview {
            let _ = tx.try_send(event.clone());
        }

        if !state.closed {
            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;
            state.subscribers.push(Subscriber {
                id,
                tx,
                too_slow: Arc::clone(&too_slow),
            });
        }
        // For a closed channel the sender is dropped here: the subscriber
        // gets the snapshot and then end-of-stream.

        Ok(Subscription { rx, too_slow })
    }

    /// Number of live subscribers across all sessions (for metrics).
    pub fn subscriber_count(&self) -> usize {
        self.channels.read().values().map(|c| c.lock().subscribers.len()).sum()
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
