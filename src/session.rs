// ABOUTME: Session manager issuing unguessable session ids and fanning out worker events
// ABOUTME: Publish/subscribe decoupled from transports; events with no listener are dropped
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::stdio::EventSink;
use crate::types::BridgeError;

/// Events buffered per subscriber before new ones are dropped
const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Envelope>,
}

struct Session {
    generation: u64,
    created_at: Instant,
    subscribers: Vec<Subscriber>,
}

/// Registry of live sessions and their streaming subscriptions
///
/// There is no replay: an event published while a session has no open
/// subscription is dropped.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    next_subscriber: AtomicU64,
}

/// Receiving end of one streaming subscription
///
/// The stream ends when the session is terminated.
#[derive(Debug)]
pub struct Subscription {
    session_id: String,
    rx: mpsc::Receiver<Envelope>,
}

impl SessionManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a new session id bound to worker instance `generation`
    pub fn create(&self, generation: u64) -> String {
        let id = Uuid::new_v4().simple().to_string();
        self.table().insert(
            id.clone(),
            Session {
                generation,
                created_at: Instant::now(),
                subscribers: Vec::new(),
            },
        );
        info!(session_id = %id, generation, "Session created");
        id
    }

    /// Whether the session exists
    pub fn contains(&self, session_id: &str) -> bool {
        self.table().contains_key(session_id)
    }

    /// Worker instance the session was opened against
    pub fn generation(&self, session_id: &str) -> Option<u64> {
        self.table().get(session_id).map(|s| s.generation)
    }

    /// Age of the longest-lived session
    pub fn oldest_age(&self) -> Option<Duration> {
        self.table().values().map(|s| s.created_at.elapsed()).max()
    }

    /// End every session opened against a worker instance other than `generation`
    pub fn retain_generation(&self, generation: u64) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, session| session.generation == generation);
        let removed = before - table.len();
        if removed > 0 {
            info!(removed, generation, "Terminated sessions of a retired worker instance");
        }
        removed
    }

    /// Open a streaming subscription on an existing session
    pub fn subscribe(&self, session_id: &str) -> Result<Subscription, BridgeError> {
        let mut table = self.table();
        let session = table
            .get_mut(session_id)
            .ok_or_else(|| BridgeError::session(format!("Unknown session: {session_id}")))?;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        session.subscribers.push(Subscriber { id, tx });
        debug!(session_id, subscriber = id, "Subscription opened");

        Ok(Subscription {
            session_id: session_id.to_owned(),
            rx,
        })
    }

    /// Deliver an event to every open subscription of one session
    ///
    /// Returns how many subscribers received it. Closed subscriptions are
    /// pruned; a subscriber whose queue is full misses the event.
    pub fn publish(&self, session_id: &str, envelope: Envelope) -> usize {
        let mut table = self.table();
        let Some(session) = table.get_mut(session_id) else {
            debug!(session_id, "Dropping event for unknown session");
            return 0;
        };
        deliver(session_id, session, &envelope)
    }

    /// Deliver an event to every open subscription of every session
    pub fn publish_all(&self, envelope: &Envelope) -> usize {
        let mut table = self.table();
        table
            .iter_mut()
            .map(|(id, session)| deliver(id, session, envelope))
            .sum()
    }

    /// End a session and close its subscriptions; unknown ids are a no-op
    pub fn terminate(&self, session_id: &str) -> bool {
        let removed = self.table().remove(session_id);
        match removed {
            Some(session) => {
                info!(
                    session_id,
                    subscribers = session.subscribers.len(),
                    "Session terminated"
                );
                true
            }
            None => {
                debug!(session_id, "Terminate for unknown session ignored");
                false
            }
        }
    }

    /// End every session (worker restart or shutdown)
    pub fn terminate_all(&self) -> usize {
        let drained: Vec<String> = self.table().drain().map(|(id, _)| id).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Terminated all sessions");
        }
        drained.len()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(session_id: &str, session: &mut Session, envelope: &Envelope) -> usize {
    let mut delivered = 0;
    session.subscribers.retain(|sub| match sub.tx.try_send(envelope.clone()) {
        Ok(()) => {
            delivered += 1;
            true
        }
        Err(TrySendError::Full(_)) => {
            warn!(session_id, subscriber = sub.id, "Subscriber queue full, dropping event");
            true
        }
        Err(TrySendError::Closed(_)) => {
            debug!(session_id, subscriber = sub.id, "Subscriber went away");
            false
        }
    });
    delivered
}

impl EventSink for SessionManager {
    fn publish(&self, envelope: Envelope) {
        let delivered = self.publish_all(&envelope);
        if delivered == 0 {
            debug!(method = ?envelope.method(), "No subscriber for worker event, dropped");
        }
    }
}

impl Subscription {
    /// Session this subscription belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next event, or `None` once the session is terminated
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Convert into a `Stream` of events
    pub fn into_stream(self) -> ReceiverStream<Envelope> {
        ReceiverStream::new(self.rx)
    }
}
