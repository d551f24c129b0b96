use ralph_core::{ChangedFileRecord, PushEvent, StatusRecord, TaskRecord};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

pub type SubscriberId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("broadcaster is shut down")]
    Closed,
}

/// Latest full value of each replaceable slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub status: Option<StatusRecord>,
    pub tasks: Vec<TaskRecord>,
    pub files: Vec<ChangedFileRecord>,
}

/// One subscriber's end of the broadcast group. Messages are serialized
/// envelopes, delivered in publish order.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<String>,
}

struct Registry {
    closed: bool,
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, mpsc::Sender<String>>,
    snapshot: Snapshot,
}

/// Fan-out of push events to every connected subscriber.
///
/// Each subscriber gets a bounded queue; a subscriber whose queue is full or
/// closed is dropped from the group without delaying anyone else. Publish
/// and subscribe share one lock, so a joining subscriber's status snapshot
/// always precedes later events.
pub struct Broadcaster {
    capacity: usize,
    inner: Mutex<Registry>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Registry {
                closed: false,
                next_id: 0,
                subscribers: HashMap::new(),
                snapshot: Snapshot::default(),
            }),
        }
    }

    pub fn subscribe(&self) -> Result<Subscription, BroadcastError> {
        let mut registry = self.lock();
        if registry.closed {
            return Err(BroadcastError::Closed);
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        registry.next_id += 1;
        let id = registry.next_id;

        if let Some(status) = registry.snapshot.status.clone() {
            match PushEvent::Status(status).to_json() {
                Ok(raw) => {
                    let _ = tx.try_send(raw);
                }
                Err(err) => warn!(event = "encode_error", kind = "status", error = %err),
            }
        }

        registry.subscribers.insert(id, tx);
        info!(
            event = "subscriber_joined",
            subscriber = id,
            subscribers = registry.subscribers.len()
        );
        Ok(Subscription { id, receiver: rx })
    }

    /// Sends `event` to every subscriber and returns how many accepted it.
    pub fn publish(&self, event: PushEvent) -> usize {
        let raw = match event.to_json() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(event = "encode_error", kind = event.kind(), error = %err);
                return 0;
            }
        };
        let kind = event.kind();

        let mut registry = self.lock();
        match event {
            PushEvent::Status(status) => registry.snapshot.status = Some(status),
            PushEvent::Tasks(tasks) => registry.snapshot.tasks = tasks,
            PushEvent::Files(files) => registry.snapshot.files = files,
            PushEvent::Logs(_) | PushEvent::LogClear | PushEvent::Pong => {}
        }

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, tx) in &registry.subscribers {
            match tx.try_send(raw.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(event = "subscriber_overflow", subscriber = *id, kind = kind);
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            registry.subscribers.remove(&id);
            info!(event = "subscriber_dropped", subscriber = id);
        }
        debug!(event = "broadcast", kind = kind, delivered = delivered);
        delivered
    }

    /// Queues `event` for one subscriber only, behind anything already queued.
    pub fn send_to(&self, id: SubscriberId, event: PushEvent) -> bool {
        let raw = match event.to_json() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(event = "encode_error", kind = event.kind(), error = %err);
                return false;
            }
        };
        let mut registry = self.lock();
        let Some(tx) = registry.subscribers.get(&id) else {
            return false;
        };
        if tx.try_send(raw).is_ok() {
            return true;
        }
        registry.subscribers.remove(&id);
        info!(event = "subscriber_dropped", subscriber = id);
        false
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.lock().subscribers.remove(&id).is_some();
        if removed {
            info!(event = "subscriber_left", subscriber = id);
        }
        removed
    }

    /// Closes every subscriber queue and refuses new subscriptions.
    pub fn shutdown(&self) {
        let mut registry = self.lock();
        registry.closed = true;
        let count = registry.subscribers.len();
        registry.subscribers.clear();
        info!(event = "broadcaster_shutdown", subscribers = count);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
