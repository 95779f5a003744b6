//! Mutation events and the typed publish/subscribe bus.
//!
//! Every committed mutation produces one or more [`BoardEvent`]s wrapped in
//! an [`EventEnvelope`] naming the originating actor. The transport layer
//! subscribes once and fans events out to the authorized audience; clients
//! feed received events into their [`CardMirror`](crate::mirror::CardMirror).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::model::{Board, Card, Project, Scope};

/// An `(id, position)` pair carried by a positions broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionPair {
    pub id: String,
    pub position: i64,
}

/// Events pushed to live clients after a committed mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardEvent {
    /// The full live ordering of a scope after a position mutation.
    /// `rev` is the scope's stamp; mirrors drop events that are not newer
    /// than the last one they applied.
    CardPositionsChanged {
        scope: Scope,
        pairs: Vec<PositionPair>,
        rev: i64,
    },
    /// A card left one scope for another.
    CardMovedLane {
        card: Card,
        from_scope: Scope,
        to_scope: Scope,
    },
    CardAdded {
        card: Card,
    },
    CardEdited {
        card: Card,
    },
    CardArchived {
        card_id: String,
        scope: Scope,
    },
    BoardAdded {
        board: Board,
    },
    BoardEdited {
        board: Board,
    },
    BoardArchived {
        board: Board,
    },
    ProjectAdded {
        project: Project,
    },
    ProjectEdited {
        project: Project,
    },
}

impl BoardEvent {
    /// The event kind as a string, for logging and routing.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CardPositionsChanged { .. } => "card_positions_changed",
            Self::CardMovedLane { .. } => "card_moved_lane",
            Self::CardAdded { .. } => "card_added",
            Self::CardEdited { .. } => "card_edited",
            Self::CardArchived { .. } => "card_archived",
            Self::BoardAdded { .. } => "board_added",
            Self::BoardEdited { .. } => "board_edited",
            Self::BoardArchived { .. } => "board_archived",
            Self::ProjectAdded { .. } => "project_added",
            Self::ProjectEdited { .. } => "project_edited",
        }
    }
}

/// A committed event together with who caused it. Broadcast excludes the
/// actor; their own client already applied the change optimistically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub actor: String,
    #[serde(flatten)]
    pub event: BoardEvent,
}

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback function type for board events.
pub type EventCallback = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

/// Thread-safe registry for event subscriptions.
///
/// One bus replaces per-feature listener arrays: anything interested in
/// mutations (broadcaster, caches, tests) subscribes here.
pub struct EventBus {
    callbacks: RwLock<HashMap<SubscriptionId, EventCallback>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to board events.
    ///
    /// Returns a subscription ID that can be used to unsubscribe later.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut callbacks = self.callbacks.write().unwrap();
        callbacks.insert(id, callback);
        id
    }

    /// Unsubscribe; returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write().unwrap();
        callbacks.remove(&id).is_some()
    }

    /// Emit an envelope to all subscribers.
    ///
    /// Callbacks run synchronously in undefined order; a panicking callback
    /// does not affect the others.
    pub fn emit(&self, envelope: &EventEnvelope) {
        let callbacks = self.callbacks.read().unwrap();
        for callback in callbacks.values() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(envelope);
            }));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let callbacks = self.callbacks.read().unwrap();
        callbacks.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let callbacks = self.callbacks.read().unwrap();
        f.debug_struct("EventBus")
            .field("subscriber_count", &callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn envelope() -> EventEnvelope {
        EventEnvelope {
            actor: "u1".into(),
            event: BoardEvent::CardPositionsChanged {
                scope: Scope::new("b1", "todo"),
                pairs: vec![PositionPair {
                    id: "c1".into(),
                    position: 0,
                }],
                rev: 3,
            },
        }
    }

    #[test]
    fn subscribe_emit_unsubscribe() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        let id = bus.subscribe(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(&envelope());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(id));
        bus.emit(&envelope());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn panicking_callback_is_isolated() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(|_| panic!("bad subscriber")));
        let c = Arc::clone(&counter);
        bus.subscribe(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(&envelope());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_serialization_is_tagged() {
        let json = serde_json::to_string(&envelope()).unwrap();
        assert!(json.contains("\"type\":\"card_positions_changed\""));
        assert!(json.contains("\"actor\":\"u1\""));
        assert!(json.contains("\"rev\":3"));

        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event.kind(), "card_positions_changed");
    }
}
