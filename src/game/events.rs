// src/game/events.rs
// One-way state change notifications from the authority to observers

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use super::effects::StatusKind;
use super::entity_state::Position;
use super::world_object::{ObjectSnapshot, TriggerContext};
use super::{ItemId, ObjectId, PlayerId};
use crate::maze::MazeOptions;

/// Every state transition is published exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    ObjectSpawned {
        object: ObjectSnapshot,
    },
    /// The object became a trap and is no longer a loose pickupable item
    ObjectDeployed {
        object_id: ObjectId,
        owner: Option<PlayerId>,
        position: Position,
    },
    ObjectArmed {
        object_id: ObjectId,
    },
    ObjectDisarmed {
        object_id: ObjectId,
    },
    TrapTriggered {
        object_id: ObjectId,
        item_id: ItemId,
        context: TriggerContext,
    },
    ObjectPickedUp {
        object_id: ObjectId,
        player_id: PlayerId,
    },
    ObjectDespawned {
        object_id: ObjectId,
    },
    InventoryUpdated {
        player_id: PlayerId,
        items: Vec<ItemId>,
    },
    StatusApplied {
        entity_id: String,
        status: StatusKind,
        magnitude: f32,
        duration_ms: u64,
    },
    StatusExpired {
        entity_id: String,
        status: StatusKind,
    },
    PlayerJoined {
        player_id: PlayerId,
        position: Position,
    },
    PlayerLeft {
        player_id: PlayerId,
    },
    MazeRebuilt {
        options: MazeOptions,
    },
}

impl GameEvent {
    /// Object this event is about, if any
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            GameEvent::ObjectSpawned { object } => Some(object.object_id),
            GameEvent::ObjectDeployed { object_id, .. }
            | GameEvent::ObjectArmed { object_id }
            | GameEvent::ObjectDisarmed { object_id }
            | GameEvent::TrapTriggered { object_id, .. }
            | GameEvent::ObjectPickedUp { object_id, .. }
            | GameEvent::ObjectDespawned { object_id } => Some(*object_id),
            _ => None,
        }
    }
}

/// Broadcast bus. Subscribing to the bus is the global channel; per-object
/// observers use `subscribe_object`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: GameEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }

    pub fn subscribe_object(&self, object_id: ObjectId) -> ObjectSubscription {
        ObjectSubscription {
            object_id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Instance-scoped view of the bus: only events about one object
pub struct ObjectSubscription {
    object_id: ObjectId,
    rx: broadcast::Receiver<GameEvent>,
}

impl ObjectSubscription {
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Next buffered event for this object, without waiting
    pub fn try_next(&mut self) -> Option<GameEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.object_id() == Some(self.object_id) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(object_id = self.object_id, skipped = skipped, "Object subscription lagged");
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next event for this object. None once the bus is gone.
    pub async fn next(&mut self) -> Option<GameEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.object_id() == Some(self.object_id) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(object_id = self.object_id, skipped = skipped, "Object subscription lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
