// src/game/mod.rs
// Server-authoritative game state: world objects (items/traps), inventories,
// spawn and pickup transactions, and the client-side mirror.

pub mod catalog;
pub mod client;
pub mod effects;
pub mod entity_state;
pub mod events;
pub mod inventory;
pub mod pickup;
pub mod protocol;
pub mod registry;
pub mod schedule;
pub mod server;
pub mod spawn;
pub mod world_object;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GameError, GameResult};

/// Network identity of a spawned world object (assigned by the server)
pub type ObjectId = u64;
/// Catalog id of an item kind; valid ids are positive
pub type ItemId = i32;
/// Player / connection identity
pub type PlayerId = String;
/// Client-local spawn correlation id
pub type TransactionId = u64;

pub use catalog::{ItemCatalog, ItemDefinition};
pub use client::ClientSession;
pub use effects::{EffectKind, StatusBoard, StatusEffect, StatusKind, TrapEffect};
pub use entity_state::{PlayerRegistry, PlayerState, Position, Rotation};
pub use events::{EventBus, GameEvent, ObjectSubscription};
pub use inventory::{Inventory, InventoryReplicator};
pub use pickup::{PickupCoordinator, PickupReceipt};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{ObjectRegistry, TriggerOutcome};
pub use schedule::{DeadlineQueue, ScheduledAction};
pub use server::{GameServer, ServerStats};
pub use spawn::{SpawnFailure, SpawnRequest, SpawnResolution, SpawnService, SpawnTransactions};
pub use world_object::{ObjectSnapshot, ObjectState, Placement, TriggerContext, TriggerSource, WorldObject};

/// Which side of the wire a component runs on. Only the server may mutate
/// shared state; clients hold replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn is_authority(self) -> bool {
        self == Role::Server
    }

    /// Refuse `operation` unless running as the server
    pub fn ensure_authority(self, operation: &'static str) -> GameResult<()> {
        if self.is_authority() {
            Ok(())
        } else {
            warn!(operation = operation, role = ?self, "Refused mutation outside the authority");
            Err(GameError::authority(operation))
        }
    }
}
