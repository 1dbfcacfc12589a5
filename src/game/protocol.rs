// src/game/protocol.rs
// JSON messages exchanged over the WebSocket

use serde::{Deserialize, Serialize};

use super::entity_state::{Position, Rotation};
use super::events::GameEvent;
use super::pickup::PickupReceipt;
use super::spawn::{SpawnFailure, SpawnRequest};
use super::world_object::ObjectSnapshot;
use super::{ItemId, ObjectId, PlayerId, TransactionId};
use crate::error::{GameError, GameResult};
use crate::maze::MazeOptions;

/// Client → server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        #[serde(default)]
        position: Position,
    },
    Leave,
    UpdatePosition {
        position: Position,
        #[serde(default)]
        rotation: Option<Rotation>,
    },
    RequestSpawn(SpawnRequest),
    RequestPickup {
        object_id: ObjectId,
    },
    DeployTrap {
        object_id: ObjectId,
        position: Position,
        #[serde(default)]
        rotation: Rotation,
    },
    DisarmTrap {
        object_id: ObjectId,
    },
    /// Player walked into a trap
    TriggerTrap {
        object_id: ObjectId,
        #[serde(default)]
        hit_point: Option<Position>,
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
    /// Place the front inventory item as a trap
    PlaceItem {
        position: Position,
        #[serde(default)]
        rotation: Rotation,
    },
    GetInventory,
    GetMaze,
    Ping,
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        player_id: PlayerId,
        maze: MazeOptions,
    },
    /// Enough for a client to rebuild the identical maze locally
    MazeSeed {
        options: MazeOptions,
    },
    SpawnResult {
        transaction_id: TransactionId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object_id: Option<ObjectId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object: Option<ObjectSnapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    PickupResult {
        object_id: ObjectId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    DeployResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object_id: Option<ObjectId>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object: Option<ObjectSnapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    Inventory {
        items: Vec<ItemId>,
    },
    Event {
        event: GameEvent,
    },
    Error {
        code: String,
        message: String,
    },
    Pong {
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn error(err: &GameError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn spawn_result(transaction_id: TransactionId, result: GameResult<ObjectSnapshot>) -> Self {
        match result {
            Ok(object) => ServerMessage::SpawnResult {
                transaction_id,
                success: true,
                object_id: Some(object.object_id),
                object: Some(object),
                error: None,
                error_code: None,
            },
            Err(e) => ServerMessage::SpawnResult {
                transaction_id,
                success: false,
                object_id: None,
                object: None,
                error: Some(e.to_string()),
                error_code: Some(e.code().to_string()),
            },
        }
    }

    pub fn pickup_result(object_id: ObjectId, result: GameResult<PickupReceipt>) -> Self {
        match result {
            Ok(receipt) => ServerMessage::PickupResult {
                object_id,
                success: true,
                item_name: Some(receipt.item_name),
                error: None,
                error_code: None,
            },
            Err(e) => ServerMessage::PickupResult {
                object_id,
                success: false,
                item_name: None,
                error: Some(e.to_string()),
                error_code: Some(e.code().to_string()),
            },
        }
    }

    pub fn deploy_result(object_id: Option<ObjectId>, result: GameResult<ObjectSnapshot>) -> Self {
        match result {
            Ok(object) => ServerMessage::DeployResult {
                object_id: Some(object.object_id),
                success: true,
                object: Some(object),
                error: None,
                error_code: None,
            },
            Err(e) => ServerMessage::DeployResult {
                object_id,
                success: false,
                object: None,
                error: Some(e.to_string()),
                error_code: Some(e.code().to_string()),
            },
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Spawn reply as seen by the requesting client's transaction table
    pub fn spawn_outcome(&self) -> Option<(TransactionId, Result<ObjectId, SpawnFailure>)> {
        let ServerMessage::SpawnResult {
            transaction_id,
            success,
            object_id,
            error,
            error_code,
            ..
        } = self
        else {
            return None;
        };
        let outcome = match (success, object_id) {
            (true, Some(object_id)) => Ok(*object_id),
            _ => Err(SpawnFailure::Rejected {
                code: error_code.clone().unwrap_or_else(|| "unknown".to_string()),
                message: error.clone().unwrap_or_default(),
            }),
        };
        Some((*transaction_id, outcome))
    }
}
