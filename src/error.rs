// src/error.rs
// Error taxonomy for the authoritative game core

use crate::game::{ItemId, ObjectId, ObjectState, TransactionId};

/// Top-level game error. Nothing here is fatal to the process; every variant is
/// reported back to the single caller that caused it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    #[error("authority violation: {operation} may only run on the server")]
    AuthorityViolation { operation: &'static str },

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error("object {object_id} cannot {operation} while {state:?}")]
    InvalidTransition {
        object_id: ObjectId,
        state: ObjectState,
        operation: &'static str,
    },

    #[error("replication failed: {0}")]
    Replication(String),

    #[error("transaction {0} timed out")]
    TransactionTimeout(TransactionId),
}

/// Request validation failures, sent only to the requester
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("unknown item id {0}")]
    UnknownItem(ItemId),

    #[error("invalid item id {0}")]
    InvalidItemId(ItemId),

    #[error("spawn limit reached ({max} objects)")]
    SpawnLimitReached { max: usize },

    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),

    #[error("player {0} not found")]
    PlayerNotFound(String),

    #[error("object {0} is already taken")]
    AlreadyTaken(ObjectId),

    #[error("object {0} is a deployed trap")]
    CannotPickupDeployed(ObjectId),

    #[error("too far: {distance:.1}m > {max:.1}m")]
    TooFar { distance: f32, max: f32 },

    #[error("inventory full")]
    InventoryFull,

    #[error("inventory add failed: {0}")]
    InventoryAddFailed(String),

    #[error("inventory empty")]
    InventoryEmpty,

    #[error("object {0} places itself and cannot be deployed manually")]
    AutoPlacement(ObjectId),
}

impl GameError {
    pub fn authority(operation: &'static str) -> Self {
        GameError::AuthorityViolation { operation }
    }

    /// Short machine-readable code for protocol replies
    pub fn code(&self) -> &'static str {
        match self {
            GameError::AuthorityViolation { .. } => "authority_violation",
            GameError::InvalidTransition { .. } => "invalid_transition",
            GameError::Replication(_) => "replication_failed",
            GameError::TransactionTimeout(_) => "transaction_timeout",
            GameError::Validation(failure) => match failure {
                ValidationFailure::UnknownItem(_) => "unknown_item",
                ValidationFailure::InvalidItemId(_) => "invalid_item_id",
                ValidationFailure::SpawnLimitReached { .. } => "spawn_limit_reached",
                ValidationFailure::ObjectNotFound(_) => "object_not_found",
                ValidationFailure::PlayerNotFound(_) => "player_not_found",
                ValidationFailure::AlreadyTaken(_) => "already_taken",
                ValidationFailure::CannotPickupDeployed(_) => "cannot_pickup_deployed",
                ValidationFailure::TooFar { .. } => "too_far",
                ValidationFailure::InventoryFull => "inventory_full",
                ValidationFailure::InventoryAddFailed(_) => "inventory_add_failed",
                ValidationFailure::InventoryEmpty => "inventory_empty",
                ValidationFailure::AutoPlacement(_) => "auto_placement",
            },
        }
    }
}

pub type GameResult<T> = Result<T, GameError>;
