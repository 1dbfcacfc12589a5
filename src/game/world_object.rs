// src/game/world_object.rs
// Per-object state machine for items and traps
//
//   Idle ──deploy──▶ Deployed ──arm──▶ Armed ──trigger──▶ Armed (reusable)
//     │                                   └──trigger──▶ Despawned (one-shot)
//     └──pickup──▶ PickedUp
//
// Methods here are pure transitions. Authority checks and notifications live
// in the registry that owns the objects.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::catalog::ItemDefinition;
use super::effects::{NoEffect, TrapEffect};
use super::entity_state::{Position, Rotation};
use super::{ItemId, ObjectId, PlayerId};
use crate::error::{GameError, GameResult, ValidationFailure};

/// How an object gets into the armed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Carried as an item and placed by a player
    Manual,
    /// Deploys and arms itself as soon as it is spawned
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    Idle,
    Deployed,
    Armed,
    PickedUp,
    Despawned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Player,
    Game,
}

/// Everything an effect needs to know about a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerContext {
    pub source: TriggerSource,
    /// Entity that set the trap off
    pub instigator: Option<String>,
    pub hit_point: Position,
    pub hit_normal: Position,
    /// Opaque data for concrete effects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl TriggerContext {
    pub fn new(source: TriggerSource, instigator: Option<String>) -> Self {
        Self {
            source,
            instigator,
            hit_point: Position::default(),
            hit_normal: Position::new(0.0, 1.0, 0.0),
            payload: None,
        }
    }

    pub fn with_hit(mut self, point: Position, normal: Position) -> Self {
        self.hit_point = point;
        self.hit_normal = normal;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Replicated view of an object (sent to clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSnapshot {
    pub object_id: ObjectId,
    pub item_id: ItemId,
    pub display_name: String,
    pub placement: Placement,
    pub state: ObjectState,
    pub position: Position,
    pub rotation: Rotation,
    pub owner: Option<PlayerId>,
    pub cooldown_ms: u64,
    pub one_shot: bool,
}

/// A spawned item or trap
#[derive(Debug, Clone)]
pub struct WorldObject {
    pub object_id: ObjectId,
    pub item_id: ItemId,
    pub display_name: String,
    pub placement: Placement,
    pub position: Position,
    pub rotation: Rotation,
    pub owner: Option<PlayerId>,
    pub spawned_by: Option<PlayerId>,
    pub cooldown: Duration,
    pub one_shot: bool,
    deployed: bool,
    armed: bool,
    picked_up: bool,
    pickup_in_progress: bool,
    despawned: bool,
    last_trigger: Option<Instant>,
    effect: Arc<dyn TrapEffect>,
}

impl WorldObject {
    pub fn new(
        object_id: ObjectId,
        definition: &ItemDefinition,
        position: Position,
        rotation: Rotation,
        spawned_by: Option<PlayerId>,
    ) -> Self {
        Self {
            object_id,
            item_id: definition.item_id,
            display_name: definition.name.clone(),
            placement: definition.placement,
            position,
            rotation,
            owner: None,
            spawned_by,
            cooldown: definition.cooldown(),
            one_shot: definition.one_shot,
            deployed: false,
            armed: false,
            picked_up: false,
            pickup_in_progress: false,
            despawned: false,
            last_trigger: None,
            effect: definition.effect.build(),
        }
    }

    /// Rebuild a replica from a snapshot. Replicas carry no effect.
    pub fn from_snapshot(snapshot: &ObjectSnapshot) -> Self {
        let (deployed, armed, picked_up, despawned) = match snapshot.state {
            ObjectState::Idle => (false, false, false, false),
            ObjectState::Deployed => (true, false, false, false),
            ObjectState::Armed => (true, true, false, false),
            ObjectState::PickedUp => (false, false, true, false),
            ObjectState::Despawned => (false, false, false, true),
        };
        Self {
            object_id: snapshot.object_id,
            item_id: snapshot.item_id,
            display_name: snapshot.display_name.clone(),
            placement: snapshot.placement,
            position: snapshot.position,
            rotation: snapshot.rotation,
            owner: snapshot.owner.clone(),
            spawned_by: None,
            cooldown: Duration::from_millis(snapshot.cooldown_ms),
            one_shot: snapshot.one_shot,
            deployed,
            armed,
            picked_up,
            pickup_in_progress: false,
            despawned,
            last_trigger: None,
            effect: Arc::new(NoEffect),
        }
    }

    pub fn state(&self) -> ObjectState {
        if self.despawned {
            ObjectState::Despawned
        } else if self.picked_up {
            ObjectState::PickedUp
        } else if self.armed {
            ObjectState::Armed
        } else if self.deployed {
            ObjectState::Deployed
        } else {
            ObjectState::Idle
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.deployed
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_picked_up(&self) -> bool {
        self.picked_up
    }

    pub fn is_pickup_in_progress(&self) -> bool {
        self.pickup_in_progress
    }

    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }

    pub fn effect(&self) -> Arc<dyn TrapEffect> {
        self.effect.clone()
    }

    fn invalid(&self, operation: &'static str) -> GameError {
        GameError::InvalidTransition {
            object_id: self.object_id,
            state: self.state(),
            operation,
        }
    }

    /// Place a manual object as a trap and arm it
    pub fn deploy(&mut self, position: Position, rotation: Rotation, owner: PlayerId) -> GameResult<()> {
        if self.placement == Placement::Auto {
            return Err(ValidationFailure::AutoPlacement(self.object_id).into());
        }
        if self.state() != ObjectState::Idle || self.pickup_in_progress {
            return Err(self.invalid("deploy"));
        }
        self.position = position;
        self.rotation = rotation;
        self.deployed = true;
        self.owner = Some(owner);
        self.arm()?;
        Ok(())
    }

    /// Auto placement: deploy and arm in place right after spawn
    pub fn self_deploy(&mut self) -> GameResult<()> {
        if self.placement != Placement::Auto || self.state() != ObjectState::Idle {
            return Err(self.invalid("self_deploy"));
        }
        self.deployed = true;
        self.arm()?;
        Ok(())
    }

    /// Returns whether the object was not armed before
    pub fn arm(&mut self) -> GameResult<bool> {
        if !self.deployed || self.despawned {
            return Err(self.invalid("arm"));
        }
        let changed = !self.armed;
        self.armed = true;
        Ok(changed)
    }

    /// Returns whether the object was armed before
    pub fn disarm(&mut self) -> bool {
        let changed = self.armed;
        self.armed = false;
        changed
    }

    pub fn can_trigger(&self, now: Instant) -> bool {
        self.deployed
            && self.armed
            && !self.despawned
            && self
                .last_trigger
                .map_or(true, |last| now.saturating_duration_since(last) >= self.cooldown)
    }

    /// Record a trigger if allowed. One-shot objects end up Despawned.
    pub fn record_trigger(&mut self, now: Instant) -> bool {
        if !self.can_trigger(now) {
            return false;
        }
        self.last_trigger = Some(now);
        if self.one_shot {
            self.armed = false;
            self.deployed = false;
            self.despawned = true;
        }
        true
    }

    pub fn can_be_picked_up(&self) -> bool {
        !self.picked_up && !self.deployed && !self.pickup_in_progress && !self.despawned
    }

    pub(crate) fn begin_pickup(&mut self) {
        self.pickup_in_progress = true;
    }

    pub(crate) fn rollback_pickup(&mut self) {
        self.pickup_in_progress = false;
    }

    pub(crate) fn commit_pickup(&mut self) {
        self.picked_up = true;
        self.pickup_in_progress = false;
    }

    pub(crate) fn mark_despawned(&mut self) {
        self.deployed = false;
        self.armed = false;
        self.despawned = true;
    }

    pub fn snapshot(&self) -> ObjectSnapshot {
        ObjectSnapshot {
            object_id: self.object_id,
            item_id: self.item_id,
            display_name: self.display_name.clone(),
            placement: self.placement,
            state: self.state(),
            position: self.position,
            rotation: self.rotation,
            owner: self.owner.clone(),
            cooldown_ms: self.cooldown.as_millis() as u64,
            one_shot: self.one_shot,
        }
    }
}
