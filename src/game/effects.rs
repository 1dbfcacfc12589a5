// src/game/effects.rs
// Trap effect strategies and the per-entity status board they write to.
//
// The state machine only knows the `TrapEffect` contract. Each concrete effect
// turns a trigger context into an optional timed status on the instigator.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::world_object::TriggerContext;

/// Status conditions an effect can leave on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Frozen,
    Slowed,
    Blinded,
    Revealed,
}

/// What a trigger did to whom
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEffect {
    pub entity_id: String,
    pub status: StatusKind,
    /// Effect strength (e.g. speed multiplier for Slowed); 1.0 when unused
    pub magnitude: f32,
    pub duration: Duration,
}

pub trait TrapEffect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Apply to the trigger's instigator. None when there is nothing to affect.
    fn apply(&self, context: &TriggerContext) -> Option<StatusEffect>;
}

/// Serializable effect tag used in the item catalog
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectKind {
    None,
    Freeze { duration_ms: u64 },
    Slow { factor: f32, duration_ms: u64 },
    Blind { duration_ms: u64 },
    Reveal { duration_ms: u64 },
}

impl EffectKind {
    pub fn build(&self) -> Arc<dyn TrapEffect> {
        match *self {
            EffectKind::None => Arc::new(NoEffect),
            EffectKind::Freeze { duration_ms } => Arc::new(TimedStatus {
                name: "freeze",
                status: StatusKind::Frozen,
                magnitude: 0.0,
                duration: Duration::from_millis(duration_ms),
            }),
            EffectKind::Slow { factor, duration_ms } => Arc::new(TimedStatus {
                name: "slow",
                status: StatusKind::Slowed,
                magnitude: factor.clamp(0.0, 1.0),
                duration: Duration::from_millis(duration_ms),
            }),
            EffectKind::Blind { duration_ms } => Arc::new(TimedStatus {
                name: "blind",
                status: StatusKind::Blinded,
                magnitude: 1.0,
                duration: Duration::from_millis(duration_ms),
            }),
            EffectKind::Reveal { duration_ms } => Arc::new(TimedStatus {
                name: "reveal",
                status: StatusKind::Revealed,
                magnitude: 1.0,
                duration: Duration::from_millis(duration_ms),
            }),
        }
    }
}

/// Plain item with no trap behavior
#[derive(Debug)]
pub struct NoEffect;

impl TrapEffect for NoEffect {
    fn name(&self) -> &'static str {
        "none"
    }

    fn apply(&self, _context: &TriggerContext) -> Option<StatusEffect> {
        None
    }
}

/// Applies one status for a fixed duration
#[derive(Debug)]
struct TimedStatus {
    name: &'static str,
    status: StatusKind,
    magnitude: f32,
    duration: Duration,
}

impl TrapEffect for TimedStatus {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, context: &TriggerContext) -> Option<StatusEffect> {
        let entity_id = context.instigator.clone()?;
        Some(StatusEffect {
            entity_id,
            status: self.status,
            magnitude: self.magnitude,
            duration: self.duration,
        })
    }
}

/// A status currently in force
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveStatus {
    pub status: StatusKind,
    pub magnitude: f32,
    #[serde(skip)]
    pub expires_at: Instant,
}

/// Active statuses per entity
#[derive(Clone, Default)]
pub struct StatusBoard {
    active: Arc<DashMap<String, Vec<ActiveStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply (or refresh) a status. Returns its expiry.
    pub fn apply(&self, effect: &StatusEffect, now: Instant) -> Instant {
        let expires_at = now + effect.duration;
        let mut statuses = self.active.entry(effect.entity_id.clone()).or_default();
        statuses.retain(|active| active.status != effect.status);
        statuses.push(ActiveStatus {
            status: effect.status,
            magnitude: effect.magnitude,
            expires_at,
        });
        debug!(
            entity_id = %effect.entity_id,
            status = ?effect.status,
            duration_ms = effect.duration.as_millis() as u64,
            "Status applied"
        );
        expires_at
    }

    /// Remove `status` if it has run out by `now`. A refreshed status with a
    /// later expiry is left alone.
    pub fn expire(&self, entity_id: &str, status: StatusKind, now: Instant) -> bool {
        let Some(mut statuses) = self.active.get_mut(entity_id) else {
            return false;
        };
        let before = statuses.len();
        statuses.retain(|active| !(active.status == status && active.expires_at <= now));
        let removed = statuses.len() != before;
        let now_empty = statuses.is_empty();
        drop(statuses);

        if now_empty {
            self.active.remove_if(entity_id, |_, statuses| statuses.is_empty());
        }
        removed
    }

    pub fn has_status(&self, entity_id: &str, status: StatusKind) -> bool {
        self.active
            .get(entity_id)
            .map(|statuses| statuses.iter().any(|active| active.status == status))
            .unwrap_or(false)
    }

    pub fn statuses(&self, entity_id: &str) -> Vec<ActiveStatus> {
        self.active
            .get(entity_id)
            .map(|statuses| statuses.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self, entity_id: &str) {
        self.active.remove(entity_id);
    }
}
