// src/game/registry.rs
// Object identity → state table. On the server this is the authority for every
// item and trap; on a client the same type holds read-only replicas.

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::catalog::ItemDefinition;
use super::effects::StatusEffect;
use super::entity_state::{Position, Rotation};
use super::events::{EventBus, GameEvent};
use super::world_object::{ObjectSnapshot, ObjectState, Placement, TriggerContext, WorldObject};
use super::{ObjectId, PlayerId, Role};
use crate::error::{GameResult, ValidationFailure};

/// Result of a trigger attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// Not armed, not deployed or still cooling down. Routine, not an error.
    Ignored,
    Fired {
        status: Option<StatusEffect>,
        despawned: bool,
    },
}

impl TriggerOutcome {
    pub fn fired(&self) -> bool {
        matches!(self, TriggerOutcome::Fired { .. })
    }
}

pub struct ObjectRegistry {
    role: Role,
    objects: Arc<DashMap<ObjectId, WorldObject>>,
    next_id: AtomicU64,
    bus: EventBus,
}

impl ObjectRegistry {
    pub fn new(role: Role, bus: EventBus) -> Self {
        Self {
            role,
            objects: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            bus,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Instantiate an object from its definition and replicate it.
    /// Auto-placement objects come back already deployed and armed.
    pub fn spawn(
        &self,
        definition: &ItemDefinition,
        position: Position,
        rotation: Rotation,
        spawned_by: Option<PlayerId>,
    ) -> GameResult<ObjectSnapshot> {
        self.role.ensure_authority("spawn")?;

        let object_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut object = WorldObject::new(object_id, definition, position, rotation, spawned_by);
        if object.placement == Placement::Auto {
            object.self_deploy()?;
        }
        let snapshot = object.snapshot();
        self.objects.insert(object_id, object);

        info!(
            object_id = object_id,
            item_id = definition.item_id,
            placement = ?definition.placement,
            object_count = self.objects.len(),
            "Object spawned"
        );

        self.bus.publish(GameEvent::ObjectSpawned { object: snapshot.clone() });
        if snapshot.state == ObjectState::Armed {
            self.bus.publish(GameEvent::ObjectArmed { object_id });
        }
        Ok(snapshot)
    }

    /// Manual placement: Idle → Deployed → Armed, owned by `owner`
    pub fn deploy(
        &self,
        object_id: ObjectId,
        position: Position,
        rotation: Rotation,
        owner: &str,
    ) -> GameResult<ObjectSnapshot> {
        self.role.ensure_authority("deploy")?;

        let snapshot = {
            let mut object = self.lock(object_id)?;
            object.deploy(position, rotation, owner.to_string())?;
            object.snapshot()
        };

        info!(object_id = object_id, owner = %owner, "Trap deployed and armed");
        self.bus.publish(GameEvent::ObjectDeployed {
            object_id,
            owner: snapshot.owner.clone(),
            position,
        });
        self.bus.publish(GameEvent::ObjectArmed { object_id });
        Ok(snapshot)
    }

    pub fn arm(&self, object_id: ObjectId) -> GameResult<bool> {
        self.role.ensure_authority("arm")?;
        let changed = self.lock(object_id)?.arm()?;
        if changed {
            self.bus.publish(GameEvent::ObjectArmed { object_id });
        }
        Ok(changed)
    }

    pub fn disarm(&self, object_id: ObjectId) -> GameResult<bool> {
        self.role.ensure_authority("disarm")?;
        let changed = self.lock(object_id)?.disarm();
        if changed {
            debug!(object_id = object_id, "Trap disarmed");
            self.bus.publish(GameEvent::ObjectDisarmed { object_id });
        }
        Ok(changed)
    }

    /// Fire a trap if it can fire. Safe to call every tick.
    pub fn trigger(&self, object_id: ObjectId, context: TriggerContext, now: Instant) -> GameResult<TriggerOutcome> {
        self.role.ensure_authority("trigger")?;

        let (item_id, effect, despawned) = {
            let mut object = self.lock(object_id)?;
            if !object.record_trigger(now) {
                debug!(object_id = object_id, state = ?object.state(), "Trigger ignored");
                return Ok(TriggerOutcome::Ignored);
            }
            (object.item_id, object.effect(), object.state() == ObjectState::Despawned)
        };

        info!(
            object_id = object_id,
            item_id = item_id,
            effect = effect.name(),
            source = ?context.source,
            instigator = ?context.instigator,
            "Trap triggered"
        );

        let status = effect.apply(&context);
        self.bus.publish(GameEvent::TrapTriggered {
            object_id,
            item_id,
            context,
        });

        if despawned {
            self.remove(object_id);
        }

        Ok(TriggerOutcome::Fired { status, despawned })
    }

    /// Remove an object from the world
    pub fn despawn(&self, object_id: ObjectId) -> GameResult<bool> {
        self.role.ensure_authority("despawn")?;
        if let Some(mut object) = self.objects.get_mut(&object_id) {
            object.mark_despawned();
        }
        Ok(self.remove(object_id))
    }

    fn remove(&self, object_id: ObjectId) -> bool {
        let removed = self.objects.remove(&object_id).is_some();
        if removed {
            info!(
                object_id = object_id,
                object_count = self.objects.len(),
                "Object despawned"
            );
            self.bus.publish(GameEvent::ObjectDespawned { object_id });
        }
        removed
    }

    /// Exclusive access to one object for multi-step transactions.
    /// Do not call back into this registry while holding the guard.
    pub(crate) fn lock(&self, object_id: ObjectId) -> GameResult<RefMut<'_, ObjectId, WorldObject>> {
        self.objects
            .get_mut(&object_id)
            .ok_or_else(|| ValidationFailure::ObjectNotFound(object_id).into())
    }

    pub fn get(&self, object_id: ObjectId) -> Option<ObjectSnapshot> {
        self.objects.get(&object_id).map(|object| object.snapshot())
    }

    pub fn contains(&self, object_id: ObjectId) -> bool {
        self.objects.contains_key(&object_id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn snapshots(&self) -> Vec<ObjectSnapshot> {
        let mut snapshots: Vec<_> = self.objects.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by_key(|snapshot| snapshot.object_id);
        snapshots
    }

    /// Loose items a player could pick up
    pub fn pickupable(&self) -> Vec<ObjectSnapshot> {
        self.objects
            .iter()
            .filter(|entry| entry.value().can_be_picked_up())
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    /* --------------------------- replica path --------------------------- */

    /// Store or overwrite a replica from the authority
    pub fn apply_snapshot(&self, snapshot: &ObjectSnapshot) {
        self.objects
            .insert(snapshot.object_id, WorldObject::from_snapshot(snapshot));
    }

    /// Mirror an authority notification into the replica table
    pub fn apply_event(&self, event: &GameEvent) {
        match event {
            GameEvent::ObjectSpawned { object } => self.apply_snapshot(object),
            GameEvent::ObjectDeployed {
                object_id,
                owner,
                position,
            } => {
                if let Some(mut object) = self.objects.get_mut(object_id) {
                    let mut snapshot = object.snapshot();
                    snapshot.state = ObjectState::Deployed;
                    snapshot.owner = owner.clone();
                    snapshot.position = *position;
                    *object = WorldObject::from_snapshot(&snapshot);
                }
            }
            GameEvent::ObjectArmed { object_id } => self.replica_state(*object_id, ObjectState::Armed),
            GameEvent::ObjectDisarmed { object_id } => self.replica_state(*object_id, ObjectState::Deployed),
            GameEvent::ObjectPickedUp { object_id, .. } => self.replica_state(*object_id, ObjectState::PickedUp),
            GameEvent::ObjectDespawned { object_id } => {
                self.objects.remove(object_id);
            }
            _ => {}
        }
    }

    fn replica_state(&self, object_id: ObjectId, state: ObjectState) {
        if let Some(mut object) = self.objects.get_mut(&object_id) {
            let mut snapshot = object.snapshot();
            snapshot.state = state;
            *object = WorldObject::from_snapshot(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GameError;
    use crate::game::catalog::ItemCatalog;
    use crate::game::effects::StatusKind;
    use crate::game::world_object::TriggerSource;
    use std::time::Duration;

    fn server() -> (ObjectRegistry, ItemCatalog) {
        (
            ObjectRegistry::new(Role::Server, EventBus::new(64)),
            ItemCatalog::with_defaults(),
        )
    }

    fn player_context(player: &str) -> TriggerContext {
        TriggerContext::new(TriggerSource::Player, Some(player.to_string()))
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let (registry, catalog) = server();
        let a = registry.spawn(catalog.get(2).unwrap(), Position::default(), Rotation::default(), None).unwrap();
        let b = registry.spawn(catalog.get(2).unwrap(), Position::default(), Rotation::default(), None).unwrap();
        assert!(b.object_id > a.object_id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_auto_spawns_armed_and_rejects_deploy() {
        let (registry, catalog) = server();
        let bell = registry.spawn(catalog.get(4).unwrap(), Position::default(), Rotation::default(), None).unwrap();
        assert_eq!(bell.state, ObjectState::Armed);

        let err = registry
            .deploy(bell.object_id, Position::new(9.0, 0.0, 9.0), Rotation::default(), "p1")
            .unwrap_err();
        assert_eq!(err, GameError::Validation(ValidationFailure::AutoPlacement(bell.object_id)));
        assert_eq!(registry.get(bell.object_id), Some(bell));
    }

    #[test]
    fn test_deploy_publishes_deployed_then_armed() {
        let (registry, catalog) = server();
        let pit = registry.spawn(catalog.get(2).unwrap(), Position::default(), Rotation::default(), None).unwrap();
        let mut events = registry.bus().subscribe_object(pit.object_id);

        let deployed = registry
            .deploy(pit.object_id, Position::new(1.0, 0.0, 1.0), Rotation::default(), "p1")
            .unwrap();
        assert_eq!(deployed.state, ObjectState::Armed);
        assert_eq!(deployed.owner.as_deref(), Some("p1"));

        assert!(matches!(events.try_next(), Some(GameEvent::ObjectDeployed { .. })));
        assert!(matches!(events.try_next(), Some(GameEvent::ObjectArmed { .. })));
        assert!(events.try_next().is_none());

        // Re-arming an armed trap is not a transition
        assert_eq!(registry.arm(pit.object_id), Ok(false));
        assert!(events.try_next().is_none());
    }

    #[test]
    fn test_cooldown_fires_once_within_window() {
        let (registry, catalog) = server();
        // Tar Pit: 2s cooldown, reusable
        let pit = registry.spawn(catalog.get(2).unwrap(), Position::default(), Rotation::default(), None).unwrap();
        registry.deploy(pit.object_id, Position::default(), Rotation::default(), "p1").unwrap();
        let mut global = registry.bus().subscribe();

        let t0 = Instant::now();
        let first = registry.trigger(pit.object_id, player_context("p2"), t0).unwrap();
        let second = registry
            .trigger(pit.object_id, player_context("p2"), t0 + Duration::from_millis(500))
            .unwrap();
        let third = registry
            .trigger(pit.object_id, player_context("p2"), t0 + Duration::from_secs(2))
            .unwrap();

        assert!(first.fired());
        assert_eq!(second, TriggerOutcome::Ignored);
        assert!(third.fired());

        let mut triggered = 0;
        while let Ok(event) = global.try_recv() {
            if matches!(event, GameEvent::TrapTriggered { .. }) {
                triggered += 1;
            }
        }
        assert_eq!(triggered, 2);
    }

    #[test]
    fn test_one_shot_trigger_despawns_and_applies_effect() {
        let (registry, catalog) = server();
        let bear = registry.spawn(catalog.get(1).unwrap(), Position::default(), Rotation::default(), None).unwrap();
        registry.deploy(bear.object_id, Position::default(), Rotation::default(), "p1").unwrap();

        let outcome = registry.trigger(bear.object_id, player_context("p2"), Instant::now()).unwrap();
        match outcome {
            TriggerOutcome::Fired { status: Some(status), despawned: true } => {
                assert_eq!(status.entity_id, "p2");
                assert_eq!(status.status, StatusKind::Frozen);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!registry.contains(bear.object_id));
        assert_eq!(
            registry.trigger(bear.object_id, player_context("p2"), Instant::now()),
            Err(GameError::from(ValidationFailure::ObjectNotFound(bear.object_id)))
        );
    }

    #[test]
    fn test_undeployed_trigger_is_ignored() {
        let (registry, catalog) = server();
        let pit = registry.spawn(catalog.get(2).unwrap(), Position::default(), Rotation::default(), None).unwrap();
        assert_eq!(
            registry.trigger(pit.object_id, player_context("p2"), Instant::now()),
            Ok(TriggerOutcome::Ignored)
        );
        registry.deploy(pit.object_id, Position::default(), Rotation::default(), "p1").unwrap();
        registry.disarm(pit.object_id).unwrap();
        assert_eq!(
            registry.trigger(pit.object_id, player_context("p2"), Instant::now()),
            Ok(TriggerOutcome::Ignored)
        );
    }

    #[test]
    fn test_client_replica_refuses_mutation() {
        let (server, catalog) = server();
        let snapshot = server.spawn(catalog.get(2).unwrap(), Position::default(), Rotation::default(), None).unwrap();

        let client = ObjectRegistry::new(Role::Client, EventBus::new(8));
        client.apply_snapshot(&snapshot);

        assert_eq!(
            client.deploy(snapshot.object_id, Position::default(), Rotation::default(), "p1"),
            Err(GameError::AuthorityViolation { operation: "deploy" })
        );
        assert_eq!(
            client.trigger(snapshot.object_id, player_context("p1"), Instant::now()),
            Err(GameError::AuthorityViolation { operation: "trigger" })
        );
        assert_eq!(client.get(snapshot.object_id).map(|s| s.state), Some(ObjectState::Idle));
    }

    #[test]
    fn test_replica_follows_events() {
        let (server, catalog) = server();
        let mut feed = server.bus().subscribe();
        let client = ObjectRegistry::new(Role::Client, EventBus::new(8));

        let pit = server.spawn(catalog.get(2).unwrap(), Position::default(), Rotation::default(), None).unwrap();
        server.deploy(pit.object_id, Position::new(2.0, 0.0, 2.0), Rotation::default(), "p1").unwrap();
        server.disarm(pit.object_id).unwrap();
        while let Ok(event) = feed.try_recv() {
            client.apply_event(&event);
        }
        let replica = client.get(pit.object_id).unwrap();
        assert_eq!(replica.state, ObjectState::Deployed);
        assert_eq!(replica.owner.as_deref(), Some("p1"));
        assert_eq!(replica.position, Position::new(2.0, 0.0, 2.0));

        server.despawn(pit.object_id).unwrap();
        while let Ok(event) = feed.try_recv() {
            client.apply_event(&event);
        }
        assert!(client.is_empty());
    }
}
