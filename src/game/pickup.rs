// src/game/pickup.rs
// World → inventory pickup transaction
//
// The object entry stays locked from the availability check until commit or
// rollback, so a competing request for the same object sees it as taken.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use super::entity_state::PlayerRegistry;
use super::events::GameEvent;
use super::registry::ObjectRegistry;
use super::schedule::{DeadlineQueue, ScheduledAction};
use super::world_object::ObjectState;
use super::{ItemId, ObjectId};
use crate::config::PickupConfig;
use crate::error::{GameResult, ValidationFailure};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupReceipt {
    pub object_id: ObjectId,
    pub item_id: ItemId,
    pub item_name: String,
    #[serde(skip)]
    pub despawn_at: Instant,
}

pub struct PickupCoordinator {
    registry: Arc<ObjectRegistry>,
    players: PlayerRegistry,
    scheduler: Arc<Mutex<DeadlineQueue<ScheduledAction>>>,
    config: PickupConfig,
}

impl PickupCoordinator {
    pub fn new(
        registry: Arc<ObjectRegistry>,
        players: PlayerRegistry,
        scheduler: Arc<Mutex<DeadlineQueue<ScheduledAction>>>,
        config: PickupConfig,
    ) -> Self {
        Self {
            registry,
            players,
            scheduler,
            config,
        }
    }

    pub fn handle_pickup(&self, player_id: &str, object_id: ObjectId, now: Instant) -> GameResult<PickupReceipt> {
        let result = self.try_pickup(player_id, object_id, now);
        match &result {
            Ok(receipt) => info!(
                player_id = %player_id,
                object_id = object_id,
                item_id = receipt.item_id,
                item = %receipt.item_name,
                "Pickup committed"
            ),
            Err(e) => warn!(
                player_id = %player_id,
                object_id = object_id,
                error = %e,
                "Pickup rejected"
            ),
        }
        result
    }

    fn try_pickup(&self, player_id: &str, object_id: ObjectId, now: Instant) -> GameResult<PickupReceipt> {
        self.registry.role().ensure_authority("pickup")?;

        let (item_id, item_name) = {
            let mut object = self.registry.lock(object_id)?;

            let taken = object.is_picked_up()
                || object.is_pickup_in_progress()
                || object.state() == ObjectState::Despawned;
            if taken {
                return Err(ValidationFailure::AlreadyTaken(object_id).into());
            }
            if object.is_deployed() {
                return Err(ValidationFailure::CannotPickupDeployed(object_id).into());
            }

            let player_position = self
                .players
                .position_of(player_id)
                .ok_or_else(|| ValidationFailure::PlayerNotFound(player_id.to_string()))?;
            let distance = player_position.distance_to(&object.position);
            let max = self.config.max_distance();
            if distance > max {
                return Err(ValidationFailure::TooFar { distance, max }.into());
            }

            match self.players.has_inventory_space(player_id) {
                Some(true) => {}
                Some(false) => return Err(ValidationFailure::InventoryFull.into()),
                None => return Err(ValidationFailure::PlayerNotFound(player_id.to_string()).into()),
            }

            object.begin_pickup();
            if let Err(e) = self.players.try_add_item(player_id, object.item_id) {
                object.rollback_pickup();
                return Err(ValidationFailure::InventoryAddFailed(e.to_string()).into());
            }
            object.commit_pickup();
            (object.item_id, object.display_name.clone())
        };

        self.registry.bus().publish(GameEvent::ObjectPickedUp {
            object_id,
            player_id: player_id.to_string(),
        });

        let despawn_at = self
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .schedule_after(now, self.config.despawn_delay, ScheduledAction::Despawn { object_id });

        Ok(PickupReceipt {
            object_id,
            item_id,
            item_name,
            despawn_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GameError;
    use crate::game::catalog::ItemCatalog;
    use crate::game::entity_state::{Position, Rotation};
    use crate::game::events::EventBus;
    use crate::game::inventory::InventoryReplicator;
    use crate::game::Role;
    use std::time::Duration;

    struct Fixture {
        registry: Arc<ObjectRegistry>,
        players: PlayerRegistry,
        scheduler: Arc<Mutex<DeadlineQueue<ScheduledAction>>>,
        coordinator: Arc<PickupCoordinator>,
        catalog: ItemCatalog,
    }

    fn fixture_with(capacity: usize, replicator: Arc<dyn InventoryReplicator>) -> Fixture {
        let bus = EventBus::new(256);
        let registry = Arc::new(ObjectRegistry::new(Role::Server, bus));
        let players = PlayerRegistry::new(Role::Server, capacity, Duration::from_secs(120), replicator);
        let scheduler = Arc::new(Mutex::new(DeadlineQueue::new()));
        let coordinator = Arc::new(PickupCoordinator::new(
            registry.clone(),
            players.clone(),
            scheduler.clone(),
            PickupConfig {
                range: 3.0,
                latency_tolerance: 1.0,
                despawn_delay: Duration::from_millis(500),
            },
        ));
        Fixture {
            registry,
            players,
            scheduler,
            coordinator,
            catalog: ItemCatalog::with_defaults(),
        }
    }

    fn fixture() -> Fixture {
        let bus = EventBus::new(256);
        fixture_with(1, Arc::new(bus))
    }

    fn spawn_item(fixture: &Fixture, item_id: ItemId, position: Position) -> ObjectId {
        fixture
            .registry
            .spawn(fixture.catalog.get(item_id).unwrap(), position, Rotation::default(), None)
            .unwrap()
            .object_id
    }

    #[test]
    fn test_pickup_commits_and_schedules_despawn() {
        let f = fixture();
        f.players.join("p1", Position::new(0.0, 0.0, 0.0));
        let object_id = spawn_item(&f, 5, Position::new(2.0, 0.0, 0.0));

        let now = Instant::now();
        let receipt = f.coordinator.handle_pickup("p1", object_id, now).unwrap();
        assert_eq!(receipt.item_name, "Lantern");
        assert_eq!(receipt.despawn_at, now + Duration::from_millis(500));
        assert_eq!(f.players.inventory("p1"), Some(vec![5]));

        // Not removed synchronously with the commit
        assert_eq!(f.registry.get(object_id).map(|s| s.state), Some(ObjectState::PickedUp));
        let mut scheduler = f.scheduler.lock().unwrap();
        assert!(scheduler.pop_due(now).is_empty());
        assert_eq!(
            scheduler.pop_due(receipt.despawn_at),
            vec![ScheduledAction::Despawn { object_id }]
        );
    }

    #[test]
    fn test_range_includes_latency_tolerance() {
        let f = fixture();
        f.players.join("p1", Position::default());
        let near = spawn_item(&f, 5, Position::new(3.9, 0.0, 0.0));
        let far = spawn_item(&f, 5, Position::new(4.5, 0.0, 0.0));

        assert!(matches!(
            f.coordinator.handle_pickup("p1", far, Instant::now()),
            Err(GameError::Validation(ValidationFailure::TooFar { .. }))
        ));
        assert_eq!(f.registry.get(far).map(|s| s.state), Some(ObjectState::Idle));
        assert!(f.coordinator.handle_pickup("p1", near, Instant::now()).is_ok());
    }

    #[test]
    fn test_full_inventory_leaves_no_trace() {
        let f = fixture();
        f.players.join("p1", Position::default());
        let first = spawn_item(&f, 5, Position::default());
        let second = spawn_item(&f, 2, Position::default());

        f.coordinator.handle_pickup("p1", first, Instant::now()).unwrap();
        assert_eq!(
            f.coordinator.handle_pickup("p1", second, Instant::now()),
            Err(GameError::from(ValidationFailure::InventoryFull))
        );
        assert_eq!(f.registry.get(second).map(|s| s.state), Some(ObjectState::Idle));
        assert_eq!(f.players.inventory("p1"), Some(vec![5]));
        assert_eq!(f.scheduler.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_deployed_trap_cannot_be_picked_up() {
        let f = fixture();
        f.players.join("p1", Position::default());
        let trap = spawn_item(&f, 2, Position::default());
        f.registry.deploy(trap, Position::default(), Rotation::default(), "p2").unwrap();

        assert_eq!(
            f.coordinator.handle_pickup("p1", trap, Instant::now()),
            Err(GameError::from(ValidationFailure::CannotPickupDeployed(trap)))
        );
        assert_eq!(
            f.coordinator.handle_pickup("p1", 999, Instant::now()),
            Err(GameError::from(ValidationFailure::ObjectNotFound(999)))
        );
    }

    #[test]
    fn test_missing_object_reported_before_unknown_player() {
        let f = fixture();
        assert_eq!(
            f.coordinator.handle_pickup("ghost", 999, Instant::now()),
            Err(GameError::from(ValidationFailure::ObjectNotFound(999)))
        );

        let lantern = spawn_item(&f, 5, Position::default());
        assert_eq!(
            f.coordinator.handle_pickup("ghost", lantern, Instant::now()),
            Err(GameError::from(ValidationFailure::PlayerNotFound("ghost".to_string())))
        );
        assert_eq!(f.registry.get(lantern).map(|s| s.state), Some(ObjectState::Idle));
    }

    struct RejectingReplicator;

    impl InventoryReplicator for RejectingReplicator {
        fn replicate(&self, _player_id: &str, _items: &[ItemId]) -> GameResult<()> {
            Err(GameError::Replication("network down".into()))
        }
    }

    #[test]
    fn test_failed_add_rolls_back_pickup() {
        let f = fixture_with(1, Arc::new(RejectingReplicator));
        f.players.join("p1", Position::default());
        let object_id = spawn_item(&f, 5, Position::default());

        let err = f.coordinator.handle_pickup("p1", object_id, Instant::now()).unwrap_err();
        assert_eq!(err.code(), "inventory_add_failed");

        let snapshot = f.registry.get(object_id).unwrap();
        assert_eq!(snapshot.state, ObjectState::Idle);
        assert_eq!(f.players.inventory("p1"), Some(vec![]));
        assert!(f.scheduler.lock().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_pickups_one_winner() {
        let f = fixture();
        let object_id = spawn_item(&f, 5, Position::default());
        for i in 0..8 {
            f.players.join(&format!("p{i}"), Position::new(0.5, 0.0, 0.0));
        }

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let coordinator = f.coordinator.clone();
                std::thread::spawn(move || coordinator.handle_pickup(&format!("p{i}"), object_id, Instant::now()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in results.iter().filter(|r| r.is_err()) {
            assert_eq!(result, &Err(GameError::from(ValidationFailure::AlreadyTaken(object_id))));
        }
        let holders = (0..8)
            .filter(|i| f.players.inventory(&format!("p{i}")) == Some(vec![5]))
            .count();
        assert_eq!(holders, 1);
    }

    #[test]
    fn test_client_role_cannot_pickup() {
        let bus = EventBus::new(8);
        let registry = Arc::new(ObjectRegistry::new(Role::Client, bus.clone()));
        let players = PlayerRegistry::new(Role::Client, 1, Duration::from_secs(120), Arc::new(bus));
        let coordinator = PickupCoordinator::new(
            registry,
            players,
            Arc::new(Mutex::new(DeadlineQueue::new())),
            PickupConfig {
                range: 3.0,
                latency_tolerance: 1.0,
                despawn_delay: Duration::from_millis(500),
            },
        );
        assert_eq!(
            coordinator.handle_pickup("p1", 1, Instant::now()),
            Err(GameError::AuthorityViolation { operation: "pickup" })
        );
    }
}
