// src/game/entity_state.rs
// Connected players: server-side position (used for pickup range checks) and
// inventory. Inventory writes are replicated and rolled back on failure.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::inventory::{Inventory, InventoryReplicator};
use super::{ItemId, PlayerId, Role};
use crate::error::{GameResult, ValidationFailure};

/// 3D position in game world
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// Rotation quaternion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0, // Identity quaternion
        }
    }
}

/// Player state tracked by the server
#[derive(Debug, Clone, Serialize)]
pub struct PlayerState {
    pub player_id: PlayerId,
    pub position: Position,
    pub rotation: Rotation,
    pub inventory: Inventory,
    pub joined_at: i64,   // Unix timestamp
    pub last_update: i64, // Unix timestamp
    #[serde(skip)]
    pub last_seen: Instant, // Server-side tracking (not serialized)
}

impl PlayerState {
    pub fn new(player_id: PlayerId, position: Position, inventory_capacity: usize) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            player_id,
            position,
            rotation: Rotation::default(),
            inventory: Inventory::new(inventory_capacity),
            joined_at: now,
            last_update: now,
            last_seen: Instant::now(),
        }
    }

    pub fn update_position(&mut self, position: Position, rotation: Option<Rotation>) {
        self.position = position;
        if let Some(rot) = rotation {
            self.rotation = rot;
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_update = chrono::Utc::now().timestamp();
        self.last_seen = Instant::now();
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Player table
#[derive(Clone)]
pub struct PlayerRegistry {
    role: Role,
    players: Arc<DashMap<PlayerId, PlayerState>>,
    inventory_capacity: usize,
    stale_timeout: Duration,
    replicator: Arc<dyn InventoryReplicator>,
}

impl PlayerRegistry {
    pub fn new(
        role: Role,
        inventory_capacity: usize,
        stale_timeout: Duration,
        replicator: Arc<dyn InventoryReplicator>,
    ) -> Self {
        Self {
            role,
            players: Arc::new(DashMap::new()),
            inventory_capacity,
            stale_timeout,
            replicator,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Add a player, or refresh an existing one (keeps its inventory)
    pub fn join(&self, player_id: &str, position: Position) -> PlayerState {
        let mut entry = self
            .players
            .entry(player_id.to_string())
            .or_insert_with(|| PlayerState::new(player_id.to_string(), position, self.inventory_capacity));
        entry.update_position(position, None);
        let state = entry.clone();
        drop(entry);

        info!(
            player_id = %player_id,
            player_count = self.players.len(),
            "Player joined game state"
        );
        state
    }

    pub fn leave(&self, player_id: &str) -> Option<PlayerState> {
        let removed = self.players.remove(player_id).map(|(_, player)| player);
        if removed.is_some() {
            info!(
                player_id = %player_id,
                player_count = self.players.len(),
                "Player removed from game state"
            );
        }
        removed
    }

    pub fn update_position(&self, player_id: &str, position: Position, rotation: Option<Rotation>) -> bool {
        match self.players.get_mut(player_id) {
            Some(mut player) => {
                player.update_position(position, rotation);
                debug!(
                    player_id = %player_id,
                    x = %position.x,
                    y = %position.y,
                    z = %position.z,
                    "Player position updated"
                );
                true
            }
            None => false,
        }
    }

    pub fn get(&self, player_id: &str) -> Option<PlayerState> {
        self.players.get(player_id).map(|player| player.clone())
    }

    pub fn position_of(&self, player_id: &str) -> Option<Position> {
        self.players.get(player_id).map(|player| player.position)
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players.contains_key(player_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn inventory(&self, player_id: &str) -> Option<Vec<ItemId>> {
        self.players.get(player_id).map(|player| player.inventory.items())
    }

    pub fn has_inventory_space(&self, player_id: &str) -> Option<bool> {
        self.players.get(player_id).map(|player| player.inventory.has_space())
    }

    /// Server-validated add. The local push is undone if replication fails.
    pub fn try_add_item(&self, player_id: &str, item_id: ItemId) -> GameResult<()> {
        self.role.ensure_authority("inventory_add")?;

        let mut player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| ValidationFailure::PlayerNotFound(player_id.to_string()))?;

        if item_id <= 0 {
            return Err(ValidationFailure::InvalidItemId(item_id).into());
        }
        if !player.inventory.try_add(item_id) {
            warn!(player_id = %player_id, item_id = item_id, "Failed to add item (inventory full)");
            return Err(ValidationFailure::InventoryFull.into());
        }

        let items = player.inventory.items();
        if let Err(e) = self.replicator.replicate(player_id, &items) {
            player.inventory.undo_add();
            warn!(
                player_id = %player_id,
                item_id = item_id,
                error = %e,
                "Inventory replication failed, rolled back add"
            );
            return Err(e);
        }

        player.touch();
        info!(
            player_id = %player_id,
            item_id = item_id,
            count = items.len(),
            "Item added to player inventory"
        );
        Ok(())
    }

    /// Server-validated pop of the front item. Restored if replication fails.
    pub fn try_pop_item(&self, player_id: &str) -> GameResult<Option<ItemId>> {
        self.role.ensure_authority("inventory_pop")?;

        let mut player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| ValidationFailure::PlayerNotFound(player_id.to_string()))?;

        let Some(item_id) = player.inventory.try_pop() else {
            return Ok(None);
        };

        let items = player.inventory.items();
        if let Err(e) = self.replicator.replicate(player_id, &items) {
            player.inventory.restore_front(item_id);
            warn!(
                player_id = %player_id,
                item_id = item_id,
                error = %e,
                "Inventory replication failed, restored popped item"
            );
            return Err(e);
        }

        player.touch();
        info!(player_id = %player_id, item_id = item_id, "Item removed from player inventory");
        Ok(Some(item_id))
    }

    /// Put an item back at the front after a failed follow-up step
    pub fn return_item(&self, player_id: &str, item_id: ItemId) -> GameResult<()> {
        self.role.ensure_authority("inventory_return")?;

        let mut player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| ValidationFailure::PlayerNotFound(player_id.to_string()))?;
        player.inventory.restore_front(item_id);
        let items = player.inventory.items();
        self.replicator.replicate(player_id, &items)
    }

    /// Players that haven't sent an update within the stale timeout
    pub fn stale_players(&self) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|entry| entry.value().is_stale(self.stale_timeout))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GameError;
    use crate::game::events::EventBus;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyReplicator {
        fail: AtomicBool,
    }

    impl InventoryReplicator for FlakyReplicator {
        fn replicate(&self, _player_id: &str, _items: &[ItemId]) -> GameResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                Err(GameError::Replication("mirror unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    fn registry(capacity: usize) -> PlayerRegistry {
        PlayerRegistry::new(Role::Server, capacity, Duration::from_secs(120), Arc::new(EventBus::new(16)))
    }

    #[test]
    fn test_distance() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance_to(&b), 5.0);
    }

    #[test]
    fn test_join_keeps_inventory_on_rejoin() {
        let players = registry(2);
        players.join("p1", Position::default());
        players.try_add_item("p1", 3).unwrap();
        players.join("p1", Position::new(1.0, 0.0, 0.0));
        assert_eq!(players.inventory("p1"), Some(vec![3]));
        assert_eq!(players.position_of("p1"), Some(Position::new(1.0, 0.0, 0.0)));
        assert_eq!(players.player_count(), 1);
    }

    #[test]
    fn test_add_rejections() {
        let players = registry(1);
        players.join("p1", Position::default());

        assert_eq!(
            players.try_add_item("ghost", 1),
            Err(ValidationFailure::PlayerNotFound("ghost".into()).into())
        );
        assert_eq!(
            players.try_add_item("p1", 0),
            Err(ValidationFailure::InvalidItemId(0).into())
        );
        players.try_add_item("p1", 2).unwrap();
        assert_eq!(players.try_add_item("p1", 4), Err(ValidationFailure::InventoryFull.into()));
        assert_eq!(players.inventory("p1"), Some(vec![2]));
    }

    #[test]
    fn test_replication_failure_rolls_back() {
        let replicator = Arc::new(FlakyReplicator { fail: AtomicBool::new(false) });
        let players = PlayerRegistry::new(Role::Server, 3, Duration::from_secs(60), replicator.clone());
        players.join("p1", Position::default());
        players.try_add_item("p1", 1).unwrap();

        replicator.fail.store(true, Ordering::SeqCst);
        assert!(matches!(players.try_add_item("p1", 2), Err(GameError::Replication(_))));
        assert_eq!(players.inventory("p1"), Some(vec![1]));

        assert!(matches!(players.try_pop_item("p1"), Err(GameError::Replication(_))));
        assert_eq!(players.inventory("p1"), Some(vec![1]));

        replicator.fail.store(false, Ordering::SeqCst);
        assert_eq!(players.try_pop_item("p1"), Ok(Some(1)));
        assert_eq!(players.try_pop_item("p1"), Ok(None));
    }

    #[test]
    fn test_client_role_refuses_mutation() {
        let players = PlayerRegistry::new(Role::Client, 1, Duration::from_secs(60), Arc::new(EventBus::new(4)));
        players.join("p1", Position::default());
        assert_eq!(
            players.try_add_item("p1", 1),
            Err(GameError::AuthorityViolation { operation: "inventory_add" })
        );
        assert_eq!(players.inventory("p1"), Some(vec![]));
    }

    #[test]
    fn test_inventory_update_is_published() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let players = PlayerRegistry::new(Role::Server, 1, Duration::from_secs(60), Arc::new(bus));
        players.join("p1", Position::default());
        players.try_add_item("p1", 5).unwrap();

        match rx.try_recv() {
            Ok(crate::game::GameEvent::InventoryUpdated { player_id, items }) => {
                assert_eq!(player_id, "p1");
                assert_eq!(items, vec![5]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_stale_players_are_reported() {
        let players = PlayerRegistry::new(Role::Server, 1, Duration::ZERO, Arc::new(EventBus::new(4)));
        players.join("p1", Position::default());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(players.stale_players(), vec!["p1".to_string()]);
        // Removal goes through the server so observers hear about it
        assert_eq!(players.player_count(), 1);
    }
}
