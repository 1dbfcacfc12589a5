// src/game/server.rs
// Composition of the authoritative game state. One GameServer per process,
// shared behind an Arc by the transport and the background tasks.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashSet;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::catalog::ItemCatalog;
use super::effects::StatusBoard;
use super::entity_state::{PlayerRegistry, PlayerState, Position, Rotation};
use super::events::{EventBus, GameEvent};
use super::pickup::PickupCoordinator;
use super::protocol::{ClientMessage, ServerMessage};
use super::registry::{ObjectRegistry, TriggerOutcome};
use super::schedule::{DeadlineQueue, ScheduledAction};
use super::spawn::{SpawnRequest, SpawnService};
use super::world_object::{ObjectSnapshot, Placement, TriggerContext, TriggerSource};
use super::{ItemId, ObjectId, PlayerId, Role};
use crate::config::GameConfig;
use crate::error::{GameResult, ValidationFailure};
use crate::maze::{MazeError, MazeGenerator, MazeGrid, MazeLayout, MazeOptions};

/// Counters for the /stats endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStats {
    pub players: usize,
    pub objects: usize,
    pub scheduled_actions: usize,
    pub subscribers: usize,
    pub maze: MazeOptions,
    pub uptime_secs: u64,
}

pub struct GameServer {
    config: GameConfig,
    catalog: Arc<ItemCatalog>,
    bus: EventBus,
    maze: RwLock<MazeGrid>,
    objects: Arc<ObjectRegistry>,
    players: PlayerRegistry,
    spawner: SpawnService,
    pickups: PickupCoordinator,
    statuses: StatusBoard,
    scheduler: Arc<Mutex<DeadlineQueue<ScheduledAction>>>,
    /// Player ids with a live connection
    sessions: DashSet<PlayerId>,
    started_at: Instant,
}

impl GameServer {
    pub fn new(config: GameConfig) -> Result<Self, MazeError> {
        Self::with_catalog(config, ItemCatalog::with_defaults())
    }

    pub fn with_catalog(config: GameConfig, catalog: ItemCatalog) -> Result<Self, MazeError> {
        let maze = MazeGenerator::generate_with(config.maze)?;
        info!(
            size = config.maze.size,
            seed = config.maze.seed,
            rooms = maze.rooms().len(),
            draws = maze.stats().draws,
            "Maze generated"
        );

        let bus = EventBus::new(config.server.event_bus_capacity);
        let catalog = Arc::new(catalog);
        let objects = Arc::new(ObjectRegistry::new(Role::Server, bus.clone()));
        let players = PlayerRegistry::new(
            Role::Server,
            config.inventory_capacity,
            config.server.player_stale_timeout,
            Arc::new(bus.clone()),
        );
        let scheduler = Arc::new(Mutex::new(DeadlineQueue::new()));
        let spawner = SpawnService::new(objects.clone(), catalog.clone(), config.spawn.clone());
        let pickups = PickupCoordinator::new(
            objects.clone(),
            players.clone(),
            scheduler.clone(),
            config.pickup.clone(),
        );

        Ok(Self {
            config,
            catalog,
            bus,
            maze: RwLock::new(maze),
            objects,
            players,
            spawner,
            pickups,
            statuses: StatusBoard::new(),
            scheduler,
            sessions: DashSet::new(),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn players(&self) -> &PlayerRegistry {
        &self.players
    }

    pub fn statuses(&self) -> &StatusBoard {
        &self.statuses
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GameEvent> {
        self.bus.subscribe()
    }

    /* ------------------------------- maze ------------------------------- */

    pub fn maze_options(&self) -> MazeOptions {
        self.maze.read().unwrap_or_else(|poisoned| poisoned.into_inner()).options()
    }

    pub fn maze_layout(&self) -> MazeLayout {
        self.maze.read().unwrap_or_else(|poisoned| poisoned.into_inner()).to_layout()
    }

    /// What a client needs to regenerate the maze locally
    pub fn maze_announcement(&self) -> ServerMessage {
        ServerMessage::MazeSeed {
            options: self.maze_options(),
        }
    }

    /// Regenerate with a new seed, keeping size and room rate
    pub fn rebuild_maze(&self, seed: u64) -> Result<MazeOptions, MazeError> {
        let options = MazeOptions {
            seed,
            ..self.maze_options()
        };
        let maze = MazeGenerator::generate_with(options)?;
        *self.maze.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = maze;

        info!(seed = seed, size = options.size, "Maze rebuilt");
        self.bus.publish(GameEvent::MazeRebuilt { options });
        Ok(options)
    }

    /* ------------------------------ players ----------------------------- */

    pub fn join(&self, player_id: &str, position: Position) -> PlayerState {
        let state = self.players.join(player_id, position);
        self.bus.publish(GameEvent::PlayerJoined {
            player_id: player_id.to_string(),
            position,
        });
        state
    }

    pub fn leave(&self, player_id: &str) {
        if self.players.leave(player_id).is_some() {
            self.statuses.clear(player_id);
            self.bus.publish(GameEvent::PlayerLeft {
                player_id: player_id.to_string(),
            });
        }
    }

    /// Claim a connection slot for `player_id`. False if another connection
    /// already holds it.
    pub fn open_session(&self, player_id: &str) -> bool {
        let opened = self.sessions.insert(player_id.to_string());
        if !opened {
            warn!(player_id = %player_id, "Duplicate session refused");
        }
        opened
    }

    pub fn has_session(&self, player_id: &str) -> bool {
        self.sessions.contains(player_id)
    }

    /// Release the slot and remove the player
    pub fn close_session(&self, player_id: &str) {
        if self.sessions.remove(player_id).is_some() {
            self.leave(player_id);
        }
    }

    /// Remove players that went quiet. Each removal is announced like a
    /// regular leave.
    pub fn cleanup_stale_players(&self) -> Vec<PlayerId> {
        let stale = self.players.stale_players();
        if !stale.is_empty() {
            warn!(
                count = stale.len(),
                timeout_secs = self.players.stale_timeout().as_secs(),
                "Cleaning up stale players"
            );
            for player_id in &stale {
                self.leave(player_id);
            }
        }
        stale
    }

    pub async fn run_player_cleanup_task(self: Arc<Self>, cleanup_interval: Duration) {
        info!(
            cleanup_interval_secs = cleanup_interval.as_secs(),
            stale_timeout_secs = self.players.stale_timeout().as_secs(),
            "Starting player cleanup task"
        );

        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;

            let stale = self.cleanup_stale_players();
            if !stale.is_empty() {
                info!(
                    removed_count = stale.len(),
                    remaining_players = self.players.player_count(),
                    "Cleaned up stale players"
                );
            } else {
                debug!(player_count = self.players.player_count(), "Player cleanup: no stale players");
            }
        }
    }

    /* ------------------------------ objects ----------------------------- */

    pub fn deploy(&self, player_id: &str, object_id: ObjectId, position: Position, rotation: Rotation) -> GameResult<ObjectSnapshot> {
        if !self.players.contains(player_id) {
            return Err(ValidationFailure::PlayerNotFound(player_id.to_string()).into());
        }
        self.objects.deploy(object_id, position, rotation, player_id)
    }

    /// Fire a trap and apply its effect to the instigator
    pub fn trigger(&self, object_id: ObjectId, context: TriggerContext, now: Instant) -> GameResult<TriggerOutcome> {
        let outcome = self.objects.trigger(object_id, context, now)?;

        if let TriggerOutcome::Fired { status: Some(effect), .. } = &outcome {
            let expires_at = self.statuses.apply(effect, now);
            self.scheduler
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .schedule(
                    expires_at,
                    ScheduledAction::ExpireStatus {
                        entity_id: effect.entity_id.clone(),
                        status: effect.status,
                    },
                );
            self.bus.publish(GameEvent::StatusApplied {
                entity_id: effect.entity_id.clone(),
                status: effect.status,
                magnitude: effect.magnitude,
                duration_ms: effect.duration.as_millis() as u64,
            });
        }
        Ok(outcome)
    }

    /// Take the front inventory item and put it into the world as an armed
    /// trap owned by the player. The item goes back on any failure.
    pub fn place_item(&self, player_id: &str, position: Position, rotation: Rotation) -> GameResult<ObjectSnapshot> {
        let item_id = self
            .players
            .try_pop_item(player_id)?
            .ok_or(ValidationFailure::InventoryEmpty)?;

        let request = SpawnRequest {
            transaction_id: 0,
            item_id,
            position,
            rotation,
        };
        let spawned = match self.spawner.handle_request(player_id, &request) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.restore_item(player_id, item_id);
                return Err(e);
            }
        };

        if spawned.placement == Placement::Auto {
            return Ok(spawned);
        }

        match self.objects.deploy(spawned.object_id, spawned.position, rotation, player_id) {
            Ok(snapshot) => {
                info!(player_id = %player_id, object_id = snapshot.object_id, item_id = item_id, "Item placed as trap");
                Ok(snapshot)
            }
            Err(e) => {
                if let Err(despawn_err) = self.objects.despawn(spawned.object_id) {
                    warn!(object_id = spawned.object_id, error = %despawn_err, "Failed to remove unplaced object");
                }
                self.restore_item(player_id, item_id);
                Err(e)
            }
        }
    }

    fn restore_item(&self, player_id: &str, item_id: ItemId) {
        if let Err(e) = self.players.return_item(player_id, item_id) {
            warn!(player_id = %player_id, item_id = item_id, error = %e, "Failed to return item to inventory");
        }
    }

    /* -------------------------------- tick ------------------------------ */

    /// Run deferred work that has come due. Returns how many actions ran.
    pub fn tick(&self, now: Instant) -> usize {
        let due = self
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_due(now);
        let count = due.len();

        for action in due {
            match action {
                ScheduledAction::Despawn { object_id } => match self.objects.despawn(object_id) {
                    Ok(true) => {}
                    Ok(false) => debug!(object_id = object_id, "Scheduled despawn for object already gone"),
                    Err(e) => warn!(object_id = object_id, error = %e, "Scheduled despawn failed"),
                },
                ScheduledAction::ExpireStatus { entity_id, status } => {
                    if self.statuses.expire(&entity_id, status, now) {
                        debug!(entity_id = %entity_id, status = ?status, "Status expired");
                        self.bus.publish(GameEvent::StatusExpired { entity_id, status });
                    }
                }
            }
        }
        count
    }

    pub async fn run_tick_task(self: Arc<Self>) {
        let tick_interval = self.config.server.tick_interval;
        info!(tick_interval_ms = tick_interval.as_millis() as u64, "Starting game tick task");

        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick(Instant::now());
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            players: self.players.player_count(),
            objects: self.objects.len(),
            scheduled_actions: self
                .scheduler
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
            subscribers: self.bus.subscriber_count(),
            maze: self.maze_options(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /* ----------------------------- dispatch ----------------------------- */

    /// Handle one client message. Replies go only to that client; state
    /// changes reach everyone through the event bus.
    pub fn handle_message(&self, player_id: &str, message: ClientMessage, now: Instant) -> Vec<ServerMessage> {
        match message {
            ClientMessage::Join { position } => {
                let state = self.join(player_id, position);
                vec![
                    ServerMessage::Connected {
                        player_id: player_id.to_string(),
                        maze: self.maze_options(),
                    },
                    ServerMessage::Inventory {
                        items: state.inventory.items(),
                    },
                ]
            }
            ClientMessage::Leave => {
                self.leave(player_id);
                vec![]
            }
            ClientMessage::UpdatePosition { position, rotation } => {
                if self.players.update_position(player_id, position, rotation) {
                    vec![]
                } else {
                    vec![ServerMessage::error(
                        &ValidationFailure::PlayerNotFound(player_id.to_string()).into(),
                    )]
                }
            }
            ClientMessage::RequestSpawn(request) => {
                let result = self.spawner.handle_request(player_id, &request);
                vec![ServerMessage::spawn_result(request.transaction_id, result)]
            }
            ClientMessage::RequestPickup { object_id } => {
                let result = self.pickups.handle_pickup(player_id, object_id, now);
                vec![ServerMessage::pickup_result(object_id, result)]
            }
            ClientMessage::DeployTrap {
                object_id,
                position,
                rotation,
            } => {
                let result = self.deploy(player_id, object_id, position, rotation);
                vec![ServerMessage::deploy_result(Some(object_id), result)]
            }
            ClientMessage::DisarmTrap { object_id } => match self.objects.disarm(object_id) {
                Ok(_) => vec![],
                Err(e) => vec![ServerMessage::error(&e)],
            },
            ClientMessage::TriggerTrap {
                object_id,
                hit_point,
                payload,
            } => {
                let mut context = TriggerContext::new(TriggerSource::Player, Some(player_id.to_string()));
                if let Some(point) = hit_point.or_else(|| self.players.position_of(player_id)) {
                    context = context.with_hit(point, Position::new(0.0, 1.0, 0.0));
                }
                if let Some(payload) = payload {
                    context = context.with_payload(payload);
                }
                match self.trigger(object_id, context, now) {
                    Ok(_) => vec![],
                    Err(e) => vec![ServerMessage::error(&e)],
                }
            }
            ClientMessage::PlaceItem { position, rotation } => {
                let result = self.place_item(player_id, position, rotation);
                vec![ServerMessage::deploy_result(None, result)]
            }
            ClientMessage::GetInventory => vec![ServerMessage::Inventory {
                items: self.players.inventory(player_id).unwrap_or_default(),
            }],
            ClientMessage::GetMaze => vec![self.maze_announcement()],
            ClientMessage::Ping => vec![ServerMessage::pong()],
        }
    }
}
