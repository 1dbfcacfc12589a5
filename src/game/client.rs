// src/game/client.rs
// Client-side view: a read-only object mirror, pending spawn transactions,
// the replicated inventory and a locally regenerated maze.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::entity_state::{Position, Rotation};
use super::events::{EventBus, GameEvent};
use super::protocol::{ClientMessage, ServerMessage};
use super::registry::ObjectRegistry;
use super::spawn::{SpawnCallback, SpawnResolution, SpawnTransactions};
use super::world_object::ObjectSnapshot;
use super::{ItemId, ObjectId, PlayerId, Role, TransactionId};
use crate::maze::{MazeGenerator, MazeGrid, MazeOptions};

pub struct ClientSession {
    player_id: PlayerId,
    mirror: ObjectRegistry,
    transactions: Arc<SpawnTransactions>,
    inventory: Vec<ItemId>,
    maze: Option<MazeGrid>,
}

impl ClientSession {
    pub fn new(player_id: impl Into<PlayerId>, transaction_timeout: Duration) -> Self {
        let player_id = player_id.into();
        Self {
            transactions: Arc::new(SpawnTransactions::new(player_id.clone(), transaction_timeout)),
            player_id,
            mirror: ObjectRegistry::new(Role::Client, EventBus::new(64)),
            inventory: Vec::new(),
            maze: None,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn transactions(&self) -> Arc<SpawnTransactions> {
        self.transactions.clone()
    }

    /// Start the periodic timeout sweep on the current runtime. The task runs
    /// until the returned handle is aborted.
    pub fn spawn_sweep(&self, sweep_interval: Duration) -> JoinHandle<()> {
        tokio::spawn(self.transactions.clone().run_sweep_task(sweep_interval))
    }

    pub fn request_spawn(
        &self,
        item_id: ItemId,
        position: Position,
        rotation: Rotation,
        callback: SpawnCallback,
        now: Instant,
    ) -> ClientMessage {
        ClientMessage::RequestSpawn(self.transactions.begin(item_id, position, rotation, callback, now))
    }

    pub fn request_spawn_channel(
        &self,
        item_id: ItemId,
        position: Position,
        rotation: Rotation,
        now: Instant,
    ) -> (ClientMessage, tokio::sync::oneshot::Receiver<SpawnResolution>) {
        let (request, rx) = self.transactions.begin_channel(item_id, position, rotation, now);
        (ClientMessage::RequestSpawn(request), rx)
    }

    pub fn handle_server_message(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::Connected { maze, .. } => self.rebuild_maze(*maze),
            ServerMessage::MazeSeed { options } => self.rebuild_maze(*options),
            ServerMessage::SpawnResult { object, .. } => {
                // The snapshot lands in the mirror before the lookup
                if let Some(object) = object {
                    self.mirror.apply_snapshot(object);
                }
                if let Some((transaction_id, outcome)) = message.spawn_outcome() {
                    self.transactions.resolve(transaction_id, outcome, &self.mirror);
                }
            }
            ServerMessage::DeployResult { object: Some(object), .. } => self.mirror.apply_snapshot(object),
            ServerMessage::Inventory { items } => self.inventory = items.clone(),
            ServerMessage::Event { event } => self.apply_event(event),
            ServerMessage::Error { code, message } => {
                warn!(player_id = %self.player_id, code = %code, message = %message, "Server reported an error");
            }
            _ => {}
        }
    }

    fn apply_event(&mut self, event: &GameEvent) {
        match event {
            GameEvent::InventoryUpdated { player_id, items } if *player_id == self.player_id => {
                self.inventory = items.clone();
            }
            GameEvent::MazeRebuilt { options } => self.rebuild_maze(*options),
            other => self.mirror.apply_event(other),
        }
    }

    fn rebuild_maze(&mut self, options: MazeOptions) {
        if self.maze.as_ref().is_some_and(|maze| maze.options() == options) {
            return;
        }
        match MazeGenerator::generate_with(options) {
            Ok(maze) => {
                debug!(seed = options.seed, size = options.size, "Regenerated maze locally");
                self.maze = Some(maze);
            }
            Err(e) => warn!(error = %e, "Server announced an invalid maze"),
        }
    }

    /// Fail spawn transactions the server never answered
    pub fn sweep_expired(&self, now: Instant) -> Vec<TransactionId> {
        self.transactions.expire(now)
    }

    pub fn object(&self, object_id: ObjectId) -> Option<ObjectSnapshot> {
        self.mirror.get(object_id)
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.mirror
    }

    pub fn inventory(&self) -> &[ItemId] {
        &self.inventory
    }

    pub fn maze(&self) -> Option<&MazeGrid> {
        self.maze.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::error::GameError;
    use crate::game::server::GameServer;
    use crate::game::spawn::SpawnFailure;
    use crate::game::world_object::ObjectState;

    fn server() -> GameServer {
        let mut config = GameConfig::default();
        config.maze = MazeOptions::new(6, 99, 0.1);
        GameServer::new(config).unwrap()
    }

    fn deliver(client: &mut ClientSession, replies: &[ServerMessage]) {
        for reply in replies {
            client.handle_server_message(reply);
        }
    }

    #[test]
    fn test_client_maze_matches_server() {
        let server = server();
        let mut client = ClientSession::new("p1", Duration::from_secs(10));
        let replies = server.handle_message("p1", ClientMessage::Join { position: Position::default() }, Instant::now());
        deliver(&mut client, &replies);

        assert_eq!(client.maze().map(|maze| maze.to_layout()), Some(server.maze_layout()));
    }

    #[test]
    fn test_spawn_roundtrip_resolves_with_object() {
        let server = server();
        let mut client = ClientSession::new("p1", Duration::from_secs(10));
        let mut feed = server.subscribe();
        deliver(
            &mut client,
            &server.handle_message("p1", ClientMessage::Join { position: Position::default() }, Instant::now()),
        );

        let (request, mut rx) =
            client.request_spawn_channel(2, Position::new(1.0, 0.0, 1.0), Rotation::default(), Instant::now());
        let replies = server.handle_message("p1", request, Instant::now());
        deliver(&mut client, &replies);

        let spawned = rx.try_recv().unwrap().unwrap();
        assert_eq!(spawned.item_id, 2);
        assert_eq!(client.object(spawned.object_id), Some(spawned.clone()));

        // Broadcast events keep the mirror in step
        server
            .deploy("p1", spawned.object_id, Position::new(1.0, 0.0, 1.0), Rotation::default())
            .unwrap();
        while let Ok(event) = feed.try_recv() {
            client.handle_server_message(&ServerMessage::Event { event });
        }
        assert_eq!(client.object(spawned.object_id).map(|o| o.state), Some(ObjectState::Armed));
    }

    #[test]
    fn test_rejected_spawn_and_timeout() {
        let server = server();
        let mut client = ClientSession::new("p1", Duration::from_secs(10));
        let t0 = Instant::now();

        let (request, mut rejected) = client.request_spawn_channel(77, Position::default(), Rotation::default(), t0);
        deliver(&mut client, &server.handle_message("p1", request, t0));
        assert!(matches!(
            rejected.try_recv().unwrap(),
            Err(SpawnFailure::Rejected { code, .. }) if code == "unknown_item"
        ));

        // A request that never reaches the server
        let (_lost, mut lost_rx) = client.request_spawn_channel(2, Position::default(), Rotation::default(), t0);
        assert_eq!(client.sweep_expired(t0 + Duration::from_secs(10)).len(), 1);
        assert!(matches!(lost_rx.try_recv().unwrap(), Err(SpawnFailure::TimedOut(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_times_out_lost_request() {
        let config = GameConfig::default();
        let client = ClientSession::new("p1", config.spawn.transaction_timeout);
        let sweep = client.spawn_sweep(config.spawn.sweep_interval);

        let (_lost, mut rx) = client.request_spawn_channel(
            2,
            Position::default(),
            Rotation::default(),
            tokio::time::Instant::now().into_std(),
        );
        tokio::time::sleep(config.spawn.transaction_timeout + config.spawn.sweep_interval).await;

        assert!(matches!(rx.try_recv().unwrap(), Err(SpawnFailure::TimedOut(_))));
        assert_eq!(client.transactions().pending_count(), 0);
        sweep.abort();
    }

    #[test]
    fn test_inventory_follows_own_updates_only() {
        let mut client = ClientSession::new("p1", Duration::from_secs(10));
        client.handle_server_message(&ServerMessage::Event {
            event: GameEvent::InventoryUpdated {
                player_id: "p2".into(),
                items: vec![3],
            },
        });
        assert!(client.inventory().is_empty());
        client.handle_server_message(&ServerMessage::Event {
            event: GameEvent::InventoryUpdated {
                player_id: "p1".into(),
                items: vec![4],
            },
        });
        assert_eq!(client.inventory(), &[4]);
    }

    #[test]
    fn test_mirror_is_read_only() {
        let server = server();
        server.join("p1", Position::default());
        let mut client = ClientSession::new("p1", Duration::from_secs(10));
        let (request, _rx) = client.request_spawn_channel(2, Position::default(), Rotation::default(), Instant::now());
        deliver(&mut client, &server.handle_message("p1", request, Instant::now()));

        let object_id = client.objects().snapshots()[0].object_id;
        assert_eq!(
            client.objects().despawn(object_id),
            Err(GameError::AuthorityViolation { operation: "despawn" })
        );
        assert!(client.object(object_id).is_some());
    }
}
