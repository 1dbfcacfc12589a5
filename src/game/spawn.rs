// src/game/spawn.rs
// Spawn request/response bookkeeping.
//
// `SpawnTransactions` is the client half: it hands out transaction ids, keeps
// the pending callbacks and fails anything the server never answered.
// `SpawnService` is the server half that validates and instantiates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::catalog::ItemCatalog;
use super::entity_state::{Position, Rotation};
use super::registry::ObjectRegistry;
use super::world_object::ObjectSnapshot;
use super::{ItemId, ObjectId, PlayerId, TransactionId};
use crate::config::SpawnConfig;
use crate::error::{GameResult, ValidationFailure};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub transaction_id: TransactionId,
    pub item_id: ItemId,
    pub position: Position,
    #[serde(default)]
    pub rotation: Rotation,
}

/* ------------------------------ server side ------------------------------ */

pub struct SpawnService {
    registry: Arc<ObjectRegistry>,
    catalog: Arc<ItemCatalog>,
    config: SpawnConfig,
    /// Serializes the ceiling check with the insert
    gate: Mutex<()>,
}

impl SpawnService {
    pub fn new(registry: Arc<ObjectRegistry>, catalog: Arc<ItemCatalog>, config: SpawnConfig) -> Self {
        Self {
            registry,
            catalog,
            config,
            gate: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SpawnConfig {
        &self.config
    }

    /// Validate and instantiate. Errors are meant for the requester only.
    pub fn handle_request(&self, requester: &str, request: &SpawnRequest) -> GameResult<ObjectSnapshot> {
        self.registry.role().ensure_authority("spawn")?;

        let result = self.validate_and_spawn(requester, request);
        if let Err(e) = &result {
            warn!(
                requester = %requester,
                transaction_id = request.transaction_id,
                item_id = request.item_id,
                error = %e,
                "Spawn request rejected"
            );
        }
        result
    }

    fn validate_and_spawn(&self, requester: &str, request: &SpawnRequest) -> GameResult<ObjectSnapshot> {
        if request.item_id <= 0 {
            return Err(ValidationFailure::InvalidItemId(request.item_id).into());
        }
        let definition = self
            .catalog
            .get(request.item_id)
            .ok_or(ValidationFailure::UnknownItem(request.item_id))?;

        let mut position = request.position;
        if position.y < self.config.min_height {
            debug!(
                requested_y = position.y,
                min_height = self.config.min_height,
                "Raising spawn position to height floor"
            );
            position.y = self.config.min_height;
        }

        let _gate = self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.registry.len() >= self.config.max_objects {
            return Err(ValidationFailure::SpawnLimitReached {
                max: self.config.max_objects,
            }
            .into());
        }
        let snapshot = self
            .registry
            .spawn(definition, position, request.rotation, Some(requester.to_string()))?;

        info!(
            requester = %requester,
            transaction_id = request.transaction_id,
            object_id = snapshot.object_id,
            "Spawn request approved"
        );
        Ok(snapshot)
    }
}

/* ------------------------------ client side ------------------------------ */

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpawnFailure {
    #[error("spawn rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("spawned object {0} not found in the local mirror")]
    NotFound(ObjectId),

    #[error("spawn transaction {0} timed out")]
    TimedOut(TransactionId),
}

pub type SpawnResolution = Result<ObjectSnapshot, SpawnFailure>;
pub type SpawnCallback = Box<dyn FnOnce(SpawnResolution) + Send + Sync>;

struct PendingSpawn {
    item_id: ItemId,
    created_at: Instant,
    callback: SpawnCallback,
}

/// Pending spawn transactions for one client session
pub struct SpawnTransactions {
    requester: PlayerId,
    next_id: AtomicU64,
    pending: DashMap<TransactionId, PendingSpawn>,
    timeout: Duration,
}

impl SpawnTransactions {
    pub fn new(requester: impl Into<PlayerId>, timeout: Duration) -> Self {
        Self {
            requester: requester.into(),
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            timeout,
        }
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    /// Record a pending transaction and build the request to send
    pub fn begin(
        &self,
        item_id: ItemId,
        position: Position,
        rotation: Rotation,
        callback: SpawnCallback,
        now: Instant,
    ) -> SpawnRequest {
        let transaction_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(
            transaction_id,
            PendingSpawn {
                item_id,
                created_at: now,
                callback,
            },
        );
        debug!(
            requester = %self.requester,
            transaction_id = transaction_id,
            item_id = item_id,
            "Spawn transaction opened"
        );
        SpawnRequest {
            transaction_id,
            item_id,
            position,
            rotation,
        }
    }

    /// Same as `begin`, resolving through a channel instead of a callback
    pub fn begin_channel(
        &self,
        item_id: ItemId,
        position: Position,
        rotation: Rotation,
        now: Instant,
    ) -> (SpawnRequest, oneshot::Receiver<SpawnResolution>) {
        let (tx, rx) = oneshot::channel();
        let request = self.begin(
            item_id,
            position,
            rotation,
            Box::new(move |resolution| {
                let _ = tx.send(resolution);
            }),
            now,
        );
        (request, rx)
    }

    /// Resolve from a server reply. The mirror must already hold the spawned
    /// object's snapshot. Returns false for unknown or already-resolved ids.
    pub fn resolve(
        &self,
        transaction_id: TransactionId,
        reply: Result<ObjectId, SpawnFailure>,
        mirror: &ObjectRegistry,
    ) -> bool {
        let Some((_, pending)) = self.pending.remove(&transaction_id) else {
            debug!(transaction_id = transaction_id, "Ignoring reply for resolved transaction");
            return false;
        };

        let resolution = reply.and_then(|object_id| mirror.get(object_id).ok_or(SpawnFailure::NotFound(object_id)));
        match &resolution {
            Ok(object) => debug!(
                transaction_id = transaction_id,
                object_id = object.object_id,
                "Spawn transaction resolved"
            ),
            Err(e) => warn!(
                transaction_id = transaction_id,
                item_id = pending.item_id,
                error = %e,
                "Spawn transaction failed"
            ),
        }
        (pending.callback)(resolution);
        true
    }

    /// Fail every transaction older than the timeout. Returns the expired ids.
    pub fn expire(&self, now: Instant) -> Vec<TransactionId> {
        let stale: Vec<TransactionId> = self
            .pending
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.value().created_at) >= self.timeout)
            .map(|entry| *entry.key())
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for transaction_id in stale {
            if let Some((_, pending)) = self.pending.remove(&transaction_id) {
                warn!(
                    requester = %self.requester,
                    transaction_id = transaction_id,
                    item_id = pending.item_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Spawn transaction timed out"
                );
                (pending.callback)(Err(SpawnFailure::TimedOut(transaction_id)));
                expired.push(transaction_id);
            }
        }
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, transaction_id: TransactionId) -> bool {
        self.pending.contains_key(&transaction_id)
    }

    /// Periodic timeout sweep
    pub async fn run_sweep_task(self: Arc<Self>, sweep_interval: Duration) {
        use tokio::time;

        info!(
            sweep_interval_ms = sweep_interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Starting spawn transaction sweep"
        );
        let mut interval = time::interval(sweep_interval);
        loop {
            let now = interval.tick().await.into_std();
            let expired = self.expire(now);
            if !expired.is_empty() {
                info!(expired = expired.len(), pending = self.pending_count(), "Swept stale spawn transactions");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GameError;
    use crate::game::events::EventBus;
    use crate::game::world_object::ObjectState;
    use crate::game::Role;
    use std::sync::atomic::AtomicUsize;

    fn service(max_objects: usize) -> SpawnService {
        SpawnService::new(
            Arc::new(ObjectRegistry::new(Role::Server, EventBus::new(64))),
            Arc::new(ItemCatalog::with_defaults()),
            SpawnConfig {
                max_objects,
                min_height: 0.5,
                transaction_timeout: Duration::from_secs(10),
                sweep_interval: Duration::from_secs(5),
            },
        )
    }

    fn request(transaction_id: TransactionId, item_id: ItemId, y: f32) -> SpawnRequest {
        SpawnRequest {
            transaction_id,
            item_id,
            position: Position::new(1.0, y, 1.0),
            rotation: Rotation::default(),
        }
    }

    #[test]
    fn test_spawn_validation() {
        let service = service(8);
        assert_eq!(
            service.handle_request("p1", &request(1, 0, 1.0)),
            Err(GameError::from(ValidationFailure::InvalidItemId(0)))
        );
        assert_eq!(
            service.handle_request("p1", &request(2, 99, 1.0)),
            Err(GameError::from(ValidationFailure::UnknownItem(99)))
        );

        let snapshot = service.handle_request("p1", &request(3, 2, -4.0)).unwrap();
        assert_eq!(snapshot.position.y, 0.5);
        assert_eq!(snapshot.state, ObjectState::Idle);
    }

    #[test]
    fn test_spawn_ceiling() {
        let service = service(2);
        service.handle_request("p1", &request(1, 2, 1.0)).unwrap();
        service.handle_request("p1", &request(2, 2, 1.0)).unwrap();
        assert_eq!(
            service.handle_request("p1", &request(3, 2, 1.0)),
            Err(GameError::from(ValidationFailure::SpawnLimitReached { max: 2 }))
        );
    }

    #[test]
    fn test_ceiling_holds_under_contention() {
        let service = Arc::new(service(5));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let service = service.clone();
                std::thread::spawn(move || service.handle_request("p1", &request(i, 2, 1.0)).is_ok())
            })
            .collect();
        let approved = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(approved, 5);
    }

    fn counting_callback(counter: Arc<AtomicUsize>, failures: Arc<AtomicUsize>) -> SpawnCallback {
        Box::new(move |resolution| {
            counter.fetch_add(1, Ordering::SeqCst);
            if resolution.is_err() {
                failures.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[test]
    fn test_timeout_resolves_once_and_late_reply_is_ignored() {
        let transactions = SpawnTransactions::new("p1", Duration::from_secs(10));
        let mirror = ObjectRegistry::new(Role::Client, EventBus::new(8));
        let calls = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));

        let t0 = Instant::now();
        let request = transactions.begin(
            2,
            Position::default(),
            Rotation::default(),
            counting_callback(calls.clone(), failures.clone()),
            t0,
        );

        assert!(transactions.expire(t0 + Duration::from_secs(9)).is_empty());
        assert_eq!(transactions.expire(t0 + Duration::from_secs(10)), vec![request.transaction_id]);
        assert!(transactions.expire(t0 + Duration::from_secs(20)).is_empty());

        assert!(!transactions.resolve(request.transaction_id, Ok(1), &mirror));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(transactions.pending_count(), 0);
    }

    #[test]
    fn test_success_resolves_with_mirrored_object() {
        let server = service(8);
        let transactions = SpawnTransactions::new("p1", Duration::from_secs(10));
        let mirror = ObjectRegistry::new(Role::Client, EventBus::new(8));

        let (request, mut rx) =
            transactions.begin_channel(2, Position::new(2.0, 1.0, 2.0), Rotation::default(), Instant::now());
        let snapshot = server.handle_request("p1", &request).unwrap();
        mirror.apply_snapshot(&snapshot);

        assert!(transactions.resolve(request.transaction_id, Ok(snapshot.object_id), &mirror));
        assert_eq!(rx.try_recv().unwrap(), Ok(snapshot));

        // The sweep has nothing left to fail
        assert!(transactions.expire(Instant::now() + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_missing_mirror_object_is_not_found() {
        let transactions = SpawnTransactions::new("p1", Duration::from_secs(10));
        let mirror = ObjectRegistry::new(Role::Client, EventBus::new(8));
        let (request, mut rx) = transactions.begin_channel(2, Position::default(), Rotation::default(), Instant::now());

        assert!(transactions.resolve(request.transaction_id, Ok(42), &mirror));
        assert_eq!(rx.try_recv().unwrap(), Err(SpawnFailure::NotFound(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_fails_unanswered_transaction_once() {
        let transactions = Arc::new(SpawnTransactions::new("p1", Duration::from_secs(10)));
        let calls = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let request = transactions.begin(
            2,
            Position::default(),
            Rotation::default(),
            counting_callback(calls.clone(), failures.clone()),
            tokio::time::Instant::now().into_std(),
        );

        let sweep = tokio::spawn(transactions.clone().run_sweep_task(Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(transactions.is_pending(request.transaction_id));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(transactions.pending_count(), 0);
        sweep.abort();
    }

    #[test]
    fn test_transaction_ids_are_unique() {
        let transactions = SpawnTransactions::new("p1", Duration::from_secs(10));
        let now = Instant::now();
        let a = transactions.begin(1, Position::default(), Rotation::default(), Box::new(|_| {}), now);
        let b = transactions.begin(1, Position::default(), Rotation::default(), Box::new(|_| {}), now);
        assert_ne!(a.transaction_id, b.transaction_id);
        assert_eq!(transactions.pending_count(), 2);
    }
}
