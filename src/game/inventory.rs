// src/game/inventory.rs
// Bounded FIFO of item ids carried by one player

use std::collections::VecDeque;

use serde::Serialize;

use super::events::{EventBus, GameEvent};
use super::ItemId;
use crate::error::GameResult;

/// Player inventory. Oldest item is at the front and is the next one placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inventory {
    items: VecDeque<ItemId>,
    capacity: usize,
}

impl Inventory {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push to the back. Fails without mutation if full or `item_id <= 0`.
    pub fn try_add(&mut self, item_id: ItemId) -> bool {
        if item_id <= 0 || self.is_full() {
            return false;
        }
        self.items.push_back(item_id);
        true
    }

    pub fn try_pop(&mut self) -> Option<ItemId> {
        self.items.pop_front()
    }

    pub fn peek_front(&self) -> Option<ItemId> {
        self.items.front().copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn has_space(&self) -> bool {
        !self.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ordered copy, front first (the replicated view)
    pub fn items(&self) -> Vec<ItemId> {
        self.items.iter().copied().collect()
    }

    /// Undo the most recent `try_add`
    pub(crate) fn undo_add(&mut self) -> Option<ItemId> {
        self.items.pop_back()
    }

    /// Undo the most recent `try_pop`
    pub(crate) fn restore_front(&mut self, item_id: ItemId) {
        self.items.push_front(item_id);
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Pushes an inventory's ordered list to observers. A failure here makes the
/// caller roll back its local change.
pub trait InventoryReplicator: Send + Sync {
    fn replicate(&self, player_id: &str, items: &[ItemId]) -> GameResult<()>;
}

impl InventoryReplicator for EventBus {
    fn replicate(&self, player_id: &str, items: &[ItemId]) -> GameResult<()> {
        self.publish(GameEvent::InventoryUpdated {
            player_id: player_id.to_string(),
            items: items.to_vec(),
        });
        Ok(())
    }
}
