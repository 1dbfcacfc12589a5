// src/game/catalog.rs
// Item definitions the spawn service accepts

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::effects::EffectKind;
use super::world_object::Placement;
use super::ItemId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDefinition {
    pub item_id: ItemId,
    pub name: String,
    pub placement: Placement,
    #[serde(default)]
    pub cooldown_ms: u64,
    #[serde(default)]
    pub one_shot: bool,
    pub effect: EffectKind,
}

impl ItemDefinition {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    items: BTreeMap<ItemId, ItemDefinition>,
}

impl ItemCatalog {
    /// Definitions with a non-positive id are dropped
    pub fn new(definitions: impl IntoIterator<Item = ItemDefinition>) -> Self {
        Self {
            items: definitions
                .into_iter()
                .filter(|definition| definition.item_id > 0)
                .map(|definition| (definition.item_id, definition))
                .collect(),
        }
    }

    /// Parse a JSON array of definitions
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let definitions: Vec<ItemDefinition> = serde_json::from_str(json)?;
        Ok(Self::new(definitions))
    }

    pub fn get(&self, item_id: ItemId) -> Option<&ItemDefinition> {
        self.items.get(&item_id)
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.items.contains_key(&item_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemDefinition> {
        self.items.values()
    }

    /// The stock trap set
    pub fn with_defaults() -> Self {
        Self::new([
            ItemDefinition {
                item_id: 1,
                name: "Bear Trap".into(),
                placement: Placement::Manual,
                cooldown_ms: 0,
                one_shot: true,
                effect: EffectKind::Freeze { duration_ms: 3000 },
            },
            ItemDefinition {
                item_id: 2,
                name: "Tar Pit".into(),
                placement: Placement::Manual,
                cooldown_ms: 2000,
                one_shot: false,
                effect: EffectKind::Slow { factor: 0.5, duration_ms: 4000 },
            },
            ItemDefinition {
                item_id: 3,
                name: "Flash Powder".into(),
                placement: Placement::Manual,
                cooldown_ms: 0,
                one_shot: true,
                effect: EffectKind::Blind { duration_ms: 2500 },
            },
            ItemDefinition {
                item_id: 4,
                name: "Alarm Bell".into(),
                placement: Placement::Auto,
                cooldown_ms: 8000,
                one_shot: false,
                effect: EffectKind::Reveal { duration_ms: 5000 },
            },
            ItemDefinition {
                item_id: 5,
                name: "Lantern".into(),
                placement: Placement::Manual,
                cooldown_ms: 0,
                one_shot: false,
                effect: EffectKind::None,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let catalog = ItemCatalog::with_defaults();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.get(4).map(|d| d.placement), Some(Placement::Auto));
        assert!(catalog.get(0).is_none());
    }

    #[test]
    fn test_from_json() {
        let catalog = ItemCatalog::from_json(
            r#"[
                {"itemId": 10, "name": "Snare", "placement": "manual", "cooldownMs": 500,
                 "effect": {"kind": "slow", "factor": 0.25, "duration_ms": 1000}},
                {"itemId": -1, "name": "Broken", "placement": "auto", "effect": {"kind": "none"}}
            ]"#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 1);
        let snare = catalog.get(10).unwrap();
        assert_eq!(snare.cooldown(), Duration::from_millis(500));
        assert!(!snare.one_shot);
    }
}
