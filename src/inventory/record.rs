use serde::{
  Deserialize,
  Serialize,
};

use crate::error::HalaWorldError;
use crate::inventory::inventory::{
  HalaActiveWeapon,
  HalaEquipSlot,
};

/// One saved item instance or stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalaItemRecord {
  pub class_id: usize,
  pub count: usize,
  #[serde(default)]
  pub slots: Vec<HalaEquipSlot>,
}

/// The saved state of an inventory, in listing order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HalaInventoryRecord {
  #[serde(default)]
  pub items: Vec<HalaItemRecord>,
  #[serde(default)]
  pub active: HalaActiveWeapon,
}

/// The implementation of the inventory record.
impl HalaInventoryRecord {
  pub fn to_json(&self) -> Result<String, HalaWorldError> {
    Ok(serde_json::to_string(self)?)
  }

  pub fn from_json_str(json: &str) -> Result<Self, HalaWorldError> {
    Ok(serde_json::from_str(json)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::inventory::inventory::HalaInventory;
  use crate::inventory::inventory::tests::{
    GOLD,
    RUNE,
    TestOwner,
    TestWorld,
  };

  #[test]
  fn json_round_trip_keeps_spell_slots() {
    let mut world = TestWorld;
    let mut owner = TestOwner::default();
    let mut inventory = HalaInventory::new();
    inventory.add_item(RUNE, 1, &mut world);
    inventory.add_item(GOLD, 7, &mut world);
    inventory.equip(RUNE, &mut owner, false);
    inventory.switch_active_weapon(HalaActiveWeapon::Spell(0));

    let json = inventory.save().to_json().unwrap();
    let record = HalaInventoryRecord::from_json_str(&json).unwrap();
    assert_eq!(record, inventory.save());

    let loaded = HalaInventory::load(&record, &mut world);
    assert_eq!(loaded.current_spell(0).map(|i| i.class_id), Some(RUNE));
    assert_eq!(loaded.active_weapon(), HalaActiveWeapon::Spell(0));
  }

  #[test]
  fn missing_fields_and_unknown_classes() {
    let record = HalaInventoryRecord::from_json_str(r#"{"items":[{"class_id":50,"count":3},{"class_id":999,"count":1,"slots":["Armor"]}]}"#).unwrap();
    assert_eq!(record.active, HalaActiveWeapon::None);
    assert!(record.items[0].slots.is_empty());

    let loaded = HalaInventory::load(&record, &mut TestWorld);
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.item_count(GOLD), 3);
    assert!(loaded.current_armor().is_none());

    assert!(HalaInventoryRecord::from_json_str("{\"items\": 5}").is_err());
  }
}
