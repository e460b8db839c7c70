use serde::{
  Deserialize,
  Serialize,
};

use crate::inventory::item::HalaItem;

/// A character attribute that items read or change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HalaAttribute(u8);
impl HalaAttribute {
  pub const HITPOINTS: Self = Self(0);
  pub const HITPOINTS_MAX: Self = Self(1);
  pub const MANA: Self = Self(2);
  pub const MANA_MAX: Self = Self(3);
  pub const STRENGTH: Self = Self(4);
  pub const DEXTERITY: Self = Self(5);

  pub fn to_u8(&self) -> u8 {
    self.0
  }
}

/// A damage kind armor protects against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HalaProtection(u8);
impl HalaProtection {
  pub const BLUNT: Self = Self(0);
  pub const EDGE: Self = Self(1);
  pub const FIRE: Self = Self(2);
  pub const FLY: Self = Self(3);
  pub const MAGIC: Self = Self(4);
  pub const POINT: Self = Self(5);
  pub const COUNT: usize = 6;

  pub fn from_index(index: usize) -> Option<Self> {
    if index < Self::COUNT {
      Some(Self(index as u8))
    } else {
      None
    }
  }

  pub fn index(&self) -> usize {
    self.0 as usize
  }
}

/// The character that carries an inventory.
/// Equipping and using items changes its stats and runs its scripted callbacks.
pub trait HalaItemOwner {
  fn attribute(&self, attribute: HalaAttribute) -> i32;
  fn change_attribute(&mut self, attribute: HalaAttribute, delta: i32);
  fn change_protection(&mut self, protection: HalaProtection, delta: i32);

  fn on_equip(&mut self, _item: &HalaItem) {}
  fn on_unequip(&mut self, _item: &HalaItem) {}

  /// Run the use script of a consumable.
  /// return: False if the owner refuses the item, it is not consumed then.
  fn on_use(&mut self, _item: &HalaItem) -> bool {
    true
  }
}

/// Creates item instances by class, the way the game scripts define them.
pub trait HalaItemFactory {
  fn create_item(&mut self, class_id: usize, count: usize) -> Option<HalaItem>;
}
