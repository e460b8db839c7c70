use serde::{
  Deserialize,
  Serialize,
};

use crate::inventory::owner::{
  HalaAttribute,
  HalaItemOwner,
  HalaProtection,
};

/// The category flags of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HalaItemFlags(u32);
impl HalaItemFlags {
  pub const NONE: Self = Self(0);
  pub const MELEE: Self = Self(1 << 0);
  pub const RANGED: Self = Self(1 << 1);
  pub const AMMO: Self = Self(1 << 2);
  pub const ARMOR: Self = Self(1 << 3);
  pub const FOOD: Self = Self(1 << 4);
  pub const DOCS: Self = Self(1 << 5);
  pub const POTION: Self = Self(1 << 6);
  pub const RUNE: Self = Self(1 << 7);
  pub const RING: Self = Self(1 << 8);
  pub const AMULET: Self = Self(1 << 9);
  pub const BELT: Self = Self(1 << 10);
  pub const SHIELD: Self = Self(1 << 11);
  /// Quest items survive a normal `clear`.
  pub const MISSION: Self = Self(1 << 12);
  /// Stackable: one instance with a count instead of one instance per piece.
  pub const MULTI: Self = Self(1 << 13);

  pub fn contains(&self, other: Self) -> bool {
    self.0 & other.0 == other.0
  }

  pub fn intersects(&self, other: Self) -> bool {
    self.0 & other.0 != 0
  }
}

impl std::ops::BitOr for HalaItemFlags {
  type Output = Self;
  fn bitor(self, rhs: Self) -> Self {
    Self(self.0 | rhs.0)
  }
}

/// An attribute requirement for wearing an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalaItemCond {
  pub attribute: HalaAttribute,
  pub value: i32,
}

/// An item instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HalaItem {
  pub class_id: usize,
  pub name: String,
  pub flags: HalaItemFlags,
  pub value: i32,
  pub damage: i32,
  pub protection: [i32; HalaProtection::COUNT],
  pub cond: Vec<HalaItemCond>,
  /// Attribute changes applied while equipped, or once when consumed.
  pub change: Vec<(HalaAttribute, i32)>,
  pub spell: Option<i32>,
  /// Ammunition class of a ranged weapon.
  pub munition: Option<usize>,
  pub(crate) count: usize,
  pub(crate) equip_count: usize,
}

/// The implementation of the item.
impl HalaItem {
  pub fn new(class_id: usize, name: &str, flags: HalaItemFlags) -> Self {
    Self {
      class_id,
      name: name.to_string(),
      flags,
      count: 1,
      ..Default::default()
    }
  }

  pub fn count(&self) -> usize {
    self.count
  }

  /// Set the number of pieces. Only stackable items carry more than one.
  pub fn with_count(mut self, count: usize) -> Self {
    self.count = if self.is_multi() { count } else { count.min(1) };
    self
  }

  pub fn is_multi(&self) -> bool {
    self.flags.contains(HalaItemFlags::MULTI)
  }

  pub fn is_mission(&self) -> bool {
    self.flags.contains(HalaItemFlags::MISSION)
  }

  pub fn is_equipped(&self) -> bool {
    self.equip_count > 0
  }

  pub fn equip_count(&self) -> usize {
    self.equip_count
  }

  /// Something that goes into an equip slot rather than being consumed.
  pub fn is_equipable(&self) -> bool {
    self.flags.intersects(
      HalaItemFlags::MELEE | HalaItemFlags::RANGED | HalaItemFlags::ARMOR | HalaItemFlags::RUNE
        | HalaItemFlags::RING | HalaItemFlags::AMULET | HalaItemFlags::BELT | HalaItemFlags::SHIELD)
  }

  /// Check the wearing requirements against an owner.
  pub fn check_cond(&self, owner: &dyn HalaItemOwner) -> bool {
    self.cond.iter().all(|c| owner.attribute(c.attribute) >= c.value)
  }

  pub fn total_protection(&self) -> i32 {
    self.protection.iter().sum()
  }

  /// Apply or revert the stat changes of this item.
  /// param owner: The owner.
  /// param sign: 1 to apply, -1 to revert.
  pub(crate) fn apply(&self, owner: &mut dyn HalaItemOwner, sign: i32) {
    for &(attribute, delta) in self.change.iter() {
      owner.change_attribute(attribute, delta * sign);
    }
    for (index, &value) in self.protection.iter().enumerate() {
      if let (Some(kind), true) = (HalaProtection::from_index(index), value != 0) {
        owner.change_protection(kind, value * sign);
      }
    }
  }

  /// The group an item is listed in, weapons first.
  pub(crate) fn order_id(&self) -> u8 {
    let groups = [
      HalaItemFlags::MELEE | HalaItemFlags::RANGED,
      HalaItemFlags::ARMOR | HalaItemFlags::SHIELD,
      HalaItemFlags::RUNE,
      HalaItemFlags::RING | HalaItemFlags::AMULET | HalaItemFlags::BELT,
      HalaItemFlags::FOOD,
      HalaItemFlags::POTION,
      HalaItemFlags::DOCS,
    ];
    groups.iter()
      .position(|&g| self.flags.intersects(g))
      .unwrap_or(groups.len()) as u8
  }
}
