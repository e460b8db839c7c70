use serde::{
  Deserialize,
  Serialize,
};
use slotmap::{
  SlotMap,
  new_key_type,
};

use crate::inventory::item::{
  HalaItem,
  HalaItemFlags,
};
use crate::inventory::owner::{
  HalaItemFactory,
  HalaItemOwner,
};
use crate::inventory::record::{
  HalaInventoryRecord,
  HalaItemRecord,
};

new_key_type! {
  /// The handle of an item owned by an inventory.
  pub struct HalaItemKey;
}

pub const SPELL_SLOT_COUNT: usize = 8;
const SLOT_COUNT: usize = 8 + SPELL_SLOT_COUNT;

/// An equip slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HalaEquipSlot {
  Armor,
  Belt,
  Amulet,
  RingLeft,
  RingRight,
  Melee,
  Ranged,
  Shield,
  Spell(u8),
}

/// The implementation of the equip slot.
impl HalaEquipSlot {
  pub fn index(&self) -> usize {
    match *self {
      Self::Armor => 0,
      Self::Belt => 1,
      Self::Amulet => 2,
      Self::RingLeft => 3,
      Self::RingRight => 4,
      Self::Melee => 5,
      Self::Ranged => 6,
      Self::Shield => 7,
      Self::Spell(i) => 8 + i as usize,
    }
  }

  pub fn from_index(index: usize) -> Option<Self> {
    Some(match index {
      0 => Self::Armor,
      1 => Self::Belt,
      2 => Self::Amulet,
      3 => Self::RingLeft,
      4 => Self::RingRight,
      5 => Self::Melee,
      6 => Self::Ranged,
      7 => Self::Shield,
      i if i < SLOT_COUNT => Self::Spell((i - 8) as u8),
      _ => return None,
    })
  }
}

/// What the owner holds in its hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HalaActiveWeapon {
  #[default]
  None,
  Fist,
  Melee,
  Ranged,
  Spell(u8),
}

/// The implementation of the active weapon.
impl HalaActiveWeapon {
  fn slot(&self) -> Option<HalaEquipSlot> {
    match *self {
      Self::Melee => Some(HalaEquipSlot::Melee),
      Self::Ranged => Some(HalaEquipSlot::Ranged),
      Self::Spell(i) => Some(HalaEquipSlot::Spell(i)),
      Self::None | Self::Fist => None,
    }
  }
}

/// Which items a listing shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalaIterationKind {
  /// Everything, the owner's own view.
  Inventory,
  /// What a trader may buy: no worn pieces, no quest items.
  Trade,
  /// What can be looted: no worn pieces.
  Ransack,
}

/// The items of one owner plus its equip slots.
/// Slots never own an item, they refer to one in `items`.
#[derive(Default)]
pub struct HalaInventory {
  items: SlotMap<HalaItemKey, HalaItem>,
  slots: [Option<HalaItemKey>; SLOT_COUNT],
  active: HalaActiveWeapon,
}

/// The implementation of the inventory.
impl HalaInventory {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// The number of item instances. A stack counts once.
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn get(&self, key: HalaItemKey) -> Option<&HalaItem> {
    self.items.get(key)
  }

  /// The number of pieces of a class.
  pub fn item_count(&self, class_id: usize) -> usize {
    self.items.values()
      .filter(|item| item.class_id == class_id)
      .map(|item| item.count)
      .sum()
  }

  pub fn price_of(&self, class_id: usize) -> i32 {
    self.items.values()
      .find(|item| item.class_id == class_id)
      .map_or(0, |item| item.value)
  }

  /// What a trader pays for one piece of a class.
  /// param class_id: The class.
  /// param multiplier: The trade value multiplier of the world.
  /// return: The price, rounded down.
  pub fn sell_price_of(&self, class_id: usize, multiplier: f32) -> i32 {
    (self.price_of(class_id) as f32 * multiplier).floor() as i32
  }

  /// The money the owner carries.
  /// param gold_class: The class of the currency item.
  pub fn gold_count(&self, gold_class: usize) -> usize {
    self.item_count(gold_class)
  }

  /// Find an instance of a class, preferring ones that are not worn.
  pub fn find(&self, class_id: usize) -> Option<HalaItemKey> {
    let mut worn = None;
    for (key, item) in self.items.iter().filter(|(_, item)| item.class_id == class_id) {
      if item.equip_count < item.count {
        return Some(key);
      }
      worn.get_or_insert(key);
    }
    worn
  }

  pub fn slot(&self, slot: HalaEquipSlot) -> Option<&HalaItem> {
    self.slot_key(slot).and_then(|key| self.items.get(key))
  }

  pub fn slot_key(&self, slot: HalaEquipSlot) -> Option<HalaItemKey> {
    self.slots.get(slot.index()).copied().flatten()
  }

  /// The slots referring to an item.
  pub fn slots_of(&self, key: HalaItemKey) -> impl Iterator<Item = HalaEquipSlot> + '_ {
    self.slots.iter()
      .enumerate()
      .filter(move |(_, k)| **k == Some(key))
      .filter_map(|(i, _)| HalaEquipSlot::from_index(i))
  }

  pub fn current_armor(&self) -> Option<&HalaItem> {
    self.slot(HalaEquipSlot::Armor)
  }

  pub fn current_melee_weapon(&self) -> Option<&HalaItem> {
    self.slot(HalaEquipSlot::Melee)
  }

  pub fn current_ranged_weapon(&self) -> Option<&HalaItem> {
    self.slot(HalaEquipSlot::Ranged)
  }

  pub fn current_spell(&self, index: u8) -> Option<&HalaItem> {
    self.slot(HalaEquipSlot::Spell(index))
  }

  pub fn has_mission_items(&self) -> bool {
    self.items.values().any(|item| item.is_mission())
  }

  pub fn has_spell(&self, spell: i32) -> bool {
    self.items.values().any(|item| item.spell == Some(spell))
  }

  /// Check that a weapon has the ammunition it needs.
  pub fn has_ammo_for(&self, weapon: &HalaItem) -> bool {
    match weapon.munition {
      Some(ammo) => self.item_count(ammo) > 0,
      None => true,
    }
  }

  /// The items of a listing, weapons first and by class within a group.
  pub fn iter(&self, kind: HalaIterationKind) -> Vec<(HalaItemKey, &HalaItem)> {
    let mut items = self.items.iter()
      .filter(|(_, item)| match kind {
        HalaIterationKind::Inventory => true,
        HalaIterationKind::Trade => item.equip_count < item.count && !item.is_mission(),
        HalaIterationKind::Ransack => item.equip_count < item.count,
      })
      .collect::<Vec<_>>();
    items.sort_by_key(|(_, item)| (item.order_id(), item.class_id));
    items
  }

  /// Take ownership of an item. Stackable items join an existing stack.
  /// param item: The item.
  /// return: The key of the item or of the stack it joined.
  pub fn add(&mut self, mut item: HalaItem) -> HalaItemKey {
    item.equip_count = 0;
    if item.is_multi() {
      if let Some((key, stack)) = self.items.iter_mut().find(|(_, s)| s.class_id == item.class_id && s.is_multi()) {
        stack.count += item.count;
        return key;
      }
    }
    self.items.insert(item)
  }

  /// Add pieces of a class, created by the world.
  /// param class_id: The class.
  /// param count: The number of pieces.
  /// param world: The item factory.
  /// return: The key of the last added instance, None if nothing was added.
  pub fn add_item(&mut self, class_id: usize, count: usize, world: &mut dyn HalaItemFactory) -> Option<HalaItemKey> {
    if count == 0 {
      return None;
    }
    if let Some((key, stack)) = self.items.iter_mut().find(|(_, s)| s.class_id == class_id && s.is_multi()) {
      stack.count += count;
      return Some(key);
    }

    let Some(item) = world.create_item(class_id, count) else {
      log::warn!("The world cannot create an item of class {}.", class_id);
      return None;
    };
    if item.is_multi() {
      return Some(self.add(item.with_count(count)));
    }
    let mut key = None;
    for _ in 0..count {
      key = Some(self.add(item.clone().with_count(1)));
    }
    key
  }

  /// Remove pieces of a class. Loose pieces go first, worn ones are taken off before they are removed.
  /// param class_id: The class.
  /// param count: The number of pieces.
  /// param owner: The owner, gets the stat reversal of removed worn pieces.
  /// return: The number of pieces removed.
  pub fn del_item(&mut self, class_id: usize, count: usize, owner: &mut dyn HalaItemOwner) -> usize {
    let mut removed = 0;
    while removed < count {
      let Some(key) = self.find(class_id) else {
        break;
      };
      match self.take(key, count - removed, owner) {
        Some(part) => removed += part.count,
        None => break,
      }
    }
    removed
  }

  /// Move pieces of a class from one inventory to another.
  /// A shortfall is not an error, whatever exists is moved.
  /// param to: The receiver.
  /// param from: The giver.
  /// param from_owner: The giver's character, worn pieces are taken off it.
  /// param class_id: The class.
  /// param count: The number of pieces wanted.
  /// param world: Creates the receiver's instance when a stack is split.
  /// return: The number of pieces moved.
  pub fn transfer(
    to: &mut Self,
    from: &mut Self,
    from_owner: &mut dyn HalaItemOwner,
    class_id: usize,
    count: usize,
    world: &mut dyn HalaItemFactory,
  ) -> usize {
    let mut moved = 0;
    while moved < count {
      let Some(key) = from.find(class_id) else {
        break;
      };
      let Some(part) = from.take(key, count - moved, from_owner) else {
        break;
      };
      moved += part.count;
      if from.items.contains_key(key) {
        let pieces = part.count;
        if to.add_item(class_id, pieces, world).is_none() {
          to.add(part);
        }
      } else {
        to.add(part);
      }
    }
    moved
  }

  /// Detach up to `count` pieces of an instance.
  /// Worn pieces that would no longer exist are taken off first.
  fn take(&mut self, key: HalaItemKey, count: usize, owner: &mut dyn HalaItemOwner) -> Option<HalaItem> {
    let item = self.items.get(key)?;
    let count = count.min(item.count);
    if count == 0 {
      return None;
    }
    let remaining = item.count - count;
    while self.items.get(key).is_some_and(|item| item.equip_count > remaining) {
      let Some(slot) = self.slots_of(key).last() else {
        break;
      };
      self.clear_slot(slot, owner);
    }

    if remaining == 0 {
      return self.items.remove(key);
    }
    let stack = self.items.get_mut(key)?;
    stack.count = remaining;
    let mut part = stack.clone();
    part.count = count;
    part.equip_count = 0;
    Some(part)
  }

  /// Wear an item of a class.
  /// param class_id: The class.
  /// param owner: The owner.
  /// param force: Skip the attribute requirements.
  /// return: True if the item was put on.
  pub fn equip(&mut self, class_id: usize, owner: &mut dyn HalaItemOwner, force: bool) -> bool {
    let key = self.items.iter()
      .find(|(_, item)| item.class_id == class_id && item.is_equipable() && item.equip_count < item.count)
      .map(|(key, _)| key);
    match key {
      Some(key) => self.equip_key(key, owner, None, force),
      None => false,
    }
  }

  /// Take off an item of a class.
  /// return: False if nothing of that class is worn.
  pub fn unequip(&mut self, class_id: usize, owner: &mut dyn HalaItemOwner) -> bool {
    let key = self.items.iter()
      .find(|(_, item)| item.class_id == class_id && item.is_equipped())
      .map(|(key, _)| key);
    match key {
      Some(key) => {
        self.unequip_key(key, owner);
        true
      },
      None => false,
    }
  }

  /// Use an item: worn items toggle, consumables run their use script and are eaten.
  /// param class_id: The class.
  /// param owner: The owner.
  /// param force: Skip the attribute requirements when equipping.
  /// return: True if something happened.
  pub fn use_item(&mut self, class_id: usize, owner: &mut dyn HalaItemOwner, force: bool) -> bool {
    self.use_item_in_slot(class_id, owner, None, force)
  }

  /// Use an item, putting a rune into a chosen spell slot.
  /// param class_id: The class.
  /// param owner: The owner.
  /// param slot_hint: The spell slot for a rune. Out of range hints fall back to the first free slot.
  /// param force: Skip the attribute requirements when equipping.
  /// return: True if something happened.
  pub fn use_item_in_slot(&mut self, class_id: usize, owner: &mut dyn HalaItemOwner, slot_hint: Option<u8>, force: bool) -> bool {
    let Some(key) = self.find(class_id) else {
      return false;
    };
    let Some(item) = self.items.get(key) else {
      return false;
    };

    if item.is_equipable() {
      return if item.equip_count < item.count {
        self.equip_key(key, owner, slot_hint, force)
      } else {
        self.unequip(class_id, owner)
      };
    }

    if !owner.on_use(item) {
      return false;
    }
    if item.flags.contains(HalaItemFlags::DOCS) {
      return true;
    }
    item.apply(owner, 1);
    self.take(key, 1, owner);
    true
  }

  /// Take off every worn item whose requirements the owner no longer meets.
  pub fn invalidate_cond(&mut self, owner: &mut dyn HalaItemOwner) {
    loop {
      let viewer: &dyn HalaItemOwner = owner;
      let failing = self.slots.iter()
        .enumerate()
        .find(|(_, key)| {
          key.and_then(|key| self.items.get(key))
            .is_some_and(|item| !item.check_cond(viewer))
        })
        .and_then(|(i, _)| HalaEquipSlot::from_index(i));
      match failing {
        Some(slot) => self.clear_slot(slot, owner),
        None => break,
      }
    }
  }

  /// Wear the armor with the best protection.
  /// return: True if the armor changed.
  pub fn equip_best_armor(&mut self, owner: &mut dyn HalaItemOwner) -> bool {
    self.equip_best(HalaItemFlags::ARMOR, owner, HalaItem::total_protection)
  }

  pub fn equip_best_melee_weapon(&mut self, owner: &mut dyn HalaItemOwner) -> bool {
    self.equip_best(HalaItemFlags::MELEE, owner, |item| item.damage)
  }

  pub fn equip_best_ranged_weapon(&mut self, owner: &mut dyn HalaItemOwner) -> bool {
    self.equip_best(HalaItemFlags::RANGED, owner, |item| item.damage)
  }

  pub fn auto_equip_weapons(&mut self, owner: &mut dyn HalaItemOwner) {
    self.equip_best_melee_weapon(owner);
    self.equip_best_ranged_weapon(owner);
  }

  pub fn unequip_weapons(&mut self, owner: &mut dyn HalaItemOwner) {
    self.clear_slot(HalaEquipSlot::Melee, owner);
    self.clear_slot(HalaEquipSlot::Ranged, owner);
    self.active = HalaActiveWeapon::None;
  }

  pub fn unequip_armor(&mut self, owner: &mut dyn HalaItemOwner) {
    self.clear_slot(HalaEquipSlot::Armor, owner);
  }

  /// Remove all items.
  /// param owner: The owner, gets the stat reversal of worn pieces.
  /// param include_mission: Remove quest items too.
  pub fn clear(&mut self, owner: &mut dyn HalaItemOwner, include_mission: bool) {
    let keys = self.items.iter()
      .filter(|(_, item)| include_mission || !item.is_mission())
      .map(|(key, _)| key)
      .collect::<Vec<_>>();
    for key in keys {
      self.unequip_key(key, owner);
      self.items.remove(key);
    }
  }

  pub fn active_weapon(&self) -> HalaActiveWeapon {
    self.active
  }

  /// The item in the owner's hands.
  pub fn active_item(&self) -> Option<&HalaItem> {
    self.active.slot().and_then(|slot| self.slot(slot))
  }

  pub fn switch_active_weapon_fist(&mut self) {
    self.active = HalaActiveWeapon::Fist;
  }

  /// Draw a weapon or spell.
  /// return: False if the slot it comes from is empty.
  pub fn switch_active_weapon(&mut self, weapon: HalaActiveWeapon) -> bool {
    if let Some(slot) = weapon.slot() {
      if self.slot_key(slot).is_none() {
        return false;
      }
    }
    self.active = weapon;
    true
  }

  /// Write the items and slot assignments into a record.
  pub fn save(&self) -> HalaInventoryRecord {
    let items = self.iter(HalaIterationKind::Inventory)
      .into_iter()
      .map(|(key, item)| HalaItemRecord {
        class_id: item.class_id,
        count: item.count,
        slots: self.slots_of(key).collect(),
      })
      .collect();
    HalaInventoryRecord { items, active: self.active }
  }

  /// Rebuild an inventory from a record.
  /// Slot assignments are restored without applying stats again, the owner's saved stats include them.
  /// param record: The record.
  /// param world: The item factory.
  /// return: The inventory.
  pub fn load(record: &HalaInventoryRecord, world: &mut dyn HalaItemFactory) -> Self {
    let mut inventory = Self::new();
    for entry in record.items.iter() {
      let Some(item) = world.create_item(entry.class_id, entry.count) else {
        log::warn!("The world cannot create an item of class {}, it is dropped from the inventory.", entry.class_id);
        continue;
      };
      let pieces = if item.is_multi() { 1 } else { entry.count };
      let mut first = None;
      for _ in 0..pieces {
        let mut item = item.clone().with_count(entry.count);
        item.equip_count = 0;
        let key = inventory.items.insert(item);
        first.get_or_insert(key);
      }
      let Some(key) = first else {
        continue;
      };
      for &slot in entry.slots.iter() {
        let index = slot.index();
        if index < SLOT_COUNT && inventory.slots[index].is_none() {
          inventory.slots[index] = Some(key);
          if let Some(item) = inventory.items.get_mut(key) {
            item.equip_count += 1;
          }
        }
      }
    }
    inventory.active = match record.active.slot() {
      Some(slot) if inventory.slot_key(slot).is_none() => HalaActiveWeapon::None,
      _ => record.active,
    };
    inventory
  }

  fn equip_key(&mut self, key: HalaItemKey, owner: &mut dyn HalaItemOwner, slot_hint: Option<u8>, force: bool) -> bool {
    let Some(item) = self.items.get(key) else {
      return false;
    };
    if !force && !item.check_cond(owner) {
      return false;
    }
    let Some(slot) = self.target_slot(item, slot_hint) else {
      return false;
    };
    self.set_slot(slot, key, owner);
    true
  }

  /// The slot an item goes into. A ring goes left if that is free and right otherwise.
  /// A rune goes into the hinted spell slot, else the first free one.
  fn target_slot(&self, item: &HalaItem, slot_hint: Option<u8>) -> Option<HalaEquipSlot> {
    let flags = item.flags;
    if flags.contains(HalaItemFlags::RING) {
      return Some(if self.slot_key(HalaEquipSlot::RingLeft).is_none() {
        HalaEquipSlot::RingLeft
      } else {
        HalaEquipSlot::RingRight
      });
    }
    if flags.contains(HalaItemFlags::RUNE) {
      if let Some(hint) = slot_hint.filter(|&i| (i as usize) < SPELL_SLOT_COUNT) {
        return Some(HalaEquipSlot::Spell(hint));
      }
      let free = (0..SPELL_SLOT_COUNT as u8)
        .find(|&i| self.slot_key(HalaEquipSlot::Spell(i)).is_none())
        .unwrap_or(SPELL_SLOT_COUNT as u8 - 1);
      return Some(HalaEquipSlot::Spell(free));
    }
    [
      (HalaItemFlags::ARMOR, HalaEquipSlot::Armor),
      (HalaItemFlags::MELEE, HalaEquipSlot::Melee),
      (HalaItemFlags::RANGED, HalaEquipSlot::Ranged),
      (HalaItemFlags::SHIELD, HalaEquipSlot::Shield),
      (HalaItemFlags::BELT, HalaEquipSlot::Belt),
      (HalaItemFlags::AMULET, HalaEquipSlot::Amulet),
    ].iter()
      .find(|(flag, _)| flags.contains(*flag))
      .map(|&(_, slot)| slot)
  }

  fn equip_best(&mut self, flag: HalaItemFlags, owner: &mut dyn HalaItemOwner, score: impl Fn(&HalaItem) -> i32) -> bool {
    let viewer: &dyn HalaItemOwner = owner;
    let best = self.items.iter()
      .filter(|(_, item)| item.flags.contains(flag) && item.check_cond(viewer) && self.has_ammo_for(item))
      .max_by_key(|(_, item)| (score(*item), item.value))
      .map(|(key, item)| (key, score(item)));
    let Some((key, best_score)) = best else {
      return false;
    };
    let Some(slot) = self.items.get(key).and_then(|item| self.target_slot(item, None)) else {
      return false;
    };
    if let Some(current) = self.slot(slot) {
      if self.slot_key(slot) == Some(key) || score(current) >= best_score {
        return false;
      }
    }
    self.set_slot(slot, key, owner);
    true
  }

  fn set_slot(&mut self, slot: HalaEquipSlot, key: HalaItemKey, owner: &mut dyn HalaItemOwner) {
    if self.slot_key(slot) == Some(key) {
      return;
    }
    self.clear_slot(slot, owner);
    if let Some(item) = self.items.get_mut(key) {
      self.slots[slot.index()] = Some(key);
      item.equip_count += 1;
      item.apply(owner, 1);
      owner.on_equip(item);
    }
  }

  fn clear_slot(&mut self, slot: HalaEquipSlot, owner: &mut dyn HalaItemOwner) {
    let Some(key) = self.slots[slot.index()].take() else {
      return;
    };
    if self.active.slot() == Some(slot) {
      self.active = HalaActiveWeapon::None;
    }
    if let Some(item) = self.items.get_mut(key) {
      item.equip_count = item.equip_count.saturating_sub(1);
      item.apply(owner, -1);
      owner.on_unequip(item);
    }
  }

  fn unequip_key(&mut self, key: HalaItemKey, owner: &mut dyn HalaItemOwner) {
    let slots = self.slots_of(key).collect::<Vec<_>>();
    for slot in slots {
      self.clear_slot(slot, owner);
    }
  }
}
