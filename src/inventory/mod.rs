pub mod item;
pub mod owner;
#[allow(clippy::module_inception)]
pub mod inventory;
pub mod record;

pub use item::{
  HalaItem,
  HalaItemCond,
  HalaItemFlags,
};
pub use owner::{
  HalaAttribute,
  HalaItemFactory,
  HalaItemOwner,
  HalaProtection,
};
pub use inventory::{
  HalaActiveWeapon,
  HalaEquipSlot,
  HalaInventory,
  HalaItemKey,
  HalaIterationKind,
  SPELL_SLOT_COUNT,
};
pub use record::{
  HalaInventoryRecord,
  HalaItemRecord,
};
