pub use crate::error::HalaWorldError;
pub use crate::config::HalaWorldConfig;
pub use crate::device::{
  HalaDevice,
  HalaDeviceError,
  HalaCommandEncoder,
};
pub use crate::packer::{
  HalaMeshPacker,
  HalaPackageType,
  HalaPackedMesh,
};
pub use crate::visual::{
  HalaBucketItem,
  HalaBucketType,
  HalaMaterial,
  HalaStaticMesh,
  HalaVisualObjects,
};
pub use crate::rt_scene::HalaRtScene;
pub use crate::world::HalaWorldView;
pub use crate::inventory::{
  HalaInventory,
  HalaItem,
  HalaItemFactory,
  HalaItemOwner,
};
