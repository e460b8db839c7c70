use std::rc::Rc;

use crate::device::{
  HalaDevice,
  HalaTexture,
};
use crate::error::HalaWorldError;
use crate::packer::{
  HalaPackageType,
  HalaPackedMesh,
};
use crate::visual::{
  HalaBucketItem,
  HalaBucketType,
  HalaMaterial,
  HalaStaticMesh,
  HalaVisualObjects,
};

/// The world mesh. Every submesh is one landscape item at the origin.
pub struct HalaLandscape {
  items: Vec<HalaBucketItem>,
  mesh: HalaStaticMesh,
}

/// The implementation of the landscape.
impl HalaLandscape {
  /// Upload the world mesh and register it.
  /// param device: The device.
  /// param visual: The visual objects to register with.
  /// param packed: The world mesh, packed as a landscape.
  /// param textures: The texture of each submesh.
  /// param ray_tracing: Build bottom level structures.
  /// return: The landscape.
  pub fn new(
    device: Rc<dyn HalaDevice>,
    visual: &mut HalaVisualObjects,
    packed: &HalaPackedMesh,
    textures: &[HalaTexture],
    ray_tracing: bool,
  ) -> Result<Self, HalaWorldError> {
    if packed.package_type != HalaPackageType::VISUAL_LANDSCAPE {
      log::warn!("World mesh \"{}\" was not packed as a landscape.", packed.name);
    }
    if textures.len() != packed.sub_meshes.len() {
      return Err(HalaWorldError::new(
        &format!("World mesh \"{}\" has {} submeshes but {} textures were given.", packed.name, packed.sub_meshes.len(), textures.len()),
        None));
    }

    let mesh = HalaStaticMesh::new(device, packed, ray_tracing)?;
    let mut items = Vec::with_capacity(mesh.sub_meshes.len());
    for (sub, &texture) in mesh.sub_meshes.iter().zip(textures.iter()) {
      let material = HalaMaterial::from_raw(&sub.material, texture);
      items.push(visual.get(&mesh, material, sub.first_index, sub.index_count, HalaBucketType::LANDSCAPE)?);
    }
    log::debug!("A HalaLandscape with {} items is created.", items.len());
    Ok(Self { items, mesh })
  }

  pub fn mesh(&self) -> &HalaStaticMesh {
    &self.mesh
  }

  pub fn item_count(&self) -> usize {
    self.items.len()
  }
}
