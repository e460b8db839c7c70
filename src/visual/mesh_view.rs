use glam::Mat4;

use crate::device::HalaTexture;
use crate::error::HalaWorldError;
use crate::scene::HalaSphere;
use crate::visual::bucket::HalaBucketItem;
use crate::visual::material::{
  HalaBucketType,
  HalaMaterial,
};
use crate::visual::static_mesh::HalaStaticMesh;
use crate::visual::visual_objects::HalaVisualObjects;

/// One placed static mesh: an item per submesh, moved together.
#[derive(Debug, Default)]
pub struct HalaMeshView {
  items: Vec<HalaBucketItem>,
}

/// The implementation of the mesh view.
impl HalaMeshView {
  /// Register every submesh of a mesh.
  /// param visual: The visual objects.
  /// param mesh: The mesh.
  /// param textures: The texture of each submesh, in submesh order.
  /// param bucket_type: STATIC for world decoration, MOVABLE for things that move.
  /// return: The view.
  pub fn new(
    visual: &mut HalaVisualObjects,
    mesh: &HalaStaticMesh,
    textures: &[HalaTexture],
    bucket_type: HalaBucketType,
  ) -> Result<Self, HalaWorldError> {
    if textures.len() != mesh.sub_meshes.len() {
      return Err(HalaWorldError::new(
        &format!("Mesh \"{}\" has {} submeshes but {} textures were given.", mesh.name, mesh.sub_meshes.len(), textures.len()),
        None));
    }
    let items = mesh.sub_meshes.iter()
      .zip(textures.iter())
      .map(|(sub, &texture)| {
        let material = HalaMaterial::from_raw(&sub.material, texture);
        visual.get(mesh, material, sub.first_index, sub.index_count, bucket_type)
      })
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { items })
  }

  pub fn set_object_matrix(&self, transform: &Mat4) {
    for item in self.items.iter() {
      item.set_object_matrix(transform);
    }
  }

  /// The world space sphere around all submeshes.
  pub fn bounds(&self) -> Option<HalaSphere> {
    self.items.iter()
      .filter_map(HalaBucketItem::bounds)
      .reduce(|acc, sphere| acc.union(&sphere))
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}
