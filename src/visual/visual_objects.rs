use std::cell::RefCell;
use std::rc::Rc;

use crate::config::HalaWorldConfig;
use crate::device::{
  HalaBuffer,
  HalaCommandEncoder,
  HalaDevice,
};
use crate::error::HalaWorldError;
use crate::rt_scene::HalaRtScene;
use crate::scene::{
  HalaFrustum,
  HalaSphere,
};
use crate::visual::bucket::{
  HalaBucketItem,
  HalaBucketKey,
  HalaInstanceDesc,
  HalaObjectsBucket,
  HalaVisualShared,
};
use crate::visual::material::{
  HalaBucketType,
  HalaDrawPass,
  HalaMaterial,
  HalaPipelineKey,
};
use crate::visual::matrix_storage::{
  HalaMatrixId,
  HalaMatrixStorage,
};
use crate::visual::recycler::HalaRecycled;
use crate::visual::static_mesh::{
  HalaAnimMesh,
  HalaMeshGeometry,
  HalaStaticMesh,
};

/// Buckets created since the last index build are searched linearly up to this count.
const UNINDEXED_LIMIT: usize = 32;

/// Every renderable instance of a world, grouped into draw buckets.
pub struct HalaVisualObjects {
  buckets: Vec<Rc<RefCell<HalaObjectsBucket>>>,
  /// Bucket positions sorted by key. Covers `buckets[..indexed]`.
  index: Vec<usize>,
  indexed: usize,
  matrix: HalaMatrixStorage,
  shared: Rc<RefCell<HalaVisualShared>>,
  view_count: usize,
  ray_tracing: bool,
  device: Rc<dyn HalaDevice>,
}

/// The implementation of the visual objects.
impl HalaVisualObjects {
  /// Create the visual objects.
  /// param device: The device.
  /// param config: The world configuration.
  /// return: The visual objects.
  pub fn new(device: Rc<dyn HalaDevice>, config: &HalaWorldConfig) -> Result<Self, HalaWorldError> {
    let config = config.clone().sanitized();
    let matrix = HalaMatrixStorage::new(device.clone(), config.matrix_storage_capacity, config.max_frames_in_flight)?;
    let mut shared = HalaVisualShared::new(device.clone(), config.max_frames_in_flight);
    // The first ray tracing update always produces a structure, even an empty one.
    shared.tlas_dirty = true;
    log::debug!("A HalaVisualObjects is created.");
    Ok(Self {
      buckets: Vec::new(),
      index: Vec::new(),
      indexed: 0,
      matrix,
      shared: Rc::new(RefCell::new(shared)),
      view_count: config.view_count(),
      ray_tracing: config.ray_tracing,
      device,
    })
  }

  fn check_range(first_index: u32, index_count: u32, mesh: &HalaStaticMesh) -> Result<(), HalaWorldError> {
    if index_count == 0 {
      return Err(HalaWorldError::new(&format!("Mesh \"{}\": empty index range at {}.", mesh.name, first_index), None));
    }
    if first_index as u64 + index_count as u64 > mesh.index_count as u64 {
      return Err(HalaWorldError::new(
        &format!("Mesh \"{}\": index range {}+{} exceeds {} indices.", mesh.name, first_index, index_count, mesh.index_count),
        None));
    }
    Ok(())
  }

  /// Register an instance of a rigid mesh.
  /// param mesh: The uploaded mesh.
  /// param material: The material.
  /// param first_index: The first index of the range to draw.
  /// param index_count: The number of indices, must not be zero.
  /// param bucket_type: One of LANDSCAPE, STATIC, MOVABLE or MORPH.
  /// return: The item handle.
  pub fn get(
    &mut self,
    mesh: &HalaStaticMesh,
    material: HalaMaterial,
    first_index: u32,
    index_count: u32,
    bucket_type: HalaBucketType,
  ) -> Result<HalaBucketItem, HalaWorldError> {
    Self::check_range(first_index, index_count, mesh)?;
    if mesh.is_skinned() || bucket_type.is_skinned() || bucket_type == HalaBucketType::PFX {
      return Err(HalaWorldError::new(
        &format!("Mesh \"{}\" can not be drawn as bucket type {}.", mesh.name, bucket_type.to_u8()),
        None));
    }

    let key = HalaBucketKey {
      pipeline: HalaPipelineKey::new(bucket_type, material.alpha),
      texture: material.texture,
      vertex_buffer: Some(mesh.vertex_buffer),
      index_buffer: Some(mesh.index_buffer),
    };
    let desc = HalaInstanceDesc {
      first_index,
      index_count,
      local_sphere: mesh.range_sphere(first_index, index_count),
      bone_offset: 0,
      blas: if self.ray_tracing { mesh.blas(first_index, index_count) } else { None },
      always_visible: false,
    };
    Ok(self.alloc(key, desc, Some(mesh.geometry())))
  }

  /// Register an instance of a skinned mesh.
  /// param mesh: The uploaded mesh.
  /// param material: The material.
  /// param first_index: The first index of the range to draw.
  /// param index_count: The number of indices, must not be zero.
  /// param bones: The bone matrices of the instance, from `get_matrixes`.
  /// return: The item handle.
  pub fn get_anim(
    &mut self,
    mesh: &HalaAnimMesh,
    material: HalaMaterial,
    first_index: u32,
    index_count: u32,
    bones: &HalaMatrixId,
  ) -> Result<HalaBucketItem, HalaWorldError> {
    let mesh = mesh.mesh();
    Self::check_range(first_index, index_count, mesh)?;
    let key = HalaBucketKey {
      pipeline: HalaPipelineKey::new(HalaBucketType::ANIMATED, material.alpha),
      texture: material.texture,
      vertex_buffer: Some(mesh.vertex_buffer),
      index_buffer: Some(mesh.index_buffer),
    };
    let desc = HalaInstanceDesc {
      first_index,
      index_count,
      local_sphere: mesh.range_sphere(first_index, index_count),
      bone_offset: bones.offset(),
      blas: None,
      always_visible: false,
    };
    Ok(self.alloc(key, desc, Some(mesh.geometry())))
  }

  /// Register a particle effect draw. It has no geometry buffers and is never culled.
  /// param material: The material.
  /// param vertex_count: The number of generated vertices.
  /// return: The item handle.
  pub fn get_pfx(&mut self, material: HalaMaterial, vertex_count: u32) -> Result<HalaBucketItem, HalaWorldError> {
    if vertex_count == 0 {
      return Err(HalaWorldError::new("Particle effect with no vertices.", None));
    }
    let key = HalaBucketKey {
      pipeline: HalaPipelineKey::new(HalaBucketType::PFX, material.alpha),
      texture: material.texture,
      vertex_buffer: None,
      index_buffer: None,
    };
    let desc = HalaInstanceDesc {
      first_index: 0,
      index_count: vertex_count,
      local_sphere: HalaSphere::new(glam::Vec3::ZERO, 0.0),
      bone_offset: 0,
      blas: None,
      always_visible: true,
    };
    Ok(self.alloc(key, desc, None))
  }

  /// Reserve bone matrices for an animated instance.
  pub fn get_matrixes(&self, bone_count: usize) -> Result<HalaMatrixId, HalaWorldError> {
    self.matrix.alloc(bone_count)
  }

  pub fn matrix_buffer(&self, frame_id: usize) -> HalaBuffer {
    self.matrix.buffer(frame_id)
  }

  fn alloc(&mut self, key: HalaBucketKey, desc: HalaInstanceDesc, geometry: Option<&Rc<HalaMeshGeometry>>) -> HalaBucketItem {
    let bucket = self.bucket(key);
    let (slot, generation) = bucket.borrow_mut().alloc(desc, geometry);
    HalaBucketItem::new(&bucket, slot, generation)
  }

  /// Find the bucket for a key, creating it if there is none.
  fn bucket(&mut self, key: HalaBucketKey) -> Rc<RefCell<HalaObjectsBucket>> {
    if self.buckets.len() - self.indexed > UNINDEXED_LIMIT {
      self.mk_index();
    }
    let buckets = &self.buckets;
    if let Ok(pos) = self.index.binary_search_by(|&i| buckets[i].borrow().key().cmp(&key)) {
      return self.buckets[self.index[pos]].clone();
    }
    if let Some(bucket) = self.buckets[self.indexed..].iter().find(|b| *b.borrow().key() == key) {
      return bucket.clone();
    }

    let bucket = Rc::new(RefCell::new(HalaObjectsBucket::new(
      key,
      self.matrix.buffers(),
      self.device.clone(),
      self.shared.clone(),
    )));
    self.buckets.push(bucket.clone());
    bucket
  }

  /// Rebuild the sorted bucket index.
  fn mk_index(&mut self) {
    let buckets = &self.buckets;
    self.index = (0..buckets.len()).collect();
    self.index.sort_by_key(|&i| *buckets[i].borrow().key());
    self.indexed = buckets.len();
  }

  fn ensure_index(&mut self) {
    if self.indexed != self.buckets.len() {
      self.mk_index();
    }
  }

  /// Drop the bucket index, the next lookup or draw rebuilds it.
  pub fn reset_index(&mut self) {
    self.index.clear();
    self.indexed = 0;
  }

  /// Force a top level structure rebuild on the next `update_rt_scene`.
  pub fn reset_tlas(&mut self) {
    self.shared.borrow_mut().tlas_dirty = true;
  }

  /// Release a GPU object once the frames that may use it are done.
  pub fn recycle(&mut self, item: HalaRecycled) {
    self.shared.borrow_mut().recycler.push(item);
  }

  /// Grow instance buffers and descriptor sets to the current instance count.
  pub fn prepare_uniforms(&mut self) -> Result<(), HalaWorldError> {
    for bucket in self.buckets.iter() {
      bucket.borrow_mut().prepare_uniforms()?;
    }
    Ok(())
  }

  /// Begin a frame: flush the recycle ring and upload what changed.
  /// param frame_id: The frame slot, in 0..max_frames_in_flight.
  /// return: The result.
  pub fn pre_frame_update(&mut self, frame_id: usize) -> Result<(), HalaWorldError> {
    self.shared.borrow_mut().pre_frame_update(frame_id);
    self.matrix.commit(frame_id)?;
    for bucket in self.buckets.iter() {
      bucket.borrow_mut().commit(frame_id)?;
    }
    Ok(())
  }

  /// Cull every instance.
  /// param frustums: The camera frustum first, then one per shadow layer.
  pub fn visibility_pass(&mut self, frustums: &[HalaFrustum]) {
    debug_assert!(frustums.len() <= 32, "at most 32 frustums are supported");
    if frustums.len() != self.view_count {
      log::warn!("Visibility pass got {} frustums, the world expects {}.", frustums.len(), self.view_count);
    }
    for bucket in self.buckets.iter() {
      bucket.borrow_mut().visibility_pass(frustums);
    }
  }

  fn draw(&mut self, encoder: &mut dyn HalaCommandEncoder, pass: HalaDrawPass, frame_id: usize) -> usize {
    self.ensure_index();
    self.index.iter()
      .map(|&i| self.buckets[i].borrow())
      .filter(|bucket| !bucket.is_empty())
      .map(|bucket| bucket.draw(encoder, pass, frame_id))
      .sum()
  }

  /// return: The number of draw commands recorded.
  pub fn draw_gbuffer(&mut self, encoder: &mut dyn HalaCommandEncoder, frame_id: usize) -> usize {
    self.draw(encoder, HalaDrawPass::GBuffer, frame_id)
  }

  pub fn draw_shadow(&mut self, encoder: &mut dyn HalaCommandEncoder, frame_id: usize, layer: usize) -> usize {
    self.draw(encoder, HalaDrawPass::Shadow(layer), frame_id)
  }

  pub fn draw_translucent(&mut self, encoder: &mut dyn HalaCommandEncoder, frame_id: usize) -> usize {
    self.draw(encoder, HalaDrawPass::Translucent, frame_id)
  }

  pub fn draw_water(&mut self, encoder: &mut dyn HalaCommandEncoder, frame_id: usize) -> usize {
    self.draw(encoder, HalaDrawPass::Water, frame_id)
  }

  pub fn draw_hiz(&mut self, encoder: &mut dyn HalaCommandEncoder, frame_id: usize) -> usize {
    self.draw(encoder, HalaDrawPass::HiZ, frame_id)
  }

  /// Rebuild the top level structure if instances or transforms changed since the last build.
  /// A failed build leaves the dirty flag set, so the next frame tries again.
  /// param rt: The ray tracing scene.
  /// return: True if a new structure was built.
  pub fn update_rt_scene(&mut self, rt: &mut HalaRtScene) -> Result<bool, HalaWorldError> {
    if !self.ray_tracing || !self.shared.borrow().tlas_dirty {
      return Ok(false);
    }
    self.ensure_index();
    for &i in self.index.iter() {
      self.buckets[i].borrow().gather_rt_instances(rt);
    }
    rt.build_tlas()?;
    self.shared.borrow_mut().tlas_dirty = false;
    Ok(true)
  }

  pub fn bucket_count(&self) -> usize {
    self.buckets.len()
  }

  /// Number of live instances over all buckets.
  pub fn item_count(&self) -> usize {
    self.buckets.iter().map(|b| b.borrow().live_count()).sum()
  }
}

impl Drop for HalaVisualObjects {
  fn drop(&mut self) {
    self.index.clear();
    self.buckets.clear();
    log::debug!("A HalaVisualObjects is dropped.");
  }
}
