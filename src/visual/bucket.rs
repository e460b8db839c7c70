use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use bytemuck::{
  Pod,
  Zeroable,
};
use glam::Mat4;

use crate::device::{
  HalaAccelerationStructure,
  HalaBinding,
  HalaBuffer,
  HalaBufferUsageFlags,
  HalaCommandEncoder,
  HalaDescriptorLayout,
  HalaDescriptorSet,
  HalaDevice,
  HalaTexture,
};
use crate::error::HalaWorldError;
use crate::rt_scene::HalaRtScene;
use crate::scene::{
  HalaFrustum,
  HalaSphere,
};
use crate::visual::material::{
  HalaDrawPass,
  HalaMaterial,
  HalaPipelineKey,
};
use crate::visual::recycler::{
  HalaRecycleRing,
  HalaRecycled,
};
use crate::visual::static_mesh::HalaMeshGeometry;

/// The state every bucket of one visual objects set shares.
pub(crate) struct HalaVisualShared {
  pub recycler: HalaRecycleRing<HalaRecycled>,
  /// Descriptor sets that went through the recycle ring, ready for reuse.
  pub free_sets: BTreeMap<HalaDescriptorLayout, Vec<HalaDescriptorSet>>,
  pub tlas_dirty: bool,
  device: Rc<dyn HalaDevice>,
}

impl HalaVisualShared {
  pub fn new(device: Rc<dyn HalaDevice>, frames_in_flight: usize) -> Self {
    Self {
      recycler: HalaRecycleRing::new(frames_in_flight),
      free_sets: BTreeMap::new(),
      tlas_dirty: false,
      device,
    }
  }

  /// Begin a frame: everything recycled `frames_in_flight` frames ago is released or pooled.
  pub fn pre_frame_update(&mut self, frame_id: usize) {
    for item in self.recycler.pre_frame_update(frame_id) {
      match item {
        HalaRecycled::DescriptorSet(layout, set) => self.free_sets.entry(layout).or_default().push(set),
        other => other.release(self.device.as_ref()),
      }
    }
  }

  fn acquire_set(&mut self, layout: HalaDescriptorLayout, debug_name: &str) -> Result<HalaDescriptorSet, HalaWorldError> {
    if let Some(set) = self.free_sets.get_mut(&layout).and_then(Vec::pop) {
      return Ok(set);
    }
    Ok(self.device.create_descriptor_set(layout, debug_name)?)
  }
}

impl Drop for HalaVisualShared {
  fn drop(&mut self) {
    for item in self.recycler.drain_all() {
      item.release(self.device.as_ref());
    }
    for set in std::mem::take(&mut self.free_sets).into_values().flatten() {
      self.device.release_descriptor_set(set);
    }
  }
}

/// The per instance record of the instance storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaInstanceData {
  pub transform: [f32; 16],
  pub bone_offset: u32,
  pub _padding: [u32; 3],
}

/// What a bucket is keyed by. Instances of one bucket share all of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaBucketKey {
  pub pipeline: HalaPipelineKey,
  pub texture: HalaTexture,
  /// None for particle buckets, which draw without vertex input.
  pub vertex_buffer: Option<HalaBuffer>,
  pub index_buffer: Option<HalaBuffer>,
}

impl HalaBucketKey {
  pub fn material(&self) -> HalaMaterial {
    HalaMaterial::new(self.texture, self.pipeline.alpha)
  }

  fn layout(&self) -> HalaDescriptorLayout {
    if self.pipeline.bucket_type.is_skinned() {
      HalaDescriptorLayout::SKINNED_OBJECT
    } else {
      HalaDescriptorLayout::OBJECT
    }
  }
}

/// The geometry and placement of a new instance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HalaInstanceDesc {
  /// Index range, or the vertex count for buckets without index buffer.
  pub first_index: u32,
  pub index_count: u32,
  pub local_sphere: HalaSphere,
  pub bone_offset: u32,
  pub blas: Option<HalaAccelerationStructure>,
  /// Skip culling.
  pub always_visible: bool,
}

#[derive(Debug, Clone)]
struct HalaInstance {
  desc: HalaInstanceDesc,
  live: bool,
  generation: u32,
  transform: Mat4,
  world_sphere: HalaSphere,
  /// One bit per frustum of the last visibility pass.
  visible: u32,
  /// Allocated after the last commit, its record is not in the instance buffer yet.
  pending: bool,
}

#[derive(Debug, Default)]
struct HalaFrameResources {
  buffer: Option<HalaBuffer>,
  set: Option<HalaDescriptorSet>,
  capacity: usize,
  dirty: bool,
}

/// A homogeneous set of draw instances.
/// Removed instances leave a hole in the slot array that the next allocation fills.
pub struct HalaObjectsBucket {
  key: HalaBucketKey,
  instances: Vec<HalaInstance>,
  free: Vec<usize>,
  live_count: usize,
  frames: Vec<HalaFrameResources>,
  /// Bone matrix buffer per frame, skinned buckets only.
  matrix_buffers: Vec<HalaBuffer>,
  visible_views: u32,
  /// The mesh the key buffers belong to, held while the bucket has instances.
  geometry: Option<Rc<HalaMeshGeometry>>,
  device: Rc<dyn HalaDevice>,
  shared: Rc<RefCell<HalaVisualShared>>,
}

/// The implementation of the objects bucket.
impl HalaObjectsBucket {
  pub(crate) fn new(
    key: HalaBucketKey,
    matrix_buffers: &[HalaBuffer],
    device: Rc<dyn HalaDevice>,
    shared: Rc<RefCell<HalaVisualShared>>,
  ) -> Self {
    let frames_in_flight = shared.borrow().recycler.frames_in_flight();
    log::debug!("A HalaObjectsBucket {:?} is created.", key);
    Self {
      key,
      instances: Vec::new(),
      free: Vec::new(),
      live_count: 0,
      frames: (0..frames_in_flight).map(|_| HalaFrameResources::default()).collect(),
      matrix_buffers: if key.pipeline.bucket_type.is_skinned() { matrix_buffers.to_vec() } else { Vec::new() },
      visible_views: 0,
      geometry: None,
      device,
      shared,
    }
  }

  pub fn key(&self) -> &HalaBucketKey {
    &self.key
  }

  pub fn live_count(&self) -> usize {
    self.live_count
  }

  pub fn is_empty(&self) -> bool {
    self.live_count == 0
  }

  /// Number of slots, live or free.
  pub fn slot_count(&self) -> usize {
    self.instances.len()
  }

  /// Check whether the last visibility pass found an instance for a frustum.
  pub fn is_visible(&self, view: usize) -> bool {
    self.visible_views & (1 << view) != 0
  }

  fn mark_changed(&mut self) {
    self.frames.iter_mut().for_each(|f| f.dirty = true);
    if self.key.pipeline.is_ray_traced() {
      self.shared.borrow_mut().tlas_dirty = true;
    }
  }

  /// Take a slot for a new instance.
  /// param desc: The instance.
  /// param geometry: The mesh owning the key buffers, None for particle buckets.
  /// return: The slot and its generation.
  pub(crate) fn alloc(&mut self, desc: HalaInstanceDesc, geometry: Option<&Rc<HalaMeshGeometry>>) -> (usize, u32) {
    if self.geometry.is_none() {
      self.geometry = geometry.cloned();
    }
    let instance = |generation| HalaInstance {
      desc,
      live: true,
      generation,
      transform: Mat4::IDENTITY,
      world_sphere: desc.local_sphere,
      visible: 0,
      pending: true,
    };
    let (slot, generation) = match self.free.pop() {
      Some(slot) => {
        let generation = self.instances[slot].generation;
        self.instances[slot] = instance(generation);
        (slot, generation)
      },
      None => {
        self.instances.push(instance(0));
        (self.instances.len() - 1, 0)
      },
    };
    self.live_count += 1;
    self.mark_changed();
    (slot, generation)
  }

  /// Return a slot. Releasing a slot twice is a programmer error.
  pub(crate) fn free(&mut self, slot: usize, generation: u32) {
    let valid = self.instances.get(slot).map_or(false, |i| i.live && i.generation == generation);
    debug_assert!(valid, "slot {} of bucket {:?} released twice", slot, self.key);
    if !valid {
      return;
    }

    let instance = &mut self.instances[slot];
    instance.live = false;
    instance.visible = 0;
    instance.generation = instance.generation.wrapping_add(1);
    self.free.push(slot);
    self.live_count -= 1;
    self.mark_changed();

    if self.live_count == 0 {
      self.instances.clear();
      self.free.clear();
      self.recycle_resources();
    }
  }

  fn instance_mut(&mut self, slot: usize, generation: u32) -> Option<&mut HalaInstance> {
    self.instances.get_mut(slot).filter(|i| i.live && i.generation == generation)
  }

  fn instance(&self, slot: usize, generation: u32) -> Option<&HalaInstance> {
    self.instances.get(slot).filter(|i| i.live && i.generation == generation)
  }

  pub(crate) fn set_transform(&mut self, slot: usize, generation: u32, transform: &Mat4) {
    if let Some(instance) = self.instance_mut(slot, generation) {
      instance.transform = *transform;
      instance.world_sphere = instance.desc.local_sphere.transformed(transform);
      self.mark_changed();
    }
  }

  /// Hand every GPU object of this bucket to the recycle ring.
  fn recycle_resources(&mut self) {
    let layout = self.key.layout();
    let mut shared = self.shared.borrow_mut();
    for frame in self.frames.iter_mut() {
      if let Some(buffer) = frame.buffer.take() {
        shared.recycler.push(HalaRecycled::Buffer(buffer));
      }
      if let Some(set) = frame.set.take() {
        shared.recycler.push(HalaRecycled::DescriptorSet(layout, set));
      }
      frame.capacity = 0;
    }
    if let Some(geometry) = self.geometry.take() {
      shared.recycler.push(HalaRecycled::Geometry(geometry));
    }
  }

  /// Make sure every frame has an instance buffer large enough for all slots.
  pub(crate) fn prepare_uniforms(&mut self) -> Result<(), HalaWorldError> {
    if self.live_count == 0 {
      return Ok(());
    }
    let required = self.instances.len();
    let layout = self.key.layout();
    for (index, frame) in self.frames.iter_mut().enumerate() {
      if frame.capacity >= required && frame.set.is_some() {
        continue;
      }
      let capacity = required.next_power_of_two().max(16);
      let size = (capacity * std::mem::size_of::<HalaInstanceData>()) as u64;
      let buffer = self.device.create_buffer(size, HalaBufferUsageFlags::STORAGE_BUFFER, "objects_bucket.instances")?;

      let mut shared = self.shared.borrow_mut();
      let set = match shared.acquire_set(layout, "objects_bucket.descriptor_set") {
        Ok(set) => set,
        Err(err) => {
          self.device.release_buffer(buffer);
          return Err(err);
        },
      };
      if let Some(old) = frame.buffer.replace(buffer) {
        shared.recycler.push(HalaRecycled::Buffer(old));
      }
      if let Some(old) = frame.set.replace(set) {
        shared.recycler.push(HalaRecycled::DescriptorSet(layout, old));
      }
      frame.capacity = capacity;
      frame.dirty = true;

      let mut bindings = vec![
        HalaBinding::Texture { binding: 0, texture: self.key.texture },
        HalaBinding::StorageBuffer { binding: 1, buffer },
      ];
      if let Some(&matrices) = self.matrix_buffers.get(index) {
        bindings.push(HalaBinding::StorageBuffer { binding: 2, buffer: matrices });
      }
      self.device.write_descriptor_set(set, &bindings)?;
    }
    Ok(())
  }

  /// Upload the instance records of one frame if they changed.
  /// Slots past the frame capacity wait for the next `prepare_uniforms`.
  pub(crate) fn commit(&mut self, frame_id: usize) -> Result<(), HalaWorldError> {
    let frame_count = self.frames.len();
    let frame = &mut self.frames[frame_id % frame_count];
    let buffer = match frame.buffer {
      Some(buffer) if frame.dirty => buffer,
      _ => return Ok(()),
    };
    let count = self.instances.len().min(frame.capacity);
    let data = self.instances[..count].iter()
      .map(|i| if i.live {
        HalaInstanceData {
          transform: i.transform.to_cols_array(),
          bone_offset: i.desc.bone_offset,
          ..Default::default()
        }
      } else {
        HalaInstanceData::default()
      })
      .collect::<Vec<_>>();
    self.device.write_buffer(buffer, 0, bytemuck::cast_slice(&data))?;
    frame.dirty = count < self.instances.len();
    self.instances[..count].iter_mut().for_each(|i| i.pending = false);
    Ok(())
  }

  /// Test every instance against the frustums, bit `i` of the result stands for `frustums[i]`.
  pub(crate) fn visibility_pass(&mut self, frustums: &[HalaFrustum]) {
    let all = if frustums.len() >= 32 { u32::MAX } else { (1u32 << frustums.len()) - 1 };
    self.visible_views = 0;
    for instance in self.instances.iter_mut().filter(|i| i.live) {
      instance.visible = if instance.desc.always_visible {
        all
      } else {
        frustums.iter().enumerate()
          .filter(|(_, f)| f.contains(&instance.world_sphere))
          .fold(0u32, |mask, (i, _)| mask | (1u32 << i))
      };
      self.visible_views |= instance.visible;
    }
  }

  /// Record the draws of this bucket for a pass.
  /// Neighbouring visible slots with the same range become one instanced draw.
  /// Instances whose record is not in the frame's instance buffer yet are skipped.
  /// return: The number of draw commands recorded.
  pub(crate) fn draw(&self, encoder: &mut dyn HalaCommandEncoder, pass: HalaDrawPass, frame_id: usize) -> usize {
    let view = pass.view_index();
    if !pass.accepts(&self.key.pipeline) || !self.is_visible(view) {
      return 0;
    }
    let frame = &self.frames[frame_id % self.frames.len()];
    let set = match frame.set {
      Some(set) => set,
      None => {
        log::debug!("Bucket {:?} is visible but has no uniforms for frame {}.", self.key, frame_id);
        return 0;
      },
    };
    let limit = self.instances.len().min(frame.capacity);

    encoder.bind_pipeline(self.key.pipeline);
    encoder.bind_descriptor_set(set);
    if let Some(vbo) = self.key.vertex_buffer {
      encoder.bind_vertex_buffer(vbo);
    }
    if let Some(ibo) = self.key.index_buffer {
      encoder.bind_index_buffer(ibo);
    }
    if let HalaDrawPass::Shadow(layer) = pass {
      encoder.push_constants(&(layer as u32).to_le_bytes());
    }

    let bit = 1 << view;
    let drawn = |i: &HalaInstance| i.live && !i.pending && i.visible & bit != 0;
    let mut count = 0;
    let mut slot = 0;
    while slot < limit {
      let first = &self.instances[slot];
      if !drawn(first) {
        slot += 1;
        continue;
      }
      let range = (first.desc.first_index, first.desc.index_count);
      let run = self.instances[slot..limit].iter()
        .take_while(|i| drawn(*i) && (i.desc.first_index, i.desc.index_count) == range)
        .count();
      if self.key.index_buffer.is_some() {
        encoder.draw_indexed(range.0, range.1, slot as u32, run as u32);
      } else {
        encoder.draw(range.1, slot as u32, run as u32);
      }
      count += 1;
      slot += run;
    }
    count
  }

  /// Add every live instance with a bottom level structure to the pending TLAS build.
  pub(crate) fn gather_rt_instances(&self, rt: &mut HalaRtScene) {
    if !self.key.pipeline.is_ray_traced() {
      return;
    }
    let (vbo, ibo) = match (self.key.vertex_buffer, self.key.index_buffer) {
      (Some(vbo), Some(ibo)) => (vbo, ibo),
      _ => return,
    };
    let material = self.key.material();
    let mut added = false;
    for instance in self.instances.iter().filter(|i| i.live) {
      if let Some(blas) = instance.desc.blas {
        rt.add_instance(&instance.transform, blas, &material, vbo, ibo, instance.desc.first_index);
        added = true;
      }
    }
    match self.geometry.as_ref() {
      Some(geometry) if added => rt.retain(geometry),
      _ => {},
    }
  }
}

impl Drop for HalaObjectsBucket {
  fn drop(&mut self) {
    self.recycle_resources();
    log::debug!("A HalaObjectsBucket {:?} is dropped.", self.key);
  }
}

/// A handle to one instance of a bucket. Dropping it frees the slot.
#[derive(Default)]
pub struct HalaBucketItem {
  bucket: Weak<RefCell<HalaObjectsBucket>>,
  slot: usize,
  generation: u32,
  attached: bool,
}

/// The implementation of the bucket item.
impl HalaBucketItem {
  pub(crate) fn new(bucket: &Rc<RefCell<HalaObjectsBucket>>, slot: usize, generation: u32) -> Self {
    Self {
      bucket: Rc::downgrade(bucket),
      slot,
      generation,
      attached: true,
    }
  }

  /// An item that refers to nothing.
  pub fn is_empty(&self) -> bool {
    !self.attached
  }

  pub fn slot(&self) -> usize {
    self.slot
  }

  fn with_bucket<R>(&self, f: impl FnOnce(&mut HalaObjectsBucket) -> R) -> Option<R> {
    if !self.attached {
      return None;
    }
    let bucket = self.bucket.upgrade();
    debug_assert!(bucket.is_some(), "item used after its bucket was destroyed");
    let bucket = bucket?;
    let mut bucket = bucket.borrow_mut();
    Some(f(&mut bucket))
  }

  /// Place the instance in the world.
  /// param transform: The object-to-world matrix.
  pub fn set_object_matrix(&self, transform: &Mat4) {
    self.with_bucket(|b| b.set_transform(self.slot, self.generation, transform));
  }

  /// The world space bounding sphere of the instance.
  pub fn bounds(&self) -> Option<HalaSphere> {
    self.with_bucket(|b| b.instance(self.slot, self.generation).map(|i| i.world_sphere)).flatten()
  }

  /// The index range the instance draws.
  pub fn index_range(&self) -> Option<(u32, u32)> {
    self.with_bucket(|b| b.instance(self.slot, self.generation).map(|i| (i.desc.first_index, i.desc.index_count)))
      .flatten()
  }

  pub fn bucket_key(&self) -> Option<HalaBucketKey> {
    self.with_bucket(|b| *b.key())
  }
}

impl Drop for HalaBucketItem {
  fn drop(&mut self) {
    if !self.attached {
      return;
    }
    // The bucket may already be gone at teardown.
    if let Some(bucket) = self.bucket.upgrade() {
      match bucket.try_borrow_mut() {
        Ok(mut bucket) => bucket.free(self.slot, self.generation),
        Err(_) => debug_assert!(false, "item dropped while its bucket is borrowed"),
      }
    }
  }
}

impl std::fmt::Debug for HalaBucketItem {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HalaBucketItem")
      .field("slot", &self.slot)
      .field("generation", &self.generation)
      .field("attached", &self.attached)
      .finish()
  }
}
