use std::rc::Rc;

use bytemuck::{
  Pod,
  Zeroable,
};
use glam::{
  Mat4,
  Vec3,
};

use crate::config::HalaWorldConfig;
use crate::device::{
  HalaBuffer,
  HalaBufferUsageFlags,
  HalaCommandEncoder,
  HalaDevice,
  HalaTexture,
};
use crate::error::HalaWorldError;
use crate::packer::HalaPackedMesh;
use crate::rt_scene::HalaRtScene;
use crate::scene::HalaFrustum;
use crate::visual::{
  HalaAnimMesh,
  HalaBucketItem,
  HalaBucketType,
  HalaMaterial,
  HalaMatrixId,
  HalaMeshView,
  HalaRecycled,
  HalaStaticMesh,
  HalaVisualObjects,
};
use crate::world::landscape::HalaLandscape;
use crate::world::light_group::{
  HalaLightData,
  HalaLightGroup,
  HalaLightKey,
  HalaPointLight,
};
use crate::world::sky::{
  HalaLightSource,
  HalaSky,
};

const MIN_LIGHT_CAPACITY: usize = 64;

/// The per frame scene constants.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaSceneUniforms {
  pub view_proj: [f32; 16],
  pub sun_direction: [f32; 3],
  pub day_time: f32,
  pub sun_color: [f32; 3],
  pub light_count: u32,
  pub ambient: [f32; 3],
  pub frame_id: u32,
}

/// An animated instance: its draw item and its bone matrices.
pub struct HalaAnimView {
  pub item: HalaBucketItem,
  pub bones: HalaMatrixId,
}

#[derive(Debug, Default, Clone, Copy)]
struct HalaLightBuffer {
  buffer: Option<HalaBuffer>,
  capacity: usize,
  dirty: bool,
}

/// The composition root of the rendered world.
/// One frame runs `pre_frame_update`, `visibility_pass`, the draw passes, then `post_frame_update`.
pub struct HalaWorldView {
  pub sky: HalaSky,
  pub lights: HalaLightGroup,
  landscape: Option<HalaLandscape>,
  visual: HalaVisualObjects,
  rt: HalaRtScene,
  scene_buffers: Vec<HalaBuffer>,
  light_buffers: Vec<HalaLightBuffer>,
  frustums: Vec<HalaFrustum>,
  view_proj: Mat4,
  current_frame: Option<usize>,
  config: HalaWorldConfig,
  device: Rc<dyn HalaDevice>,
}

/// The implementation of the world view.
impl HalaWorldView {
  /// Create the world view.
  /// param device: The device.
  /// param config: The world configuration.
  /// return: The world view.
  pub fn new(device: Rc<dyn HalaDevice>, config: &HalaWorldConfig) -> Result<Self, HalaWorldError> {
    let config = &config.clone().sanitized();
    let visual = HalaVisualObjects::new(device.clone(), config)?;
    let rt = HalaRtScene::new(device.clone(), config.max_frames_in_flight);
    let mut view = Self {
      sky: HalaSky::default(),
      lights: HalaLightGroup::new(),
      landscape: None,
      visual,
      rt,
      scene_buffers: Vec::with_capacity(config.max_frames_in_flight),
      light_buffers: vec![HalaLightBuffer::default(); config.max_frames_in_flight],
      frustums: vec![HalaFrustum::infinite(); config.view_count()],
      view_proj: Mat4::IDENTITY,
      current_frame: None,
      config: config.clone(),
      device: device.clone(),
    };
    for i in 0..config.max_frames_in_flight {
      let buffer = device.create_buffer(
        std::mem::size_of::<HalaSceneUniforms>() as u64,
        HalaBufferUsageFlags::UNIFORM_BUFFER,
        &format!("world_view.scene_{}", i))?;
      view.scene_buffers.push(buffer);
    }
    log::debug!("A HalaWorldView is created.");
    Ok(view)
  }

  /// Upload and register the world mesh. On failure the current landscape stays in place.
  /// param packed: The world mesh.
  /// param textures: The texture of each submesh.
  /// return: The result.
  pub fn set_landscape(&mut self, packed: &HalaPackedMesh, textures: &[HalaTexture]) -> Result<(), HalaWorldError> {
    let landscape = HalaLandscape::new(self.device.clone(), &mut self.visual, packed, textures, self.config.ray_tracing)?;
    // The old mesh geometry lives on in its buckets and the ray tracing scene until the device is done with it.
    self.landscape = Some(landscape);
    Ok(())
  }

  pub fn landscape(&self) -> Option<&HalaLandscape> {
    self.landscape.as_ref()
  }

  /// Upload a packed mesh, with bottom level structures if ray tracing is on.
  pub fn upload_mesh(&self, packed: &HalaPackedMesh) -> Result<HalaStaticMesh, HalaWorldError> {
    HalaStaticMesh::new(self.device.clone(), packed, self.config.ray_tracing)
  }

  /// Place a static mesh in the world.
  pub fn add_static_view(
    &mut self,
    mesh: &HalaStaticMesh,
    textures: &[HalaTexture],
    bucket_type: HalaBucketType,
  ) -> Result<HalaMeshView, HalaWorldError> {
    HalaMeshView::new(&mut self.visual, mesh, textures, bucket_type)
  }

  /// Place an animated mesh in the world.
  /// param mesh: The skinned mesh.
  /// param material: The material.
  /// param first_index: The first index of the range.
  /// param index_count: The number of indices.
  /// return: The view.
  pub fn add_anim_view(
    &mut self,
    mesh: &HalaAnimMesh,
    material: HalaMaterial,
    first_index: u32,
    index_count: u32,
  ) -> Result<HalaAnimView, HalaWorldError> {
    let bones = self.visual.get_matrixes(mesh.bone_count)?;
    let item = self.visual.get_anim(mesh, material, first_index, index_count, &bones)?;
    Ok(HalaAnimView { item, bones })
  }

  pub fn add_pfx(&mut self, material: HalaMaterial, vertex_count: u32) -> Result<HalaBucketItem, HalaWorldError> {
    self.visual.get_pfx(material, vertex_count)
  }

  pub fn add_light(&mut self, light: HalaPointLight) -> HalaLightKey {
    self.lights.add(light)
  }

  pub fn main_light(&self) -> HalaLightSource {
    self.sky.sun()
  }

  pub fn ambient_light(&self) -> Vec3 {
    self.sky.ambient()
  }

  pub fn visual(&self) -> &HalaVisualObjects {
    &self.visual
  }

  pub fn visual_mut(&mut self) -> &mut HalaVisualObjects {
    &mut self.visual
  }

  pub fn rt_scene(&self) -> &HalaRtScene {
    &self.rt
  }

  pub fn scene_buffer(&self, frame_id: usize) -> HalaBuffer {
    self.scene_buffers[frame_id % self.scene_buffers.len()]
  }

  pub fn light_buffer(&self, frame_id: usize) -> Option<HalaBuffer> {
    self.light_buffers[frame_id % self.light_buffers.len()].buffer
  }

  /// Advance the world clock.
  /// param dt: Elapsed milliseconds.
  pub fn tick(&mut self, dt: u64) {
    self.sky.tick(dt);
  }

  /// Set the frustums of the next visibility pass.
  /// param view_proj: The camera view-projection matrix.
  /// param shadows: One view-projection matrix per shadow layer.
  pub fn update_frustum(&mut self, view_proj: &Mat4, shadows: &[Mat4]) {
    if shadows.len() != self.config.shadow_layers {
      log::warn!("Got {} shadow matrices for {} shadow layers.", shadows.len(), self.config.shadow_layers);
    }
    self.view_proj = *view_proj;
    self.frustums.clear();
    self.frustums.push(HalaFrustum::from_matrix(view_proj));
    self.frustums.extend(shadows.iter().map(HalaFrustum::from_matrix));
  }

  /// Begin a frame: release what the device is done with, then upload everything that changed.
  /// param frame_id: The frame slot, in 0..max_frames_in_flight.
  /// return: The result.
  pub fn pre_frame_update(&mut self, frame_id: usize) -> Result<(), HalaWorldError> {
    debug_assert!(self.current_frame.is_none(), "pre_frame_update called twice without post_frame_update");
    let frame_id = frame_id % self.config.max_frames_in_flight;
    self.rt.pre_frame_update(frame_id);
    self.visual.prepare_uniforms()?;
    self.visual.pre_frame_update(frame_id)?;
    self.commit_lights(frame_id)?;

    let sun = self.sky.sun();
    let uniforms = HalaSceneUniforms {
      view_proj: self.view_proj.to_cols_array(),
      sun_direction: sun.direction.into(),
      day_time: self.sky.day_time(),
      sun_color: sun.color.into(),
      light_count: self.lights.len() as u32,
      ambient: self.sky.ambient().into(),
      frame_id: frame_id as u32,
    };
    self.device.write_buffer(self.scene_buffers[frame_id], 0, bytemuck::bytes_of(&uniforms))?;
    self.current_frame = Some(frame_id);
    Ok(())
  }

  fn commit_lights(&mut self, frame_id: usize) -> Result<(), HalaWorldError> {
    if self.lights.update() {
      self.light_buffers.iter_mut().for_each(|b| b.dirty = true);
    }
    let slot = &mut self.light_buffers[frame_id];
    if !slot.dirty {
      return Ok(());
    }
    let data = self.lights.to_gpu();
    if slot.buffer.is_none() || slot.capacity < data.len() {
      let capacity = data.len().next_power_of_two().max(MIN_LIGHT_CAPACITY);
      let buffer = self.device.create_buffer(
        (capacity * std::mem::size_of::<HalaLightData>()) as u64,
        HalaBufferUsageFlags::STORAGE_BUFFER,
        &format!("world_view.lights_{}", frame_id))?;
      if let Some(old) = slot.buffer.replace(buffer) {
        self.visual.recycle(HalaRecycled::Buffer(old));
      }
      slot.capacity = capacity;
    }
    if let Some(buffer) = slot.buffer {
      self.device.write_buffer(buffer, 0, bytemuck::cast_slice(&data))?;
    }
    slot.dirty = false;
    Ok(())
  }

  /// Cull against the frustums of the last `update_frustum`.
  pub fn visibility_pass(&mut self) {
    self.visual.visibility_pass(&self.frustums);
  }

  /// Rebuild the top level structure if the instance set changed.
  /// return: True if it was rebuilt.
  pub fn update_rt_scene(&mut self) -> Result<bool, HalaWorldError> {
    self.visual.update_rt_scene(&mut self.rt)
  }

  fn frame(&self) -> Option<usize> {
    if self.current_frame.is_none() {
      log::warn!("Draw recorded outside of pre_frame_update/post_frame_update.");
    }
    self.current_frame
  }

  /// return: The number of draw commands recorded.
  pub fn draw_gbuffer(&mut self, encoder: &mut dyn HalaCommandEncoder) -> usize {
    self.frame().map_or(0, |f| self.visual.draw_gbuffer(encoder, f))
  }

  pub fn draw_shadow(&mut self, encoder: &mut dyn HalaCommandEncoder, layer: usize) -> usize {
    self.frame().map_or(0, |f| self.visual.draw_shadow(encoder, f, layer))
  }

  pub fn draw_translucent(&mut self, encoder: &mut dyn HalaCommandEncoder) -> usize {
    self.frame().map_or(0, |f| self.visual.draw_translucent(encoder, f))
  }

  pub fn draw_water(&mut self, encoder: &mut dyn HalaCommandEncoder) -> usize {
    self.frame().map_or(0, |f| self.visual.draw_water(encoder, f))
  }

  pub fn draw_hiz(&mut self, encoder: &mut dyn HalaCommandEncoder) -> usize {
    self.frame().map_or(0, |f| self.visual.draw_hiz(encoder, f))
  }

  /// End the frame started by `pre_frame_update`.
  pub fn post_frame_update(&mut self) {
    debug_assert!(self.current_frame.is_some(), "post_frame_update without pre_frame_update");
    self.current_frame = None;
  }
}

impl Drop for HalaWorldView {
  fn drop(&mut self) {
    self.landscape = None;
    for buffer in self.scene_buffers.drain(..) {
      self.device.release_buffer(buffer);
    }
    for slot in self.light_buffers.iter_mut() {
      if let Some(buffer) = slot.buffer.take() {
        self.device.release_buffer(buffer);
      }
    }
    log::debug!("A HalaWorldView is dropped.");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::testing::{
    RecordingDevice,
    RecordingEncoder,
  };
  use crate::packer::{
    HalaMeshPacker,
    HalaPackageType,
    tests::grid_mesh,
  };
  use crate::scene::HalaRawSkin;
  use crate::visual::HalaAlphaFunc;

  fn camera() -> Mat4 {
    let proj = Mat4::perspective_rh(1.2, 1.0, 0.1, 500.0);
    let view = Mat4::look_at_rh(Vec3::new(8.0, 20.0, 30.0), Vec3::new(8.0, 0.0, 8.0), Vec3::Y);
    proj * view
  }

  #[test]
  fn frame_loop_draws_the_world() -> anyhow::Result<()> {
    let device = Rc::new(RecordingDevice::default());
    let mut world = HalaWorldView::new(device.clone(), &HalaWorldConfig::default())?;
    let packed = HalaPackedMesh::new(&grid_mesh(16), HalaPackageType::VISUAL_LANDSCAPE)?;
    world.set_landscape(&packed, &[HalaTexture(1), HalaTexture(2)])?;
    world.add_light(HalaPointLight { position: Vec3::new(8.0, 2.0, 8.0), range: 6.0, color: Vec3::ONE });

    world.update_frustum(&camera(), &[Mat4::IDENTITY, Mat4::IDENTITY]);
    world.pre_frame_update(0)?;
    world.visibility_pass();
    assert!(world.update_rt_scene()?);
    assert_eq!(world.rt_scene().instance_count(), 2);

    let mut encoder = RecordingEncoder::default();
    assert_eq!(world.draw_gbuffer(&mut encoder), 2);
    assert_eq!(world.draw_hiz(&mut encoder), 2);
    assert_eq!(world.draw_water(&mut encoder), 0);
    world.post_frame_update();

    let scene = device.buffer_data(world.scene_buffer(0));
    let uniforms: HalaSceneUniforms = bytemuck::pod_read_unaligned(&scene);
    assert_eq!(uniforms.light_count, 1);
    assert_eq!(uniforms.view_proj, camera().to_cols_array());
    assert!(world.light_buffer(0).is_some());
    assert!(world.light_buffer(1).is_none());

    // Outside of a frame nothing is recorded.
    assert_eq!(world.draw_gbuffer(&mut encoder), 0);
    Ok(())
  }

  #[test]
  fn animated_views_get_bone_matrices() -> anyhow::Result<()> {
    let device = Rc::new(RecordingDevice::default());
    let config = HalaWorldConfig { matrix_storage_capacity: 8, ..Default::default() };
    let mut world = HalaWorldView::new(device.clone(), &config)?;
    let mut raw = grid_mesh(2);
    raw.skin = Some(vec![HalaRawSkin { bone_ids: [0; 4], weights: [1.0, 0.0, 0.0, 0.0] }; raw.positions.len()]);
    let mesh = HalaAnimMesh::new(device.clone(), &HalaMeshPacker::default().pack_skinned(&raw)?, 5)?;
    let material = HalaMaterial::new(HalaTexture(3), HalaAlphaFunc::SOLID);

    let first = world.add_anim_view(&mesh, material, 0, 3)?;
    assert_eq!(first.bones.offset(), 0);
    assert!(world.add_anim_view(&mesh, material, 0, 3).is_err());
    drop(first);
    let second = world.add_anim_view(&mesh, material, 0, 3)?;
    assert_eq!(second.bones.len(), 5);

    // Skinned instances never reach the ray tracing scene.
    assert!(world.update_rt_scene()?);
    assert_eq!(world.rt_scene().instance_count(), 0);
    Ok(())
  }

  #[test]
  fn replacing_the_landscape_releases_the_old_items() -> anyhow::Result<()> {
    let device = Rc::new(RecordingDevice::default());
    let mut world = HalaWorldView::new(device.clone(), &HalaWorldConfig::default())?;
    let packed = HalaPackedMesh::new(&grid_mesh(4), HalaPackageType::VISUAL_LANDSCAPE)?;
    world.set_landscape(&packed, &[HalaTexture(1), HalaTexture(2)])?;
    world.set_landscape(&packed, &[HalaTexture(1), HalaTexture(2)])?;
    assert_eq!(world.visual().item_count(), 2);
    let current = world.landscape().map(|l| l.mesh().vertex_buffer);
    assert!(world.set_landscape(&packed, &[HalaTexture(1)]).is_err());
    assert_eq!(world.landscape().map(|l| l.mesh().vertex_buffer), current);
    assert_eq!(world.visual().item_count(), 2);

    drop(world);
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_structures(), 0);
    Ok(())
  }

  fn run_frame(world: &mut HalaWorldView, frame_id: usize) -> anyhow::Result<()> {
    world.pre_frame_update(frame_id)?;
    world.visibility_pass();
    world.update_rt_scene()?;
    world.post_frame_update();
    Ok(())
  }

  #[test]
  fn replaced_landscape_outlives_the_frames_using_it() -> anyhow::Result<()> {
    let device = Rc::new(RecordingDevice::default());
    let config = HalaWorldConfig::default();
    let mut world = HalaWorldView::new(device.clone(), &config)?;
    let packed = HalaPackedMesh::new(&grid_mesh(4), HalaPackageType::VISUAL_LANDSCAPE)?;
    world.set_landscape(&packed, &[HalaTexture(1), HalaTexture(2)])?;
    run_frame(&mut world, 0)?;

    let traced = device.tlas_builds.borrow().last().map(|b| b.iter().map(|i| i.blas.0).collect::<Vec<_>>())
      .unwrap_or_default();
    assert_eq!(traced.len(), 2);
    let old_buffers = world.landscape().map(|l| (l.mesh().vertex_buffer, l.mesh().index_buffer));
    let traced_alive = || traced.iter().all(|id| device.structures.borrow().contains(id));

    world.set_landscape(&packed, &[HalaTexture(3), HalaTexture(4)])?;
    assert!(traced_alive());
    for frame_id in 1..=config.max_frames_in_flight {
      run_frame(&mut world, frame_id)?;
      assert!(traced_alive(), "released after {} frames", frame_id);
    }
    if let Some((vbo, ibo)) = old_buffers {
      assert!(device.buffers.borrow().contains_key(&vbo.0));
      assert!(device.buffers.borrow().contains_key(&ibo.0));
    }

    // Every frame that could reference the old structures has finished.
    run_frame(&mut world, config.max_frames_in_flight + 1)?;
    assert!(traced.iter().all(|id| !device.structures.borrow().contains(id)));
    if let Some((vbo, _)) = old_buffers {
      assert!(!device.buffers.borrow().contains_key(&vbo.0));
    }
    Ok(())
  }

  #[test]
  fn zero_frames_in_flight_runs_as_one() -> anyhow::Result<()> {
    let device = Rc::new(RecordingDevice::default());
    let config = HalaWorldConfig { max_frames_in_flight: 0, ..Default::default() };
    let mut world = HalaWorldView::new(device.clone(), &config)?;
    let packed = HalaPackedMesh::new(&grid_mesh(4), HalaPackageType::VISUAL_LANDSCAPE)?;
    world.set_landscape(&packed, &[HalaTexture(1), HalaTexture(2)])?;
    world.add_light(HalaPointLight { position: Vec3::ZERO, range: 2.0, color: Vec3::ONE });
    for frame_id in 0..3 {
      run_frame(&mut world, frame_id)?;
    }
    assert_eq!(world.scene_buffer(5), world.scene_buffer(0));
    assert!(world.light_buffer(2).is_some());
    Ok(())
  }
}
