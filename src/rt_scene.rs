use std::rc::Rc;

use glam::Mat4;

use crate::device::{
  HalaAccelerationStructure,
  HalaBinding,
  HalaBuffer,
  HalaBufferUsageFlags,
  HalaDescriptorLayout,
  HalaDescriptorSet,
  HalaDevice,
  HalaRtInstance,
  HalaTexture,
  to_rt_transform,
};
use crate::error::HalaWorldError;
use crate::visual::{
  HalaMaterial,
  HalaMeshGeometry,
  HalaRecycleRing,
  HalaRecycled,
};

/// The instances gathered for the next top level build.
#[derive(Debug, Default)]
struct HalaRtBuild {
  textures: Vec<Option<HalaTexture>>,
  vertex_buffers: Vec<Option<HalaBuffer>>,
  index_buffers: Vec<Option<HalaBuffer>>,
  index_offsets: Vec<u32>,
  instances: Vec<HalaRtInstance>,
  geometries: Vec<Rc<HalaMeshGeometry>>,
}

/// The GPU objects of one successful build.
struct HalaRtBuilt {
  tlas: HalaAccelerationStructure,
  offsets: HalaBuffer,
  set: HalaDescriptorSet,
}

/// The ray tracing scene: a top level structure over the bottom level structures of the world,
/// plus the per instance geometry tables the hit shaders read.
/// `custom_index` of an instance indexes `textures`, `vertex_buffers`, `index_buffers` and the offsets buffer.
pub struct HalaRtScene {
  pub tlas: Option<HalaAccelerationStructure>,
  pub textures: Vec<Option<HalaTexture>>,
  pub vertex_buffers: Vec<Option<HalaBuffer>>,
  pub index_buffers: Vec<Option<HalaBuffer>>,
  /// First index of every instance, mirrored on the GPU.
  pub index_offsets: Vec<u32>,
  pub index_offsets_buffer: Option<HalaBuffer>,
  pub descriptor_set: Option<HalaDescriptorSet>,
  /// The meshes whose structures and buffers the current top level structure references.
  geometries: Vec<Rc<HalaMeshGeometry>>,
  build: HalaRtBuild,
  recycler: HalaRecycleRing<HalaRecycled>,
  build_count: u64,
  device: Rc<dyn HalaDevice>,
}

/// The implementation of the ray tracing scene.
impl HalaRtScene {
  /// Create an empty scene. It has no top level structure until the first build.
  /// param device: The device.
  /// param frames_in_flight: How long replaced structures are kept alive.
  /// return: The scene.
  pub fn new(device: Rc<dyn HalaDevice>, frames_in_flight: usize) -> Self {
    log::debug!("A HalaRtScene is created.");
    Self {
      tlas: None,
      textures: Vec::new(),
      vertex_buffers: Vec::new(),
      index_buffers: Vec::new(),
      index_offsets: Vec::new(),
      index_offsets_buffer: None,
      descriptor_set: None,
      geometries: Vec::new(),
      build: HalaRtBuild::default(),
      recycler: HalaRecycleRing::new(frames_in_flight),
      build_count: 0,
      device,
    }
  }

  /// Add a mesh instance to the next build.
  /// param transform: The object-to-world matrix.
  /// param blas: The bottom level structure of the submesh.
  /// param material: The material, its texture is sampled on hit.
  /// param vertex_buffer: The vertex buffer of the mesh.
  /// param index_buffer: The index buffer of the mesh.
  /// param first_index: The first index of the submesh in the index buffer.
  pub fn add_instance(
    &mut self,
    transform: &Mat4,
    blas: HalaAccelerationStructure,
    material: &HalaMaterial,
    vertex_buffer: HalaBuffer,
    index_buffer: HalaBuffer,
    first_index: u32,
  ) {
    let custom_index = self.build.instances.len() as u32;
    self.build.textures.push(Some(material.texture));
    self.build.vertex_buffers.push(Some(vertex_buffer));
    self.build.index_buffers.push(Some(index_buffer));
    self.build.index_offsets.push(first_index);
    self.build.instances.push(HalaRtInstance {
      transform: to_rt_transform(transform),
      custom_index,
      mask: 0xff,
      blas,
    });
  }

  /// Add an instance without shading data, placed at the origin.
  /// param blas: The bottom level structure.
  pub fn add_blas_instance(&mut self, blas: HalaAccelerationStructure) {
    let custom_index = self.build.instances.len() as u32;
    self.build.textures.push(None);
    self.build.vertex_buffers.push(None);
    self.build.index_buffers.push(None);
    self.build.index_offsets.push(0);
    self.build.instances.push(HalaRtInstance {
      transform: to_rt_transform(&Mat4::IDENTITY),
      custom_index,
      mask: 0xff,
      blas,
    });
  }

  /// Keep a mesh alive for as long as the next build is in use.
  /// param geometry: The mesh owning the structures and buffers of added instances.
  pub fn retain(&mut self, geometry: &Rc<HalaMeshGeometry>) {
    if !self.build.geometries.iter().any(|g| Rc::ptr_eq(g, geometry)) {
      self.build.geometries.push(geometry.clone());
    }
  }

  /// Number of instances waiting for the next build.
  pub fn pending_instances(&self) -> usize {
    self.build.instances.len()
  }

  /// Build the top level structure from the instances added since the last build.
  /// On failure the previous structure and tables stay in place.
  /// return: The result.
  pub fn build_tlas(&mut self) -> Result<(), HalaWorldError> {
    let build = std::mem::take(&mut self.build);
    let built = match self.build_resources(&build) {
      Ok(built) => built,
      Err(err) => {
        log::warn!("Rebuild of the top level structure with {} instances failed, keeping the previous one: {}",
          build.instances.len(), err);
        return Err(err);
      },
    };

    if let Some(tlas) = self.tlas.replace(built.tlas) {
      self.recycler.push(HalaRecycled::AccelerationStructure(tlas));
    }
    if let Some(buffer) = self.index_offsets_buffer.replace(built.offsets) {
      self.recycler.push(HalaRecycled::Buffer(buffer));
    }
    if let Some(set) = self.descriptor_set.replace(built.set) {
      self.recycler.push(HalaRecycled::DescriptorSet(HalaDescriptorLayout::RT_SCENE, set));
    }
    for geometry in std::mem::replace(&mut self.geometries, build.geometries) {
      self.recycler.push(HalaRecycled::Geometry(geometry));
    }
    self.textures = build.textures;
    self.vertex_buffers = build.vertex_buffers;
    self.index_buffers = build.index_buffers;
    self.index_offsets = build.index_offsets;
    self.build_count += 1;
    log::debug!("Top level structure #{} built with {} instances.", self.build_count, build.instances.len());
    Ok(())
  }

  fn build_resources(&self, build: &HalaRtBuild) -> Result<HalaRtBuilt, HalaWorldError> {
    let device = self.device.as_ref();
    let tlas = device.build_top_level(&build.instances, "rt_scene.tlas")
      .map_err(|err| HalaWorldError::new("Build top level acceleration structure failed.", Some(Box::new(err))))?;

    let size = (build.index_offsets.len().max(1) * std::mem::size_of::<u32>()) as u64;
    let offsets = match device.create_buffer(size, HalaBufferUsageFlags::STORAGE_BUFFER, "rt_scene.index_offsets") {
      Ok(buffer) => buffer,
      Err(err) => {
        device.release_acceleration_structure(tlas);
        return Err(err.into());
      },
    };
    let set = device.write_buffer(offsets, 0, bytemuck::cast_slice(&build.index_offsets))
      .and_then(|_| device.create_descriptor_set(HalaDescriptorLayout::RT_SCENE, "rt_scene.descriptor_set"));
    let set = match set {
      Ok(set) => set,
      Err(err) => {
        device.release_buffer(offsets);
        device.release_acceleration_structure(tlas);
        return Err(err.into());
      },
    };
    let bindings = [
      HalaBinding::AccelerationStructure { binding: 0, structure: tlas },
      HalaBinding::StorageBuffer { binding: 1, buffer: offsets },
    ];
    if let Err(err) = device.write_descriptor_set(set, &bindings) {
      device.release_descriptor_set(set);
      device.release_buffer(offsets);
      device.release_acceleration_structure(tlas);
      return Err(err.into());
    }
    Ok(HalaRtBuilt { tlas, offsets, set })
  }

  /// Begin a frame: release what was replaced `frames_in_flight` frames ago.
  pub fn pre_frame_update(&mut self, frame_id: usize) {
    for item in self.recycler.pre_frame_update(frame_id) {
      item.release(self.device.as_ref());
    }
  }

  pub fn tlas(&self) -> Option<HalaAccelerationStructure> {
    self.tlas
  }

  /// Number of instances in the current structure.
  pub fn instance_count(&self) -> usize {
    self.index_offsets.len()
  }
}

impl Drop for HalaRtScene {
  fn drop(&mut self) {
    for item in self.recycler.drain_all() {
      item.release(self.device.as_ref());
    }
    if let Some(set) = self.descriptor_set.take() {
      self.device.release_descriptor_set(set);
    }
    if let Some(buffer) = self.index_offsets_buffer.take() {
      self.device.release_buffer(buffer);
    }
    if let Some(tlas) = self.tlas.take() {
      self.device.release_acceleration_structure(tlas);
    }
    self.geometries.clear();
    log::debug!("A HalaRtScene is dropped.");
  }
}

#[cfg(test)]
mod tests {
  use glam::Vec3;

  use super::*;
  use crate::device::testing::RecordingDevice;
  use crate::visual::HalaAlphaFunc;

  fn scene() -> (Rc<RecordingDevice>, HalaRtScene) {
    let device = Rc::new(RecordingDevice::default());
    let rt = HalaRtScene::new(device.clone(), 2);
    (device, rt)
  }

  #[test]
  fn empty_build_yields_a_valid_structure() -> anyhow::Result<()> {
    let (device, mut rt) = scene();
    rt.build_tlas()?;
    assert!(rt.tlas().is_some());
    assert_eq!(rt.instance_count(), 0);
    assert_eq!(device.tlas_builds.borrow().len(), 1);
    assert!(device.tlas_builds.borrow()[0].is_empty());
    Ok(())
  }

  #[test]
  fn build_mirrors_exactly_the_added_instances() -> anyhow::Result<()> {
    let (device, mut rt) = scene();
    let material = HalaMaterial::new(HalaTexture(5), HalaAlphaFunc::SOLID);
    let blas = HalaAccelerationStructure(77);
    rt.add_instance(&Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)), blas, &material, HalaBuffer(1), HalaBuffer(2), 96);
    rt.add_blas_instance(blas);
    assert_eq!(rt.pending_instances(), 2);
    rt.build_tlas()?;

    assert_eq!(rt.pending_instances(), 0);
    assert_eq!(rt.textures, vec![Some(HalaTexture(5)), None]);
    assert_eq!(rt.index_offsets, vec![96, 0]);
    let offsets = device.buffer_data(rt.index_offsets_buffer.unwrap());
    assert_eq!(&offsets[..4], &96u32.to_le_bytes());

    let instances = device.tlas_builds.borrow()[0].clone();
    assert_eq!(instances[0].custom_index, 0);
    assert_eq!(instances[1].custom_index, 1);
    assert_eq!([instances[0].transform[3], instances[0].transform[7], instances[0].transform[11]], [1.0, 2.0, 3.0]);

    // Nothing added since: the next build is empty.
    rt.build_tlas()?;
    assert_eq!(rt.instance_count(), 0);
    Ok(())
  }

  #[test]
  fn failed_build_keeps_the_previous_structure() -> anyhow::Result<()> {
    let (device, mut rt) = scene();
    rt.add_blas_instance(HalaAccelerationStructure(1));
    rt.build_tlas()?;
    let previous = rt.tlas();

    rt.add_blas_instance(HalaAccelerationStructure(1));
    rt.add_blas_instance(HalaAccelerationStructure(2));
    device.fail_next_tlas.set(true);
    let err = rt.build_tlas().unwrap_err();
    assert!(err.is_out_of_memory());
    assert_eq!(rt.tlas(), previous);
    assert_eq!(rt.instance_count(), 1);
    Ok(())
  }

  #[test]
  fn replaced_structures_are_released_after_frames_in_flight() -> anyhow::Result<()> {
    let (device, mut rt) = scene();
    rt.pre_frame_update(0);
    rt.build_tlas()?;
    rt.build_tlas()?;
    assert_eq!(device.live_structures(), 2);
    rt.pre_frame_update(1);
    assert_eq!(device.live_structures(), 2);
    rt.pre_frame_update(0);
    assert_eq!(device.live_structures(), 1);
    assert_eq!(device.live_buffers(), 1);

    drop(rt);
    assert_eq!(device.live_structures(), 0);
    assert_eq!(device.live_buffers(), 0);
    assert!(device.descriptor_sets.borrow().is_empty());
    Ok(())
  }

  #[test]
  fn retained_geometry_lives_as_long_as_its_structure() -> anyhow::Result<()> {
    use crate::packer::{
      HalaPackageType,
      HalaPackedMesh,
      tests::grid_mesh,
    };
    use crate::visual::HalaStaticMesh;

    let (device, mut rt) = scene();
    let packed = HalaPackedMesh::new(&grid_mesh(4), HalaPackageType::VISUAL)?;
    let mesh = HalaStaticMesh::new(device.clone(), &packed, true)?;
    let material = HalaMaterial::new(HalaTexture(5), HalaAlphaFunc::SOLID);
    for sub in mesh.sub_meshes.iter() {
      if let Some(blas) = sub.blas {
        rt.add_instance(&Mat4::IDENTITY, blas, &material, mesh.vertex_buffer, mesh.index_buffer, sub.first_index);
      }
    }
    rt.retain(mesh.geometry());
    rt.retain(mesh.geometry());
    rt.pre_frame_update(0);
    rt.build_tlas()?;
    assert_eq!(Rc::strong_count(mesh.geometry()), 2);

    drop(mesh);
    // The structure over the mesh is replaced, the mesh goes with it once the frames are done.
    rt.build_tlas()?;
    rt.pre_frame_update(1);
    assert_eq!(device.live_buffers(), 4);
    assert_eq!(device.live_structures(), 4);
    rt.pre_frame_update(0);
    assert_eq!(device.live_buffers(), 1);
    assert_eq!(device.live_structures(), 1);
    Ok(())
  }
}
