use thiserror::Error;

use crate::visual::material::HalaPipelineKey;

/// The error raised by the graphics device layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HalaDeviceError {
  #[error("The device is out of memory while creating \"{0}\".")]
  OutOfMemory(String),
  #[error("The handle {0} is not valid on this device.")]
  InvalidHandle(u64),
  #[error("{0}")]
  Other(String),
}

/// The opaque GPU buffer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaBuffer(pub u64);

/// The opaque GPU texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaTexture(pub u64);

/// The opaque descriptor set handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaDescriptorSet(pub u64);

/// The opaque acceleration structure handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaAccelerationStructure(pub u64);

/// The buffer usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HalaBufferUsageFlags(u32);
impl HalaBufferUsageFlags {
  pub const VERTEX_BUFFER: Self = Self(1 << 0);
  pub const INDEX_BUFFER: Self = Self(1 << 1);
  pub const STORAGE_BUFFER: Self = Self(1 << 2);
  pub const UNIFORM_BUFFER: Self = Self(1 << 3);
  pub const ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY: Self = Self(1 << 4);

  pub fn contains(&self, other: Self) -> bool {
    self.0 & other.0 == other.0
  }
}

impl std::ops::BitOr for HalaBufferUsageFlags {
  type Output = Self;
  fn bitor(self, rhs: Self) -> Self {
    Self(self.0 | rhs.0)
  }
}

/// The descriptor set layout a set is allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaDescriptorLayout(u8);
impl HalaDescriptorLayout {
  pub const OBJECT: Self = Self(0);
  pub const SKINNED_OBJECT: Self = Self(1);
  pub const RT_SCENE: Self = Self(2);
}

/// A single descriptor write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalaBinding {
  Texture { binding: u32, texture: HalaTexture },
  StorageBuffer { binding: u32, buffer: HalaBuffer },
  AccelerationStructure { binding: u32, structure: HalaAccelerationStructure },
}

/// The triangle geometry of a bottom level acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalaBlasGeometry {
  pub vertex_buffer: HalaBuffer,
  pub vertex_stride: u64,
  pub vertex_count: u32,
  pub index_buffer: HalaBuffer,
  pub first_index: u32,
  pub index_count: u32,
}

/// One instance of the top level acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalaRtInstance {
  /// Row-major 3x4 object-to-world transform.
  pub transform: [f32; 12],
  pub custom_index: u32,
  pub mask: u8,
  pub blas: HalaAccelerationStructure,
}

/// The graphics device abstraction consumed by the world.
/// The world never allocates GPU memory itself, it only asks the device for objects.
pub trait HalaDevice {
  fn create_buffer(&self, size: u64, usage: HalaBufferUsageFlags, debug_name: &str) -> Result<HalaBuffer, HalaDeviceError>;
  fn write_buffer(&self, buffer: HalaBuffer, offset: u64, data: &[u8]) -> Result<(), HalaDeviceError>;
  fn release_buffer(&self, buffer: HalaBuffer);

  fn create_descriptor_set(&self, layout: HalaDescriptorLayout, debug_name: &str) -> Result<HalaDescriptorSet, HalaDeviceError>;
  fn write_descriptor_set(&self, set: HalaDescriptorSet, bindings: &[HalaBinding]) -> Result<(), HalaDeviceError>;
  fn release_descriptor_set(&self, set: HalaDescriptorSet);

  fn build_bottom_level(&self, geometry: &HalaBlasGeometry, debug_name: &str) -> Result<HalaAccelerationStructure, HalaDeviceError>;
  fn build_top_level(&self, instances: &[HalaRtInstance], debug_name: &str) -> Result<HalaAccelerationStructure, HalaDeviceError>;
  fn release_acceleration_structure(&self, structure: HalaAccelerationStructure);
}

/// The command recording context of one pass.
pub trait HalaCommandEncoder {
  fn bind_pipeline(&mut self, pipeline: HalaPipelineKey);
  fn bind_descriptor_set(&mut self, set: HalaDescriptorSet);
  fn bind_vertex_buffer(&mut self, buffer: HalaBuffer);
  fn bind_index_buffer(&mut self, buffer: HalaBuffer);
  fn push_constants(&mut self, data: &[u8]);
  fn draw_indexed(&mut self, first_index: u32, index_count: u32, first_instance: u32, instance_count: u32);
  fn draw(&mut self, vertex_count: u32, first_instance: u32, instance_count: u32);
}

/// Convert a column-major matrix into the row-major 3x4 layout the device expects.
/// param mtx: The object-to-world matrix.
/// return: The 12 floats of the top 3 rows.
pub fn to_rt_transform(mtx: &glam::Mat4) -> [f32; 12] {
  [
    mtx.x_axis.x, mtx.y_axis.x, mtx.z_axis.x, mtx.w_axis.x,
    mtx.x_axis.y, mtx.y_axis.y, mtx.z_axis.y, mtx.w_axis.y,
    mtx.x_axis.z, mtx.y_axis.z, mtx.z_axis.z, mtx.w_axis.z,
  ]
}

/// An in-memory device and encoder that record every call, for unit tests.
#[cfg(test)]
pub(crate) mod testing {
  use std::cell::{Cell, RefCell};
  use std::collections::{BTreeMap, BTreeSet};

  use super::*;

  #[derive(Default)]
  pub struct RecordingDevice {
    next_id: Cell<u64>,
    pub buffers: RefCell<BTreeMap<u64, Vec<u8>>>,
    pub descriptor_sets: RefCell<BTreeSet<u64>>,
    pub structures: RefCell<BTreeSet<u64>>,
    pub tlas_builds: RefCell<Vec<Vec<HalaRtInstance>>>,
    pub blas_builds: Cell<usize>,
    pub descriptor_sets_created: Cell<usize>,
    pub fail_next_tlas: Cell<bool>,
  }

  impl RecordingDevice {
    fn next(&self) -> u64 {
      let id = self.next_id.get() + 1;
      self.next_id.set(id);
      id
    }

    pub fn live_buffers(&self) -> usize {
      self.buffers.borrow().len()
    }

    pub fn live_structures(&self) -> usize {
      self.structures.borrow().len()
    }

    pub fn buffer_data(&self, buffer: HalaBuffer) -> Vec<u8> {
      self.buffers.borrow().get(&buffer.0).cloned().unwrap_or_default()
    }
  }

  impl HalaDevice for RecordingDevice {
    fn create_buffer(&self, size: u64, _usage: HalaBufferUsageFlags, _debug_name: &str) -> Result<HalaBuffer, HalaDeviceError> {
      let id = self.next();
      self.buffers.borrow_mut().insert(id, vec![0; size as usize]);
      Ok(HalaBuffer(id))
    }

    fn write_buffer(&self, buffer: HalaBuffer, offset: u64, data: &[u8]) -> Result<(), HalaDeviceError> {
      let mut buffers = self.buffers.borrow_mut();
      let memory = buffers.get_mut(&buffer.0).ok_or(HalaDeviceError::InvalidHandle(buffer.0))?;
      let begin = offset as usize;
      let end = begin + data.len();
      if end > memory.len() {
        return Err(HalaDeviceError::Other(format!("write of {} bytes at {} overflows buffer {}", data.len(), offset, buffer.0)));
      }
      memory[begin..end].copy_from_slice(data);
      Ok(())
    }

    fn release_buffer(&self, buffer: HalaBuffer) {
      let removed = self.buffers.borrow_mut().remove(&buffer.0);
      assert!(removed.is_some(), "buffer {} released twice", buffer.0);
    }

    fn create_descriptor_set(&self, _layout: HalaDescriptorLayout, _debug_name: &str) -> Result<HalaDescriptorSet, HalaDeviceError> {
      let id = self.next();
      self.descriptor_sets.borrow_mut().insert(id);
      self.descriptor_sets_created.set(self.descriptor_sets_created.get() + 1);
      Ok(HalaDescriptorSet(id))
    }

    fn write_descriptor_set(&self, set: HalaDescriptorSet, _bindings: &[HalaBinding]) -> Result<(), HalaDeviceError> {
      if self.descriptor_sets.borrow().contains(&set.0) {
        Ok(())
      } else {
        Err(HalaDeviceError::InvalidHandle(set.0))
      }
    }

    fn release_descriptor_set(&self, set: HalaDescriptorSet) {
      let removed = self.descriptor_sets.borrow_mut().remove(&set.0);
      assert!(removed, "descriptor set {} released twice", set.0);
    }

    fn build_bottom_level(&self, _geometry: &HalaBlasGeometry, _debug_name: &str) -> Result<HalaAccelerationStructure, HalaDeviceError> {
      let id = self.next();
      self.structures.borrow_mut().insert(id);
      self.blas_builds.set(self.blas_builds.get() + 1);
      Ok(HalaAccelerationStructure(id))
    }

    fn build_top_level(&self, instances: &[HalaRtInstance], debug_name: &str) -> Result<HalaAccelerationStructure, HalaDeviceError> {
      if self.fail_next_tlas.replace(false) {
        return Err(HalaDeviceError::OutOfMemory(debug_name.to_string()));
      }
      let id = self.next();
      self.structures.borrow_mut().insert(id);
      self.tlas_builds.borrow_mut().push(instances.to_vec());
      Ok(HalaAccelerationStructure(id))
    }

    fn release_acceleration_structure(&self, structure: HalaAccelerationStructure) {
      let removed = self.structures.borrow_mut().remove(&structure.0);
      assert!(removed, "acceleration structure {} released twice", structure.0);
    }
  }

  #[derive(Debug, Clone, PartialEq)]
  pub enum Command {
    Pipeline(HalaPipelineKey),
    DescriptorSet(HalaDescriptorSet),
    VertexBuffer(HalaBuffer),
    IndexBuffer(HalaBuffer),
    PushConstants(Vec<u8>),
    DrawIndexed { first_index: u32, index_count: u32, first_instance: u32, instance_count: u32 },
    Draw { vertex_count: u32, first_instance: u32, instance_count: u32 },
  }

  #[derive(Default)]
  pub struct RecordingEncoder {
    pub commands: Vec<Command>,
  }

  impl RecordingEncoder {
    pub fn draws(&self) -> Vec<&Command> {
      self.commands.iter()
        .filter(|cmd| matches!(cmd, Command::DrawIndexed { .. } | Command::Draw { .. }))
        .collect()
    }

    pub fn pipelines(&self) -> Vec<HalaPipelineKey> {
      self.commands.iter()
        .filter_map(|cmd| match cmd {
          Command::Pipeline(key) => Some(*key),
          _ => None,
        })
        .collect()
    }
  }

  impl HalaCommandEncoder for RecordingEncoder {
    fn bind_pipeline(&mut self, pipeline: HalaPipelineKey) {
      self.commands.push(Command::Pipeline(pipeline));
    }

    fn bind_descriptor_set(&mut self, set: HalaDescriptorSet) {
      self.commands.push(Command::DescriptorSet(set));
    }

    fn bind_vertex_buffer(&mut self, buffer: HalaBuffer) {
      self.commands.push(Command::VertexBuffer(buffer));
    }

    fn bind_index_buffer(&mut self, buffer: HalaBuffer) {
      self.commands.push(Command::IndexBuffer(buffer));
    }

    fn push_constants(&mut self, data: &[u8]) {
      self.commands.push(Command::PushConstants(data.to_vec()));
    }

    fn draw_indexed(&mut self, first_index: u32, index_count: u32, first_instance: u32, instance_count: u32) {
      self.commands.push(Command::DrawIndexed { first_index, index_count, first_instance, instance_count });
    }

    fn draw(&mut self, vertex_count: u32, first_instance: u32, instance_count: u32) {
      self.commands.push(Command::Draw { vertex_count, first_instance, instance_count });
    }
  }
}
