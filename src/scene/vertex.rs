use bytemuck::{
  Pod,
  Zeroable,
};

/// The vertex of rigid geometry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaVertex {
  pub position: [f32; 3],
  pub normal: [f32; 3],
  pub tex_coord: [f32; 2],
  pub color: u32,
}

/// The vertex of skinned geometry. Carries up to 4 bone influences.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaSkinnedVertex {
  pub position: [f32; 3],
  pub normal: [f32; 3],
  pub tex_coord: [f32; 2],
  pub color: u32,
  pub bone_ids: [u8; 4],
  pub weights: [f32; 4],
}

impl HalaVertex {
  pub fn position(&self) -> glam::Vec3 {
    glam::Vec3::from(self.position)
  }
}

impl HalaSkinnedVertex {
  pub fn position(&self) -> glam::Vec3 {
    glam::Vec3::from(self.position)
  }
}
