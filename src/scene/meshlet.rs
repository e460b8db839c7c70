use bytemuck::{
  Pod,
  Zeroable,
};

/// The bounding sphere of one meshlet, used for cluster culling.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct HalaCluster {
  pub center: [f32; 3],
  pub radius: f32,
}

/// The location of one meshlet inside the packed vertex and index buffers.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HalaMeshlet {
  pub first_vertex: u32,
  pub num_of_vertices: u32,
  pub first_index: u32,
  pub num_of_triangles: u32,
}

impl HalaMeshlet {
  pub fn index_count(&self) -> u32 {
    self.num_of_triangles * 3
  }
}
