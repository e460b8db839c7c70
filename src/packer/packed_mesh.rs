use glam::Vec3;

use crate::scene::{
  HalaBounds,
  HalaCluster,
  HalaMeshlet,
  HalaSkinnedVertex,
  HalaSphere,
  HalaVertex,
  raw_mesh::HalaRawMaterial,
};

/// The packing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HalaPackageType(u8);
impl HalaPackageType {
  /// Static visual: vertices deduplicated by value, triangles reordered for the vertex cache.
  pub const VISUAL: Self = Self(0);
  /// Terrain: triangles ordered spatially so meshlets stay compact across the whole world.
  pub const VISUAL_LANDSCAPE: Self = Self(1);
  /// Morph target mesh: every source corner keeps its identity, `vertices_id` maps back.
  pub const VISUAL_MORPH: Self = Self(2);
  /// Collision: positions and indices only, no meshlets.
  pub const PHYSIC: Self = Self(3);

  pub fn from_u8(value: u8) -> Option<Self> {
    match value {
      0 => Some(Self::VISUAL),
      1 => Some(Self::VISUAL_LANDSCAPE),
      2 => Some(Self::VISUAL_MORPH),
      3 => Some(Self::PHYSIC),
      _ => None,
    }
  }

  pub fn to_u8(&self) -> u8 {
    self.0
  }

  pub fn has_meshlets(&self) -> bool {
    *self != Self::PHYSIC
  }
}

/// The width of the exported index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalaIndexFormat {
  U16,
  U32,
}

/// A material-homogeneous range of the shared index buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct HalaSubMesh {
  pub material: HalaRawMaterial,
  pub first_index: usize,
  pub index_count: usize,
  pub first_meshlet: usize,
  pub meshlet_count: usize,
}

/// The immutable result of packing a mesh.
#[derive(Debug, Clone)]
pub struct HalaPackedMesh {
  pub name: String,
  pub package_type: HalaPackageType,
  /// Filled for rigid meshes.
  pub vertices: Vec<HalaVertex>,
  /// Filled for skinned meshes.
  pub vertices_skinned: Vec<HalaSkinnedVertex>,
  pub indices: Vec<u32>,
  /// Meshlet-local indices, parallel to `indices`. Empty for physics packages.
  pub local_indices: Vec<u8>,
  pub sub_meshes: Vec<HalaSubMesh>,
  pub meshlets: Vec<HalaMeshlet>,
  /// One per meshlet.
  pub clusters: Vec<HalaCluster>,
  /// Source position index of every output vertex, morph packages only.
  pub vertices_id: Vec<u32>,
  pub(crate) bbox: HalaBounds,
}

/// The implementation of the packed mesh.
impl HalaPackedMesh {
  pub(crate) fn empty(name: &str, package_type: HalaPackageType) -> Self {
    Self {
      name: name.to_string(),
      package_type,
      vertices: Vec::new(),
      vertices_skinned: Vec::new(),
      indices: Vec::new(),
      local_indices: Vec::new(),
      sub_meshes: Vec::new(),
      meshlets: Vec::new(),
      clusters: Vec::new(),
      vertices_id: Vec::new(),
      bbox: HalaBounds::default(),
    }
  }

  /// The bounding box of all vertices.
  /// return: (min, max).
  pub fn bbox(&self) -> (Vec3, Vec3) {
    (self.bbox.get_min(), self.bbox.get_max())
  }

  pub fn bounds(&self) -> &HalaBounds {
    &self.bbox
  }

  pub fn is_skinned(&self) -> bool {
    !self.vertices_skinned.is_empty()
  }

  pub fn vertex_count(&self) -> usize {
    self.vertices.len() + self.vertices_skinned.len()
  }

  pub fn triangle_count(&self) -> usize {
    self.indices.len() / 3
  }

  /// Position of an output vertex.
  /// param index: The vertex index.
  /// return: The position.
  pub fn position(&self, index: usize) -> Vec3 {
    if self.is_skinned() {
      self.vertices_skinned[index].position()
    } else {
      self.vertices[index].position()
    }
  }

  /// The narrowest index format that can address every vertex.
  pub fn index_format(&self) -> HalaIndexFormat {
    if self.vertex_count() <= u16::MAX as usize + 1 {
      HalaIndexFormat::U16
    } else {
      HalaIndexFormat::U32
    }
  }

  /// The index buffer as 16-bit indices.
  /// return: None if some index does not fit.
  pub fn indices_u16(&self) -> Option<Vec<u16>> {
    self.indices.iter().map(|&i| u16::try_from(i).ok()).collect()
  }

  /// The bounding sphere of all meshlets overlapping an index range.
  /// param first_index: The first index of the range.
  /// param index_count: The number of indices.
  /// return: The sphere, None for physics packages or ranges without meshlets.
  pub fn range_sphere(&self, first_index: usize, index_count: usize) -> Option<HalaSphere> {
    let end = first_index + index_count;
    self.meshlets.iter().zip(self.clusters.iter())
      .filter(|(meshlet, _)| {
        let begin = meshlet.first_index as usize;
        begin < end && begin + meshlet.index_count() as usize > first_index
      })
      .map(|(_, cluster)| HalaSphere::new(Vec3::from(cluster.center), cluster.radius))
      .reduce(|acc, sphere| acc.union(&sphere))
  }

  /// Log the meshlet occupancy of this mesh.
  pub(crate) fn log_utilization(&self) {
    if self.meshlets.is_empty() {
      return;
    }
    let verts: u32 = self.meshlets.iter().map(|m| m.num_of_vertices).sum();
    let tris: u32 = self.meshlets.iter().map(|m| m.num_of_triangles).sum();
    let count = self.meshlets.len() as f32;
    log::debug!(
      "Packed mesh \"{}\": {} meshlets, {:.1} vertices and {:.1} triangles per meshlet.",
      self.name, self.meshlets.len(), verts as f32 / count, tris as f32 / count,
    );
  }
}
