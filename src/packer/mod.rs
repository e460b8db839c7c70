pub mod packed_mesh;
pub mod meshlet_builder;

use std::collections::HashMap;

use glam::Vec3;
use rayon::prelude::*;

use crate::config::HalaWorldConfig;
use crate::error::HalaWorldError;
use crate::scene::{
  HalaBounds,
  HalaCluster,
  HalaMeshlet,
  HalaRawMesh,
  HalaSkinnedVertex,
  HalaVertex,
};
use meshlet_builder::{
  HalaMeshletBuilder,
  NOT_IN_MESHLET,
  build_meshlets,
  merge_meshlets,
};

pub use packed_mesh::{
  HalaIndexFormat,
  HalaPackageType,
  HalaPackedMesh,
  HalaSubMesh,
};
pub use meshlet_builder::{
  MAX_INDICES,
  MAX_PRIMITIVES,
  MAX_VERTICES,
};

/// The packer options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalaPackOptions {
  pub merge_meshlets: bool,
  pub optimize_vertex_cache: bool,
}

impl Default for HalaPackOptions {
  fn default() -> Self {
    Self {
      merge_meshlets: true,
      optimize_vertex_cache: true,
    }
  }
}

/// Converts raw meshes into GPU friendly packed meshes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalaMeshPacker {
  pub options: HalaPackOptions,
}

/// The deduplicated vertex table of one packing run.
/// Every triangle corner is resolved into an id of this table first.
struct CanonicalVertices {
  rigid: Vec<HalaVertex>,
  skinned: Vec<HalaSkinnedVertex>,
  source: Vec<u32>,
  positions: Vec<Vec3>,
}

impl CanonicalVertices {
  fn len(&self) -> usize {
    self.positions.len()
  }
}

/// The implementation of the mesh packer.
impl HalaMeshPacker {
  /// Create a packer with the options of the world config.
  /// param config: The config.
  /// return: The packer.
  pub fn from_config(config: &HalaWorldConfig) -> Self {
    Self {
      options: HalaPackOptions {
        merge_meshlets: config.merge_meshlets,
        optimize_vertex_cache: config.optimize_vertex_cache,
      },
    }
  }

  /// Pack a rigid mesh.
  /// param mesh: The raw mesh.
  /// param package_type: The packing policy.
  /// return: The packed mesh.
  pub fn pack(&self, mesh: &HalaRawMesh, package_type: HalaPackageType) -> Result<HalaPackedMesh, HalaWorldError> {
    mesh.validate()?;
    self.pack_impl(mesh, package_type, false)
  }

  /// Pack a skinned mesh. Vertices that differ only in their bone influences stay separate.
  /// param mesh: The raw mesh, must carry skin data.
  /// return: The packed mesh.
  pub fn pack_skinned(&self, mesh: &HalaRawMesh) -> Result<HalaPackedMesh, HalaWorldError> {
    mesh.validate()?;
    if mesh.skin.is_none() {
      return Err(HalaWorldError::new(&format!("Mesh \"{}\" has no skin data.", mesh.name), None));
    }
    self.pack_impl(mesh, HalaPackageType::VISUAL, true)
  }

  /// Pack many meshes on the rayon pool. The results are in input order.
  /// param meshes: The meshes and their packing policy.
  /// return: The packed meshes.
  pub fn pack_many(&self, meshes: &[(&HalaRawMesh, HalaPackageType)]) -> Result<Vec<HalaPackedMesh>, HalaWorldError> {
    meshes.par_iter()
      .map(|(mesh, package_type)| self.pack(mesh, *package_type))
      .collect()
  }

  fn pack_impl(&self, mesh: &HalaRawMesh, package_type: HalaPackageType, skinned: bool) -> Result<HalaPackedMesh, HalaWorldError> {
    let mut out = HalaPackedMesh::empty(&mesh.name, package_type);
    let (canon, triangles) = Self::canonicalize(mesh, package_type, skinned);

    // Group triangles by material, in material order.
    let mut per_material = vec![Vec::new(); mesh.materials.len()];
    for (tri, raw) in triangles.iter().zip(mesh.triangles.iter()) {
      per_material[raw.material as usize].push(*tri);
    }

    let mut slots = vec![NOT_IN_MESHLET; canon.len()];
    for (material_index, tris) in per_material.into_iter().enumerate() {
      if tris.is_empty() {
        continue;
      }
      let first_index = out.indices.len();
      let first_meshlet = out.meshlets.len();

      if package_type.has_meshlets() {
        let tris = self.order_triangles(tris, package_type, &canon);
        let mut meshlets = build_meshlets(&tris, &mut slots, &canon.positions);
        if self.options.merge_meshlets {
          merge_meshlets(&mut meshlets, &canon.positions);
        }
        for meshlet in meshlets.iter() {
          Self::flush(meshlet, &canon, package_type, &mut out);
        }
      } else {
        out.indices.extend(tris.iter().flatten());
      }

      out.sub_meshes.push(HalaSubMesh {
        material: mesh.materials[material_index].clone(),
        first_index,
        index_count: out.indices.len() - first_index,
        first_meshlet,
        meshlet_count: out.meshlets.len() - first_meshlet,
      });
    }

    if !package_type.has_meshlets() {
      out.vertices = canon.rigid;
    }

    let positions = (0..out.vertex_count()).map(|i| out.position(i));
    out.bbox = HalaBounds::from_points(positions).unwrap_or_default();
    out.log_utilization();
    Ok(out)
  }

  /// Resolve every triangle corner into the canonical vertex table of the policy.
  /// return: The table and the canonical triangles, in source order.
  fn canonicalize(mesh: &HalaRawMesh, package_type: HalaPackageType, skinned: bool) -> (CanonicalVertices, Vec<[u32; 3]>) {
    let mut canon = CanonicalVertices {
      rigid: Vec::new(),
      skinned: Vec::new(),
      source: Vec::new(),
      positions: Vec::new(),
    };
    let mut by_value: HashMap<Vec<u32>, u32> = HashMap::new();
    let mut by_wedge: HashMap<u32, u32> = HashMap::new();

    let mut resolve = |wedge_index: u32, color: u32, canon: &mut CanonicalVertices| -> u32 {
      let wedge = &mesh.wedges[wedge_index as usize];
      let position = mesh.positions[wedge.position as usize];
      let vertex = if package_type == HalaPackageType::PHYSIC {
        HalaVertex {
          position: position.into(),
          ..Default::default()
        }
      } else {
        HalaVertex {
          position: position.into(),
          normal: wedge.normal.into(),
          tex_coord: wedge.tex_coord.into(),
          color,
        }
      };
      let skinned_vertex = mesh.skin.as_ref().filter(|_| skinned).map(|skin| {
        let influence = skin[wedge.position as usize];
        HalaSkinnedVertex {
          position: vertex.position,
          normal: vertex.normal,
          tex_coord: vertex.tex_coord,
          color: vertex.color,
          bone_ids: influence.bone_ids,
          weights: influence.weights,
        }
      });

      let next = canon.len() as u32;
      let id = if package_type == HalaPackageType::VISUAL_MORPH {
        *by_wedge.entry(wedge_index).or_insert(next)
      } else {
        let key = match skinned_vertex.as_ref() {
          Some(v) => bytemuck::cast_slice::<u8, u32>(bytemuck::bytes_of(v)).to_vec(),
          None => bytemuck::cast_slice::<u8, u32>(bytemuck::bytes_of(&vertex)).to_vec(),
        };
        *by_value.entry(key).or_insert(next)
      };

      if id == next {
        canon.rigid.push(vertex);
        if let Some(v) = skinned_vertex {
          canon.skinned.push(v);
        }
        canon.source.push(wedge.position);
        canon.positions.push(position);
      }
      id
    };

    let triangles = mesh.triangles.iter()
      .map(|tri| {
        let color = mesh.materials[tri.material as usize].color;
        [
          resolve(tri.wedges[0], color, &mut canon),
          resolve(tri.wedges[1], color, &mut canon),
          resolve(tri.wedges[2], color, &mut canon),
        ]
      })
      .collect::<Vec<_>>();
    (canon, triangles)
  }

  /// Decide the order the greedy pass sees the triangles of one submesh in.
  fn order_triangles(&self, tris: Vec<[u32; 3]>, package_type: HalaPackageType, canon: &CanonicalVertices) -> Vec<[u32; 3]> {
    if package_type == HalaPackageType::VISUAL && self.options.optimize_vertex_cache {
      let flat = tris.iter().flatten().copied().collect::<Vec<_>>();
      let optimized = meshopt::optimize_vertex_cache(&flat, canon.len());
      return optimized.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
    }
    if package_type == HalaPackageType::VISUAL_LANDSCAPE {
      return Self::spatial_sort(tris, &canon.positions);
    }
    tris
  }

  /// Order triangles by the grid cell of their centroid, so that terrain meshlets stay compact.
  /// The sort is stable, triangles of one cell keep their source order.
  fn spatial_sort(mut tris: Vec<[u32; 3]>, positions: &[Vec3]) -> Vec<[u32; 3]> {
    const GRID: f32 = 16.0;
    let centroid = |t: &[u32; 3]| (positions[t[0] as usize] + positions[t[1] as usize] + positions[t[2] as usize]) / 3.0;
    let bounds = match HalaBounds::from_points(tris.iter().map(centroid)) {
      Some(bounds) => bounds,
      None => return tris,
    };
    let min = bounds.get_min();
    let cell = (bounds.get_size().max_element() / GRID).max(f32::EPSILON);
    tris.sort_by_key(|t| {
      let c = ((centroid(t) - min) / cell).floor();
      (c.z as i64, c.x as i64, c.y as i64)
    });
    tris
  }

  /// Append a finished meshlet to the output buffers.
  fn flush(meshlet: &HalaMeshletBuilder, canon: &CanonicalVertices, package_type: HalaPackageType, out: &mut HalaPackedMesh) {
    debug_assert!(meshlet.validate());
    let first_vertex = out.vertex_count() as u32;
    let first_index = out.indices.len() as u32;

    for &v in meshlet.vertices.iter() {
      if canon.skinned.is_empty() {
        out.vertices.push(canon.rigid[v as usize]);
      } else {
        out.vertices_skinned.push(canon.skinned[v as usize]);
      }
      if package_type == HalaPackageType::VISUAL_MORPH {
        out.vertices_id.push(canon.source[v as usize]);
      }
    }
    for &local in meshlet.indices.iter() {
      out.indices.push(first_vertex + local as u32);
      out.local_indices.push(local);
    }

    out.meshlets.push(HalaMeshlet {
      first_vertex,
      num_of_vertices: meshlet.vertices.len() as u32,
      first_index,
      num_of_triangles: meshlet.triangle_count() as u32,
    });
    out.clusters.push(HalaCluster {
      center: meshlet.bounds.center.into(),
      radius: meshlet.bounds.radius,
    });
  }
}

/// Pack with default options.
impl HalaPackedMesh {
  pub fn new(mesh: &HalaRawMesh, package_type: HalaPackageType) -> Result<Self, HalaWorldError> {
    HalaMeshPacker::default().pack(mesh, package_type)
  }
}
