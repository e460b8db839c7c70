use std::rc::Rc;

use crate::device::{
  HalaAccelerationStructure,
  HalaBlasGeometry,
  HalaBuffer,
  HalaBufferUsageFlags,
  HalaDevice,
};
use crate::error::HalaWorldError;
use crate::packer::HalaPackedMesh;
use crate::scene::{
  HalaBounds,
  HalaRawMaterial,
  HalaSkinnedVertex,
  HalaSphere,
  HalaVertex,
};

/// A submesh resident on the GPU.
#[derive(Debug, Clone)]
pub struct HalaStaticSubMesh {
  pub material: HalaRawMaterial,
  pub first_index: u32,
  pub index_count: u32,
  pub sphere: HalaSphere,
  pub blas: Option<HalaAccelerationStructure>,
}

/// The GPU objects of an uploaded mesh.
/// Draw buckets and the ray tracing scene hold it while they reference its buffers, and hand it
/// to a recycle ring when they let go, so it is released only after the last frame using it.
pub struct HalaMeshGeometry {
  pub name: String,
  pub vertex_buffer: HalaBuffer,
  pub index_buffer: HalaBuffer,
  blas: Vec<HalaAccelerationStructure>,
  device: Rc<dyn HalaDevice>,
}

impl HalaMeshGeometry {
  pub fn blas(&self) -> &[HalaAccelerationStructure] {
    &self.blas
  }
}

impl Drop for HalaMeshGeometry {
  fn drop(&mut self) {
    for blas in self.blas.drain(..) {
      self.device.release_acceleration_structure(blas);
    }
    self.device.release_buffer(self.index_buffer);
    self.device.release_buffer(self.vertex_buffer);
    log::debug!("A HalaMeshGeometry \"{}\" is dropped.", self.name);
  }
}

impl std::fmt::Debug for HalaMeshGeometry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HalaMeshGeometry")
      .field("name", &self.name)
      .field("vertex_buffer", &self.vertex_buffer)
      .field("index_buffer", &self.index_buffer)
      .field("blas", &self.blas)
      .finish()
  }
}

/// A packed mesh uploaded to the device.
pub struct HalaStaticMesh {
  pub name: String,
  pub vertex_buffer: HalaBuffer,
  pub index_buffer: HalaBuffer,
  pub vertex_stride: u64,
  pub vertex_count: u32,
  pub index_count: u32,
  pub sub_meshes: Vec<HalaStaticSubMesh>,
  pub bounds: HalaBounds,
  skinned: bool,
  geometry: Rc<HalaMeshGeometry>,
}

/// The implementation of the static mesh.
impl HalaStaticMesh {
  /// Upload a packed mesh.
  /// param device: The device.
  /// param packed: The packed mesh.
  /// param ray_tracing: Build one bottom level structure per submesh. Ignored for skinned meshes.
  /// return: The mesh.
  pub fn new(device: Rc<dyn HalaDevice>, packed: &HalaPackedMesh, ray_tracing: bool) -> Result<Self, HalaWorldError> {
    if packed.vertex_count() == 0 || packed.indices.is_empty() {
      return Err(HalaWorldError::new(&format!("Mesh \"{}\" has no geometry to upload.", packed.name), None));
    }
    let skinned = packed.is_skinned();
    let (vertex_bytes, vertex_stride): (&[u8], usize) = if skinned {
      (bytemuck::cast_slice(&packed.vertices_skinned), std::mem::size_of::<HalaSkinnedVertex>())
    } else {
      (bytemuck::cast_slice(&packed.vertices), std::mem::size_of::<HalaVertex>())
    };
    let index_bytes: &[u8] = bytemuck::cast_slice(&packed.indices);

    let vertex_buffer = device.create_buffer(
      vertex_bytes.len() as u64,
      HalaBufferUsageFlags::VERTEX_BUFFER | HalaBufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY,
      &format!("{}.vertex_buffer", packed.name))?;
    let index_buffer = match device.create_buffer(
      index_bytes.len() as u64,
      HalaBufferUsageFlags::INDEX_BUFFER | HalaBufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY,
      &format!("{}.index_buffer", packed.name),
    ) {
      Ok(buffer) => buffer,
      Err(err) => {
        device.release_buffer(vertex_buffer);
        return Err(err.into());
      },
    };

    // From here on a failure drops `geometry`, which releases what was created so far.
    let mut geometry = HalaMeshGeometry {
      name: packed.name.clone(),
      vertex_buffer,
      index_buffer,
      blas: Vec::new(),
      device: device.clone(),
    };
    device.write_buffer(vertex_buffer, 0, vertex_bytes)?;
    device.write_buffer(index_buffer, 0, index_bytes)?;

    let bounds = *packed.bounds();
    let whole = bounds.to_sphere();
    let mut sub_meshes = Vec::with_capacity(packed.sub_meshes.len());
    for (i, sub) in packed.sub_meshes.iter().enumerate() {
      let mut sub_mesh = HalaStaticSubMesh {
        material: sub.material.clone(),
        first_index: sub.first_index as u32,
        index_count: sub.index_count as u32,
        sphere: packed.range_sphere(sub.first_index, sub.index_count).unwrap_or(whole),
        blas: None,
      };
      if ray_tracing && !skinned {
        let blas_geometry = HalaBlasGeometry {
          vertex_buffer,
          vertex_stride: vertex_stride as u64,
          vertex_count: packed.vertex_count() as u32,
          index_buffer,
          first_index: sub_mesh.first_index,
          index_count: sub_mesh.index_count,
        };
        let blas = device.build_bottom_level(&blas_geometry, &format!("{}.blas_{}", packed.name, i))?;
        geometry.blas.push(blas);
        sub_mesh.blas = Some(blas);
      }
      sub_meshes.push(sub_mesh);
    }

    log::debug!("A HalaStaticMesh \"{}\" with {} submeshes is created.", packed.name, sub_meshes.len());
    Ok(Self {
      name: packed.name.clone(),
      vertex_buffer,
      index_buffer,
      vertex_stride: vertex_stride as u64,
      vertex_count: packed.vertex_count() as u32,
      index_count: packed.indices.len() as u32,
      sub_meshes,
      bounds,
      skinned,
      geometry: Rc::new(geometry),
    })
  }

  pub fn is_skinned(&self) -> bool {
    self.skinned
  }

  /// The shared GPU objects. They outlive the mesh while any draw or ray tracing instance uses them.
  pub fn geometry(&self) -> &Rc<HalaMeshGeometry> {
    &self.geometry
  }

  /// The bounding sphere of an index range.
  /// param first_index: The first index.
  /// param index_count: The number of indices.
  /// return: The sphere of the matching submeshes, the whole mesh if none matches.
  pub fn range_sphere(&self, first_index: u32, index_count: u32) -> HalaSphere {
    let end = first_index + index_count;
    self.sub_meshes.iter()
      .filter(|sub| sub.first_index < end && sub.first_index + sub.index_count > first_index)
      .map(|sub| sub.sphere)
      .reduce(|acc, sphere| acc.union(&sphere))
      .unwrap_or_else(|| self.bounds.to_sphere())
  }

  /// The bottom level structure of the submesh covering exactly this index range.
  pub fn blas(&self, first_index: u32, index_count: u32) -> Option<HalaAccelerationStructure> {
    self.sub_meshes.iter()
      .find(|sub| sub.first_index == first_index && sub.index_count == index_count)
      .and_then(|sub| sub.blas)
  }
}

impl Drop for HalaStaticMesh {
  fn drop(&mut self) {
    log::debug!("A HalaStaticMesh \"{}\" is dropped, {} holders of its geometry remain.",
      self.name, Rc::strong_count(&self.geometry) - 1);
  }
}

/// A skinned mesh uploaded to the device.
pub struct HalaAnimMesh {
  mesh: HalaStaticMesh,
  pub bone_count: usize,
}

/// The implementation of the animated mesh.
impl HalaAnimMesh {
  /// Upload a skinned packed mesh.
  /// param device: The device.
  /// param packed: The packed mesh, must be skinned.
  /// param bone_count: The number of bones of the skeleton.
  /// return: The mesh.
  pub fn new(device: Rc<dyn HalaDevice>, packed: &HalaPackedMesh, bone_count: usize) -> Result<Self, HalaWorldError> {
    if !packed.is_skinned() {
      return Err(HalaWorldError::new(&format!("Mesh \"{}\" is not skinned.", packed.name), None));
    }
    Ok(Self {
      mesh: HalaStaticMesh::new(device, packed, false)?,
      bone_count,
    })
  }

  pub fn mesh(&self) -> &HalaStaticMesh {
    &self.mesh
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::testing::RecordingDevice;
  use crate::packer::{
    HalaMeshPacker,
    HalaPackageType,
    tests::grid_mesh,
  };
  use crate::scene::HalaRawSkin;

  #[test]
  fn upload_builds_one_blas_per_submesh() -> anyhow::Result<()> {
    let device = Rc::new(RecordingDevice::default());
    let packed = HalaPackedMesh::new(&grid_mesh(4), HalaPackageType::VISUAL)?;
    let mesh = HalaStaticMesh::new(device.clone(), &packed, true)?;
    assert_eq!(mesh.sub_meshes.len(), 2);
    assert_eq!(device.blas_builds.get(), 2);
    assert_eq!(device.live_buffers(), 2);
    let sub = &mesh.sub_meshes[1];
    assert!(mesh.blas(sub.first_index, sub.index_count).is_some());
    assert!(mesh.blas(sub.first_index, 3).is_none());
    assert_eq!(device.buffer_data(mesh.index_buffer), bytemuck::cast_slice::<u32, u8>(&packed.indices));

    drop(mesh);
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_structures(), 0);
    Ok(())
  }

  #[test]
  fn geometry_outlives_the_mesh_while_held() -> anyhow::Result<()> {
    let device = Rc::new(RecordingDevice::default());
    let packed = HalaPackedMesh::new(&grid_mesh(4), HalaPackageType::VISUAL)?;
    let mesh = HalaStaticMesh::new(device.clone(), &packed, true)?;
    let geometry = mesh.geometry().clone();
    assert_eq!(geometry.blas().len(), 2);
    assert_eq!(geometry.vertex_buffer, mesh.vertex_buffer);

    drop(mesh);
    assert_eq!(device.live_buffers(), 2);
    assert_eq!(device.live_structures(), 2);
    drop(geometry);
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_structures(), 0);
    Ok(())
  }

  #[test]
  fn skinned_meshes_have_no_blas() -> anyhow::Result<()> {
    let device = Rc::new(RecordingDevice::default());
    let mut raw = grid_mesh(2);
    raw.skin = Some(vec![HalaRawSkin { bone_ids: [0; 4], weights: [1.0, 0.0, 0.0, 0.0] }; raw.positions.len()]);
    let packed = HalaMeshPacker::default().pack_skinned(&raw)?;
    let mesh = HalaAnimMesh::new(device.clone(), &packed, 1)?;
    assert!(mesh.mesh().is_skinned());
    assert_eq!(mesh.mesh().vertex_stride, std::mem::size_of::<HalaSkinnedVertex>() as u64);
    assert_eq!(device.blas_builds.get(), 0);

    let rigid = HalaPackedMesh::new(&raw, HalaPackageType::VISUAL)?;
    assert!(HalaAnimMesh::new(device.clone(), &rigid, 1).is_err());
    Ok(())
  }
}
