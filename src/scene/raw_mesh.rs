use glam::{
  Vec2,
  Vec3,
};

use crate::error::HalaWorldError;
use crate::visual::material::HalaAlphaFunc;

/// The material as authored in the asset.
#[derive(Debug, Clone, PartialEq)]
pub struct HalaRawMaterial {
  pub name: String,
  pub texture: String,
  pub alpha_func: HalaAlphaFunc,
  pub color: u32,
}

impl Default for HalaRawMaterial {
  fn default() -> Self {
    Self {
      name: String::new(),
      texture: String::new(),
      alpha_func: HalaAlphaFunc::SOLID,
      color: 0xffff_ffff,
    }
  }
}

/// A triangle corner: references a position and carries the per-corner attributes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HalaRawWedge {
  pub position: u32,
  pub normal: Vec3,
  pub tex_coord: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HalaRawTriangle {
  pub wedges: [u32; 3],
  pub material: u32,
}

/// Bone influences of one position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HalaRawSkin {
  pub bone_ids: [u8; 4],
  pub weights: [f32; 4],
}

/// The mesh handed over by the asset layer. Read-only for the packer.
#[derive(Debug, Clone, Default)]
pub struct HalaRawMesh {
  pub name: String,
  pub positions: Vec<Vec3>,
  pub wedges: Vec<HalaRawWedge>,
  pub triangles: Vec<HalaRawTriangle>,
  pub materials: Vec<HalaRawMaterial>,
  /// One entry per position, only for skinned meshes.
  pub skin: Option<Vec<HalaRawSkin>>,
}

/// The implementation of the raw mesh.
impl HalaRawMesh {
  /// Check every cross reference of the mesh.
  /// return: The result.
  pub fn validate(&self) -> Result<(), HalaWorldError> {
    for (index, wedge) in self.wedges.iter().enumerate() {
      if wedge.position as usize >= self.positions.len() {
        return Err(HalaWorldError::new(
          &format!("Mesh \"{}\": wedge {} references position {} of {}.", self.name, index, wedge.position, self.positions.len()),
          None));
      }
    }
    for (index, tri) in self.triangles.iter().enumerate() {
      if tri.material as usize >= self.materials.len() {
        return Err(HalaWorldError::new(
          &format!("Mesh \"{}\": triangle {} references material {} of {}.", self.name, index, tri.material, self.materials.len()),
          None));
      }
      if let Some(wedge) = tri.wedges.iter().find(|&&w| w as usize >= self.wedges.len()) {
        return Err(HalaWorldError::new(
          &format!("Mesh \"{}\": triangle {} references wedge {} of {}.", self.name, index, wedge, self.wedges.len()),
          None));
      }
    }
    if let Some(skin) = self.skin.as_ref() {
      if skin.len() != self.positions.len() {
        return Err(HalaWorldError::new(
          &format!("Mesh \"{}\": {} skin entries for {} positions.", self.name, skin.len(), self.positions.len()),
          None));
      }
    }
    Ok(())
  }

  /// Position of a triangle corner.
  pub fn corner_position(&self, wedge: u32) -> Vec3 {
    self.positions[self.wedges[wedge as usize].position as usize]
  }
}
