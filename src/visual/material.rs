use crate::device::HalaTexture;
use crate::scene::HalaRawMaterial;

/// The blending mode of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaAlphaFunc(u8);
impl HalaAlphaFunc {
  pub const SOLID: Self = Self(0);
  pub const ALPHA_TEST: Self = Self(1);
  pub const WATER: Self = Self(2);
  pub const GHOST: Self = Self(3);
  pub const TRANSPARENT: Self = Self(4);
  pub const ADDITIVE: Self = Self(5);
  pub const MULTIPLY: Self = Self(6);

  pub fn from_u8(value: u8) -> Option<Self> {
    if value <= Self::MULTIPLY.0 {
      Some(Self(value))
    } else {
      None
    }
  }

  pub fn to_u8(&self) -> u8 {
    self.0
  }

  /// Written to depth, drawn in the shadow and g-buffer passes.
  pub fn is_solid(&self) -> bool {
    *self == Self::SOLID || *self == Self::ALPHA_TEST
  }

  pub fn is_translucent(&self) -> bool {
    matches!(*self, Self::GHOST | Self::TRANSPARENT | Self::ADDITIVE | Self::MULTIPLY)
  }
}

impl Default for HalaAlphaFunc {
  fn default() -> Self {
    Self::SOLID
  }
}

/// What kind of object a bucket holds. Selects the vertex pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaBucketType(u8);
impl HalaBucketType {
  pub const LANDSCAPE: Self = Self(0);
  pub const STATIC: Self = Self(1);
  pub const MOVABLE: Self = Self(2);
  pub const ANIMATED: Self = Self(3);
  pub const MORPH: Self = Self(4);
  pub const PFX: Self = Self(5);

  pub fn from_u8(value: u8) -> Option<Self> {
    if value <= Self::PFX.0 {
      Some(Self(value))
    } else {
      None
    }
  }

  pub fn to_u8(&self) -> u8 {
    self.0
  }

  pub fn is_skinned(&self) -> bool {
    *self == Self::ANIMATED
  }
}

/// The material of a draw: one texture and a blending mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaMaterial {
  pub alpha: HalaAlphaFunc,
  pub texture: HalaTexture,
}

/// The implementation of the material.
impl HalaMaterial {
  pub fn new(texture: HalaTexture, alpha: HalaAlphaFunc) -> Self {
    Self { alpha, texture }
  }

  /// Create the runtime material from the authored one.
  /// param raw: The authored material.
  /// param texture: The texture the asset layer resolved for it.
  /// return: The material.
  pub fn from_raw(raw: &HalaRawMaterial, texture: HalaTexture) -> Self {
    Self::new(texture, raw.alpha_func)
  }
}

/// Everything that selects a graphics pipeline.
/// The derived order sorts solid pipelines before water and translucent ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalaPipelineKey {
  pub alpha: HalaAlphaFunc,
  pub bucket_type: HalaBucketType,
}

impl HalaPipelineKey {
  pub fn new(bucket_type: HalaBucketType, alpha: HalaAlphaFunc) -> Self {
    Self { alpha, bucket_type }
  }

  /// Whether instances of this pipeline go into the top level acceleration structure.
  pub fn is_ray_traced(&self) -> bool {
    self.alpha.is_solid()
      && !self.bucket_type.is_skinned()
      && self.bucket_type != HalaBucketType::MORPH
      && self.bucket_type != HalaBucketType::PFX
  }
}

/// The render passes a bucket can be drawn in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalaDrawPass {
  Shadow(usize),
  GBuffer,
  Translucent,
  Water,
  HiZ,
}

/// The implementation of the draw pass.
impl HalaDrawPass {
  /// Check whether a pipeline takes part in this pass.
  /// param key: The pipeline key.
  /// return: True if drawn.
  pub fn accepts(&self, key: &HalaPipelineKey) -> bool {
    match self {
      Self::Shadow(_) | Self::GBuffer => key.alpha.is_solid() && key.bucket_type != HalaBucketType::PFX,
      Self::Translucent => key.alpha.is_translucent(),
      Self::Water => key.alpha == HalaAlphaFunc::WATER,
      Self::HiZ => {
        key.alpha == HalaAlphaFunc::SOLID
          && (key.bucket_type == HalaBucketType::LANDSCAPE || key.bucket_type == HalaBucketType::STATIC)
      },
    }
  }

  /// The frustum this pass reads visibility from: 0 is the camera, 1.. the shadow layers.
  pub fn view_index(&self) -> usize {
    match self {
      Self::Shadow(layer) => 1 + layer,
      _ => 0,
    }
  }
}
