use bytemuck::{
  Pod,
  Zeroable,
};
use glam::Vec3;
use slotmap::{
  SlotMap,
  new_key_type,
};

use crate::scene::HalaFrustum;

new_key_type! {
  /// The handle of a point light.
  pub struct HalaLightKey;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalaPointLight {
  pub position: Vec3,
  pub range: f32,
  pub color: Vec3,
}

/// A point light as the shaders read it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct HalaLightData {
  pub position: [f32; 3],
  pub range: f32,
  pub color: [f32; 3],
  pub _padding: f32,
}

/// The point lights of a world.
#[derive(Default)]
pub struct HalaLightGroup {
  lights: SlotMap<HalaLightKey, HalaPointLight>,
  dirty: bool,
}

/// The implementation of the light group.
impl HalaLightGroup {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, light: HalaPointLight) -> HalaLightKey {
    self.dirty = true;
    self.lights.insert(light)
  }

  pub fn remove(&mut self, key: HalaLightKey) -> Option<HalaPointLight> {
    let light = self.lights.remove(key);
    self.dirty |= light.is_some();
    light
  }

  pub fn get(&self, key: HalaLightKey) -> Option<&HalaPointLight> {
    self.lights.get(key)
  }

  /// Change a light.
  /// param key: The light.
  /// param f: The change.
  /// return: False if the light does not exist.
  pub fn modify(&mut self, key: HalaLightKey, f: impl FnOnce(&mut HalaPointLight)) -> bool {
    match self.lights.get_mut(key) {
      Some(light) => {
        f(light);
        self.dirty = true;
        true
      },
      None => false,
    }
  }

  pub fn len(&self) -> usize {
    self.lights.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lights.is_empty()
  }

  /// Take the changed flag.
  /// return: True if any light changed since the last call.
  pub fn update(&mut self) -> bool {
    std::mem::take(&mut self.dirty)
  }

  /// The lights touching a frustum.
  pub fn visible<'a>(&'a self, frustum: &'a HalaFrustum) -> impl Iterator<Item = HalaLightKey> + 'a {
    self.lights.iter()
      .filter(|(_, light)| frustum.test_sphere(light.position, light.range))
      .map(|(key, _)| key)
  }

  /// The GPU records of all lights, in slot order.
  pub fn to_gpu(&self) -> Vec<HalaLightData> {
    self.lights.values()
      .map(|light| HalaLightData {
        position: light.position.into(),
        range: light.range,
        color: light.color.into(),
        _padding: 0.0,
      })
      .collect()
  }
}
