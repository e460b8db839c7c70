use std::f32::consts::PI;

use glam::Vec3;

/// Real time of one game day, in milliseconds.
pub const DAY_LENGTH_MS: u64 = 90 * 60 * 1000;

/// A directional light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalaLightSource {
  /// Points from the scene toward the light.
  pub direction: Vec3,
  pub color: Vec3,
}

/// The sky: time of day and the sun derived from it.
#[derive(Debug, Clone)]
pub struct HalaSky {
  /// Hours, in [0, 24).
  day_time: f32,
}

impl Default for HalaSky {
  fn default() -> Self {
    Self { day_time: 12.0 }
  }
}

/// The implementation of the sky.
impl HalaSky {
  pub fn new(day_time: f32) -> Self {
    let mut sky = Self::default();
    sky.set_day_time(day_time);
    sky
  }

  pub fn day_time(&self) -> f32 {
    self.day_time
  }

  /// Set the time of day.
  /// param hours: The time in hours, wrapped into [0, 24).
  pub fn set_day_time(&mut self, hours: f32) {
    self.day_time = hours.rem_euclid(24.0);
  }

  /// Advance the clock.
  /// param dt: The elapsed real time in milliseconds.
  pub fn tick(&mut self, dt: u64) {
    let hours = dt as f64 * 24.0 / DAY_LENGTH_MS as f64;
    self.set_day_time(self.day_time + hours as f32);
  }

  /// The sun angle above the horizon, in radians. Negative at night.
  fn elevation(&self) -> f32 {
    (self.day_time - 6.0) / 12.0 * PI
  }

  pub fn is_night(&self) -> bool {
    self.elevation().sin() <= 0.0
  }

  /// The main light. At night it is the moon, opposite to the sun.
  pub fn sun(&self) -> HalaLightSource {
    let angle = self.elevation();
    let height = angle.sin();
    let direction = Vec3::new(angle.cos(), height.abs(), 0.25).normalize();
    let color = if height > 0.0 {
      // Reddish at sunrise and sunset.
      let warm = Vec3::new(1.0, 0.55, 0.3);
      warm.lerp(Vec3::ONE, height.sqrt())
    } else {
      Vec3::new(0.2, 0.25, 0.4) * (-height).sqrt()
    };
    HalaLightSource { direction, color }
  }

  pub fn ambient(&self) -> Vec3 {
    let day = self.elevation().sin().max(0.0);
    Vec3::splat(0.05) + Vec3::new(0.25, 0.27, 0.3) * day
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn time_wraps_around_midnight() {
    let mut sky = HalaSky::new(23.0);
    sky.tick(DAY_LENGTH_MS / 12);
    assert!((sky.day_time() - 1.0).abs() < 1e-3);
    assert!(sky.is_night());
    assert_eq!(HalaSky::new(-1.0).day_time(), 23.0);
  }

  #[test]
  fn noon_sun_is_overhead_and_bright() {
    let noon = HalaSky::new(12.0);
    let sun = noon.sun();
    assert!(sun.direction.y > 0.9);
    assert!(sun.color.x > 0.99 && sun.color.z > 0.99);
    assert!(!noon.is_night());
    assert!(noon.ambient().x > HalaSky::new(0.0).ambient().x);
  }
}
