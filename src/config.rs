use std::path::Path;

use serde::{
  Deserialize,
  Serialize,
};

use crate::error::HalaWorldError;

pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 4;

fn default_frames_in_flight() -> usize {
  2
}

fn default_shadow_layers() -> usize {
  2
}

fn default_as_true() -> bool {
  true
}

fn default_matrix_capacity() -> usize {
  4096
}

/// The runtime configuration of the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalaWorldConfig {
  /// How many frames the device may keep in flight. Sizes every deferred release ring.
  #[serde(default = "default_frames_in_flight")]
  pub max_frames_in_flight: usize,
  /// Number of shadow cascades.
  #[serde(default = "default_shadow_layers")]
  pub shadow_layers: usize,
  #[serde(default = "default_as_true")]
  pub ray_tracing: bool,
  #[serde(default = "default_as_true")]
  pub merge_meshlets: bool,
  #[serde(default = "default_as_true")]
  pub optimize_vertex_cache: bool,
  /// Capacity of the skinning matrix storage, in matrices.
  #[serde(default = "default_matrix_capacity")]
  pub matrix_storage_capacity: usize,
}

impl Default for HalaWorldConfig {
  fn default() -> Self {
    Self {
      max_frames_in_flight: default_frames_in_flight(),
      shadow_layers: default_shadow_layers(),
      ray_tracing: true,
      merge_meshlets: true,
      optimize_vertex_cache: true,
      matrix_storage_capacity: default_matrix_capacity(),
    }
  }
}

/// The implementation of the world configuration.
impl HalaWorldConfig {
  /// Parse the configuration from a JSON string.
  /// param json: The JSON text.
  /// return: The configuration.
  pub fn from_json_str(json: &str) -> Result<Self, HalaWorldError> {
    let config: Self = serde_json::from_str(json)
      .map_err(|err| HalaWorldError::new("Parse world config failed.", Some(Box::new(err))))?;
    Ok(config.sanitized())
  }

  /// Load the configuration from a JSON file.
  /// param path: The path of the file.
  /// return: The configuration.
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, HalaWorldError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
      .map_err(|err| HalaWorldError::new(&format!("Read world config \"{:?}\" failed.", path), Some(Box::new(err))))?;
    let config = Self::from_json_str(&text)?;
    log::debug!("World config loaded from \"{:?}\": {:?}", path, config);
    Ok(config)
  }

  /// Number of frustums the visibility pass expects: the main camera plus one per shadow layer.
  pub fn view_count(&self) -> usize {
    1 + self.shadow_layers
  }

  /// Clamp the values every consumer relies on into their valid range.
  pub fn sanitized(mut self) -> Self {
    let clamped = self.max_frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT_LIMIT);
    if clamped != self.max_frames_in_flight {
      log::warn!(
        "max_frames_in_flight {} is out of range, clamped to {}.",
        self.max_frames_in_flight, clamped
      );
      self.max_frames_in_flight = clamped;
    }
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_fields_fall_back_to_defaults() {
    let config = HalaWorldConfig::from_json_str(r#"{ "ray_tracing": false }"#).unwrap();
    assert!(!config.ray_tracing);
    assert_eq!(config.max_frames_in_flight, 2);
    assert_eq!(config.shadow_layers, 2);
    assert_eq!(config.view_count(), 3);
    assert!(config.merge_meshlets);
  }

  #[test]
  fn frames_in_flight_is_clamped() {
    let config = HalaWorldConfig::from_json_str(r#"{ "max_frames_in_flight": 9 }"#).unwrap();
    assert_eq!(config.max_frames_in_flight, MAX_FRAMES_IN_FLIGHT_LIMIT);
    let config = HalaWorldConfig::from_json_str(r#"{ "max_frames_in_flight": 0 }"#).unwrap();
    assert_eq!(config.max_frames_in_flight, 1);
  }

  #[test]
  fn literal_configs_are_clamped_on_demand() {
    let config = HalaWorldConfig { max_frames_in_flight: 0, ..Default::default() }.sanitized();
    assert_eq!(config.max_frames_in_flight, 1);
    let config = HalaWorldConfig::default().sanitized();
    assert_eq!(config, HalaWorldConfig::default());
  }

  #[test]
  fn malformed_json_is_an_error() {
    let err = HalaWorldConfig::from_json_str("{ shadow_layers: ").unwrap_err();
    assert!(err.message().contains("world config"));
  }
}
