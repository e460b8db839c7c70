pub mod sky;
pub mod light_group;
pub mod landscape;
pub mod world_view;

pub use sky::{
  HalaLightSource,
  HalaSky,
};
pub use light_group::{
  HalaLightData,
  HalaLightGroup,
  HalaLightKey,
  HalaPointLight,
};
pub use landscape::HalaLandscape;
pub use world_view::{
  HalaAnimView,
  HalaSceneUniforms,
  HalaWorldView,
};
