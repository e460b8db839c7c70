pub mod material;
pub mod recycler;
pub mod matrix_storage;
pub mod bucket;
pub mod static_mesh;
pub mod visual_objects;
pub mod mesh_view;

pub use material::{
  HalaAlphaFunc,
  HalaBucketType,
  HalaDrawPass,
  HalaMaterial,
  HalaPipelineKey,
};
pub use recycler::{
  HalaRecycleRing,
  HalaRecycled,
};
pub use matrix_storage::{
  HalaMatrixId,
  HalaMatrixStorage,
};
pub use bucket::{
  HalaBucketItem,
  HalaBucketKey,
  HalaInstanceData,
  HalaObjectsBucket,
};
pub use static_mesh::{
  HalaAnimMesh,
  HalaMeshGeometry,
  HalaStaticMesh,
  HalaStaticSubMesh,
};
pub use visual_objects::HalaVisualObjects;
pub use mesh_view::HalaMeshView;
