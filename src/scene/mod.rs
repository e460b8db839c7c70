pub mod vertex;
pub mod bounds;
pub mod meshlet;
pub mod frustum;
pub mod raw_mesh;

pub use vertex::{HalaVertex, HalaSkinnedVertex};
pub use bounds::{HalaBounds, HalaSphere};
pub use meshlet::{HalaCluster, HalaMeshlet};
pub use frustum::HalaFrustum;
pub use raw_mesh::{HalaRawMesh, HalaRawMaterial, HalaRawWedge, HalaRawTriangle, HalaRawSkin};
