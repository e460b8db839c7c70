pub mod prelude;
pub mod error;
pub mod config;
pub mod device;
pub mod scene;
pub mod packer;
pub mod visual;
pub mod rt_scene;
pub mod world;
pub mod inventory;
