//! Conversion engine between an authoring tool's scene graph and Minecraft
//! Bedrock model and animation files.

pub mod animation;
pub mod error;
pub mod math;
pub mod model;
pub mod project;
pub mod scene;
pub mod texture;
pub mod uv;
