//! Procedural terrain shared by every member of a lobby

pub mod heightmap;
pub mod noise;

pub use heightmap::{HeightGrid, Heightmap, LayerConfig, TerrainSettings};
pub use noise::NoiseState;
