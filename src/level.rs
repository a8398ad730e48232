pub mod data;
pub mod mcregion;

pub use data::{ChunkData, ChunkPos, ChunkReadResult, WorldInfo, WorldLoader, CHUNK_SIZE};
pub use mcregion::McRegionLoader;
