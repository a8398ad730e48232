use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::blocks::{Block, BlockType};
use crate::level::data::{pack_nibbles, ChunkData, ChunkPos, CHUNK_SIZE};

/// The capability set required of anything that watches a chunk.
pub trait ChunkObserver {
    /// Interest registered; data will follow.
    fn initialize_chunk(&mut self, pos: ChunkPos);

    /// A loaded chunk's full snapshot.
    fn send_chunk(&mut self, pos: ChunkPos, chunk: &Chunk);

    /// No longer an observer; forget the chunk.
    fn unload_chunk(&mut self, pos: ChunkPos);

    /// A block changed in an observed chunk.
    fn send_block_change(&mut self, x: i32, y: i32, z: i32, block: Block);
}

/// Index of a block within its chunk. `x` and `z` are intra-chunk
/// coordinates in `0..16`, `y` in `0..128`.
pub(crate) fn chunk_coords_to_index(x: i32, y: i32, z: i32) -> usize {
    debug_assert!((0..16).contains(&x) && (0..128).contains(&y) && (0..16).contains(&z));
    (x * 2048 + z * 128 + y) as usize
}

/// A 16x16x128 column. Until its data arrives from the loader the arrays are
/// empty; observers registered in that window have only been told to expect
/// the chunk.
pub struct Chunk {
    blocks: Vec<Block>,
    block_light: Vec<u8>,
    sky_light: Vec<u8>,
    observers: Vec<i32>,
}

impl Chunk {
    pub(crate) fn new() -> Self {
        Self {
            blocks: vec![],
            block_light: vec![],
            sky_light: vec![],
            observers: vec![],
        }
    }

    pub fn is_loaded(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub(crate) fn initialize(&mut self, data: ChunkData) {
        self.blocks = data
            .blocks
            .iter()
            .zip(&data.block_data)
            .map(|(&ty, &data)| Block::new(BlockType::from_id(ty), data))
            .collect();
        self.block_light = data.block_light;
        self.sky_light = data.sky_light;
    }

    pub fn block(&self, index: usize) -> Block {
        self.blocks[index]
    }

    pub(crate) fn set_block(&mut self, index: usize, block: Block) {
        self.blocks[index] = block;
    }

    /// Registers an observer id; returns false if it was already present.
    pub(crate) fn add_observer(&mut self, id: i32) -> bool {
        if self.observers.contains(&id) {
            return false;
        }
        self.observers.push(id);
        true
    }

    pub(crate) fn remove_observer(&mut self, id: i32) {
        self.observers.retain(|&o| o != id);
    }

    pub(crate) fn observers(&self) -> &[i32] {
        &self.observers
    }

    /// The zlib payload of a full-chunk data packet: block types, then
    /// nibble-packed block data, block light, and sky light.
    pub fn serialize_to_network(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(CHUNK_SIZE + 3 * CHUNK_SIZE / 2);
        raw.extend(self.blocks.iter().map(|b| b.ty().id()));

        let data: Vec<u8> = self.blocks.iter().map(|b| b.data()).collect();
        raw.extend_from_slice(&pack_nibbles(&data));
        raw.extend_from_slice(&pack_nibbles(&self.block_light));
        raw.extend_from_slice(&pack_nibbles(&self.sky_light));

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .and_then(|_| encoder.finish())
            .expect("writing to an in-memory buffer")
    }
}
