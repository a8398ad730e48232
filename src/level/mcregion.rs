//! Reader for the packed 4 KiB-sector region container (`r.<x>.<z>.mcr`).

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use flate2::read::{GzDecoder, ZlibDecoder};
use log::debug;
use tokio::sync::mpsc;

use crate::err::LevelError;
use crate::level::data::{
    unpack_nibbles, ChunkData, ChunkPos, ChunkReadResult, WorldInfo, WorldLoader, CHUNK_SIZE,
};
use crate::nbt;

const SECTOR_BYTES: u64 = 4096;
const COMPRESSION_ZLIB: u8 = 2;

pub struct McRegionLoader {
    world_dir: PathBuf,
}

impl McRegionLoader {
    pub fn new(world_dir: impl Into<PathBuf>) -> Self {
        Self {
            world_dir: world_dir.into(),
        }
    }

    fn region_path(&self, region: ChunkPos) -> PathBuf {
        self.world_dir
            .join("region")
            .join(format!("r.{}.{}.mcr", region.x, region.z))
    }
}

impl WorldLoader for McRegionLoader {
    fn read_world_info(&self) -> Result<WorldInfo, LevelError> {
        let file = File::open(self.world_dir.join("level.dat"))?;
        let (_, root) = nbt::read_named(&mut GzDecoder::new(file))?;
        let data = root.compound("Data")?;

        Ok(WorldInfo {
            biome_seed: data.long("RandomSeed")?,
            spawn_x: data.int("SpawnX")?,
            spawn_y: data.int("SpawnY")?,
            spawn_z: data.int("SpawnZ")?,
        })
    }

    fn load_chunks(&self, positions: &[ChunkPos], results: &mpsc::Sender<ChunkReadResult>) {
        // Each region file is opened at most once per batch.
        let mut files: HashMap<ChunkPos, File> = HashMap::new();

        for &pos in positions {
            let region = pos.region();

            if !files.contains_key(&region) {
                match File::open(self.region_path(region)) {
                    Ok(file) => {
                        files.insert(region, file);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        // File doesn't exist - chunk simply isn't generated
                        let _ = results.blocking_send(ChunkReadResult {
                            pos,
                            data: Ok(ChunkData::empty()),
                        });
                        continue;
                    }
                    Err(e) => {
                        let _ = results.blocking_send(ChunkReadResult {
                            pos,
                            data: Err(e.into()),
                        });
                        continue;
                    }
                }
            }

            let file = files.get_mut(&region).expect("region file just cached");
            let data = read_chunk(file, pos);
            if results.blocking_send(ChunkReadResult { pos, data }).is_err() {
                debug!("chunk consumer went away, abandoning load batch");
                return;
            }
        }
    }
}

fn read_chunk(file: &mut File, pos: ChunkPos) -> Result<ChunkData, LevelError> {
    let offset = chunk_sector_offset(file, pos)?;

    // A zero offset means the chunk was never written to this region.
    if offset == 0 {
        return Ok(ChunkData::empty());
    }

    file.seek(SeekFrom::Start(offset * SECTOR_BYTES))?;
    let mut buf = [0; 4];
    file.read_exact(&mut buf)?;
    let data_length = i32::from_be_bytes(buf).max(0) as usize;

    let mut compression = [0; 1];
    file.read_exact(&mut compression)?;
    if compression[0] != COMPRESSION_ZLIB {
        return Err(LevelError::UnsupportedCompression(compression[0]));
    }

    let mut compressed = vec![0u8; data_length.saturating_sub(1)];
    file.read_exact(&mut compressed)?;

    read_chunk_nbt(ZlibDecoder::new(compressed.as_slice()))
}

/// Reads the header entry for `pos`: `offset:24 | sectorCount:8`, offset in
/// 4 KiB sectors from the start of the file.
fn chunk_sector_offset(file: &mut File, pos: ChunkPos) -> Result<u64, LevelError> {
    let entry = 4 * (pos.x.rem_euclid(32) + pos.z.rem_euclid(32) * 32) as u64;
    file.seek(SeekFrom::Start(entry))?;

    let mut buf = [0; 4];
    file.read_exact(&mut buf)?;
    Ok((u32::from_be_bytes(buf) >> 8) as u64)
}

fn read_chunk_nbt(mut reader: impl Read) -> Result<ChunkData, LevelError> {
    let (_, root) = nbt::read_named(&mut reader)?;
    let level = root.compound("Level")?;

    let blocks = level.byte_array("Blocks")?.to_vec();
    let block_data = unpack_nibbles(level.byte_array("Data")?);
    let block_light = unpack_nibbles(level.byte_array("BlockLight")?);
    let sky_light = unpack_nibbles(level.byte_array("SkyLight")?);

    for (field, len) in [
        ("Blocks", blocks.len()),
        ("Data", block_data.len()),
        ("BlockLight", block_light.len()),
        ("SkyLight", sky_light.len()),
    ] {
        if len != CHUNK_SIZE {
            return Err(LevelError::BadChunkSize { field, len });
        }
    }

    Ok(ChunkData {
        blocks,
        block_data,
        block_light,
        sky_light,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::level::data::pack_nibbles;
    use crate::nbt::{Compound, Tag};
    use std::io::Write;

    struct TestWorld {
        dir: PathBuf,
    }

    impl TestWorld {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "rustbeta-{}-{}",
                name,
                std::process::id()
            ));
            std::fs::create_dir_all(dir.join("region")).unwrap();
            Self { dir }
        }
    }

    impl Drop for TestWorld {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn chunk_nbt_bytes(blocks: &[u8], data: &[u8], block_light: &[u8], sky_light: &[u8]) -> Vec<u8> {
        let mut level = Compound::new();
        level.insert("Blocks", Tag::ByteArray(blocks.to_vec()));
        level.insert("Data", Tag::ByteArray(pack_nibbles(data)));
        level.insert("BlockLight", Tag::ByteArray(pack_nibbles(block_light)));
        level.insert("SkyLight", Tag::ByteArray(pack_nibbles(sky_light)));
        let mut root = Compound::new();
        root.insert("Level", Tag::Compound(level));

        let mut buf = vec![];
        nbt::write_named(&mut buf, "", &root).unwrap();
        buf
    }

    fn write_region_with_chunk_0_0(path: &PathBuf, payload_nbt: &[u8]) {
        let mut compressed = vec![];
        let mut encoder =
            flate2::write::ZlibEncoder::new(&mut compressed, flate2::Compression::default());
        encoder.write_all(payload_nbt).unwrap();
        encoder.finish().unwrap();

        // Header sector: chunk (0,0) at sector 1, length 1 sector.
        let mut file = vec![0u8; SECTOR_BYTES as usize];
        file[0..4].copy_from_slice(&((1u32 << 8) | 1).to_be_bytes());
        file.extend_from_slice(&((compressed.len() as i32 + 1).to_be_bytes()));
        file.push(COMPRESSION_ZLIB);
        file.extend_from_slice(&compressed);

        std::fs::write(path, file).unwrap();
    }

    fn collect_one(loader: &McRegionLoader, pos: ChunkPos) -> ChunkReadResult {
        let (tx, mut rx) = mpsc::channel(4);
        loader.load_chunks(&[pos], &tx);
        drop(tx);
        rx.blocking_recv().unwrap()
    }

    #[test]
    fn reads_stored_chunk() {
        let world = TestWorld::new("stored");

        let mut blocks = vec![0u8; CHUNK_SIZE];
        blocks[0] = 1; // stone at (0, 0, 0)
        let mut data = vec![0u8; CHUNK_SIZE];
        data[1] = 0x0b;
        let block_light = vec![7u8; CHUNK_SIZE];
        let sky_light = vec![15u8; CHUNK_SIZE];

        let loader = McRegionLoader::new(&world.dir);
        write_region_with_chunk_0_0(
            &loader.region_path(ChunkPos::new(0, 0)),
            &chunk_nbt_bytes(&blocks, &data, &block_light, &sky_light),
        );

        let result = collect_one(&loader, ChunkPos::new(0, 0));
        let chunk = result.data.unwrap();
        assert_eq!(chunk.blocks[0], 1);
        assert_eq!(chunk.block_data[1], 0x0b);
        assert_eq!(chunk.block_light, block_light);
        assert_eq!(chunk.sky_light, sky_light);
    }

    #[test]
    fn missing_region_file_is_air() {
        let world = TestWorld::new("missing-file");
        let loader = McRegionLoader::new(&world.dir);

        let result = collect_one(&loader, ChunkPos::new(40, -3));
        assert_eq!(result.pos, ChunkPos::new(40, -3));
        assert_eq!(result.data.unwrap(), ChunkData::empty());
    }

    #[test]
    fn zero_offset_slot_is_air() {
        let world = TestWorld::new("empty-slot");
        let loader = McRegionLoader::new(&world.dir);
        write_region_with_chunk_0_0(
            &loader.region_path(ChunkPos::new(0, 0)),
            &chunk_nbt_bytes(
                &vec![0u8; CHUNK_SIZE],
                &vec![0u8; CHUNK_SIZE],
                &vec![0u8; CHUNK_SIZE],
                &vec![0u8; CHUNK_SIZE],
            ),
        );

        // (1, 0) has no header entry
        let result = collect_one(&loader, ChunkPos::new(1, 0));
        assert_eq!(result.data.unwrap(), ChunkData::empty());
    }

    #[test]
    fn bad_compression_type_is_an_error() {
        let world = TestWorld::new("bad-compression");
        let loader = McRegionLoader::new(&world.dir);
        let path = loader.region_path(ChunkPos::new(0, 0));

        let mut file = vec![0u8; SECTOR_BYTES as usize];
        file[0..4].copy_from_slice(&((1u32 << 8) | 1).to_be_bytes());
        file.extend_from_slice(&2i32.to_be_bytes());
        file.push(1); // gzip is not valid inside regions
        file.push(0);
        std::fs::write(path, file).unwrap();

        let result = collect_one(&loader, ChunkPos::new(0, 0));
        assert!(matches!(
            result.data,
            Err(LevelError::UnsupportedCompression(1))
        ));
    }

    #[test]
    fn reads_level_dat() {
        let world = TestWorld::new("level-dat");

        let mut data = Compound::new();
        data.insert("RandomSeed", Tag::Long(12345));
        data.insert("SpawnX", Tag::Int(8));
        data.insert("SpawnY", Tag::Int(64));
        data.insert("SpawnZ", Tag::Int(-8));
        data.insert("LevelName", Tag::String("world".into()));
        let mut root = Compound::new();
        root.insert("Data", Tag::Compound(data));

        let mut nbt_bytes = vec![];
        nbt::write_named(&mut nbt_bytes, "", &root).unwrap();

        let file = File::create(world.dir.join("level.dat")).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(&nbt_bytes).unwrap();
        encoder.finish().unwrap();

        let info = McRegionLoader::new(&world.dir).read_world_info().unwrap();
        assert_eq!(
            info,
            WorldInfo {
                biome_seed: 12345,
                spawn_x: 8,
                spawn_y: 64,
                spawn_z: -8,
            }
        );
    }
}
