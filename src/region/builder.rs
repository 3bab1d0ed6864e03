use std::collections::{HashMap, HashSet};

use log::debug;
use quartz_nbt::{NbtCompound, NbtList};

use crate::err::OozeError;
use crate::region::legacy;
use crate::region::loader::ChunkSource;
use crate::storage::{
    BitCompactIntArray, BlockPalette, IntArray, NibbleArray, UpgradeRecorder, WordedIntArray,
};
use crate::world::{
    append_compounds, BlockState, Chunk, ChunkSection, Level, Location2D, SECTION_BLOCKS,
};

// The data version when sections began using palettes instead of absolute
// block IDs.
const PALETTE_ADDED_DATA_VERSION: i32 = 1451;

// The data version when values in the "BlockStates" array could no longer be
// stored across multiple longs.
const BLOCKS_PADDED_DATA_VERSION: i32 = 2527;

// Chunks read from vanilla region files only carry sections in this band.
const SECTIONS_PER_CHUNK: i32 = 16;

/// Constructs a [`Level`] by pulling chunks one at a time out of a
/// [`ChunkSource`], converting each from its region NBT form.
pub struct LevelBuilder<S: ChunkSource> {
    source: S,
    chunks_to_load: HashSet<Location2D>,
}

impl<S: ChunkSource> LevelBuilder<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            chunks_to_load: HashSet::new(),
        }
    }

    /// Requests the chunk at the given chunk coordinates, if it exists in the
    /// source.
    pub fn add_chunk(mut self, chunk_x: i32, chunk_z: i32) -> Self {
        self.chunks_to_load.insert(Location2D::new(chunk_x, chunk_z));
        self
    }

    /// Requests every existing chunk in a `width * depth` rectangle whose
    /// lowest corner is `(min_chunk_x, min_chunk_z)`.
    pub fn add_rect(mut self, min_chunk_x: i32, min_chunk_z: i32, width: i32, depth: i32) -> Self {
        for chunk_x in min_chunk_x..min_chunk_x + width {
            for chunk_z in min_chunk_z..min_chunk_z + depth {
                self.chunks_to_load.insert(Location2D::new(chunk_x, chunk_z));
            }
        }
        self
    }

    /// Compiles every requested chunk into a single level. Chunks absent from
    /// the source are skipped; corrupted chunk data is an error.
    pub fn build(self) -> Result<Level, OozeError> {
        let Self {
            mut source,
            chunks_to_load,
        } = self;

        let mut level = Level::new();
        for location in chunks_to_load {
            let Some(chunk_data) = source.load_chunk(location)? else {
                debug!("chunk {location} has no data, skipping");
                continue;
            };

            let mut chunk = create_chunk(&chunk_data)?;

            // The container format keeps entities level-wide; fold the
            // chunk's lists into the level before storing it.
            let entities = std::mem::replace(chunk.entities_mut(), NbtList::new());
            append_compounds(level.entities_mut(), &entities);
            let block_entities = std::mem::replace(chunk.block_entities_mut(), NbtList::new());
            append_compounds(level.block_entities_mut(), &block_entities);

            level.store_chunk(chunk)?;
        }
        Ok(level)
    }
}

/// Constructs a chunk from its serialized region NBT form.
fn create_chunk(data: &NbtCompound) -> Result<Chunk, OozeError> {
    // Version of the game the chunk was last saved in; ancient chunks
    // predate the field entirely.
    let data_version = data.get::<_, i32>("DataVersion").unwrap_or(99);

    let level_data = data
        .get::<_, &NbtCompound>("Level")
        .map_err(|_| OozeError::MissingChunkField("Level"))?;

    let x_pos = level_data
        .get::<_, i32>("xPos")
        .map_err(|_| OozeError::MissingChunkField("xPos"))?;
    let z_pos = level_data
        .get::<_, i32>("zPos")
        .map_err(|_| OozeError::MissingChunkField("zPos"))?;

    let mut chunk = Chunk::new(Location2D::new(x_pos, z_pos), data_version);

    if let Ok(sections) = level_data.get::<_, &NbtList>("Sections") {
        for index in 0..sections.len() {
            let Ok(section_data) = sections.get::<&NbtCompound>(index) else {
                continue;
            };

            // Vanilla stores the altitude as a byte; be lenient about ints.
            let altitude = match section_data.get::<_, i8>("Y") {
                Ok(value) => value as i32,
                Err(_) => section_data
                    .get::<_, i32>("Y")
                    .map_err(|_| OozeError::MissingChunkField("Y"))?,
            };

            // Ignore sections at invalid heights.
            if (0..SECTIONS_PER_CHUNK).contains(&altitude) {
                if let Some(section) = create_chunk_section(section_data, data_version)? {
                    chunk.set_section(altitude, section)?;
                }
            }
        }
    }

    if let Ok(entities) = level_data.get::<_, &NbtList>("Entities") {
        append_compounds(chunk.entities_mut(), entities);
    }
    if let Ok(block_entities) = level_data.get::<_, &NbtList>("TileEntities") {
        append_compounds(chunk.block_entities_mut(), block_entities);
    }

    Ok(chunk)
}

/// Constructs a chunk section from its serialized NBT form, or `None` when
/// the data represents an empty section.
fn create_chunk_section(
    data: &NbtCompound,
    data_version: i32,
) -> Result<Option<ChunkSection>, OozeError> {
    if data_version <= PALETTE_ADDED_DATA_VERSION {
        // Pre-1.13 sections use absolute block IDs instead of a palette.
        return create_legacy_section(data);
    }

    // Sections without both fields are empty.
    let Ok(palette_data) = data.get::<_, &NbtList>("Palette") else {
        return Ok(None);
    };
    let Ok(block_states) = data.get::<_, &[i64]>("BlockStates") else {
        return Ok(None);
    };

    let palette = create_palette(palette_data)?;
    let words: Vec<u64> = block_states.iter().map(|&word| word as u64).collect();
    let storage = WordedIntArray::from_raw(
        words,
        SECTION_BLOCKS,
        (palette.len() - 1) as u32,
        data_version < BLOCKS_PADDED_DATA_VERSION,
    )?;
    Ok(Some(ChunkSection::new(palette, storage)?))
}

/// Reads a section in the pre-flattening layout: 8-bit block IDs in
/// `Blocks`, an optional 4-bit `Add` overflow, and an optional 4-bit `Data`
/// nibble per block. Every composed `(id, data)` pair is translated through
/// the legacy table into a palette of modern states.
fn create_legacy_section(data: &NbtCompound) -> Result<Option<ChunkSection>, OozeError> {
    let Ok(raw_blocks) = data.get::<_, &[i8]>("Blocks") else {
        // The section stores no blocks at all.
        return Ok(None);
    };
    let raw_overflow = data.get::<_, &[i8]>("Add").ok();
    let raw_data = data.get::<_, &[i8]>("Data").ok();

    if raw_blocks.len() != SECTION_BLOCKS
        || raw_overflow.is_some_and(|bytes| bytes.len() != SECTION_BLOCKS / 2)
        || raw_data.is_some_and(|bytes| bytes.len() != SECTION_BLOCKS / 2)
    {
        return Err(OozeError::Corrupt(
            "chunk contains corrupted block data".into(),
        ));
    }

    let overflow = raw_overflow
        .map(|bytes| NibbleArray::from_bytes(to_unsigned(bytes), SECTION_BLOCKS))
        .transpose()?;
    let state_data = raw_data
        .map(|bytes| NibbleArray::from_bytes(to_unsigned(bytes), SECTION_BLOCKS))
        .transpose()?;

    let mut palette = BlockPalette::new();
    let mut recorder = UpgradeRecorder::new();
    let mut key_to_id: HashMap<u16, u32> = HashMap::new();

    // Record each block's composed legacy key, then swap the keys for
    // palette IDs in one pass.
    let mut storage = BitCompactIntArray::new(SECTION_BLOCKS, u16::MAX as u32);
    for index in 0..raw_blocks.len() {
        let mut block_id = raw_blocks[index] as u8 as u16;
        if let Some(overflow) = &overflow {
            block_id |= (overflow.get(index)? as u16) << 8;
        }
        let block_data = match &state_data {
            Some(nibbles) => nibbles.get(index)? as u8,
            None => 0,
        };

        let key = (block_id << 4) | (block_data as u16 & 0xF);
        storage.set(index, key as u32)?;

        if !key_to_id.contains_key(&key) {
            let state = legacy::block_state_from_legacy(block_id, block_data);
            let state_id = palette.add_state(state.clone());
            recorder.register_change(key as u32, state_id);
            key_to_id.insert(key, state_id);
        }
    }

    // Apply the legacy-key -> palette-ID change, then drop the unneeded
    // 16-bit range.
    recorder.lock().upgrade_array(&mut storage)?;
    storage.set_max_value((palette.len() - 1) as u32)?;

    Ok(Some(ChunkSection::new(palette, storage)?))
}

/// Constructs a block palette from its serialized NBT form. The first entry
/// becomes the palette's default state.
fn create_palette(data: &NbtList) -> Result<BlockPalette, OozeError> {
    let mut palette: Option<BlockPalette> = None;
    for index in 0..data.len() {
        let element = data.get::<&NbtCompound>(index).map_err(|_| {
            OozeError::Corrupt("block palette entries must be compounds".into())
        })?;
        let state = BlockState::from_nbt(element)?;

        match &mut palette {
            None => palette = Some(BlockPalette::with_default(state)),
            Some(palette) => {
                palette.add_state(state);
            }
        }
    }
    Ok(palette.unwrap_or_default())
}

fn to_unsigned(bytes: &[i8]) -> Vec<u8> {
    bytes.iter().map(|&byte| byte as u8).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use quartz_nbt::NbtTag;

    // A chunk source backed by a plain map, standing in for region files.
    struct MapSource {
        chunks: HashMap<Location2D, NbtCompound>,
    }

    impl ChunkSource for MapSource {
        fn load_chunk(&mut self, location: Location2D) -> Result<Option<NbtCompound>, OozeError> {
            Ok(self.chunks.get(&location).cloned())
        }
    }

    fn wrap_chunk(
        x_pos: i32,
        z_pos: i32,
        data_version: i32,
        sections: NbtList,
    ) -> NbtCompound {
        let mut level = NbtCompound::new();
        level.insert("xPos", x_pos);
        level.insert("zPos", z_pos);
        level.insert("Sections", sections);

        let mut root = NbtCompound::new();
        root.insert("DataVersion", data_version);
        root.insert("Level", level);
        root
    }

    fn legacy_stone_section(altitude: i8) -> NbtCompound {
        let mut section = NbtCompound::new();
        section.insert("Y", altitude);
        section.insert("Blocks", NbtTag::ByteArray(vec![1i8; SECTION_BLOCKS]));
        section
    }

    fn modern_stone_section(altitude: i8) -> NbtCompound {
        let mut palette = NbtList::new();
        let mut air = NbtCompound::new();
        air.insert("Name", "minecraft:air");
        palette.push(NbtTag::Compound(air));
        let mut stone = NbtCompound::new();
        stone.insert("Name", "minecraft:stone");
        palette.push(NbtTag::Compound(stone));

        // Every cell set to palette ID 1 at the modern 4-bit width.
        let mut storage = WordedIntArray::new(SECTION_BLOCKS, 1);
        for index in 0..SECTION_BLOCKS {
            storage.set(index, 1).unwrap();
        }

        let mut section = NbtCompound::new();
        section.insert("Y", altitude);
        section.insert("Palette", palette);
        section.insert(
            "BlockStates",
            NbtTag::LongArray(
                storage
                    .to_raw(false)
                    .into_iter()
                    .map(|word| word as i64)
                    .collect(),
            ),
        );
        section
    }

    fn build_single(chunk: NbtCompound, location: Location2D) -> Level {
        let mut chunks = HashMap::new();
        chunks.insert(location, chunk);
        LevelBuilder::new(MapSource { chunks })
            .add_chunk(location.x, location.z)
            .build()
            .unwrap()
    }

    #[test]
    fn test_legacy_section_decodes_to_stone() {
        let mut sections = NbtList::new();
        sections.push(NbtTag::Compound(legacy_stone_section(0)));
        let level = build_single(wrap_chunk(0, 0, 1343, sections), Location2D::new(0, 0));

        let chunk = level.chunk_at(0, 0).unwrap();
        for (x, y, z) in [(0, 0, 0), (15, 15, 15), (7, 3, 12)] {
            assert_eq!(
                chunk.block_at(x, y, z).unwrap().name().to_string(),
                "minecraft:stone"
            );
        }
    }

    #[test]
    fn test_legacy_section_reads_data_nibbles() {
        // Granite is stone with data value 1.
        let mut section = legacy_stone_section(0);
        section.insert(
            "Data",
            NbtTag::ByteArray(vec![0b0001_0001i8; SECTION_BLOCKS / 2]),
        );
        let mut sections = NbtList::new();
        sections.push(NbtTag::Compound(section));

        let level = build_single(wrap_chunk(0, 0, 1343, sections), Location2D::new(0, 0));
        let chunk = level.chunk_at(0, 0).unwrap();
        assert_eq!(
            chunk.block_at(3, 8, 3).unwrap().name().to_string(),
            "minecraft:granite"
        );
    }

    #[test]
    fn test_modern_section_decodes_to_stone() {
        let mut sections = NbtList::new();
        sections.push(NbtTag::Compound(modern_stone_section(1)));
        let level = build_single(wrap_chunk(2, -1, 2230, sections), Location2D::new(2, -1));

        let chunk = level.chunk_at(2, -1).unwrap();
        assert_eq!(
            chunk.block_at(5, 20, 5).unwrap().name().to_string(),
            "minecraft:stone"
        );
        // Below the resident section everything is air.
        assert!(chunk.block_at(5, 0, 5).unwrap().is_air());
    }

    #[test]
    fn test_sections_outside_vanilla_band_are_ignored() {
        let mut sections = NbtList::new();
        sections.push(NbtTag::Compound(modern_stone_section(17)));
        let level = build_single(wrap_chunk(0, 0, 2230, sections), Location2D::new(0, 0));
        assert!(level.chunk_at(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_missing_position_fails() {
        let mut level_data = NbtCompound::new();
        level_data.insert("xPos", 0);
        let mut root = NbtCompound::new();
        root.insert("DataVersion", 2230);
        root.insert("Level", level_data);

        let mut chunks = HashMap::new();
        chunks.insert(Location2D::new(0, 0), root);
        let result = LevelBuilder::new(MapSource { chunks }).add_chunk(0, 0).build();
        assert!(matches!(result, Err(OozeError::MissingChunkField("zPos"))));
    }

    #[test]
    fn test_absent_chunks_are_skipped() {
        let level = LevelBuilder::new(MapSource {
            chunks: HashMap::new(),
        })
        .add_rect(0, 0, 3, 3)
        .build()
        .unwrap();
        assert_eq!(level.chunk_count(), 0);
    }

    #[test]
    fn test_entities_fold_into_the_level() {
        let mut entity = NbtCompound::new();
        let mut pos = NbtList::new();
        pos.push(NbtTag::Double(8.0));
        pos.push(NbtTag::Double(64.0));
        pos.push(NbtTag::Double(8.0));
        entity.insert("Pos", pos);
        let mut entities = NbtList::new();
        entities.push(NbtTag::Compound(entity));

        let mut sections = NbtList::new();
        sections.push(NbtTag::Compound(legacy_stone_section(0)));
        let mut chunk = wrap_chunk(0, 0, 1343, sections);
        // Reach into the Level compound to add the entity list.
        let mut level_data: NbtCompound =
            chunk.get::<_, &NbtCompound>("Level").unwrap().clone();
        level_data.insert("Entities", entities);
        chunk.insert("Level", level_data);

        let level = build_single(chunk, Location2D::new(0, 0));
        assert_eq!(level.entities().len(), 1);
        assert_eq!(level.entities_in(Location2D::new(0, 0)).len(), 1);
        assert!(level.chunk_at(0, 0).unwrap().entities().is_empty());
    }
}
