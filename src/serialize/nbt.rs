//! Conversion between the in-memory model and the NBT structures Minecraft
//! itself writes into region files. This is the export half of the region
//! pipeline: a decoded level can be handed back to the game chunk by chunk.

use quartz_nbt::{NbtCompound, NbtList, NbtTag};

use crate::err::OozeError;
use crate::storage::{BitCompactIntArray, BlockPalette, WordedIntArray};
use crate::world::{BlockState, Chunk, ChunkSection, Level, Location2D, SECTION_BLOCKS};

// - PALETTE_ADDED is the data version when sections began using palettes
//   instead of absolute block IDs.
// - BLOCKS_PADDED is the data version when values in the "BlockStates" array
//   could no longer be stored across multiple longs.
const DATA_VERSION_PALETTE_ADDED: i32 = 1451;
const DATA_VERSION_BLOCKS_PADDED: i32 = 2527;

// NBT tag names used by Minecraft.
const TAG_DATA_VERSION: &str = "DataVersion";
const TAG_CHUNK: &str = "Level";
const TAG_SECTIONS: &str = "Sections";
const TAG_CHUNK_X: &str = "xPos";
const TAG_CHUNK_Z: &str = "zPos";
const TAG_ENTITIES: &str = "Entities";
const TAG_BLOCK_ENTITIES: &str = "TileEntities";
const TAG_ALTITUDE: &str = "Y";
const TAG_PALETTE: &str = "Palette";
const TAG_BLOCK_STATES: &str = "BlockStates";

/// A two-way function between an in-memory value and its NBT form.
pub trait Codec {
    type Value;
    type Encoded;

    fn encode(&self, value: &Self::Value) -> Result<Self::Encoded, OozeError>;

    fn decode(&self, encoded: &Self::Encoded) -> Result<Self::Value, OozeError>;
}

/// NBT serialization for block states, the `{Name, Properties?}` compounds
/// the game stores in section palettes.
#[derive(Debug, Default)]
pub struct BlockStateCodec;

impl Codec for BlockStateCodec {
    type Value = BlockState;
    type Encoded = NbtCompound;

    fn encode(&self, value: &BlockState) -> Result<NbtCompound, OozeError> {
        Ok(value.to_nbt())
    }

    fn decode(&self, encoded: &NbtCompound) -> Result<BlockState, OozeError> {
        BlockState::from_nbt(encoded)
    }
}

/// NBT serialization for block palettes: a list of state compounds whose
/// first entry is the palette's default.
#[derive(Debug, Default)]
pub struct BlockPaletteCodec {
    state_codec: BlockStateCodec,
}

impl Codec for BlockPaletteCodec {
    type Value = BlockPalette;
    type Encoded = NbtList;

    fn encode(&self, value: &BlockPalette) -> Result<NbtList, OozeError> {
        let mut encoded = NbtList::new();
        for state in value.iter() {
            encoded.push(NbtTag::Compound(self.state_codec.encode(state)?));
        }
        Ok(encoded)
    }

    fn decode(&self, encoded: &NbtList) -> Result<BlockPalette, OozeError> {
        let mut palette: Option<BlockPalette> = None;
        for index in 0..encoded.len() {
            let element = encoded.get::<&NbtCompound>(index).map_err(|_| {
                OozeError::Corrupt("block palette entries must be compounds".into())
            })?;
            let state = self.state_codec.decode(element)?;

            // The first element is always the default state for the palette.
            match &mut palette {
                None => palette = Some(BlockPalette::with_default(state)),
                Some(palette) => {
                    palette.add_state(state);
                }
            }
        }
        Ok(palette.unwrap_or_default())
    }
}

/// NBT serialization for one 16x16x16 section, targeting a specific game
/// data version. Only paletted versions can be produced; pre-flattening
/// sections are read through the region importer, never written.
#[derive(Debug)]
pub struct ChunkSectionCodec {
    data_version: i32,
    use_palettes: bool,
    worded_block_states: bool,
    palette_codec: BlockPaletteCodec,
}

impl ChunkSectionCodec {
    pub fn new(data_version: i32) -> Self {
        Self {
            data_version,
            use_palettes: data_version >= DATA_VERSION_PALETTE_ADDED,
            worded_block_states: data_version >= DATA_VERSION_BLOCKS_PADDED,
            palette_codec: BlockPaletteCodec::default(),
        }
    }
}

impl Codec for ChunkSectionCodec {
    type Value = (i32, ChunkSection);
    type Encoded = NbtCompound;

    fn encode(&self, value: &(i32, ChunkSection)) -> Result<NbtCompound, OozeError> {
        let (altitude, section) = value;
        if !self.use_palettes {
            return Err(OozeError::UnsupportedSectionVersion(self.data_version));
        }
        if *altitude < i8::MIN as i32 || *altitude > i8::MAX as i32 {
            return Err(OozeError::AltitudeOutOfRange(*altitude));
        }

        // Localize the section: separate its palette from the chunk-wide one
        // so the encoded palette and storage only carry states this section
        // actually uses.
        let mut localized_storage = BitCompactIntArray::from_int_array(section.storage());
        let localized_palette = section.palette().extract(&mut localized_storage)?;
        // Clamp the storage's range to the localized palette, so the cell
        // width the decoder derives from the palette matches the data.
        localized_storage.set_max_value((localized_palette.len() - 1) as u32)?;
        let worded_storage = WordedIntArray::from_int_array(&localized_storage);

        let mut encoded = NbtCompound::new();
        encoded.insert(TAG_ALTITUDE, *altitude as i8);
        encoded.insert(
            TAG_PALETTE,
            self.palette_codec.encode(&localized_palette)?,
        );
        encoded.insert(
            TAG_BLOCK_STATES,
            NbtTag::LongArray(
                worded_storage
                    .to_raw(!self.worded_block_states)
                    .into_iter()
                    .map(|word| word as i64)
                    .collect(),
            ),
        );
        Ok(encoded)
    }

    fn decode(&self, encoded: &NbtCompound) -> Result<(i32, ChunkSection), OozeError> {
        if !self.use_palettes {
            return Err(OozeError::UnsupportedSectionVersion(self.data_version));
        }

        let altitude = match encoded.get::<_, i8>(TAG_ALTITUDE) {
            Ok(value) => value as i32,
            Err(_) => encoded
                .get::<_, i32>(TAG_ALTITUDE)
                .map_err(|_| OozeError::MissingChunkField("Y"))?,
        };

        // Sections missing either container are empty.
        let (Ok(palette_data), Ok(block_states)) = (
            encoded.get::<_, &NbtList>(TAG_PALETTE),
            encoded.get::<_, &[i64]>(TAG_BLOCK_STATES),
        ) else {
            return Ok((altitude, ChunkSection::new_empty()));
        };

        let palette = self.palette_codec.decode(palette_data)?;
        let words: Vec<u64> = block_states.iter().map(|&word| word as u64).collect();
        let storage = WordedIntArray::from_raw(
            words,
            SECTION_BLOCKS,
            (palette.len() - 1) as u32,
            !self.worded_block_states,
        )?;
        Ok((altitude, ChunkSection::new(palette, storage)?))
    }
}

/// NBT serialization for whole chunks in the game's own layout: a root
/// compound holding the data version and a `Level` compound with position,
/// sections, entities and block entities.
///
/// Entities live level-wide in this crate's model, so encoding pulls a
/// chunk's entities out of the surrounding [`Level`], and decoding pushes
/// them back into it.
#[derive(Debug, Default)]
pub struct ChunkCodec;

impl ChunkCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, level: &Level, chunk: &Chunk) -> Result<NbtCompound, OozeError> {
        let data_version = chunk.data_version();
        let location = chunk.location();
        let section_codec = ChunkSectionCodec::new(data_version);

        let mut sections = NbtList::new();
        for (altitude, section) in chunk.sections_for_export() {
            sections.push(NbtTag::Compound(
                section_codec.encode(&(altitude, section))?,
            ));
        }

        let mut chunk_tag = NbtCompound::new();
        chunk_tag.insert(TAG_CHUNK_X, location.x);
        chunk_tag.insert(TAG_CHUNK_Z, location.z);
        chunk_tag.insert(TAG_SECTIONS, sections);
        chunk_tag.insert(TAG_ENTITIES, level.entities_in(location));
        chunk_tag.insert(TAG_BLOCK_ENTITIES, level.block_entities_in(location));
        // "light" makes the game redo lighting and heightmaps when it loads
        // the chunk.
        chunk_tag.insert("Status", "light");

        let mut root = NbtCompound::new();
        root.insert(TAG_DATA_VERSION, data_version);
        root.insert(TAG_CHUNK, chunk_tag);
        Ok(root)
    }

    pub fn decode(&self, level: &mut Level, root: &NbtCompound) -> Result<Chunk, OozeError> {
        let data_version = root.get::<_, i32>(TAG_DATA_VERSION).unwrap_or(99);
        let encoded = root
            .get::<_, &NbtCompound>(TAG_CHUNK)
            .map_err(|_| OozeError::MissingChunkField("Level"))?;

        let chunk_x = encoded
            .get::<_, i32>(TAG_CHUNK_X)
            .map_err(|_| OozeError::MissingChunkField("xPos"))?;
        let chunk_z = encoded
            .get::<_, i32>(TAG_CHUNK_Z)
            .map_err(|_| OozeError::MissingChunkField("zPos"))?;
        let location = Location2D::new(chunk_x, chunk_z);

        let mut chunk = Chunk::new(location, data_version);
        if let Ok(sections) = encoded.get::<_, &NbtList>(TAG_SECTIONS) {
            let section_codec = ChunkSectionCodec::new(data_version);
            for index in 0..sections.len() {
                let section_data = sections.get::<&NbtCompound>(index).map_err(|_| {
                    OozeError::Corrupt("chunk sections must be compounds".into())
                })?;
                let (altitude, section) = section_codec.decode(section_data)?;

                // Skip sections that cannot hold anything but default air.
                let palette = section.palette();
                let keep = palette.len() > 1
                    || !palette.default_state().is_air();
                if keep {
                    chunk.set_section(altitude, section)?;
                }
            }
        }

        // Hand the chunk's entities over to the level.
        if let Ok(entities) = encoded.get::<_, &NbtList>(TAG_ENTITIES) {
            level.set_entities(location, entities.clone())?;
        }
        if let Ok(block_entities) = encoded.get::<_, &NbtList>(TAG_BLOCK_ENTITIES) {
            level.set_block_entities(location, block_entities.clone())?;
        }

        Ok(chunk)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resource::ResourceLocation;
    use crate::storage::IntArray;

    fn state(name: &str) -> BlockState {
        BlockState::new(ResourceLocation::minecraft(name).unwrap())
    }

    #[test]
    fn test_block_state_codec_round_trip() {
        let codec = BlockStateCodec;
        let mut properties = NbtCompound::new();
        properties.insert("half", "top");
        let original = BlockState::with_properties(
            ResourceLocation::minecraft("oak_slab").unwrap(),
            Some(properties),
        );

        let encoded = codec.encode(&original).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), original);
    }

    #[test]
    fn test_palette_codec_keeps_order_and_default() {
        let codec = BlockPaletteCodec::default();
        let mut palette = BlockPalette::new();
        palette.add_state(state("stone"));
        palette.add_state(state("dirt"));

        let encoded = codec.encode(&palette).unwrap();
        assert_eq!(encoded.len(), 3);
        let decoded = codec.decode(&encoded).unwrap();
        assert!(decoded.default_state().is_air());
        assert_eq!(decoded.state_id(&state("stone")), Some(1));
        assert_eq!(decoded.state_id(&state("dirt")), Some(2));
    }

    #[test]
    fn test_section_codec_round_trip() {
        for data_version in [1519, 2860] {
            let codec = ChunkSectionCodec::new(data_version);

            let mut section = ChunkSection::new_empty();
            for x in 0..16 {
                for z in 0..16 {
                    section.set_block_at(x, 9, z, state("stone")).unwrap();
                }
            }
            section.set_block_at(0, 0, 0, state("gravel")).unwrap();

            let encoded = codec.encode(&(4, section)).unwrap();
            let (altitude, decoded) = codec.decode(&encoded).unwrap();
            assert_eq!(altitude, 4);
            assert_eq!(decoded.block_at(5, 9, 5).unwrap(), &state("stone"));
            assert_eq!(decoded.block_at(0, 0, 0).unwrap(), &state("gravel"));
            assert_eq!(decoded.block_at(0, 1, 0).unwrap(), &state("air"));
        }
    }

    #[test]
    fn test_section_codec_localizes_the_palette() {
        // A section inserted into a chunk shares the chunk-wide palette;
        // encoding must strip the entries it never references.
        let codec = ChunkSectionCodec::new(2230);

        let mut bloated = BlockPalette::new();
        bloated.add_state(state("stone"));
        bloated.add_state(state("dirt"));
        bloated.add_state(state("gravel"));
        let mut storage = BitCompactIntArray::new(SECTION_BLOCKS, 3);
        for index in 0..SECTION_BLOCKS {
            storage.set(index, 2).unwrap(); // dirt everywhere
        }
        let section = ChunkSection::new(bloated, storage).unwrap();

        let encoded = codec.encode(&(0, section)).unwrap();
        let palette_tag = encoded.get::<_, &NbtList>(TAG_PALETTE).unwrap();
        // Only air (the default) and dirt survive.
        assert_eq!(palette_tag.len(), 2);
    }

    #[test]
    fn test_section_codec_survives_wide_chunk_palettes() {
        // A section that only uses high IDs out of a palette wider than 16
        // entries must still decode at the narrower localized width.
        let codec = ChunkSectionCodec::new(2860);

        let mut palette = BlockPalette::new();
        for index in 0..20 {
            palette.add_state(state(&format!("block_{index}")));
        }
        let mut storage = BitCompactIntArray::new(SECTION_BLOCKS, 20);
        for index in 0..SECTION_BLOCKS {
            storage.set(index, 17).unwrap();
        }
        let section = ChunkSection::new(palette, storage).unwrap();

        let encoded = codec.encode(&(0, section)).unwrap();
        let (_, decoded) = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.block_at(9, 9, 9).unwrap(), &state("block_16"));
    }

    #[test]
    fn test_section_codec_rejects_legacy_versions() {
        let codec = ChunkSectionCodec::new(99);
        assert!(matches!(
            codec.encode(&(0, ChunkSection::new_empty())),
            Err(OozeError::UnsupportedSectionVersion(99))
        ));
    }

    #[test]
    fn test_section_codec_rejects_wide_altitudes() {
        let codec = ChunkSectionCodec::new(2230);
        assert!(matches!(
            codec.encode(&(400, ChunkSection::new_empty())),
            Err(OozeError::AltitudeOutOfRange(400))
        ));
    }

    #[test]
    fn test_chunk_codec_round_trip_with_entities() {
        let mut section = ChunkSection::new_empty();
        section.set_block_at(8, 8, 8, state("diamond_block")).unwrap();
        let mut chunk = Chunk::new(Location2D::new(3, -2), 2230);
        chunk.set_section(5, section).unwrap();

        let mut level = Level::new();
        let mut entity = NbtCompound::new();
        let mut pos = NbtList::new();
        pos.push(NbtTag::Double(3.0 * 16.0 + 1.0));
        pos.push(NbtTag::Double(90.0));
        pos.push(NbtTag::Double(-2.0 * 16.0 + 1.0));
        entity.insert("Pos", pos);
        level.entities_mut().push(NbtTag::Compound(entity));

        let codec = ChunkCodec::new();
        let encoded = codec.encode(&level, &chunk).unwrap();
        assert_eq!(
            encoded.get::<_, i32>(TAG_DATA_VERSION).unwrap(),
            2230
        );

        let mut target = Level::new();
        let decoded = codec.decode(&mut target, &encoded).unwrap();
        assert_eq!(decoded.location(), Location2D::new(3, -2));
        assert_eq!(
            decoded.block_at(8, 88, 8).unwrap(),
            &state("diamond_block")
        );
        assert_eq!(target.entities_in(Location2D::new(3, -2)).len(), 1);
    }

    #[test]
    fn test_chunk_codec_output_is_importable() {
        // A chunk exported to vanilla NBT must round-trip through the region
        // chunk importer as well.
        let mut section = ChunkSection::new_empty();
        for x in 0..16 {
            for z in 0..16 {
                section.set_block_at(x, 0, z, state("bedrock")).unwrap();
            }
        }
        let mut chunk = Chunk::new(Location2D::new(0, 0), 2230);
        chunk.set_section(0, section).unwrap();
        let level = Level::new();

        let encoded = ChunkCodec::new().encode(&level, &chunk).unwrap();
        let sections = encoded
            .get::<_, &NbtCompound>(TAG_CHUNK)
            .unwrap()
            .get::<_, &NbtList>(TAG_SECTIONS)
            .unwrap();
        assert_eq!(sections.len(), 1);
        let section_tag = sections.get::<&NbtCompound>(0).unwrap();
        assert!(section_tag.get::<_, &NbtList>(TAG_PALETTE).is_ok());
        assert!(section_tag.get::<_, &[i64]>(TAG_BLOCK_STATES).is_ok());
        assert_eq!(section_tag.get::<_, i8>(TAG_ALTITUDE).unwrap(), 0);
    }
}
