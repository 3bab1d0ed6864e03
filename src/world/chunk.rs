use std::collections::BTreeMap;
use std::io::Write;

use quartz_nbt::NbtList;

use crate::err::OozeError;
use crate::serialize::{BitSet, OozeDataWriter, OozeSerialize, VarInt};
use crate::storage::{BitCompactIntArray, BlockPalette, IntArray, PaletteUpgrader};
use crate::world::{block_index, BlockState, ChunkSection, Location2D, SECTION_EDGE};

// A section's storage after insertion. Sections are immutable once resident,
// so emptiness is computed a single time against the chunk palette.
#[derive(Debug)]
struct StoredSection {
    storage: BitCompactIntArray,
    empty: bool,
}

/// A 16x16 column of sections sharing one palette, addressed by a
/// [`Location2D`] in chunk units.
#[derive(Debug)]
pub struct Chunk {
    location: Location2D,

    // Version of the game the chunk was last saved in.
    data_version: i32,

    palette: BlockPalette,

    // Resident sections keyed by altitude, in units of 16 blocks.
    sections: BTreeMap<i32, StoredSection>,

    // Serialized data for any entities in the chunk.
    entities: NbtList,

    // Serialized data for any block entities in the chunk.
    block_entities: NbtList,
}

impl Chunk {
    pub fn new(location: Location2D, data_version: i32) -> Self {
        Self {
            location,
            data_version,
            palette: BlockPalette::new(),
            sections: BTreeMap::new(),
            entities: NbtList::new(),
            block_entities: NbtList::new(),
        }
    }

    pub fn location(&self) -> Location2D {
        self.location
    }

    pub fn data_version(&self) -> i32 {
        self.data_version
    }

    pub fn palette(&self) -> &BlockPalette {
        &self.palette
    }

    pub fn entities(&self) -> &NbtList {
        &self.entities
    }

    pub fn block_entities(&self) -> &NbtList {
        &self.block_entities
    }

    pub(crate) fn entities_mut(&mut self) -> &mut NbtList {
        &mut self.entities
    }

    pub(crate) fn block_entities_mut(&mut self) -> &mut NbtList {
        &mut self.block_entities
    }

    /// The altitude of the lowest resident section, in units of 16 blocks.
    pub fn min_altitude(&self) -> Option<i32> {
        self.sections.keys().next().copied()
    }

    pub fn max_altitude(&self) -> Option<i32> {
        self.sections.keys().next_back().copied()
    }

    /// The chunk's vertical extent in blocks, spanning from the lowest
    /// resident section to the highest. Zero when no section is resident.
    pub fn height(&self) -> i32 {
        match (self.min_altitude(), self.max_altitude()) {
            (Some(min), Some(max)) => SECTION_EDGE as i32 * (max - min + 1),
            _ => 0,
        }
    }

    /// Stores the block data for a 16x16x16 region of the chunk. The
    /// section's palette is merged into the chunk-wide palette and its
    /// storage rewritten accordingly.
    pub fn set_section(&mut self, altitude: i32, section: ChunkSection) -> Result<(), OozeError> {
        if self.sections.contains_key(&altitude) {
            return Err(OozeError::DuplicateAltitude(altitude));
        }

        let mut storage = BitCompactIntArray::from_int_array(section.storage());
        let upgrader = self.palette.add_all(section.palette());
        upgrader.upgrade_array(&mut storage)?;
        self.insert_storage(altitude, storage)
    }

    /// Inserts storage whose IDs already reference the chunk palette. Used by
    /// the decoder, which remaps IDs before insertion.
    pub(crate) fn insert_storage(
        &mut self,
        altitude: i32,
        storage: BitCompactIntArray,
    ) -> Result<(), OozeError> {
        if self.sections.contains_key(&altitude) {
            return Err(OozeError::DuplicateAltitude(altitude));
        }
        let empty = self.is_storage_empty(&storage);
        self.sections.insert(altitude, StoredSection { storage, empty });
        Ok(())
    }

    /// Merges another palette into the chunk's, returning the translation
    /// for data tied to `other`.
    pub(crate) fn merge_palette(&mut self, other: &BlockPalette) -> PaletteUpgrader {
        self.palette.add_all(other)
    }

    fn is_storage_empty(&self, storage: &BitCompactIntArray) -> bool {
        (0..storage.len()).all(|index| {
            let state_id = storage.get(index).unwrap();
            self.palette
                .get_state(state_id)
                .unwrap_or_else(|| BlockState::default_state())
                .is_air()
        })
    }

    /// The block at chunk-local `x`/`z` and absolute `y`. Blocks outside any
    /// resident section resolve to the default state.
    pub fn block_at(&self, x: i32, y: i32, z: i32) -> Result<&BlockState, OozeError> {
        let edge = SECTION_EDGE as i32;
        if x < 0 || x >= edge || z < 0 || z >= edge {
            return Err(OozeError::BlockOutOfBounds { x, y, z });
        }

        let Some(section) = self.sections.get(&y.div_euclid(edge)) else {
            return Ok(BlockState::default_state());
        };
        let local_y = y.rem_euclid(edge);
        let state_id = section
            .storage
            .get(block_index(x as usize, local_y as usize, z as usize))?;
        Ok(self
            .palette
            .get_state(state_id)
            .unwrap_or_else(|| BlockState::default_state()))
    }

    /// True if every resident section is entirely air.
    pub fn is_empty(&self) -> bool {
        self.sections.values().all(|section| section.empty)
    }

    /// Ephemeral standalone sections in altitude order, each carrying its
    /// own copy of the chunk palette. Used by the vanilla-NBT exporter.
    pub(crate) fn sections_for_export(&self) -> impl Iterator<Item = (i32, ChunkSection)> + '_ {
        self.sections.iter().map(|(altitude, stored)| {
            let mut storage = stored.storage.clone();
            let palette_max = (self.palette.len() - 1) as u32;
            if storage.max_value() < palette_max {
                storage.set_max_value(palette_max).unwrap();
            }
            let section = ChunkSection::new(self.palette.clone(), storage).unwrap();
            (*altitude, section)
        })
    }
}

impl OozeSerialize for Chunk {
    fn serialize<W: Write>(&self, out: &mut OozeDataWriter<W>) -> Result<(), OozeError> {
        out.write_var_int(VarInt::from(self.data_version))?;

        let (Some(min_altitude), Some(max_altitude)) = (self.min_altitude(), self.max_altitude())
        else {
            // No resident sections at all.
            out.write_var_int(VarInt::from(0i32))?;
            out.write_var_int(VarInt::from(0i32))?;
            out.write_bit_set(&BitSet::new(), 0)?;
            return Ok(());
        };
        let chunk_height = (max_altitude - min_altitude + 1) as usize;

        // Determine which sections are non-empty.
        let mut non_empty_sections = BitSet::new();
        let mut sections_to_write = Vec::new();
        for (altitude, section) in &self.sections {
            if !section.empty {
                non_empty_sections.set((altitude - min_altitude) as usize, true);
                sections_to_write.push(section);
            }
        }

        out.write_var_int(VarInt::from(chunk_height))?;
        out.write_var_int(VarInt::from(min_altitude))?;
        out.write_bit_set(&non_empty_sections, chunk_height)?;

        // Only write the palette and blocks if at least one section has any.
        if non_empty_sections.any_set() {
            out.write_palette(&self.palette)?;

            let palette_max = (self.palette.len() - 1) as u32;
            for section in sections_to_write {
                let mut storage = section.storage.clone();
                storage.set_max_value(palette_max)?;
                storage.serialize(out)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resource::ResourceLocation;
    use crate::storage::IntStorage;

    fn state(name: &str) -> BlockState {
        BlockState::new(ResourceLocation::minecraft(name).unwrap())
    }

    fn stone_section() -> ChunkSection {
        let mut section = ChunkSection::new_empty();
        for x in 0..16 {
            for z in 0..16 {
                section.set_block_at(x, 0, z, state("stone")).unwrap();
            }
        }
        section
    }

    #[test]
    fn test_set_section_merges_palette() {
        let mut chunk = Chunk::new(Location2D::new(0, 0), 2230);
        chunk.set_section(0, stone_section()).unwrap();

        assert!(chunk.palette().state_id(&state("stone")).is_some());
        assert_eq!(chunk.block_at(4, 0, 9).unwrap(), &state("stone"));
        assert_eq!(chunk.block_at(4, 1, 9).unwrap(), &state("air"));
    }

    #[test]
    fn test_set_section_remaps_storage_ids() {
        // A section whose palette puts stone at a different ID than the
        // chunk's merged palette will.
        let mut chunk = Chunk::new(Location2D::new(0, 0), 2230);
        let mut first = ChunkSection::new_empty();
        first.set_block_at(0, 0, 0, state("dirt")).unwrap();
        chunk.set_section(0, first).unwrap();

        let mut second = ChunkSection::new_empty();
        second.set_block_at(0, 0, 0, state("stone")).unwrap();
        second.set_block_at(1, 0, 0, state("dirt")).unwrap();
        chunk.set_section(1, second).unwrap();

        assert_eq!(chunk.block_at(0, 16, 0).unwrap(), &state("stone"));
        assert_eq!(chunk.block_at(1, 16, 0).unwrap(), &state("dirt"));
        assert_eq!(chunk.block_at(0, 0, 0).unwrap(), &state("dirt"));
    }

    #[test]
    fn test_duplicate_altitude_fails() {
        let mut chunk = Chunk::new(Location2D::new(0, 0), 2230);
        chunk.set_section(3, stone_section()).unwrap();
        assert!(matches!(
            chunk.set_section(3, stone_section()),
            Err(OozeError::DuplicateAltitude(3))
        ));
    }

    #[test]
    fn test_wrong_section_size_is_rejected_before_insertion() {
        let storage = BitCompactIntArray::new(10, 0);
        assert!(ChunkSection::new(BlockPalette::new(), IntStorage::Compact(storage)).is_err());
    }

    #[test]
    fn test_height_tracks_resident_sections() {
        let mut chunk = Chunk::new(Location2D::new(0, 0), 2230);
        assert_eq!(chunk.height(), 0);

        chunk.set_section(2, stone_section()).unwrap();
        assert_eq!(chunk.height(), 16);
        assert_eq!(chunk.min_altitude(), Some(2));

        chunk.set_section(5, stone_section()).unwrap();
        assert_eq!(chunk.height(), 64);
        assert_eq!(chunk.max_altitude(), Some(5));
    }

    #[test]
    fn test_is_empty() {
        let mut chunk = Chunk::new(Location2D::new(0, 0), 2230);
        assert!(chunk.is_empty());

        chunk.set_section(0, ChunkSection::new_empty()).unwrap();
        assert!(chunk.is_empty());

        chunk.set_section(1, stone_section()).unwrap();
        assert!(!chunk.is_empty());
    }

    #[test]
    fn test_negative_altitudes_are_allowed() {
        let mut chunk = Chunk::new(Location2D::new(0, 0), 2230);
        chunk.set_section(-4, stone_section()).unwrap();
        assert_eq!(chunk.block_at(0, -64, 0).unwrap(), &state("stone"));
        assert_eq!(chunk.min_altitude(), Some(-4));
    }
}
