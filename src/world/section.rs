use crate::err::OozeError;
use crate::storage::{BlockPalette, IntArray, IntStorage};
use crate::world::{block_index, BlockState, SECTION_BLOCKS, SECTION_EDGE};

/// A 16x16x16 volume holding some of a chunk's blocks as palette IDs. The
/// block at local `(x, y, z)` lives at storage index `y*256 + z*16 + x`.
pub struct ChunkSection {
    palette: BlockPalette,
    storage: IntStorage,

    // Cached result of the last call to is_empty().
    is_empty: bool,

    // Whether is_empty needs to be recalculated.
    modified_since_empty_check: bool,
}

impl ChunkSection {
    /// Creates an all-default section backed by compact storage.
    pub fn new_empty() -> Self {
        let palette = BlockPalette::new();
        let storage = crate::storage::BitCompactIntArray::new(SECTION_BLOCKS, 0);
        Self {
            palette,
            storage: storage.into(),
            is_empty: true,
            modified_since_empty_check: false,
        }
    }

    pub fn new(palette: BlockPalette, storage: impl Into<IntStorage>) -> Result<Self, OozeError> {
        let storage = storage.into();
        if storage.len() != SECTION_BLOCKS {
            return Err(OozeError::WrongSectionSize {
                expected: SECTION_BLOCKS,
                actual: storage.len(),
            });
        }
        if (storage.max_value() as usize) < palette.len() - 1 {
            return Err(OozeError::StorageTooSmall);
        }
        Ok(Self {
            palette,
            storage,
            is_empty: true,
            modified_since_empty_check: true,
        })
    }

    pub fn palette(&self) -> &BlockPalette {
        &self.palette
    }

    pub fn storage(&self) -> &IntStorage {
        &self.storage
    }

    pub fn block_at(&self, x: i32, y: i32, z: i32) -> Result<&BlockState, OozeError> {
        check_local_bounds(x, y, z)?;
        let state_id = self.storage.get(block_index(x as usize, y as usize, z as usize))?;
        Ok(self
            .palette
            .get_state(state_id)
            .unwrap_or_else(|| BlockState::default_state()))
    }

    /// Writes a block, adding its state to the palette if needed. Compact
    /// storage grows to fit a new palette ID; worded storage is fixed-width,
    /// so an ID beyond its maximum is a range error.
    pub fn set_block_at(&mut self, x: i32, y: i32, z: i32, state: BlockState) -> Result<(), OozeError> {
        check_local_bounds(x, y, z)?;
        let state_id = self.palette.add_state(state);
        if state_id > self.storage.max_value() {
            match &mut self.storage {
                IntStorage::Compact(array) => array.set_max_value(state_id)?,
                IntStorage::Worded(_) => {
                    return Err(OozeError::ValueTooLarge {
                        value: state_id,
                        max: self.storage.max_value(),
                    })
                }
            }
        }
        self.storage
            .set(block_index(x as usize, y as usize, z as usize), state_id)?;
        self.modified_since_empty_check = true;
        Ok(())
    }

    /// True if every stored cell resolves to an air state through the
    /// palette. The result is memoized until the next mutation.
    pub fn is_empty(&mut self) -> bool {
        if self.modified_since_empty_check {
            self.is_empty = (0..self.storage.len()).all(|index| {
                let state_id = self.storage.get(index).unwrap();
                self.palette
                    .get_state(state_id)
                    .unwrap_or_else(|| BlockState::default_state())
                    .is_air()
            });
            self.modified_since_empty_check = false;
        }
        self.is_empty
    }
}

fn check_local_bounds(x: i32, y: i32, z: i32) -> Result<(), OozeError> {
    let edge = SECTION_EDGE as i32;
    if x < 0 || x >= edge || y < 0 || y >= edge || z < 0 || z >= edge {
        return Err(OozeError::BlockOutOfBounds { x, y, z });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resource::ResourceLocation;

    fn state(name: &str) -> BlockState {
        BlockState::new(ResourceLocation::minecraft(name).unwrap())
    }

    #[test]
    fn test_set_block_get_block() {
        let mut section = ChunkSection::new_empty();
        section.set_block_at(0, 0, 0, state("stone")).unwrap();
        assert_eq!(section.block_at(0, 0, 0).unwrap(), &state("stone"));
        section.set_block_at(0, 0, 0, state("dirt")).unwrap();
        assert_eq!(section.block_at(0, 0, 0).unwrap(), &state("dirt"));
    }

    #[test]
    fn test_multiple_positions() {
        let names = ["stone", "dirt", "gravel", "sand"];
        let mut section = ChunkSection::new_empty();
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    let name = names[((x + y + z) % 4) as usize];
                    section.set_block_at(x, y, z, state(name)).unwrap();
                }
            }
        }
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    let name = names[((x + y + z) % 4) as usize];
                    assert_eq!(section.block_at(x, y, z).unwrap(), &state(name));
                }
            }
        }
    }

    #[test]
    fn test_bounds_are_checked() {
        let mut section = ChunkSection::new_empty();
        assert!(section.block_at(16, 0, 0).is_err());
        assert!(section.block_at(0, -1, 0).is_err());
        assert!(section.set_block_at(0, 0, 16, state("stone")).is_err());
    }

    #[test]
    fn test_empty_flag_tracks_mutations() {
        let mut section = ChunkSection::new_empty();
        assert!(section.is_empty());

        section.set_block_at(3, 4, 5, state("stone")).unwrap();
        assert!(!section.is_empty());

        section.set_block_at(3, 4, 5, state("air")).unwrap();
        assert!(section.is_empty());
    }

    #[test]
    fn test_cave_air_counts_as_empty() {
        let mut section = ChunkSection::new_empty();
        section.set_block_at(0, 0, 0, state("cave_air")).unwrap();
        assert!(section.is_empty());
    }

    #[test]
    fn test_new_validates_dimensions() {
        let storage = crate::storage::BitCompactIntArray::new(100, 0);
        assert!(matches!(
            ChunkSection::new(BlockPalette::new(), storage),
            Err(OozeError::WrongSectionSize { .. })
        ));
    }

    #[test]
    fn test_new_validates_palette_fit() {
        let mut palette = BlockPalette::new();
        palette.add_state(state("stone"));
        palette.add_state(state("dirt"));
        let storage = crate::storage::BitCompactIntArray::new(SECTION_BLOCKS, 1);
        assert!(matches!(
            ChunkSection::new(palette, storage),
            Err(OozeError::StorageTooSmall)
        ));
    }
}
