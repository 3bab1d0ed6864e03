use std::collections::HashMap;
use std::io::Write;

use quartz_nbt::{NbtCompound, NbtList, NbtTag};

use crate::err::OozeError;
use crate::serialize::{BitSet, OozeDataWriter, OozeSerialize};
use crate::world::{Chunk, Location2D};

// Limitations imposed by the format.
const MAX_WIDTH: i32 = 0xFFFF;
const MAX_DEPTH: i32 = 0xFFFF;
const MIN_CHUNK_X: i32 = i16::MIN as i32;
const MAX_CHUNK_X: i32 = i16::MAX as i32;
const MIN_CHUNK_Z: i32 = i16::MIN as i32;
const MAX_CHUNK_Z: i32 = i16::MAX as i32;

/// A sparse map of chunks plus level-wide NBT data: bulk entity and block
/// entity lists, and a free-form custom compound.
#[derive(Debug)]
pub struct Level {
    chunks: HashMap<Location2D, Chunk>,
    entities: NbtList,
    block_entities: NbtList,
    custom: NbtCompound,

    // Highest and lowest stored chunk coordinates, used to keep new chunks in
    // bounds.
    low_chunk_x: i32,
    high_chunk_x: i32,
    low_chunk_z: i32,
    high_chunk_z: i32,
}

impl Level {
    pub fn new() -> Self {
        Self {
            chunks: HashMap::new(),
            entities: NbtList::new(),
            block_entities: NbtList::new(),
            custom: NbtCompound::new(),
            low_chunk_x: MAX_CHUNK_X,
            high_chunk_x: MIN_CHUNK_X,
            low_chunk_z: MAX_CHUNK_Z,
            high_chunk_z: MIN_CHUNK_Z,
        }
    }

    /// The level's extent along the X axis, in chunks. Zero when the level
    /// holds no chunks.
    pub fn width(&self) -> i32 {
        if self.chunks.is_empty() {
            0
        } else {
            self.high_chunk_x - self.low_chunk_x + 1
        }
    }

    /// The level's extent along the Z axis, in chunks.
    pub fn depth(&self) -> i32 {
        if self.chunks.is_empty() {
            0
        } else {
            self.high_chunk_z - self.low_chunk_z + 1
        }
    }

    pub fn lowest_chunk_x(&self) -> i32 {
        if self.chunks.is_empty() {
            0
        } else {
            self.low_chunk_x
        }
    }

    pub fn lowest_chunk_z(&self) -> i32 {
        if self.chunks.is_empty() {
            0
        } else {
            self.low_chunk_z
        }
    }

    pub fn chunk_at(&self, chunk_x: i32, chunk_z: i32) -> Option<&Chunk> {
        self.chunks.get(&Location2D::new(chunk_x, chunk_z))
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Inserts a chunk, expanding the level bounds. Fails if the chunk's
    /// location cannot be represented by the format.
    pub fn store_chunk(&mut self, chunk: Chunk) -> Result<(), OozeError> {
        let location = chunk.location();
        if !self.is_chunk_in_bounds(location) {
            return Err(OozeError::ChunkOutOfBounds {
                x: location.x,
                z: location.z,
            });
        }

        self.low_chunk_x = self.low_chunk_x.min(location.x);
        self.high_chunk_x = self.high_chunk_x.max(location.x);
        self.low_chunk_z = self.low_chunk_z.min(location.z);
        self.high_chunk_z = self.high_chunk_z.max(location.z);

        self.chunks.insert(location, chunk);
        Ok(())
    }

    pub fn entities(&self) -> &NbtList {
        &self.entities
    }

    pub fn block_entities(&self) -> &NbtList {
        &self.block_entities
    }

    pub fn custom(&self) -> &NbtCompound {
        &self.custom
    }

    /// Free-form NBT storage carried alongside the level.
    pub fn custom_mut(&mut self) -> &mut NbtCompound {
        &mut self.custom
    }

    pub(crate) fn entities_mut(&mut self) -> &mut NbtList {
        &mut self.entities
    }

    pub(crate) fn block_entities_mut(&mut self) -> &mut NbtList {
        &mut self.block_entities
    }

    /// A fresh list of the entities positioned inside the given chunk. Each
    /// entity's chunk is derived from its `Pos` list of doubles.
    pub fn entities_in(&self, chunk: Location2D) -> NbtList {
        let mut in_chunk = NbtList::new();
        for index in 0..self.entities.len() {
            let Ok(entity) = self.entities.get::<&NbtCompound>(index) else {
                continue;
            };
            if entity_chunk(entity) == Some(chunk) {
                in_chunk.push(NbtTag::Compound(entity.clone()));
            }
        }
        in_chunk
    }

    /// A fresh list of the block entities inside the given chunk, derived
    /// from their `x`/`z` integer fields.
    pub fn block_entities_in(&self, chunk: Location2D) -> NbtList {
        let mut in_chunk = NbtList::new();
        for index in 0..self.block_entities.len() {
            let Ok(block_entity) = self.block_entities.get::<&NbtCompound>(index) else {
                continue;
            };
            if block_entity_chunk(block_entity) == Some(chunk) {
                in_chunk.push(NbtTag::Compound(block_entity.clone()));
            }
        }
        in_chunk
    }

    /// Replaces the entities belonging to one chunk. Every element currently
    /// inside the chunk is removed, then the replacement list is appended.
    pub fn set_entities(&mut self, chunk: Location2D, replacement: NbtList) -> Result<(), OozeError> {
        ensure_compound_list(&replacement)?;

        let mut rebuilt = NbtList::new();
        for index in 0..self.entities.len() {
            let Ok(entity) = self.entities.get::<&NbtCompound>(index) else {
                continue;
            };
            if entity_chunk(entity) != Some(chunk) {
                rebuilt.push(NbtTag::Compound(entity.clone()));
            }
        }
        append_compounds(&mut rebuilt, &replacement);
        self.entities = rebuilt;
        Ok(())
    }

    /// Replaces the block entities belonging to one chunk.
    pub fn set_block_entities(
        &mut self,
        chunk: Location2D,
        replacement: NbtList,
    ) -> Result<(), OozeError> {
        ensure_compound_list(&replacement)?;

        let mut rebuilt = NbtList::new();
        for index in 0..self.block_entities.len() {
            let Ok(block_entity) = self.block_entities.get::<&NbtCompound>(index) else {
                continue;
            };
            if block_entity_chunk(block_entity) != Some(chunk) {
                rebuilt.push(NbtTag::Compound(block_entity.clone()));
            }
        }
        append_compounds(&mut rebuilt, &replacement);
        self.block_entities = rebuilt;
        Ok(())
    }

    /// Whether the format's limitations allow a chunk to be stored at the
    /// given location.
    fn is_chunk_in_bounds(&self, location: Location2D) -> bool {
        let Location2D { x, z } = location;
        if x < MIN_CHUNK_X || x > MAX_CHUNK_X || z < MIN_CHUNK_Z || z > MAX_CHUNK_Z {
            // The coordinates themselves cannot be represented.
            false
        } else if x < self.low_chunk_x && self.high_chunk_x - x > MAX_WIDTH {
            // Chunk surpasses the lowest X and expanding would overflow.
            false
        } else if x > self.high_chunk_x && x - self.low_chunk_x > MAX_WIDTH {
            false
        } else if z < self.low_chunk_z && self.high_chunk_z - z > MAX_DEPTH {
            false
        } else if z > self.high_chunk_z && z - self.low_chunk_z > MAX_DEPTH {
            false
        } else {
            true
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::new()
    }
}

/// The chunk an entity belongs to, from the first and third elements of its
/// `Pos` list.
fn entity_chunk(entity: &NbtCompound) -> Option<Location2D> {
    let pos = entity.get::<_, &NbtList>("Pos").ok()?;
    let x = pos.get::<f64>(0).ok()?;
    let z = pos.get::<f64>(2).ok()?;
    Some(Location2D::new(
        (x / 16.0).floor() as i32,
        (z / 16.0).floor() as i32,
    ))
}

/// The chunk a block entity belongs to, from its `x`/`z` integer fields.
fn block_entity_chunk(block_entity: &NbtCompound) -> Option<Location2D> {
    let x = block_entity.get::<_, i32>("x").ok()?;
    let z = block_entity.get::<_, i32>("z").ok()?;
    Some(Location2D::new(x.div_euclid(16), z.div_euclid(16)))
}

fn ensure_compound_list(list: &NbtList) -> Result<(), OozeError> {
    for index in 0..list.len() {
        if list.get::<&NbtCompound>(index).is_err() {
            return Err(OozeError::NotACompoundList);
        }
    }
    Ok(())
}

pub(crate) fn append_compounds(target: &mut NbtList, source: &NbtList) {
    for index in 0..source.len() {
        if let Ok(compound) = source.get::<&NbtCompound>(index) {
            target.push(NbtTag::Compound(compound.clone()));
        }
    }
}

impl OozeSerialize for Level {
    fn serialize<W: Write>(&self, out: &mut OozeDataWriter<W>) -> Result<(), OozeError> {
        let width = self.width();
        let depth = self.depth();
        if width > 0xFF || depth > 0xFF {
            return Err(OozeError::LevelTooLarge { width, depth });
        }
        let min_chunk_x = self.lowest_chunk_x();
        let min_chunk_z = self.lowest_chunk_z();

        // Magic numbers and format version.
        out.write_header()?;

        // Level size and location.
        out.write_u8(width as u8)?;
        out.write_u8(depth as u8)?;
        out.write_i16(min_chunk_x as i16)?;
        out.write_i16(min_chunk_z as i16)?;

        // Generate the chunk mask; all-air chunks are left out entirely.
        let mut chunk_mask = BitSet::new();
        for chunk in self.chunks.values() {
            if !chunk.is_empty() {
                let location = chunk.location();
                let index = (location.x - min_chunk_x) * depth + (location.z - min_chunk_z);
                chunk_mask.set(index as usize, true);
            }
        }
        out.write_bit_set(&chunk_mask, (width * depth) as usize)?;

        // Chunk payloads, in mask order, inside a single compressed frame.
        out.begin_compression()?;
        for dx in 0..width {
            for dz in 0..depth {
                if let Some(chunk) = self.chunk_at(min_chunk_x + dx, min_chunk_z + dz) {
                    if !chunk.is_empty() {
                        chunk.serialize(out)?;
                    }
                }
            }
        }
        out.end_compression()?;

        // NBT extras, compressed separately.
        out.write_list(&self.block_entities)?;
        out.write_list(&self.entities)?;

        let has_custom = !self.custom.is_empty();
        out.write_u8(has_custom as u8)?;
        if has_custom {
            out.begin_compression()?;
            out.write_nbt(&self.custom)?;
            out.end_compression()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quartz_nbt::NbtTag;
    use crate::world::Chunk;

    fn entity(x: f64, y: f64, z: f64) -> NbtCompound {
        let mut compound = NbtCompound::new();
        let mut pos = NbtList::new();
        pos.push(NbtTag::Double(x));
        pos.push(NbtTag::Double(y));
        pos.push(NbtTag::Double(z));
        compound.insert("Pos", pos);
        compound
    }

    fn block_entity(x: i32, y: i32, z: i32) -> NbtCompound {
        let mut compound = NbtCompound::new();
        compound.insert("x", x);
        compound.insert("y", y);
        compound.insert("z", z);
        compound
    }

    #[test]
    fn test_bounds_track_stored_chunks() {
        let mut level = Level::new();
        assert_eq!(level.width(), 0);
        assert_eq!(level.depth(), 0);

        level
            .store_chunk(Chunk::new(Location2D::new(-2, 3), 2230))
            .unwrap();
        level
            .store_chunk(Chunk::new(Location2D::new(4, 5), 2230))
            .unwrap();
        assert_eq!(level.width(), 7);
        assert_eq!(level.depth(), 3);
        assert_eq!(level.lowest_chunk_x(), -2);
        assert_eq!(level.lowest_chunk_z(), 3);
    }

    #[test]
    fn test_rejects_unrepresentable_coordinates() {
        let mut level = Level::new();
        let too_far = Chunk::new(Location2D::new(40_000, 0), 2230);
        assert!(matches!(
            level.store_chunk(too_far),
            Err(OozeError::ChunkOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_entity_filter() {
        let mut level = Level::new();
        level.entities_mut().push(NbtTag::Compound(entity(1.5, 64.0, 1.5))); // chunk (0, 0)
        level.entities_mut().push(NbtTag::Compound(entity(20.0, 64.0, -3.0))); // chunk (1, -1)
        level.entities_mut().push(NbtTag::Compound(entity(-0.5, 64.0, 0.0))); // chunk (-1, 0)

        let in_origin = level.entities_in(Location2D::new(0, 0));
        assert_eq!(in_origin.len(), 1);
        let in_negative = level.entities_in(Location2D::new(-1, 0));
        assert_eq!(in_negative.len(), 1);
    }

    #[test]
    fn test_block_entity_filter() {
        let mut level = Level::new();
        level.block_entities_mut().push(NbtTag::Compound(block_entity(5, 60, 12)));
        level.block_entities_mut().push(NbtTag::Compound(block_entity(-1, 60, 0)));
        level.block_entities_mut().push(NbtTag::Compound(block_entity(17, 60, 3)));

        assert_eq!(level.block_entities_in(Location2D::new(0, 0)).len(), 1);
        assert_eq!(level.block_entities_in(Location2D::new(-1, 0)).len(), 1);
        assert_eq!(level.block_entities_in(Location2D::new(1, 0)).len(), 1);
    }

    #[test]
    fn test_set_entities_replaces_only_that_chunk() {
        let mut level = Level::new();
        level.entities_mut().push(NbtTag::Compound(entity(1.0, 64.0, 1.0))); // chunk (0, 0)
        level.entities_mut().push(NbtTag::Compound(entity(40.0, 64.0, 40.0))); // chunk (2, 2)

        let mut replacement = NbtList::new();
        replacement.push(NbtTag::Compound(entity(2.0, 70.0, 2.0)));
        replacement.push(NbtTag::Compound(entity(3.0, 70.0, 3.0)));
        level
            .set_entities(Location2D::new(0, 0), replacement)
            .unwrap();

        assert_eq!(level.entities().len(), 3);
        assert_eq!(level.entities_in(Location2D::new(0, 0)).len(), 2);
        assert_eq!(level.entities_in(Location2D::new(2, 2)).len(), 1);
    }

    #[test]
    fn test_set_entities_rejects_non_compound_content() {
        let mut level = Level::new();
        let mut bad = NbtList::new();
        bad.push(NbtTag::Int(5));
        assert!(matches!(
            level.set_entities(Location2D::new(0, 0), bad),
            Err(OozeError::NotACompoundList)
        ));
    }
}
