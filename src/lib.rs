//! A compact storage format ("ooze") for Minecraft-style voxel worlds, plus
//! the machinery to import worlds from the game's own region/anvil files.
//!
//! The usual flow: point a [`RegionDirectoryLoader`] at a world's `region`
//! directory, feed it through a [`LevelBuilder`] to get an in-memory
//! [`Level`], then [`write_level`] it to a `.ooze` stream. [`read_level`]
//! reverses the trip.

use std::io::{Read, Write};

pub mod err;
pub mod region;
pub mod resource;
pub mod serialize;
pub mod storage;
pub mod world;

pub use err::OozeError;
pub use region::{ChunkSource, LevelBuilder, RegionDirectoryLoader, RegionFile};
pub use resource::ResourceLocation;
pub use serialize::{OozeDataReader, OozeDataWriter, OozeSerialize};
pub use storage::{
    BitCompactIntArray, BlockPalette, IntArray, IntStorage, NibbleArray, PaletteUpgrader,
    UpgradeRecorder, WordedIntArray,
};
pub use world::{BlockState, Chunk, ChunkSection, Level, Location2D};

/// Reads an entire level from an ooze stream.
pub fn read_level(source: impl Read) -> Result<Level, OozeError> {
    OozeDataReader::new(source).read_level()
}

/// Writes an entire level as an ooze stream, using the default Zstandard
/// compression level.
pub fn write_level(level: &Level, sink: impl Write) -> Result<(), OozeError> {
    let mut out = OozeDataWriter::new(sink);
    level.serialize(&mut out)
}

/// Same as [`write_level`], but with an explicit Zstandard compression
/// level.
pub fn write_level_with_compression(
    level: &Level,
    sink: impl Write,
    compression_level: i32,
) -> Result<(), OozeError> {
    let mut out = OozeDataWriter::with_compression_level(sink, compression_level)?;
    level.serialize(&mut out)
}
