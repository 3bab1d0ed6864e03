use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use log::debug;
use quartz_nbt::io::Flavor;
use quartz_nbt::NbtCompound;

use crate::err::OozeError;
use crate::region::file::{LevelFileType, RegionFile};
use crate::world::Location2D;

/// Anything that can produce serialized chunk data by chunk location.
/// `Ok(None)` means the source simply has no such chunk.
pub trait ChunkSource {
    fn load_chunk(&mut self, location: Location2D) -> Result<Option<NbtCompound>, OozeError>;
}

/// Loads chunks from the region directory of a Minecraft world, keeping every
/// opened region file cached until [`RegionDirectoryLoader::close`] is
/// called. The cache makes a loader single-writer; share it behind external
/// synchronization or not at all.
pub struct RegionDirectoryLoader {
    directory: PathBuf,
    loaded_regions: HashMap<Location2D, RegionFile>,
}

impl RegionDirectoryLoader {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, OozeError> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(OozeError::NotADirectory(
                directory.display().to_string(),
            ));
        }
        Ok(Self {
            directory,
            loaded_regions: HashMap::new(),
        })
    }

    /// Convenience form of [`ChunkSource::load_chunk`] taking raw
    /// coordinates.
    pub fn load_chunk_at(
        &mut self,
        chunk_x: i32,
        chunk_z: i32,
    ) -> Result<Option<NbtCompound>, OozeError> {
        self.load_chunk(Location2D::new(chunk_x, chunk_z))
    }

    /// Releases every cached region, returning the loader to its initial
    /// state.
    pub fn close(&mut self) -> Result<(), OozeError> {
        debug!(
            "releasing {} cached region file(s) under {}",
            self.loaded_regions.len(),
            self.directory.display()
        );
        self.loaded_regions.clear();
        Ok(())
    }

    /// Opens and caches the region file covering `region_location`, trying
    /// the anvil name first and the older region name second.
    fn open_region(&mut self, region_location: Location2D) -> Result<Option<()>, OozeError> {
        let mut path = self
            .directory
            .join(LevelFileType::Anvil.file_name(region_location.x, region_location.z));
        if !path.is_file() {
            // Fall back to the pre-anvil name.
            path = self
                .directory
                .join(LevelFileType::Region.file_name(region_location.x, region_location.z));
            if !path.is_file() {
                return Ok(None);
            }
        }

        debug!("loading region file {}", path.display());
        let mut region = RegionFile::new(path);
        region.reload()?;
        self.loaded_regions.insert(region_location, region);
        Ok(Some(()))
    }

    /// Attempts to load an oversized chunk from its standalone file when no
    /// region file covers it at all.
    fn load_oversized(&self, location: Location2D) -> Result<Option<NbtCompound>, OozeError> {
        let path = self
            .directory
            .join(LevelFileType::Chunk.file_name(location.x, location.z));
        if !path.is_file() {
            return Ok(None);
        }

        let data = fs::read(path)?;
        // Standalone chunk files carry no compression tag; sniff for gzip.
        let flavor = if data.starts_with(&[0x1f, 0x8b]) {
            Flavor::GzCompressed
        } else {
            Flavor::Uncompressed
        };
        Ok(Some(quartz_nbt::io::read_nbt(&mut Cursor::new(data), flavor)?.0))
    }
}

impl ChunkSource for RegionDirectoryLoader {
    fn load_chunk(&mut self, location: Location2D) -> Result<Option<NbtCompound>, OozeError> {
        let region_location =
            Location2D::new(location.x.div_euclid(32), location.z.div_euclid(32));

        if !self.loaded_regions.contains_key(&region_location)
            && self.open_region(region_location)?.is_none()
        {
            // No region file at all; the chunk may still exist standalone.
            return self.load_oversized(location);
        }

        self.loaded_regions
            .get_mut(&region_location)
            .unwrap()
            .read_chunk_data(location.x, location.z)
    }
}
