use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use quartz_nbt::io::Flavor;
use quartz_nbt::NbtCompound;

use crate::err::OozeError;

// Region files are divided into 4KiB sectors.
const SECTOR_LENGTH: usize = 4096;

/// The kinds of files a Minecraft world's region directory can contain.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LevelFileType {
    /// Anvil region files, `r.<x>.<z>.mca`.
    Anvil,
    /// Pre-anvil region files, `r.<x>.<z>.mcr`.
    Region,
    /// External files for oversized chunks, `c.<x>.<z>.mcc`.
    Chunk,
}

impl LevelFileType {
    pub(crate) fn file_name(&self, x: i32, z: i32) -> String {
        match self {
            LevelFileType::Anvil => format!("r.{x}.{z}.mca"),
            LevelFileType::Region => format!("r.{x}.{z}.mcr"),
            LevelFileType::Chunk => format!("c.{x}.{z}.mcc"),
        }
    }
}

/// A file containing up to 32x32 chunks of serialized chunk data in
/// Minecraft's region/anvil format.
pub struct RegionFile {
    source: PathBuf,
    contents: Option<Vec<u8>>,
}

impl RegionFile {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            contents: None,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// (Re)loads the file's contents from disk. Region files are always a
    /// whole number of sectors long; anything else is corruption.
    pub fn reload(&mut self) -> Result<(), OozeError> {
        let contents = fs::read(&self.source)?;
        if contents.is_empty() || contents.len() % SECTOR_LENGTH != 0 {
            self.contents = None;
            return Err(OozeError::Corrupt(format!(
                "region file {} is not a valid size ({} bytes)",
                self.source.display(),
                contents.len()
            )));
        }
        self.contents = Some(contents);
        Ok(())
    }

    /// Reads and deserializes the data for one chunk in the region, or `None`
    /// if the region holds no data for it.
    pub fn read_chunk_data(
        &mut self,
        chunk_x: i32,
        chunk_z: i32,
    ) -> Result<Option<NbtCompound>, OozeError> {
        if self.contents.is_none() {
            self.reload()?;
        }
        let contents = self.contents.as_ref().unwrap();

        // Find the chunk's entry in the location table.
        let x_offset = chunk_x.rem_euclid(32) as usize;
        let z_offset = chunk_z.rem_euclid(32) as usize;
        let index = (x_offset + z_offset * 32) * 4;

        let sector_offset = ((contents[index] as usize) << 16)
            | ((contents[index + 1] as usize) << 8)
            | contents[index + 2] as usize;
        let sector_count = contents[index + 3] as usize;

        if sector_count == 0 {
            // The chunk has no data.
            return Ok(None);
        }

        let chunk_start = SECTOR_LENGTH * sector_offset;
        if chunk_start + 5 > contents.len() {
            return Err(OozeError::Corrupt(format!(
                "chunk ({chunk_x}, {chunk_z}) points past the end of its region file"
            )));
        }

        let chunk_length = u32::from_be_bytes([
            contents[chunk_start],
            contents[chunk_start + 1],
            contents[chunk_start + 2],
            contents[chunk_start + 3],
        ]) as usize;
        let compression_type = contents[chunk_start + 4];

        if chunk_length < 1 {
            // Shouldn't happen, but just to be safe.
            return Ok(None);
        }

        let is_external = compression_type & 0x80 != 0;
        let compression_type = compression_type & 0x7F;

        if is_external {
            return self.read_external_chunk_data(chunk_x, chunk_z, compression_type);
        }
        if chunk_length < 2 {
            // If a chunk isn't external, payload bytes should be present.
            return Ok(None);
        }

        let payload_end = chunk_start + 5 + (chunk_length - 1);
        if payload_end > contents.len() {
            return Err(OozeError::Corrupt(format!(
                "chunk ({chunk_x}, {chunk_z}) runs past the end of its region file"
            )));
        }

        let payload = &contents[chunk_start + 5..payload_end];
        Ok(Some(deserialize_chunk_data(payload, compression_type)?))
    }

    /// Reads the data for an external/oversized chunk stored alongside this
    /// region file. Returns `None` when the external file does not exist.
    fn read_external_chunk_data(
        &self,
        chunk_x: i32,
        chunk_z: i32,
        compression_type: u8,
    ) -> Result<Option<NbtCompound>, OozeError> {
        let file_name = LevelFileType::Chunk.file_name(chunk_x, chunk_z);
        let path = match self.source.parent() {
            Some(parent) => parent.join(&file_name),
            None => PathBuf::from(&file_name),
        };
        if !path.is_file() {
            return Ok(None);
        }

        let data = fs::read(path)?;
        Ok(Some(deserialize_chunk_data(&data, compression_type)?))
    }
}

/// Deserializes raw chunk bytes, decompressing as the compression tag
/// dictates: 1 = gzip, 2 = zlib, 3 = uncompressed.
fn deserialize_chunk_data(data: &[u8], compression_type: u8) -> Result<NbtCompound, OozeError> {
    let flavor = match compression_type {
        1 => Flavor::GzCompressed,
        2 => Flavor::ZlibCompressed,
        3 => Flavor::Uncompressed,
        other => return Err(OozeError::UnknownCompression(other)),
    };
    let (compound, _) = quartz_nbt::io::read_nbt(&mut Cursor::new(data), flavor)?;
    Ok(compound)
}
