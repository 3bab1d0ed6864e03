use std::io::{self, Cursor, Read};

use quartz_nbt::io::Flavor;
use quartz_nbt::{NbtCompound, NbtList, NbtTag};

use crate::err::OozeError;
use crate::resource::ResourceLocation;
use crate::serialize::{BitSet, VarInt, FORMAT_VERSION, MAGIC_NUMBER};
use crate::storage::{BitCompactIntArray, BlockPalette};
use crate::world::{BlockState, Chunk, Level, Location2D, SECTION_BLOCKS};

/// The counterpart of [`OozeDataWriter`]: reads the pieces of an ooze stream.
/// While a compressed frame is open, every read drains the decompressed
/// buffer instead of the underlying source.
///
/// [`OozeDataWriter`]: crate::serialize::OozeDataWriter
pub struct OozeDataReader<R: Read> {
    input: R,

    // The decompressed bytes of the open frame, if one is open.
    frame: Option<Cursor<Vec<u8>>>,

    format_version: Option<i32>,
}

impl<R: Read> OozeDataReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            frame: None,
            format_version: None,
        }
    }

    /// The format version declared by the stream's header. `None` until a
    /// valid header has been read.
    pub fn format_version(&self) -> Option<i32> {
        self.format_version
    }

    /// Reads the stream header, rejecting unknown magic and versions newer
    /// than this implementation.
    pub fn check_header(&mut self) -> Result<(), OozeError> {
        let mut magic = [0u8; 4];
        self.read_exact(&mut magic)?;
        let magic = u32::from_be_bytes(magic);
        if magic != MAGIC_NUMBER {
            return Err(OozeError::BadMagic(magic));
        }

        let version = self.read_var_int()?.value;
        if version < 0 || version > FORMAT_VERSION {
            return Err(OozeError::UnsupportedVersion(version));
        }
        self.format_version = Some(version);
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, OozeError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, OozeError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    pub fn read_var_int(&mut self) -> Result<VarInt, OozeError> {
        match &mut self.frame {
            Some(frame) => VarInt::read_from(frame),
            None => VarInt::read_from(&mut self.input),
        }
    }

    /// Reads the next `length` bytes.
    pub fn read_bytes(&mut self, length: usize) -> Result<Vec<u8>, OozeError> {
        let mut bytes = vec![0u8; length];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Reads a bit set of `bit_count` bits; a zero `bit_count` still consumes
    /// a single byte, mirroring the writer.
    pub fn read_bit_set(&mut self, bit_count: usize) -> Result<BitSet, OozeError> {
        let length = if bit_count == 0 {
            1
        } else {
            bit_count.div_ceil(8)
        };
        Ok(BitSet::from_bytes(self.read_bytes(length)?))
    }

    /// Reads an unnamed, uncompressed NBT compound.
    pub fn read_nbt(&mut self) -> Result<NbtCompound, OozeError> {
        let (compound, _) = quartz_nbt::io::read_nbt(self, Flavor::Uncompressed)?;
        Ok(compound)
    }

    /// Opens a compressed frame: reads the two length prefixes, inflates the
    /// payload, and redirects every following read into it.
    pub fn begin_decompression(&mut self) -> Result<(), OozeError> {
        if self.frame.is_some() {
            return Err(OozeError::FrameAlreadyOpen);
        }

        let uncompressed_length = self.read_var_int()?.value;
        let compressed_length = self.read_var_int()?.value;
        if uncompressed_length < 0 || compressed_length < 0 {
            return Err(OozeError::Corrupt(format!(
                "negative frame length: {uncompressed_length}/{compressed_length}"
            )));
        }

        let compressed = self.read_bytes(compressed_length as usize)?;
        let decompressed = zstd::bulk::decompress(&compressed, uncompressed_length as usize)?;
        if decompressed.len() != uncompressed_length as usize {
            return Err(OozeError::Corrupt(format!(
                "frame inflated to {} bytes, expected {}",
                decompressed.len(),
                uncompressed_length
            )));
        }

        self.frame = Some(Cursor::new(decompressed));
        Ok(())
    }

    /// Closes the open frame, returning reads to the underlying source. Any
    /// unread frame bytes are discarded.
    pub fn end_decompression(&mut self) -> Result<(), OozeError> {
        if self.frame.take().is_none() {
            return Err(OozeError::FrameNotOpen);
        }
        Ok(())
    }

    /// Reads a block palette written by [`OozeDataWriter::write_palette`].
    /// The first entry becomes the palette's default state.
    ///
    /// [`OozeDataWriter::write_palette`]: crate::serialize::OozeDataWriter::write_palette
    pub fn read_palette(&mut self) -> Result<BlockPalette, OozeError> {
        let entry_count = self.read_var_int()?.value;
        if entry_count < 0 {
            return Err(OozeError::Corrupt(format!(
                "negative palette size: {entry_count}"
            )));
        }

        let mut palette: Option<BlockPalette> = None;
        for _ in 0..entry_count {
            let length = self.read_u8()? as usize;
            let has_properties = length & 1 != 0;
            let name_length = length >> 1;

            let name_bytes = self.read_bytes(name_length)?;
            let full_name = String::from_utf8(name_bytes)
                .map_err(|_| OozeError::Corrupt("palette entry name is not UTF-8".into()))?;
            let name = ResourceLocation::parse(&full_name)?;

            let properties = if has_properties {
                Some(self.read_nbt()?)
            } else {
                None
            };

            let state = BlockState::with_properties(name, properties);
            match &mut palette {
                // The first entry is the palette's default.
                None => palette = Some(BlockPalette::with_default(state)),
                Some(palette) => {
                    palette.add_state(state);
                }
            }
        }
        Ok(palette.unwrap_or_default())
    }

    /// Reads a compact int array blob, validating its declared dimensions
    /// against what the surrounding structure requires.
    pub fn read_compact_int_array(
        &mut self,
        expected_size: usize,
        expected_max: u32,
    ) -> Result<BitCompactIntArray, OozeError> {
        let size = self.read_var_int()?.value;
        let max_value = self.read_var_int()?.value;
        if size < 0 || size as usize != expected_size {
            return Err(OozeError::Corrupt(format!(
                "array declares {size} cells, expected {expected_size}"
            )));
        }
        if max_value < 0 || max_value as u32 != expected_max {
            return Err(OozeError::Corrupt(format!(
                "array declares maximum {max_value}, expected {expected_max}"
            )));
        }

        let byte_length = BitCompactIntArray::packed_byte_length(expected_size, expected_max);
        let data = self.read_bytes(byte_length)?;
        BitCompactIntArray::from_bytes(expected_size, expected_max, data)
    }

    /// Reads one chunk payload at the given location.
    pub fn read_chunk(&mut self, location: Location2D) -> Result<Chunk, OozeError> {
        let data_version = self.read_var_int()?.value;
        let chunk_height = self.read_var_int()?.value;
        let min_section_altitude = self.read_var_int()?.value;
        if chunk_height < 0 {
            return Err(OozeError::Corrupt(format!(
                "negative chunk height: {chunk_height}"
            )));
        }
        let non_empty_sections = self.read_bit_set(chunk_height as usize)?;

        let mut chunk = Chunk::new(location, data_version);
        if !non_empty_sections.any_set() {
            // The chunk is entirely air.
            return Ok(chunk);
        }

        let palette = self.read_palette()?;
        let upgrader = chunk.merge_palette(&palette);
        let palette_max = (palette.len() - 1) as u32;

        for section_index in 0..chunk_height as usize {
            if non_empty_sections.get(section_index) {
                let mut storage = self.read_compact_int_array(SECTION_BLOCKS, palette_max)?;
                upgrader.upgrade_array(&mut storage)?;
                chunk.insert_storage(min_section_altitude + section_index as i32, storage)?;
            }
        }
        Ok(chunk)
    }

    /// Reads an NBT compound list written by [`OozeDataWriter::write_list`].
    ///
    /// [`OozeDataWriter::write_list`]: crate::serialize::OozeDataWriter::write_list
    pub fn read_list(&mut self) -> Result<NbtList, OozeError> {
        let size = self.read_var_int()?.value;
        if size < 0 {
            return Err(OozeError::Corrupt(format!("negative list size: {size}")));
        }

        let mut list = NbtList::new();
        if size > 0 {
            // List elements are all compressed together.
            self.begin_decompression()?;
            for _ in 0..size {
                list.push(NbtTag::Compound(self.read_nbt()?));
            }
            self.end_decompression()?;
        }
        Ok(list)
    }

    /// Reads an entire level from the stream, header included.
    pub fn read_level(&mut self) -> Result<Level, OozeError> {
        self.check_header()?;

        let width = self.read_u8()? as i32;
        let depth = self.read_u8()? as i32;
        let low_chunk_x = self.read_i16()? as i32;
        let low_chunk_z = self.read_i16()? as i32;
        let chunk_mask = self.read_bit_set((width * depth) as usize)?;

        let mut level = Level::new();

        // Chunk payloads live in one shared frame.
        self.begin_decompression()?;
        for dx in 0..width {
            for dz in 0..depth {
                if chunk_mask.get((dx * depth + dz) as usize) {
                    let location = Location2D::new(dx + low_chunk_x, dz + low_chunk_z);
                    level.store_chunk(self.read_chunk(location)?)?;
                }
            }
        }
        self.end_decompression()?;

        *level.block_entities_mut() = self.read_list()?;
        *level.entities_mut() = self.read_list()?;

        let has_custom = self.read_u8()? != 0;
        if has_custom {
            self.begin_decompression()?;
            *level.custom_mut() = self.read_nbt()?;
            self.end_decompression()?;
        }

        Ok(level)
    }
}

impl<R: Read> Read for OozeDataReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.frame {
            Some(frame) => frame.read(buf),
            None => self.input.read(buf),
        }
    }
}
