use std::io::{self, Write};

use quartz_nbt::io::Flavor;
use quartz_nbt::{NbtCompound, NbtList};

use crate::err::OozeError;
use crate::serialize::{BitSet, VarInt, FORMAT_VERSION, MAGIC_NUMBER};
use crate::storage::BlockPalette;

/// A sink for the pieces of an ooze stream. While a compressed frame is open,
/// everything written lands in an in-memory buffer; closing the frame runs
/// the buffer through Zstandard and emits it with its two length prefixes.
pub struct OozeDataWriter<W: Write> {
    out: W,

    // Zstandard level used for every compressed frame.
    compression_level: i32,

    // The buffer collecting the open frame's bytes, if one is open.
    frame: Option<Vec<u8>>,
}

impl<W: Write> OozeDataWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            compression_level: zstd::DEFAULT_COMPRESSION_LEVEL,
            frame: None,
        }
    }

    pub fn with_compression_level(out: W, compression_level: i32) -> Result<Self, OozeError> {
        if !zstd::compression_level_range().contains(&compression_level) {
            return Err(OozeError::CompressionLevelOutOfRange(compression_level));
        }
        Ok(Self {
            out,
            compression_level,
            frame: None,
        })
    }

    /// The format version this writer produces.
    pub fn format_version(&self) -> i32 {
        FORMAT_VERSION
    }

    /// Writes the standard header: four bytes of magic numbers followed by
    /// the format version.
    pub fn write_header(&mut self) -> Result<(), OozeError> {
        self.write_all(&MAGIC_NUMBER.to_be_bytes())?;
        self.write_var_int(VarInt::from(FORMAT_VERSION))
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), OozeError> {
        self.write_all(&[value])?;
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), OozeError> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_var_int(&mut self, value: VarInt) -> Result<(), OozeError> {
        match &mut self.frame {
            Some(buffer) => value.write_to(buffer),
            None => value.write_to(&mut self.out),
        }
    }

    /// Writes a bit set using however many bytes are needed to hold
    /// `bit_count` bits; a zero `bit_count` writes a single zero byte.
    pub fn write_bit_set(&mut self, bits: &BitSet, bit_count: usize) -> Result<(), OozeError> {
        self.write_all(&bits.to_bytes(bit_count))?;
        Ok(())
    }

    /// Writes an unnamed, uncompressed NBT compound.
    pub fn write_nbt(&mut self, compound: &NbtCompound) -> Result<(), OozeError> {
        quartz_nbt::io::write_nbt(self, None, compound, Flavor::Uncompressed)?;
        Ok(())
    }

    /// Writes each entry of a block palette, prefixed by the entry count as a
    /// VarInt.
    ///
    /// The first byte of each entry does double duty: its upper 7 bits hold
    /// the byte length of the state's full name, and the lowest bit indicates
    /// whether a properties compound follows the name.
    pub fn write_palette(&mut self, palette: &BlockPalette) -> Result<(), OozeError> {
        self.write_var_int(VarInt::from(palette.len()))?;

        for state in palette.iter() {
            let name = state.name().to_string();
            if name.len() > 0b111_1111 {
                return Err(OozeError::NameTooLong(name));
            }

            let mut length = (name.len() as u8) << 1;
            if state.has_properties() {
                length |= 1;
            }

            self.write_u8(length)?;
            self.write_all(name.as_bytes())?;
            if let Some(properties) = state.properties() {
                self.write_nbt(properties)?;
            }
        }
        Ok(())
    }

    /// Writes a list of NBT compounds: its length as a VarInt, then (unless
    /// empty) every compound inside a single compressed frame.
    pub fn write_list(&mut self, list: &NbtList) -> Result<(), OozeError> {
        let mut compounds = Vec::with_capacity(list.len());
        for index in 0..list.len() {
            match list.get::<&NbtCompound>(index) {
                Ok(compound) => compounds.push(compound),
                Err(_) => return Err(OozeError::NotACompoundList),
            }
        }

        self.write_var_int(VarInt::from(compounds.len()))?;
        if !compounds.is_empty() {
            self.begin_compression()?;
            for compound in compounds {
                self.write_nbt(compound)?;
            }
            self.end_compression()?;
        }
        Ok(())
    }

    /// Routes every following write into an in-memory frame until
    /// [`OozeDataWriter::end_compression`] seals it. Frames do not nest.
    pub fn begin_compression(&mut self) -> Result<(), OozeError> {
        if self.frame.is_some() {
            return Err(OozeError::FrameAlreadyOpen);
        }
        self.frame = Some(Vec::new());
        Ok(())
    }

    /// Seals the open frame: compresses it with Zstandard and writes the
    /// uncompressed length, the compressed length, and the compressed bytes.
    pub fn end_compression(&mut self) -> Result<(), OozeError> {
        let Some(uncompressed) = self.frame.take() else {
            return Err(OozeError::FrameNotOpen);
        };

        let compressed = zstd::bulk::compress(&uncompressed, self.compression_level)?;
        self.write_var_int(VarInt::from(uncompressed.len()))?;
        self.write_var_int(VarInt::from(compressed.len()))?;
        self.write_all(&compressed)?;
        Ok(())
    }

    /// Unwraps the underlying sink. Fails if a frame is still open.
    pub fn into_inner(self) -> Result<W, OozeError> {
        if self.frame.is_some() {
            return Err(OozeError::FrameAlreadyOpen);
        }
        Ok(self.out)
    }
}

impl<W: Write> Write for OozeDataWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.frame {
            Some(buffer) => buffer.write(buf),
            None => self.out.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.frame {
            Some(buffer) => buffer.flush(),
            None => self.out.flush(),
        }
    }
}
