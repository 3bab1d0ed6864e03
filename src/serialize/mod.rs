use std::io::Write;

pub mod nbt;
mod primitives;
mod reader;
mod writer;

pub use primitives::{BitSet, VarInt};
pub use reader::OozeDataReader;
pub use writer::OozeDataWriter;

use crate::err::OozeError;

/// The four magic bytes opening every ooze stream, written big-endian.
pub const MAGIC_NUMBER: u32 = 0x610B_B10B;

/// The format version this implementation reads and writes.
pub const FORMAT_VERSION: i32 = 0;

/// Types that know how to write themselves into an ooze stream. Reading is
/// asymmetric by design: decoding needs context (expected sizes, the
/// surrounding palette), so it lives on [`OozeDataReader`].
pub trait OozeSerialize {
    fn serialize<W: Write>(&self, out: &mut OozeDataWriter<W>) -> Result<(), OozeError>;
}
