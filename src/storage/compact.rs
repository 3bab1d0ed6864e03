use crate::err::OozeError;
use crate::storage::{bit_mask, bits_needed_to_store, bits_to_bytes, IntArray};

/// An integer array that packs values as close as possible to keep a low
/// footprint in memory and when serialized. Unlike [`WordedIntArray`], cells
/// are laid out back-to-back over a byte buffer and may cross byte
/// boundaries.
///
/// [`WordedIntArray`]: crate::storage::WordedIntArray
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitCompactIntArray {
    data: Vec<u8>,

    // Number of "cells" in the array.
    size: usize,

    /*
     * The highest value that can be stored in any cell. Not necessarily a
     * technical limitation, but since it is user-provided, #set() checks
     * against it to avoid confusion.
     */
    max_value: u32,

    // The length of each cell in bits.
    bits_per_cell: usize,

    // A mask of [bits_per_cell] set bits.
    cell_mask: u32,
}

/// Performs the `get` operation on a raw buffer independent of its wrapper
/// object, so new buffers can be read directly while resizing.
fn get_internal(raw: &[u8], bits_per_cell: usize, cell_mask: u32, index: usize) -> u32 {
    let bit_index = index * bits_per_cell;
    let mut bit_offset = bit_index % 8;
    let mut byte_index = bit_index / 8;
    let mut total_bits_read = 0;

    let mut value = 0u32;
    let mut value_mask = cell_mask;

    while value_mask != 0 {
        value |= ((raw[byte_index] as u32 >> bit_offset) & value_mask) << total_bits_read;

        let bits_read = (value_mask.count_ones() as usize).min(8 - bit_offset);
        value_mask >>= bits_read;

        total_bits_read += bits_read;
        byte_index += 1;
        bit_offset = 0;
    }

    value
}

/// Performs the `set` operation on a raw buffer independent of its wrapper
/// object, so new buffers can be written directly while resizing.
fn set_internal(raw: &mut [u8], bits_per_cell: usize, cell_mask: u32, index: usize, value: u32) -> u32 {
    let bit_index = index * bits_per_cell;
    let mut bit_offset = bit_index % 8;
    let mut byte_index = bit_index / 8;
    let mut total_bits_written = 0;

    let mut value = value;
    let mut previous = 0u32;
    let mut value_mask = cell_mask;

    while value_mask != 0 {
        // Read the previous value out of the cell.
        previous |= ((raw[byte_index] as u32 >> bit_offset) & value_mask) << total_bits_written;

        raw[byte_index] &= !(((value_mask as u64) << bit_offset) as u8); // Clear all bits in the cell.
        raw[byte_index] |= (((value & value_mask) as u64) << bit_offset) as u8; // Insert the new value.

        let bits_written = (value_mask.count_ones() as usize).min(8 - bit_offset);
        value >>= bits_written;
        value_mask >>= bits_written;

        total_bits_written += bits_written;
        byte_index += 1;
        bit_offset = 0;
    }

    previous
}

impl BitCompactIntArray {
    pub fn new(size: usize, max_value: u32) -> Self {
        let bits_per_cell = bits_needed_to_store(max_value);
        Self {
            data: vec![0u8; bits_to_bytes(size * bits_per_cell)],
            size,
            max_value,
            bits_per_cell,
            cell_mask: bit_mask(bits_per_cell),
        }
    }

    /// Creates a compact array with the same contents, size and maximum value
    /// as the `source` array.
    pub fn from_int_array(source: &(impl IntArray + ?Sized)) -> Self {
        let mut array = Self::new(source.len(), source.max_value());
        for i in 0..source.len() {
            set_internal(
                &mut array.data,
                array.bits_per_cell,
                array.cell_mask,
                i,
                source.get(i).unwrap(),
            );
        }
        array
    }

    /// The number of bytes the packed form of `size` cells with the given
    /// maximum occupies.
    pub(crate) fn packed_byte_length(size: usize, max_value: u32) -> usize {
        bits_to_bytes(size * bits_needed_to_store(max_value))
    }

    /// Reconstructs an array from its serialized payload. The buffer must be
    /// exactly as long as the packed form of `size` cells.
    pub fn from_bytes(size: usize, max_value: u32, data: Vec<u8>) -> Result<Self, OozeError> {
        let bits_per_cell = bits_needed_to_store(max_value);
        let expected = bits_to_bytes(size * bits_per_cell);
        if data.len() != expected {
            return Err(OozeError::Corrupt(format!(
                "compact array of {} cells should occupy {} bytes, got {}",
                size,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            size,
            max_value,
            bits_per_cell,
            cell_mask: bit_mask(bits_per_cell),
        })
    }

    /// The packed cell payload, repacking first if the current cell width is
    /// wider than the maximum value requires. Used by the serializer so the
    /// written form is as compact as possible.
    pub(crate) fn packed_bytes(&self) -> Result<(usize, u32, Vec<u8>), OozeError> {
        if bits_needed_to_store(self.max_value) < self.bits_per_cell {
            let mut packed = self.clone();
            packed.resize(self.max_value)?;
            return Ok((packed.size, packed.max_value, packed.data));
        }
        Ok((self.size, self.max_value, self.data.clone()))
    }

    /// Changes the maximum allowed value. Growing repacks the buffer at a
    /// wider cell size; shrinking requires that every stored value already
    /// fits below the new maximum.
    pub fn set_max_value(&mut self, new_max_value: u32) -> Result<(), OozeError> {
        if new_max_value == self.max_value {
            return Ok(());
        }

        if bits_needed_to_store(new_max_value) > self.bits_per_cell {
            // Resize required to store higher values.
            self.resize(new_max_value)?;
        } else {
            // Ensure no existing values are out of bounds.
            for i in 0..self.size {
                let value = get_internal(&self.data, self.bits_per_cell, self.cell_mask, i);
                if value > new_max_value {
                    return Err(OozeError::LossyResize { index: i, value });
                }
            }
        }
        self.max_value = new_max_value;
        Ok(())
    }

    /// Repacks the backing buffer so it is only as large as needed for values
    /// up to `new_max_value`. Does not change [`IntArray::max_value`]; that
    /// is done separately if needed.
    fn resize(&mut self, new_max_value: u32) -> Result<(), OozeError> {
        let new_bits_per_cell = bits_needed_to_store(new_max_value);
        if new_bits_per_cell == self.bits_per_cell {
            // Resizing wouldn't change anything.
            return Ok(());
        }
        let new_cell_mask = bit_mask(new_bits_per_cell);

        let mut new_data = vec![0u8; bits_to_bytes(self.size * new_bits_per_cell)];
        for i in 0..self.size {
            let value = get_internal(&self.data, self.bits_per_cell, self.cell_mask, i);
            if value > new_max_value {
                return Err(OozeError::LossyResize { index: i, value });
            }
            set_internal(&mut new_data, new_bits_per_cell, new_cell_mask, i, value);
        }

        self.data = new_data;
        self.bits_per_cell = new_bits_per_cell;
        self.cell_mask = new_cell_mask;
        Ok(())
    }
}

impl crate::serialize::OozeSerialize for BitCompactIntArray {
    /// Serialized form: `VarInt(size)`, `VarInt(max_value)`, then the packed
    /// cell bytes, repacked to the narrowest width the maximum permits.
    fn serialize<W: std::io::Write>(
        &self,
        out: &mut crate::serialize::OozeDataWriter<W>,
    ) -> Result<(), OozeError> {
        use std::io::Write;

        let (size, max_value, data) = self.packed_bytes()?;
        out.write_var_int(crate::serialize::VarInt::from(size))?;
        out.write_var_int(crate::serialize::VarInt::from(max_value))?;
        out.write_all(&data)?;
        Ok(())
    }
}

impl IntArray for BitCompactIntArray {
    fn get(&self, index: usize) -> Result<u32, OozeError> {
        if index >= self.size {
            return Err(OozeError::IndexOutOfBounds {
                index,
                len: self.size,
            });
        }
        Ok(get_internal(&self.data, self.bits_per_cell, self.cell_mask, index))
    }

    fn set(&mut self, index: usize, value: u32) -> Result<u32, OozeError> {
        if index >= self.size {
            return Err(OozeError::IndexOutOfBounds {
                index,
                len: self.size,
            });
        }
        if value > self.max_value {
            return Err(OozeError::ValueTooLarge {
                value,
                max: self.max_value,
            });
        }
        Ok(set_internal(&mut self.data, self.bits_per_cell, self.cell_mask, index, value))
    }

    fn len(&self) -> usize {
        self.size
    }

    fn max_value(&self) -> u32 {
        self.max_value
    }
}
