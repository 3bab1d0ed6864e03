use crate::err::OozeError;
use crate::storage::{bit_mask, bits_needed_to_store, IntArray};

const BITS_PER_WORD: usize = u64::BITS as usize;

/// A compact format for storing many integers with a known limit. This is the
/// layout Minecraft uses for block states: values live in 64-bit words, and a
/// cell never crosses a word boundary, so the tail bits of each word are
/// padding.
///
/// The raw form also exists in a "legacy" variant without the per-word
/// padding, where a single value can be split across consecutive words. Both
/// variants round-trip through [`WordedIntArray::to_raw`] and
/// [`WordedIntArray::from_raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordedIntArray {
    // Internal storage for compact values. Each "word" contains multiple
    // "cells" with values.
    words: Vec<u64>,

    // Size in cells, not words.
    size: usize,

    max_value: u32,

    bits_per_cell: usize,

    // The maximum number of values that can be stored in a single word.
    cells_per_word: usize,

    // A bitmask with the least significant <bits_per_cell> bits set.
    cell_mask: u64,
}

impl WordedIntArray {
    pub fn new(size: usize, max_value: u32) -> Self {
        let words = vec![0u64; Self::words_needed(size, max_value)];
        // The buffer is sized to fit, so this cannot fail.
        Self::with_words(size, max_value, words).unwrap()
    }

    /// Creates a worded array with the same contents, size and maximum value
    /// as the `source` array.
    pub fn from_int_array(source: &(impl IntArray + ?Sized)) -> Self {
        let mut array = Self::new(source.len(), source.max_value());
        for i in 0..source.len() {
            array.set(i, source.get(i).unwrap()).unwrap();
        }
        array
    }

    /// Reads a worded array from its raw form. `legacy` indicates that the
    /// `source` uses the old encoding, where a single value in the array
    /// could be split across consecutive words.
    pub fn from_raw(
        source: Vec<u64>,
        size: usize,
        max_value: u32,
        legacy: bool,
    ) -> Result<Self, OozeError> {
        if !legacy {
            // Data is already formatted properly.
            return Self::with_words(size, max_value, source);
        }

        // Extract values from the unpadded layout.
        let mut array = Self::new(size, max_value);
        let bits_per_cell = array.bits_per_cell;
        let cell_mask = array.cell_mask;
        for cell_index in 0..size {
            let bit_index = cell_index * bits_per_cell;
            let start_word = bit_index / BITS_PER_WORD;
            let end_word = (bit_index + bits_per_cell - 1) / BITS_PER_WORD;
            let start_offset = bit_index % BITS_PER_WORD;

            if end_word >= source.len() {
                return Err(OozeError::Corrupt(format!(
                    "raw array of {} words cannot hold {} cells",
                    source.len(),
                    size
                )));
            }

            let value = if start_word == end_word {
                source[start_word] >> start_offset
            } else {
                let end_offset = BITS_PER_WORD - start_offset;
                (source[start_word] >> start_offset) | (source[end_word] << end_offset)
            };
            array.set(cell_index, (value & cell_mask) as u32)?;
        }
        Ok(array)
    }

    fn with_words(size: usize, max_value: u32, words: Vec<u64>) -> Result<Self, OozeError> {
        if words.len() < Self::words_needed(size, max_value) {
            return Err(OozeError::Corrupt(format!(
                "cannot store {} values in {} words",
                size,
                words.len()
            )));
        }

        let bits_per_cell = bits_needed_to_store(max_value).max(4);
        Ok(Self {
            words,
            size,
            max_value,
            bits_per_cell,
            cells_per_word: BITS_PER_WORD / bits_per_cell,
            cell_mask: bit_mask(bits_per_cell) as u64,
        })
    }

    /// The number of words needed to store `size` values that can be at most
    /// `max_value`.
    fn words_needed(size: usize, max_value: u32) -> usize {
        let bits_per_cell = bits_needed_to_store(max_value).max(4);
        let cells_per_word = BITS_PER_WORD / bits_per_cell;
        size.div_ceil(cells_per_word)
    }

    /// Converts the array to its simplest raw form, such that it can be
    /// reconstructed via [`WordedIntArray::from_raw`]. With
    /// `legacy_encoding`, cells are written back-to-back and may straddle
    /// consecutive words.
    pub fn to_raw(&self, legacy_encoding: bool) -> Vec<u64> {
        if !legacy_encoding {
            return self.words.clone();
        }

        let total_bits = self.size * self.bits_per_cell;
        let mut legacy_words = vec![0u64; total_bits.div_ceil(BITS_PER_WORD)];
        for cell_index in 0..self.size {
            let value = self.get(cell_index).unwrap() as u64 & self.cell_mask;
            let bit_index = cell_index * self.bits_per_cell;
            let start_word = bit_index / BITS_PER_WORD;
            let end_word = (bit_index + self.bits_per_cell - 1) / BITS_PER_WORD;
            let start_offset = bit_index % BITS_PER_WORD;

            legacy_words[start_word] |= value << start_offset;
            if end_word != start_word {
                legacy_words[end_word] |= value >> (BITS_PER_WORD - start_offset);
            }
        }
        legacy_words
    }

    /// The index of the word that contains the cell at `cell_index`.
    fn word_index(&self, cell_index: usize) -> usize {
        cell_index / self.cells_per_word
    }

    /// The bit offset of a cell inside its word, counted from the rightmost
    /// bit.
    fn cell_offset(&self, cell_index: usize) -> usize {
        self.bits_per_cell * (cell_index % self.cells_per_word)
    }
}

impl IntArray for WordedIntArray {
    fn get(&self, index: usize) -> Result<u32, OozeError> {
        if index >= self.size {
            return Err(OozeError::IndexOutOfBounds {
                index,
                len: self.size,
            });
        }

        let word = self.words[self.word_index(index)];
        Ok(((word >> self.cell_offset(index)) & self.cell_mask) as u32)
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

        let word_index = self.word_index(index);
        let cell_offset = self.cell_offset(index);
        let previous = self.get(index)?;

        let mut word = self.words[word_index];
        word &= !(self.cell_mask << cell_offset); // Clear the cell.
        word |= (value as u64 & self.cell_mask) << cell_offset; // Insert the value.
        self.words[word_index] = word;

        Ok(previous)
    }

    fn len(&self) -> usize {
        self.size
    }

    fn max_value(&self) -> u32 {
        self.max_value
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let mut array = WordedIntArray::new(100, 41);
        for i in 0..100 {
            array.set(i, (i as u32 * 7) % 42).unwrap();
        }
        for i in 0..100 {
            assert_eq!(array.get(i).unwrap(), (i as u32 * 7) % 42);
        }
    }

    #[test]
    fn test_set_returns_previous() {
        let mut array = WordedIntArray::new(4, 15);
        assert_eq!(array.set(2, 9).unwrap(), 0);
        assert_eq!(array.set(2, 3).unwrap(), 9);
    }

    #[test]
    fn test_bounds_and_range_errors() {
        let mut array = WordedIntArray::new(8, 15);
        assert!(array.get(8).is_err());
        assert!(array.set(8, 0).is_err());
        assert!(array.set(0, 16).is_err());
    }

    #[test]
    fn test_minimum_cell_width_is_four_bits() {
        // max_value 1 still packs 16 cells per word.
        let array = WordedIntArray::new(64, 1);
        assert_eq!(array.words.len(), 4);
    }

    #[test]
    fn test_raw_round_trip_padded() {
        let mut array = WordedIntArray::new(50, 30);
        for i in 0..50 {
            array.set(i, (i as u32) % 31).unwrap();
        }
        let raw = array.to_raw(false);
        let back = WordedIntArray::from_raw(raw, 50, 30, false).unwrap();
        assert_eq!(array, back);
    }

    #[test]
    fn test_raw_round_trip_legacy() {
        // 5-bit cells straddle word boundaries in the legacy layout.
        let mut array = WordedIntArray::new(100, 31);
        for i in 0..100 {
            array.set(i, (i as u32 * 3) % 32).unwrap();
        }
        let raw = array.to_raw(true);
        // 100 cells * 5 bits = 500 bits -> 8 words.
        assert_eq!(raw.len(), 8);
        let back = WordedIntArray::from_raw(raw, 100, 31, true).unwrap();
        assert_eq!(array, back);
    }

    #[test]
    fn test_legacy_round_trip_exact_fit() {
        // 4096 cells * 4 bits fill 256 words with nothing to spare.
        let mut array = WordedIntArray::new(4096, 15);
        for i in 0..4096 {
            array.set(i, (i as u32) % 16).unwrap();
        }
        let raw = array.to_raw(true);
        assert_eq!(raw.len(), 256);
        let back = WordedIntArray::from_raw(raw, 4096, 15, true).unwrap();
        assert_eq!(array, back);
    }

    #[test]
    fn test_from_raw_rejects_short_buffer() {
        assert!(WordedIntArray::from_raw(vec![0; 2], 64, 15, false).is_err());
        assert!(WordedIntArray::from_raw(vec![0; 2], 64, 15, true).is_err());
    }
}
