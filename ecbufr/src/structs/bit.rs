use crate::errors::{Error, Result};

/// Capacity grows in steps of this many bytes.
pub const GROWTH_INCREMENT: usize = 4096;

/// Growable payload buffer with a bit cursor.
///
/// Bits are packed most significant first. The cursor is a byte index plus
/// a bit offset that always stays in `0..8`. `filled` counts the bytes that
/// hold written data, a trailing partial byte included.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitBuffer {
    data: Vec<u8>,
    byte: usize,
    bit: u8,
    filled: usize,
    end_bits: usize,
}

impl BitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut buffer = Self::new();
        buffer.reserve(capacity);
        buffer
    }

    /// Wraps bytes already packed, cursor at the start.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let filled = bytes.len();
        BitBuffer {
            data: bytes,
            byte: 0,
            bit: 0,
            filled,
            end_bits: filled * 8,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Number of bits holding data.
    pub fn len_bits(&self) -> usize {
        self.end_bits
    }

    pub fn is_empty(&self) -> bool {
        self.end_bits == 0
    }

    pub fn position(&self) -> usize {
        self.byte * 8 + self.bit as usize
    }

    pub fn byte_index(&self) -> usize {
        self.byte
    }

    pub fn bit_offset(&self) -> u8 {
        self.bit
    }

    pub fn remaining_bits(&self) -> usize {
        self.end_bits.saturating_sub(self.position())
    }

    pub fn rewind(&mut self) {
        self.byte = 0;
        self.bit = 0;
    }

    /// Moves the cursor to an absolute bit position inside the data.
    pub fn seek(&mut self, bit_pos: usize) -> Result<()> {
        if bit_pos > self.end_bits {
            return Err(Error::OutOfBounds {
                requested: bit_pos,
                available: self.end_bits,
            });
        }
        self.byte = bit_pos / 8;
        self.bit = (bit_pos % 8) as u8;
        Ok(())
    }

    /// Drops all data and moves the cursor to the start, keeping capacity.
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
        self.byte = 0;
        self.bit = 0;
        self.filled = 0;
        self.end_bits = 0;
    }

    /// Ensures room for `len` bytes, rounding up to whole growth steps.
    pub fn reserve(&mut self, len: usize) {
        if len > self.data.len() {
            let missing = len - self.data.len();
            let steps = missing.div_ceil(GROWTH_INCREMENT);
            self.data.resize(self.data.len() + steps * GROWTH_INCREMENT, 0);
        }
    }

    /// The written bytes, trailing partial byte included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.truncate(self.filled);
        self.data
    }

    #[inline]
    fn advance(&mut self, nbits: usize) {
        let pos = self.position() + nbits;
        self.byte = pos / 8;
        self.bit = (pos % 8) as u8;
        if pos > self.end_bits {
            self.end_bits = pos;
            self.filled = pos.div_ceil(8);
        }
    }

    fn check_read(&self, nbits: usize) -> Result<()> {
        let available = self.remaining_bits();
        if nbits > available {
            return Err(Error::OutOfBounds {
                requested: nbits,
                available,
            });
        }
        Ok(())
    }

    /// Writes the `nbits` low order bits of `value`.
    pub fn put_bits(&mut self, value: u64, nbits: u32) -> Result<()> {
        if nbits > 64 {
            return Err(Error::BitWidth(nbits));
        }
        if nbits == 0 {
            return Ok(());
        }

        let projected = (self.position() + nbits as usize).div_ceil(8);
        if projected > self.data.len() {
            self.reserve(projected);
        }

        let mut left = nbits;
        let mut byte = self.byte;
        let mut bit = self.bit as u32;
        while left > 0 {
            // Fill what remains of the current byte before moving on.
            let room = 8 - bit;
            let take = room.min(left);
            let chunk = ((value >> (left - take)) & ((1u64 << take) - 1)) as u8;
            let shift = room - take;
            let mask = (((1u16 << take) - 1) as u8) << shift;
            self.data[byte] = (self.data[byte] & !mask) | (chunk << shift);

            left -= take;
            bit += take;
            if bit == 8 {
                bit = 0;
                byte += 1;
            }
        }

        self.advance(nbits as usize);
        Ok(())
    }

    /// Reads `nbits` bits as an unsigned value.
    pub fn get_bits(&mut self, nbits: u32) -> Result<u64> {
        if nbits > 64 {
            return Err(Error::BitWidth(nbits));
        }
        if nbits == 0 {
            return Ok(0);
        }
        self.check_read(nbits as usize)?;

        let mut value: u64 = 0;
        let mut left = nbits;
        let mut byte = self.byte;
        let mut bit = self.bit as u32;
        while left > 0 {
            let room = 8 - bit;
            let take = room.min(left);
            let chunk = (self.data[byte] >> (room - take)) as u64 & ((1u64 << take) - 1);
            value = (value << take) | chunk;

            left -= take;
            bit += take;
            if bit == 8 {
                bit = 0;
                byte += 1;
            }
        }

        let pos = self.position() + nbits as usize;
        self.byte = pos / 8;
        self.bit = (pos % 8) as u8;
        Ok(value)
    }

    pub fn skip_bits(&mut self, nbits: usize) -> Result<()> {
        self.check_read(nbits)?;
        let pos = self.position() + nbits;
        self.byte = pos / 8;
        self.bit = (pos % 8) as u8;
        Ok(())
    }

    pub fn put_string(&mut self, s: &[u8]) -> Result<()> {
        for c in s {
            self.put_bits(*c as u64, 8)?;
        }
        Ok(())
    }

    /// Writes exactly `enclen` characters, space padded on the right or
    /// truncated.
    pub fn put_padstring(&mut self, s: &[u8], enclen: usize) -> Result<()> {
        let used = s.len().min(enclen);
        self.put_string(&s[..used])?;
        for _ in used..enclen {
            self.put_bits(b' ' as u64, 8)?;
        }
        Ok(())
    }

    pub fn get_string(&mut self, len: usize) -> Result<Vec<u8>> {
        self.check_read(len * 8)?;
        if self.bit == 0 {
            let s = self.data[self.byte..self.byte + len].to_vec();
            self.byte += len;
            return Ok(s);
        }

        let mut chars = Vec::with_capacity(len);
        for _ in 0..len {
            chars.push(self.get_bits(8)? as u8);
        }
        Ok(chars)
    }

    /// Writes the first `nbits` bits of `bytes`, most significant first.
    pub fn put_bitstream(&mut self, bytes: &[u8], nbits: usize) -> Result<()> {
        if nbits > bytes.len() * 8 {
            return Err(Error::OutOfBounds {
                requested: nbits,
                available: bytes.len() * 8,
            });
        }
        let whole = nbits / 8;
        for b in &bytes[..whole] {
            self.put_bits(*b as u64, 8)?;
        }
        let rest = (nbits % 8) as u32;
        if rest > 0 {
            self.put_bits((bytes[whole] >> (8 - rest)) as u64, rest)?;
        }
        Ok(())
    }

    /// Zero bits up to the next byte boundary.
    pub fn align(&mut self) -> Result<()> {
        if self.bit != 0 {
            self.put_bits(0, 8 - self.bit as u32)?;
        }
        Ok(())
    }
}
