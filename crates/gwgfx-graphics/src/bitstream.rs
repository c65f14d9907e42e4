//! Bit reader for the progressive RemoteFX SRL refinement stream.
//!
//! Holds a 32-bit accumulator plus a 32-bit prefetch register so that a `shift` crossing a
//! word boundary can refill from the prefetch without a conditional byte-at-a-time reload.
//! `attach` must be followed by an initial `fetch` before any `peek`/`shift` call; skipping it
//! leaves the accumulator and prefetch both zeroed, silently corrupting every subsequent read.
pub struct BitReader<'a> {
    buffer: &'a [u8],
    byte_pos: usize,
    accumulator: u32,
    accumulator_bits: u32,
    prefetch: u32,
    prefetch_bits: u32,
}

impl<'a> BitReader<'a> {
    pub fn attach(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            byte_pos: 0,
            accumulator: 0,
            accumulator_bits: 0,
            prefetch: 0,
            prefetch_bits: 0,
        }
    }

    /// Primes the accumulator and prefetch registers. Must be called once before any other
    /// operation; `shift`/`peek` assume both registers already hold valid bits.
    pub fn fetch(&mut self) {
        self.accumulator = self.next_word();
        self.accumulator_bits = 32;
        self.prefetch = self.next_word();
        self.prefetch_bits = 32;
    }

    fn next_word(&mut self) -> u32 {
        let mut word = 0_u32;
        for _ in 0..4 {
            word = (word << 8) | u32::from(self.next_byte());
        }
        word
    }

    fn next_byte(&mut self) -> u8 {
        let byte = self.buffer.get(self.byte_pos).copied().unwrap_or(0);
        self.byte_pos += 1;
        byte
    }

    /// Returns the next `nbits` (<= 32) without consuming them.
    pub fn peek(&self, nbits: u32) -> u32 {
        debug_assert!(nbits <= 32);
        if nbits == 0 {
            return 0;
        }
        if nbits <= self.accumulator_bits {
            (self.accumulator >> (self.accumulator_bits - nbits)) & mask(nbits)
        } else {
            let from_acc = self.accumulator_bits;
            let from_prefetch = nbits - from_acc;
            let acc_part = self.accumulator & mask(from_acc);
            let prefetch_part = (self.prefetch >> (self.prefetch_bits - from_prefetch)) & mask(from_prefetch);
            (acc_part << from_prefetch) | prefetch_part
        }
    }

    /// Consumes `nbits` (<= 32, expressed internally as at most two 16-bit shifts so a full
    /// 32-bit shift never drops bits from the accumulator in one step).
    pub fn shift(&mut self, nbits: u32) {
        debug_assert!(nbits <= 32);
        if nbits == 0 {
            return;
        }
        if nbits <= 16 {
            self.shift_at_most_16(nbits);
        } else {
            self.shift_at_most_16(16);
            self.shift_at_most_16(nbits - 16);
        }
    }

    fn shift_at_most_16(&mut self, nbits: u32) {
        if nbits == 0 {
            return;
        }
        if nbits <= self.accumulator_bits {
            self.accumulator_bits -= nbits;
        } else {
            let deficit = nbits - self.accumulator_bits;
            self.accumulator = self.prefetch;
            self.accumulator_bits = self.prefetch_bits - deficit;
            self.prefetch = self.next_word();
            self.prefetch_bits = 32;
        }
    }

    pub fn remaining_bits(&self) -> u32 {
        let consumed_words = u32::try_from(self.byte_pos).unwrap_or(u32::MAX) * 8;
        let total = u32::try_from(self.buffer.len()).unwrap_or(u32::MAX) * 8;
        let held = self.accumulator_bits + self.prefetch_bits;
        total.saturating_sub(consumed_words).saturating_add(held)
    }
}

fn mask(nbits: u32) -> u32 {
    if nbits >= 32 {
        u32::MAX
    } else {
        (1_u32 << nbits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_known_pattern() {
        let data = [0xAA, 0xBB, 0xCC, 0xDD, 0x01, 0x02, 0x03, 0x04];
        let mut reader = BitReader::attach(&data);
        reader.fetch();
        assert_eq!(reader.peek(8), 0xAA);
        reader.shift(8);
        assert_eq!(reader.peek(8), 0xBB);
        reader.shift(8);
        assert_eq!(reader.peek(16), 0xCCDD);
        reader.shift(16);
        assert_eq!(reader.peek(8), 0x01);
    }

    #[test]
    fn shift_crossing_word_boundary_refills() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0x12, 0x34, 0x56, 0x78];
        let mut reader = BitReader::attach(&data);
        reader.fetch();
        reader.shift(32);
        assert_eq!(reader.peek(16), 0x1234);
    }

    #[test]
    fn past_end_of_buffer_reads_zero() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF];
        let mut reader = BitReader::attach(&data);
        reader.fetch();
        reader.shift(32);
        assert_eq!(reader.peek(16), 0);
    }
}
