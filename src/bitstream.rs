// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-granular stream writer and reader with Exp-Golomb coding.
//!
//! The writer appends MSB-first bit fields into a chain of fixed-size
//! chunks, so committed bytes are never moved once written and appends stay
//! O(1) amortized regardless of stream length. The reader is a forward
//! cursor over a caller-owned byte slice and never allocates.

use thiserror::Error;

/// Capacity of one backing chunk of the writer.
const DATA_CHUNK_SIZE: usize = 4096;

struct DataChunk {
    len: usize,
    data: [u8; DATA_CHUNK_SIZE],
}

impl DataChunk {
    fn new() -> Box<Self> {
        Box::new(DataChunk {
            len: 0,
            data: [0; DATA_CHUNK_SIZE],
        })
    }
}

#[derive(Debug, Error)]
pub enum BitWriterError {
    #[error("too many bits to write: {0}")]
    TooManyBits(u32),
    #[error("value {0} exceeds the largest Exp-Golomb code")]
    UeOverflow(u32),
}

pub type BitWriterResult<T> = std::result::Result<T, BitWriterError>;

/// Append-only MSB-first bit packer over chunked storage.
///
/// Bits accumulate in a one-byte shift register; every eight bits the byte
/// is committed to the current chunk. Chunks are individually boxed: growing
/// the chunk index never moves bytes that were already written.
#[derive(Default)]
pub struct BitstreamWriter {
    chunks: Vec<Box<DataChunk>>,
    /// Number of committed (whole) bytes.
    len: u64,
    /// Pending bits, left-aligned as they arrive.
    shift: u8,
    /// Number of pending bits in `shift`, always < 8.
    cur_bit: u8,
}

impl BitstreamWriter {
    pub fn new() -> Self {
        Default::default()
    }

    fn write_byte(&mut self, byte: u8) {
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len < DATA_CHUNK_SIZE => {
                chunk.data[chunk.len] = byte;
                chunk.len += 1;
            }
            _ => {
                let mut chunk = DataChunk::new();
                chunk.data[0] = byte;
                chunk.len = 1;
                self.chunks.push(chunk);
            }
        }
        self.len += 1;
    }

    fn put_bits(&mut self, data: u32, bits: u8) {
        let mut bits = bits;
        while bits > 0 {
            bits -= 1;
            self.shift <<= 1;
            if data & (1 << bits) != 0 {
                self.shift |= 1;
            }
            self.cur_bit += 1;

            if self.cur_bit == 8 {
                self.cur_bit = 0;
                let byte = self.shift;
                self.write_byte(byte);
            }
        }
    }

    /// Appends the low `bits` bits of `data`, most significant first.
    /// A width over 32 is a contract violation: reported, nothing written.
    pub fn put(&mut self, data: u32, bits: u8) -> BitWriterResult<()> {
        if bits > 32 {
            return Err(BitWriterError::TooManyBits(u32::from(bits)));
        }

        self.put_bits(data, bits);
        Ok(())
    }

    /// Appends an unsigned Exp-Golomb code, `u32::MAX - 1` at most.
    pub fn put_ue(&mut self, data: u32) -> BitWriterResult<()> {
        if data == u32::MAX {
            return Err(BitWriterError::UeOverflow(data));
        }

        let data_log2 = 31 - (data + 1).leading_zeros();
        let prefix = 1u32 << data_log2;
        let suffix = data + 1 - prefix;
        let num_bits = data_log2 * 2 + 1;
        let value = prefix | suffix;

        if num_bits <= 32 {
            self.put_bits(value, num_bits as u8);
        } else {
            // Codes longer than 32 bits: a zero high-order prefix first,
            // then the low 32 bits.
            self.put_bits(0, (num_bits - 32) as u8);
            self.put_bits(value, 32);
        }
        Ok(())
    }

    /// Appends a signed Exp-Golomb code: positive values map to odd codes,
    /// non-positive values to even codes. `i32::MIN` maps past the largest
    /// code and is rejected.
    pub fn put_se(&mut self, data: i32) -> BitWriterResult<()> {
        if data == i32::MIN {
            return Err(BitWriterError::UeOverflow(data.unsigned_abs()));
        }
        let abs = data.unsigned_abs();
        let mapped = if data <= 0 { abs << 1 } else { (abs << 1) - 1 };
        self.put_ue(mapped)
    }

    /// Pads the stream with zero bits up to the next byte boundary.
    pub fn align_zero(&mut self) {
        if self.cur_bit & 7 != 0 {
            self.put_bits(0, 8 - (self.cur_bit & 7));
        }
    }

    /// Total number of bits written so far, including pending sub-byte bits.
    pub fn tell(&self) -> u64 {
        self.len * 8 + u64::from(self.cur_bit)
    }

    /// Number of committed whole bytes. Pending sub-byte bits are not
    /// included; call [`Self::align_zero`] first for a whole-byte copy.
    pub fn byte_len(&self) -> usize {
        self.len as usize
    }

    /// Copies all committed bytes into `dst`, which must hold at least
    /// [`Self::byte_len`] bytes.
    pub fn copy_to(&self, dst: &mut [u8]) {
        let mut off = 0;
        for chunk in &self.chunks {
            dst[off..off + chunk.len].copy_from_slice(&chunk.data[..chunk.len]);
            off += chunk.len;
        }
    }

    /// Collects all committed bytes into a vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.byte_len()];
        self.copy_to(&mut out);
        out
    }

    /// Releases all chunks and resets to the empty state.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
        self.shift = 0;
        self.cur_bit = 0;
    }
}

#[derive(Debug, Error)]
pub enum BitReaderError {
    #[error("too many bits to read: {0}")]
    TooManyBits(u32),
    #[error("reader ran out of bits")]
    OutOfBits,
}

pub type BitReaderResult<T> = std::result::Result<T, BitReaderError>;

/// Forward bit cursor over a caller-owned byte buffer of known bit length.
pub struct BitstreamReader<'a> {
    buf: &'a [u8],
    size_in_bits: usize,
    byte_offset: usize,
    /// Bit position inside the current byte, always < 8.
    bit_offset: usize,
}

impl<'a> BitstreamReader<'a> {
    pub fn new(data: &'a [u8], bit_size: usize) -> Self {
        let max_bits = data.len() * 8;
        if bit_size > max_bits {
            log::error!(
                "bit_size {} over buffer capacity {}, clamping",
                bit_size,
                max_bits
            );
        }
        Self {
            buf: data,
            size_in_bits: bit_size.min(max_bits),
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Number of bits already consumed.
    pub fn bits_count(&self) -> usize {
        self.byte_offset * 8 + self.bit_offset
    }

    /// Number of bits left to consume.
    pub fn bits_left(&self) -> usize {
        self.size_in_bits - self.bits_count()
    }

    /// Advances the cursor by `n` bits. Skipping past the end of the buffer
    /// is a soft failure: the cursor is left unchanged.
    pub fn skip_bits(&mut self, n: usize) {
        let new_offset = self.bits_count() + n;
        if new_offset > self.size_in_bits {
            log::debug!(
                "skip {} at bit {} over total size {}, stop",
                n,
                self.bits_count(),
                self.size_in_bits
            );
            return;
        }

        self.byte_offset = new_offset / 8;
        self.bit_offset = new_offset % 8;
    }

    fn get_1bit(&mut self) -> u32 {
        let ret = (self.buf[self.byte_offset] >> (7 - self.bit_offset)) & 0x1;
        if self.bit_offset == 7 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        } else {
            self.bit_offset += 1;
        }
        u32::from(ret)
    }

    // Byte-aligned-throughput fast path for a whole byte at any bit phase.
    fn get_u8(&mut self) -> u32 {
        let mut ret = self.buf[self.byte_offset] << self.bit_offset;
        self.byte_offset += 1;
        if self.bit_offset != 0 {
            ret |= self.buf[self.byte_offset] >> (8 - self.bit_offset);
        }
        u32::from(ret)
    }

    fn get_u16(&mut self) -> u32 {
        let src = &self.buf[self.byte_offset..];
        let mut ret = (u32::from(src[0]) << 8) | u32::from(src[1]);
        if self.bit_offset != 0 {
            ret = (ret << self.bit_offset) & 0xffff;
            ret |= u32::from(src[2]) >> (8 - self.bit_offset);
        }
        self.byte_offset += 2;
        ret
    }

    fn get_8bits_or_less(&mut self, n: usize) -> u32 {
        let mut ret = 0;
        for _ in 0..n {
            ret = (ret << 1) | self.get_1bit();
        }
        ret
    }

    /// Reads `n` bits (up to 32) MSB-first. The specialized paths for
    /// byte-sized reads are an optimization only; every width produces the
    /// same bits as the single-bit loop.
    pub fn get_bits(&mut self, n: usize) -> BitReaderResult<u32> {
        if n > 32 {
            return Err(BitReaderError::TooManyBits(n as u32));
        }
        if n > self.bits_left() {
            return Err(BitReaderError::OutOfBits);
        }

        let ret = match n {
            0 => 0,
            1..=7 => self.get_8bits_or_less(n),
            8 => self.get_u8(),
            9..=15 => {
                let high = self.get_8bits_or_less(n % 8);
                (high << 8) | self.get_u8()
            }
            16 => self.get_u16(),
            17..=23 => {
                let mut ret = self.get_8bits_or_less(n % 16) << 16;
                ret |= self.get_u8() << 8;
                ret |= self.get_u8();
                ret
            }
            _ => {
                let mut ret = self.get_8bits_or_less(n % 24) << 24;
                ret |= self.get_u8() << 16;
                ret |= self.get_u8() << 8;
                ret |= self.get_u8();
                ret
            }
        };
        Ok(ret)
    }

    /// Reads an unsigned Exp-Golomb code ue(v). The leading-zero scan is
    /// capped at 32 bits; on corrupt all-zero input the call returns 0
    /// without advancing further.
    pub fn get_ue(&mut self) -> BitReaderResult<u32> {
        let mut leading = 0;
        while self.get_bits(1)? == 0 {
            leading += 1;
            if leading == 32 {
                return Ok(0);
            }
        }

        let suffix = self.get_bits(leading)?;
        Ok(((1u32 << leading) - 1) + suffix)
    }

    /// Reads a signed Exp-Golomb code se(v): odd codes decode to positive
    /// values, even codes to non-positive ones.
    pub fn get_se(&mut self) -> BitReaderResult<i32> {
        let ue = self.get_ue()?;
        if ue & 1 != 0 {
            Ok(((ue >> 1) + 1) as i32)
        } else {
            Ok(-((ue >> 1) as i32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_single_bits() {
        let mut writer = BitstreamWriter::new();
        for bit in [1, 0, 0, 0, 1, 1, 1, 1] {
            writer.put(bit, 1).unwrap();
        }
        assert_eq!(writer.to_vec(), vec![0b10001111u8]);
    }

    #[test]
    fn writer_multi_bit_fields() {
        let mut writer = BitstreamWriter::new();
        writer.put(0b100, 3).unwrap();
        writer.put(0b101, 3).unwrap();
        writer.put(0b011, 3).unwrap();
        writer.align_zero();
        assert_eq!(writer.to_vec(), vec![0b10010101u8, 0b10000000u8]);
    }

    #[test]
    fn writer_rejects_wide_put() {
        let mut writer = BitstreamWriter::new();
        writer.put(1, 4).unwrap();
        assert!(writer.put(0, 33).is_err());
        // The failed call must not have written anything.
        assert_eq!(writer.tell(), 4);
    }

    #[test]
    fn writer_tell_counts_bits() {
        let mut writer = BitstreamWriter::new();
        let widths = [1u8, 7, 8, 3, 32, 17, 12];
        for (i, w) in widths.iter().enumerate() {
            writer.put(i as u32, *w).unwrap();
        }
        let total: u64 = widths.iter().map(|w| u64::from(*w)).sum();
        assert_eq!(writer.tell(), total);
    }

    #[test]
    fn writer_align_is_idempotent() {
        let mut writer = BitstreamWriter::new();
        writer.put(1, 3).unwrap();
        writer.align_zero();
        assert_eq!(writer.tell(), 8);
        writer.align_zero();
        assert_eq!(writer.tell(), 8);
    }

    #[test]
    fn writer_crosses_chunks_without_corruption() {
        let mut writer = BitstreamWriter::new();
        for i in 0..DATA_CHUNK_SIZE + 100 {
            writer.put(i as u32 & 0xff, 8).unwrap();
        }
        let bytes = writer.to_vec();
        assert_eq!(bytes.len(), DATA_CHUNK_SIZE + 100);
        for (i, b) in bytes.iter().enumerate() {
            assert_eq!(*b, i as u8);
        }
    }

    #[test]
    fn writer_clear_resets() {
        let mut writer = BitstreamWriter::new();
        writer.put(0xff, 8).unwrap();
        writer.put(1, 3).unwrap();
        writer.clear();
        assert_eq!(writer.tell(), 0);
        assert!(writer.to_vec().is_empty());
    }

    #[test]
    fn simple_first_few_ue() {
        fn single_ue(value: u32) -> Vec<u8> {
            let mut writer = BitstreamWriter::new();
            writer.put_ue(value).unwrap();
            writer.align_zero();
            writer.to_vec()
        }

        assert_eq!(single_ue(0), vec![0b10000000u8]);
        assert_eq!(single_ue(1), vec![0b01000000u8]);
        assert_eq!(single_ue(2), vec![0b01100000u8]);
        assert_eq!(single_ue(3), vec![0b00100000u8]);
        assert_eq!(single_ue(4), vec![0b00101000u8]);
        assert_eq!(single_ue(5), vec![0b00110000u8]);
        assert_eq!(single_ue(6), vec![0b00111000u8]);
        assert_eq!(single_ue(7), vec![0b00010000u8]);
        assert_eq!(single_ue(8), vec![0b00010010u8]);
        assert_eq!(single_ue(9), vec![0b00010100u8]);
    }

    #[test]
    fn ue_identity() {
        let mut values: Vec<u32> = (0..64).collect();
        values.extend([255, 256, 1000, 65534, 65535, 1 << 20]);

        for v in values {
            let mut writer = BitstreamWriter::new();
            writer.put_ue(v).unwrap();
            writer.align_zero();
            let bytes = writer.to_vec();
            let mut reader = BitstreamReader::new(&bytes, bytes.len() * 8);
            assert_eq!(reader.get_ue().unwrap(), v, "value {}", v);
        }
    }

    #[test]
    fn se_identity() {
        let values = [0i32, 1, -1, 2, -2, 17, -17, 4096, -4096, 500000, -500000];
        for v in values {
            let mut writer = BitstreamWriter::new();
            writer.put_se(v).unwrap();
            writer.align_zero();
            let bytes = writer.to_vec();
            let mut reader = BitstreamReader::new(&bytes, bytes.len() * 8);
            assert_eq!(reader.get_se().unwrap(), v, "value {}", v);
        }
    }

    #[test]
    fn ue_max_value() {
        // 2^32 - 2 is the largest encodable value: 31 zeros, marker, 31 bits.
        let mut writer = BitstreamWriter::new();
        writer.put_ue(u32::MAX - 1).unwrap();
        assert_eq!(writer.tell(), 63);
        writer.align_zero();
        let bytes = writer.to_vec();
        let mut reader = BitstreamReader::new(&bytes, bytes.len() * 8);
        assert_eq!(reader.get_ue().unwrap(), u32::MAX - 1);

        let mut writer = BitstreamWriter::new();
        assert!(writer.put_ue(u32::MAX).is_err());
        assert_eq!(writer.tell(), 0);
    }

    #[test]
    fn se_extreme_values() {
        // i32::MAX and -(i32::MAX) map to the two largest codes.
        for v in [i32::MAX, -i32::MAX] {
            let mut writer = BitstreamWriter::new();
            writer.put_se(v).unwrap();
            writer.align_zero();
            let bytes = writer.to_vec();
            let mut reader = BitstreamReader::new(&bytes, bytes.len() * 8);
            assert_eq!(reader.get_se().unwrap(), v);
        }

        // i32::MIN would map to 2^32, past the largest code: error, no bits.
        let mut writer = BitstreamWriter::new();
        assert!(writer.put_se(i32::MIN).is_err());
        assert_eq!(writer.tell(), 0);
    }

    #[test]
    fn reader_fast_paths_match_bit_loop() {
        let data: Vec<u8> = (0..16).map(|i| (i * 37 + 11) as u8).collect();

        for n in 0..=32usize {
            // Offset by a few bits first so fast paths run unaligned too.
            for lead in 0..8usize {
                let mut fast = BitstreamReader::new(&data, data.len() * 8);
                fast.skip_bits(lead);
                let got = fast.get_bits(n).unwrap();

                let mut slow = BitstreamReader::new(&data, data.len() * 8);
                slow.skip_bits(lead);
                let mut want = 0u32;
                for _ in 0..n {
                    want = (want << 1) | slow.get_bits(1).unwrap();
                }
                assert_eq!(got, want, "n={} lead={}", n, lead);
                assert_eq!(fast.bits_count(), slow.bits_count());
            }
        }
    }

    #[test]
    fn reader_bounds() {
        let data = [0xab, 0xcd];
        let mut reader = BitstreamReader::new(&data, 16);
        assert_eq!(reader.bits_left(), 16);
        assert!(reader.get_bits(17).is_err());
        assert_eq!(reader.get_bits(16).unwrap(), 0xabcd);
        assert!(matches!(reader.get_bits(1), Err(BitReaderError::OutOfBits)));
    }

    #[test]
    fn reader_skip_past_end_is_noop() {
        let data = [0u8; 4];
        let mut reader = BitstreamReader::new(&data, 32);
        reader.skip_bits(8);
        assert_eq!(reader.bits_count(), 8);
        reader.skip_bits(100);
        assert_eq!(reader.bits_count(), 8);
    }

    #[test]
    fn ue_corrupt_input_guard() {
        // 32 leading zeros: give up and report 0 instead of scanning on.
        let data = [0u8; 8];
        let mut reader = BitstreamReader::new(&data, 64);
        assert_eq!(reader.get_ue().unwrap(), 0);
        assert_eq!(reader.bits_count(), 32);
    }

    #[test]
    fn writer_reader_mixed_sequence() {
        let mut writer = BitstreamWriter::new();
        writer.put_ue(10).unwrap();
        writer.put_se(-42).unwrap();
        writer.put(0x5a5, 12).unwrap();
        writer.put_se(3).unwrap();
        writer.put_ue(5).unwrap();
        writer.align_zero();

        let bytes = writer.to_vec();
        let mut reader = BitstreamReader::new(&bytes, bytes.len() * 8);
        assert_eq!(reader.get_ue().unwrap(), 10);
        assert_eq!(reader.get_se().unwrap(), -42);
        assert_eq!(reader.get_bits(12).unwrap(), 0x5a5);
        assert_eq!(reader.get_se().unwrap(), 3);
        assert_eq!(reader.get_ue().unwrap(), 5);
    }
}
