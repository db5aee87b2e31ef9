//! Stream reader mirroring [`DataStreamWriter`](crate::DataStreamWriter).

use crate::model::{CompressionModel, MAX_SYMBOL_LENGTH};

/// Read cursor over a byte slice.
///
/// Whole bytes are loaded lazily into a 64-bit shift register (up to 56 bits
/// buffered) so that up to 32 bits can always be consumed in one step when
/// enough bytes remain. On underflow reads return 0 / default values and set
/// a failure flag; they never panic.
pub struct DataStreamReader<'a> {
    buffer: &'a [u8],
    byte_pos: usize,
    bit_buffer: u64,
    bit_count: u32,
    failed_reads: u32,
}

impl<'a> DataStreamReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            byte_pos: 0,
            bit_buffer: 0,
            bit_count: 0,
            failed_reads: 0,
        }
    }

    /// Total length of the underlying slice in bytes.
    #[inline]
    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    /// Bits consumed so far.
    #[inline]
    pub fn bits_read(&self) -> usize {
        self.byte_pos * 8 - self.bit_count as usize
    }

    #[inline]
    pub fn has_failed_reads(&self) -> bool {
        self.failed_reads > 0
    }

    #[inline]
    pub fn failed_reads(&self) -> u32 {
        self.failed_reads
    }

    #[inline]
    fn fail(&mut self) {
        self.failed_reads += 1;
    }

    #[inline]
    fn fill_bit_buffer(&mut self) {
        while self.bit_count <= 56 && self.byte_pos < self.buffer.len() {
            self.bit_buffer |= (self.buffer[self.byte_pos] as u64) << self.bit_count;
            self.byte_pos += 1;
            self.bit_count += 8;
        }
    }

    /// Skips to the next byte boundary and hands whole buffered bytes back to
    /// the stream; the exact mirror of the writer's flush padding.
    fn align_to_byte(&mut self) {
        let rem = self.bits_read() & 7;
        if rem != 0 {
            let skip = 8 - rem as u32;
            if self.bit_count >= skip {
                self.bit_buffer >>= skip;
                self.bit_count -= skip;
            } else {
                // Stream ended mid-byte; nothing left to give back.
                self.bit_buffer = 0;
                self.bit_count = 0;
                return;
            }
        }
        self.byte_pos -= (self.bit_count >> 3) as usize;
        self.bit_buffer = 0;
        self.bit_count = 0;
    }

    /// Reads up to 32 raw bits, LSB-first. Returns 0 on underflow.
    pub fn read_raw_bits(&mut self, bits: u32) -> u32 {
        if bits > 32 {
            self.fail();
            return 0;
        }
        self.fill_bit_buffer();
        if self.bit_count < bits {
            self.fail();
            return 0;
        }
        let value = (self.bit_buffer & ((1u64 << bits) - 1)) as u32;
        self.bit_buffer >>= bits;
        self.bit_count -= bits;
        value
    }

    /// Byte-aligned bulk read; zero-fills `dst` on underflow.
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> bool {
        self.align_to_byte();
        if self.byte_pos + dst.len() > self.buffer.len() {
            self.fail();
            dst.fill(0);
            return false;
        }
        dst.copy_from_slice(&self.buffer[self.byte_pos..self.byte_pos + dst.len()]);
        self.byte_pos += dst.len();
        true
    }

    pub fn read_u8(&mut self) -> u8 {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b);
        b[0]
    }

    pub fn read_i8(&mut self) -> i8 {
        self.read_u8() as i8
    }

    pub fn read_u16(&mut self) -> u16 {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b);
        u16::from_ne_bytes(b)
    }

    pub fn read_i16(&mut self) -> i16 {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b);
        i16::from_ne_bytes(b)
    }

    pub fn read_u32(&mut self) -> u32 {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b);
        u32::from_ne_bytes(b)
    }

    pub fn read_i32(&mut self) -> i32 {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b);
        i32::from_ne_bytes(b)
    }

    pub fn read_u64(&mut self) -> u64 {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b);
        u64::from_ne_bytes(b)
    }

    pub fn read_f32(&mut self) -> f32 {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b);
        f32::from_ne_bytes(b)
    }

    pub fn read_u16_be(&mut self) -> u16 {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b);
        u16::from_be_bytes(b)
    }

    pub fn read_u32_be(&mut self) -> u32 {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b);
        u32::from_be_bytes(b)
    }

    pub fn read_u64_be(&mut self) -> u64 {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b);
        u64::from_be_bytes(b)
    }

    /// Huffman bucket symbol followed by the raw remainder bits.
    pub fn read_packed_uint(&mut self, model: &CompressionModel) -> u32 {
        self.fill_bit_buffer();
        let peek = (self.bit_buffer & ((1u64 << MAX_SYMBOL_LENGTH) - 1)) as usize;
        let entry = model.decode_table[peek];
        let code_len = (entry & 0xff) as u32;
        let symbol = (entry >> 8) as usize;
        if code_len == 0 || self.bit_count < code_len {
            self.fail();
            return 0;
        }
        self.bit_buffer >>= code_len;
        self.bit_count -= code_len;
        let bits = model.bucket_sizes[symbol] as u32;
        model.bucket_offsets[symbol].wrapping_add(self.read_raw_bits(bits))
    }

    pub fn read_packed_int(&mut self, model: &CompressionModel) -> i32 {
        let folded = self.read_packed_uint(model);
        ((folded >> 1) as i32) ^ -((folded & 1) as i32)
    }

    pub fn read_packed_float(&mut self) -> f32 {
        self.read_packed_float_delta(0.0)
    }

    pub fn read_packed_uint_delta(&mut self, baseline: u32, model: &CompressionModel) -> u32 {
        let diff = self.read_packed_int(model);
        baseline.wrapping_sub(diff as u32)
    }

    pub fn read_packed_int_delta(&mut self, baseline: i32, model: &CompressionModel) -> i32 {
        let diff = self.read_packed_int(model);
        baseline.wrapping_sub(diff)
    }

    pub fn read_packed_float_delta(&mut self, baseline: f32) -> f32 {
        if self.read_raw_bits(1) == 0 {
            baseline
        } else {
            f32::from_bits(self.read_raw_bits(32))
        }
    }

    /// 16-bit length followed by UTF-8 bytes. Returns an empty string on
    /// underflow or malformed length.
    pub fn read_string(&mut self) -> String {
        let len = self.read_u16() as usize;
        let mut bytes = vec![0u8; len];
        if !self.read_bytes(&mut bytes) {
            return String::new();
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Mirror of the writer's packed string delta.
    pub fn read_packed_string_delta(
        &mut self,
        baseline: &str,
        model: &CompressionModel,
    ) -> String {
        let base = baseline.as_bytes();
        let failed_before = self.failed_reads;
        let len = self.read_packed_uint_delta(base.len() as u32, model) as usize;
        if self.failed_reads > failed_before {
            return String::new();
        }
        if len > u16::MAX as usize {
            self.fail();
            return String::new();
        }

        let mut bytes = Vec::with_capacity(len);
        let common = len.min(base.len());
        for &b in base.iter().take(common) {
            bytes.push(self.read_packed_uint_delta(b as u32, model) as u8);
        }
        for _ in common..len {
            bytes.push(self.read_packed_uint(model) as u8);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
