//! Stream writer with byte-aligned and bit-granular cursors.

use crate::model::CompressionModel;

/// Opaque snapshot of a writer cursor.
///
/// Lets a caller suspend serialization, release the buffer borrow, and pick
/// the cursor back up later with [`DataStreamWriter::resume`]. The default
/// state is the start of an untouched stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterState {
    byte_pos: usize,
    bit_buffer: u64,
    bit_count: u32,
    failed_writes: u32,
}

/// Write cursor over a caller-provided byte buffer.
///
/// Two cursors share the buffer: a byte-aligned position for bulk writes and
/// a 64-bit shift register for bit-granular writes (packed LSB-first).
/// The length in bits is `byte_pos * 8 + pending_bits`.
///
/// Every write returns `bool` and never panics on overflow: capacity is
/// pre-checked including pending bits, and on failure nothing is mutated and
/// `failed_writes` goes up by exactly one.
pub struct DataStreamWriter<'a> {
    buffer: &'a mut [u8],
    byte_pos: usize,
    bit_buffer: u64,
    bit_count: u32,
    failed_writes: u32,
}

impl<'a> DataStreamWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self::resume(buffer, WriterState::default())
    }

    /// Continues a suspended write session over the same buffer.
    pub fn resume(buffer: &'a mut [u8], state: WriterState) -> Self {
        Self {
            buffer,
            byte_pos: state.byte_pos,
            bit_buffer: state.bit_buffer,
            bit_count: state.bit_count,
            failed_writes: state.failed_writes,
        }
    }

    /// Snapshot of the cursor for a later [`DataStreamWriter::resume`].
    pub fn save(&self) -> WriterState {
        self.snapshot()
    }

    /// Total capacity of the underlying buffer in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Length written so far in bits, including pending unflushed bits.
    #[inline]
    pub fn length_in_bits(&self) -> usize {
        self.byte_pos * 8 + self.bit_count as usize
    }

    /// Length written so far in whole bytes, rounding pending bits up.
    #[inline]
    pub fn length(&self) -> usize {
        (self.length_in_bits() + 7) / 8
    }

    /// Number of writes rejected for capacity or argument reasons.
    #[inline]
    pub fn failed_writes(&self) -> u32 {
        self.failed_writes
    }

    #[inline]
    pub fn has_failed_writes(&self) -> bool {
        self.failed_writes > 0
    }

    /// Pads pending bits out to the next byte boundary.
    ///
    /// Call before handing the buffer off; bulk byte writes align implicitly.
    pub fn flush(&mut self) {
        while self.bit_count > 0 {
            // The write that produced these bits already reserved this byte.
            self.buffer[self.byte_pos] = self.bit_buffer as u8;
            self.byte_pos += 1;
            self.bit_buffer >>= 8;
            self.bit_count = self.bit_count.saturating_sub(8);
        }
        self.bit_buffer = 0;
    }

    #[inline]
    fn has_capacity_for_bits(&self, bits: u32) -> bool {
        self.byte_pos + ((self.bit_count + bits + 7) >> 3) as usize <= self.buffer.len()
    }

    #[inline]
    fn has_capacity_for_bytes(&self, count: usize) -> bool {
        self.byte_pos + ((self.bit_count + 7) >> 3) as usize + count <= self.buffer.len()
    }

    #[inline]
    fn fail(&mut self) -> bool {
        self.failed_writes += 1;
        false
    }

    /// Appends bits to the shift register and spills whole bytes.
    /// Capacity must have been checked by the caller.
    #[inline]
    fn push_bits(&mut self, value: u32, bits: u32) {
        self.bit_buffer |= (value as u64) << self.bit_count;
        self.bit_count += bits;
        while self.bit_count >= 8 {
            self.buffer[self.byte_pos] = self.bit_buffer as u8;
            self.byte_pos += 1;
            self.bit_buffer >>= 8;
            self.bit_count -= 8;
        }
    }

    /// Bulk byte copy. Flushes pending bits to a byte boundary first.
    pub fn write_bytes(&mut self, data: &[u8]) -> bool {
        if !self.has_capacity_for_bytes(data.len()) {
            return self.fail();
        }
        self.flush();
        self.buffer[self.byte_pos..self.byte_pos + data.len()].copy_from_slice(data);
        self.byte_pos += data.len();
        true
    }

    pub fn write_u8(&mut self, value: u8) -> bool {
        self.write_bytes(&[value])
    }

    pub fn write_i8(&mut self, value: i8) -> bool {
        self.write_bytes(&[value as u8])
    }

    pub fn write_u16(&mut self, value: u16) -> bool {
        self.write_bytes(&value.to_ne_bytes())
    }

    pub fn write_i16(&mut self, value: i16) -> bool {
        self.write_bytes(&value.to_ne_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> bool {
        self.write_bytes(&value.to_ne_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> bool {
        self.write_bytes(&value.to_ne_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> bool {
        self.write_bytes(&value.to_ne_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> bool {
        self.write_bytes(&value.to_ne_bytes())
    }

    /// Explicit big-endian write; the only portable path between peers of
    /// differing endianness.
    pub fn write_u16_be(&mut self, value: u16) -> bool {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32_be(&mut self, value: u32) -> bool {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u64_be(&mut self, value: u64) -> bool {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Writes `bits` raw bits of `value`, LSB-first. `bits` must be in
    /// `[0, 32]` and `value` must fit in `bits` bits.
    pub fn write_raw_bits(&mut self, value: u32, bits: u32) -> bool {
        if bits > 32 || (bits < 32 && value >= 1u32 << bits) {
            return self.fail();
        }
        if !self.has_capacity_for_bits(bits) {
            return self.fail();
        }
        self.push_bits(value, bits);
        true
    }

    /// Huffman bucket symbol followed by the raw remainder bits.
    ///
    /// Checked and written atomically: a failed packed write leaves the
    /// cursor untouched.
    pub fn write_packed_uint(&mut self, value: u32, model: &CompressionModel) -> bool {
        let bucket = model.bucket(value);
        let entry = model.encode_table[bucket];
        let code = (entry >> 8) as u32;
        let code_len = (entry & 0xff) as u32;
        let bits = model.bucket_sizes[bucket] as u32;
        if !self.has_capacity_for_bits(code_len + bits) {
            return self.fail();
        }
        self.push_bits(code, code_len);
        self.push_bits(value.wrapping_sub(model.bucket_offsets[bucket]), bits);
        true
    }

    /// Zig-zag folds the value so small magnitudes of either sign pack small.
    pub fn write_packed_int(&mut self, value: i32, model: &CompressionModel) -> bool {
        let folded = ((value << 1) ^ (value >> 31)) as u32;
        self.write_packed_uint(folded, model)
    }

    /// Packed float, delta form against a baseline of `0.0`.
    pub fn write_packed_float(&mut self, value: f32) -> bool {
        self.write_packed_float_delta(value, 0.0)
    }

    /// Packed difference `baseline - value`.
    pub fn write_packed_uint_delta(
        &mut self,
        value: u32,
        baseline: u32,
        model: &CompressionModel,
    ) -> bool {
        let diff = baseline.wrapping_sub(value) as i32;
        self.write_packed_int(diff, model)
    }

    pub fn write_packed_int_delta(
        &mut self,
        value: i32,
        baseline: i32,
        model: &CompressionModel,
    ) -> bool {
        let diff = baseline.wrapping_sub(value);
        self.write_packed_int(diff, model)
    }

    /// One bit: 0 when the bit patterns match (no payload), 1 followed by the
    /// 32 raw bits of the IEEE-754 pattern otherwise.
    pub fn write_packed_float_delta(&mut self, value: f32, baseline: f32) -> bool {
        if value.to_bits() == baseline.to_bits() {
            return self.write_raw_bits(0, 1);
        }
        if !self.has_capacity_for_bits(33) {
            return self.fail();
        }
        self.push_bits(1, 1);
        self.push_bits(value.to_bits(), 32);
        true
    }

    /// 16-bit length followed by the UTF-8 bytes, as one atomic write.
    pub fn write_string(&mut self, value: &str) -> bool {
        let bytes = value.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return self.fail();
        }
        if !self.has_capacity_for_bytes(2 + bytes.len()) {
            return self.fail();
        }
        self.flush();
        let len = bytes.len() as u16;
        self.buffer[self.byte_pos..self.byte_pos + 2].copy_from_slice(&len.to_ne_bytes());
        self.byte_pos += 2;
        self.buffer[self.byte_pos..self.byte_pos + bytes.len()].copy_from_slice(bytes);
        self.byte_pos += bytes.len();
        true
    }

    /// Length delta, packed deltas per byte over the common prefix, raw
    /// packed bytes beyond the baseline length. Any sub-write failure rolls
    /// the whole string write back and counts as a single failed write.
    pub fn write_packed_string_delta(
        &mut self,
        value: &str,
        baseline: &str,
        model: &CompressionModel,
    ) -> bool {
        let bytes = value.as_bytes();
        let base = baseline.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return self.fail();
        }

        let saved = self.snapshot();
        let mut ok = self.write_packed_uint_delta(bytes.len() as u32, base.len() as u32, model);

        let common = bytes.len().min(base.len());
        for i in 0..common {
            if !ok {
                break;
            }
            ok = self.write_packed_uint_delta(bytes[i] as u32, base[i] as u32, model);
        }
        for &b in bytes.iter().skip(common) {
            if !ok {
                break;
            }
            ok = self.write_packed_uint(b as u32, model);
        }

        if !ok {
            self.restore(saved);
            self.failed_writes = saved.failed_writes + 1;
            return false;
        }
        true
    }

    #[inline]
    fn snapshot(&self) -> WriterState {
        WriterState {
            byte_pos: self.byte_pos,
            bit_buffer: self.bit_buffer,
            bit_count: self.bit_count,
            failed_writes: self.failed_writes,
        }
    }

    #[inline]
    fn restore(&mut self, state: WriterState) {
        self.byte_pos = state.byte_pos;
        self.bit_buffer = state.bit_buffer;
        self.bit_count = state.bit_count;
        self.failed_writes = state.failed_writes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataStreamReader;

    #[test]
    fn test_bulk_writes_advance_byte_cursor() {
        let mut buf = [0u8; 16];
        let mut w = DataStreamWriter::new(&mut buf);
        assert!(w.write_u32(0xdead_beef));
        assert!(w.write_u16(7));
        assert_eq!(w.length(), 6);
        assert_eq!(w.length_in_bits(), 48);
    }

    #[test]
    fn test_overflow_is_idempotent() {
        let mut buf = [0u8; 4];
        let mut w = DataStreamWriter::new(&mut buf);
        assert!(w.write_u32(1));
        let len_before = w.length();

        assert!(!w.write_u8(9));
        assert_eq!(w.failed_writes(), 1);
        assert_eq!(w.length(), len_before);

        assert!(!w.write_bytes(b"xx"));
        assert_eq!(w.failed_writes(), 2);
        assert_eq!(w.length(), len_before);
        assert_eq!(buf, 1u32.to_ne_bytes());
    }

    #[test]
    fn test_raw_bits_reject_out_of_range() {
        let mut buf = [0u8; 8];
        let mut w = DataStreamWriter::new(&mut buf);
        assert!(!w.write_raw_bits(4, 2));
        assert_eq!(w.failed_writes(), 1);
        assert_eq!(w.length_in_bits(), 0);

        assert!(w.write_raw_bits(3, 2));
        assert_eq!(w.length_in_bits(), 2);
    }

    #[test]
    fn test_raw_bits_capacity_counts_pending_bits() {
        let mut buf = [0u8; 1];
        let mut w = DataStreamWriter::new(&mut buf);
        assert!(w.write_raw_bits(0x3f, 6));
        assert!(!w.write_raw_bits(7, 3));
        assert_eq!(w.failed_writes(), 1);
        assert!(w.write_raw_bits(3, 2));
        assert_eq!(w.length(), 1);
    }

    #[test]
    fn test_flush_pads_to_byte_boundary() {
        let mut buf = [0u8; 4];
        let mut w = DataStreamWriter::new(&mut buf);
        assert!(w.write_raw_bits(1, 3));
        w.flush();
        assert_eq!(w.length_in_bits(), 8);
        assert!(w.write_u8(0xff));
        assert_eq!(buf[0], 1);
        assert_eq!(buf[1], 0xff);
    }

    #[test]
    fn test_string_rollback_single_failure() {
        let model = CompressionModel::default();
        let mut buf = [0u8; 4];
        let mut w = DataStreamWriter::new(&mut buf);
        assert!(w.write_u16(1));
        let bits = w.length_in_bits();

        assert!(!w.write_packed_string_delta("much too long for this", "", &model));
        assert_eq!(w.failed_writes(), 1);
        assert_eq!(w.length_in_bits(), bits);
    }

    #[test]
    fn test_string_plain_rollback() {
        let mut buf = [0u8; 8];
        let mut w = DataStreamWriter::new(&mut buf);
        assert!(!w.write_string("more than eight"));
        assert_eq!(w.failed_writes(), 1);
        assert_eq!(w.length(), 0);
        assert!(w.write_string("ab"));
        assert_eq!(w.length(), 4);
    }

    #[test]
    fn test_network_byte_order_layout() {
        let mut buf = [0u8; 8];
        let mut w = DataStreamWriter::new(&mut buf);
        assert!(w.write_u32_be(0x0102_0304));
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_packed_write_is_atomic_on_overflow() {
        let model = CompressionModel::default();
        // One byte: bucket-8 values need 6 + 32 bits and must not fit.
        let mut buf = [0u8; 1];
        let mut w = DataStreamWriter::new(&mut buf);
        assert!(!w.write_packed_uint(u32::MAX, &model));
        assert_eq!(w.failed_writes(), 1);
        assert_eq!(w.length_in_bits(), 0);
    }

    #[test]
    fn test_mixed_bits_and_bytes_roundtrip() {
        let model = CompressionModel::default();
        let mut buf = [0u8; 64];
        let mut w = DataStreamWriter::new(&mut buf);
        assert!(w.write_raw_bits(5, 3));
        assert!(w.write_u16(0xabcd));
        assert!(w.write_packed_uint(300, &model));
        assert!(w.write_u8(9));
        w.flush();
        let len = w.length();

        let mut r = DataStreamReader::new(&buf[..len]);
        assert_eq!(r.read_raw_bits(3), 5);
        assert_eq!(r.read_u16(), 0xabcd);
        assert_eq!(r.read_packed_uint(&model), 300);
        assert_eq!(r.read_u8(), 9);
        assert!(!r.has_failed_reads());
    }
}
