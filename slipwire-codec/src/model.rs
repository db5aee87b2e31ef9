//! Shared compression model for prefix-coded integers.

/// Number of value buckets in a model.
const BUCKET_COUNT: usize = 9;

/// Maximum Huffman symbol length in bits. The decoder peeks this many bits
/// at a time, so the decode table has `1 << MAX_SYMBOL_LENGTH` entries.
pub const MAX_SYMBOL_LENGTH: u32 = 6;

/// Bit width of the raw remainder written after each bucket symbol.
const DEFAULT_BUCKET_SIZES: [u8; BUCKET_COUNT] = [0, 4, 10, 10, 20, 20, 26, 26, 32];

/// Canonical Huffman code length per bucket symbol. Small buckets (small
/// values) get the short codes.
const DEFAULT_CODE_LENGTHS: [u8; BUCKET_COUNT] = [2, 2, 3, 4, 4, 5, 5, 6, 6];

/// Bucket tables plus Huffman encode/decode tables for packed integers.
///
/// A value `v` is encoded as the Huffman code of the densest bucket whose
/// offset is `<= v`, followed by `bucket_sizes[bucket]` raw bits of
/// `v - bucket_offsets[bucket]`. Bits are packed LSB-first, so the stored
/// codes are bit-reversed: peeking [`MAX_SYMBOL_LENGTH`] bits off the low
/// end of the stream indexes straight into `decode_table`.
///
/// - `encode_table[symbol] = (code << 8) | code_len`
/// - `decode_table[peek]   = (symbol << 8) | code_len`, `code_len == 0`
///   marking peek patterns no valid code produces
pub struct CompressionModel {
    pub(crate) bucket_sizes: [u8; BUCKET_COUNT],
    pub(crate) bucket_offsets: [u32; BUCKET_COUNT],
    pub(crate) encode_table: [u16; BUCKET_COUNT],
    pub(crate) decode_table: [u16; 1 << MAX_SYMBOL_LENGTH],
}

impl Default for CompressionModel {
    fn default() -> Self {
        Self::from_tables(DEFAULT_BUCKET_SIZES, DEFAULT_CODE_LENGTHS)
    }
}

impl CompressionModel {
    fn from_tables(bucket_sizes: [u8; BUCKET_COUNT], code_lengths: [u8; BUCKET_COUNT]) -> Self {
        let mut bucket_offsets = [0u32; BUCKET_COUNT];
        let mut next = 0u64;
        for i in 0..BUCKET_COUNT {
            bucket_offsets[i] = next as u32;
            next += 1u64 << bucket_sizes[i];
        }

        let (encode_table, decode_table) = build_huffman_tables(&code_lengths);

        Self {
            bucket_sizes,
            bucket_offsets,
            encode_table,
            decode_table,
        }
    }

    /// Bucket index for a value: the last bucket whose offset is `<= value`.
    #[inline]
    pub(crate) fn bucket(&self, value: u32) -> usize {
        let mut bucket = 0;
        for i in 1..BUCKET_COUNT {
            if value >= self.bucket_offsets[i] {
                bucket = i;
            }
        }
        bucket
    }
}

/// Builds canonical Huffman codes for the given lengths, bit-reversed for
/// LSB-first packing, plus the peek-indexed decode table.
fn build_huffman_tables(
    code_lengths: &[u8; BUCKET_COUNT],
) -> ([u16; BUCKET_COUNT], [u16; 1 << MAX_SYMBOL_LENGTH]) {
    let mut order: [usize; BUCKET_COUNT] = [0; BUCKET_COUNT];
    for (i, slot) in order.iter_mut().enumerate() {
        *slot = i;
    }
    order.sort_by_key(|&s| (code_lengths[s], s));

    let mut encode = [0u16; BUCKET_COUNT];
    let mut decode = [0u16; 1 << MAX_SYMBOL_LENGTH];

    let mut code: u32 = 0;
    let mut prev_len: u32 = 0;
    for &symbol in &order {
        let len = code_lengths[symbol] as u32;
        debug_assert!(len > 0 && len <= MAX_SYMBOL_LENGTH);
        code <<= len - prev_len;

        let reversed = code.reverse_bits() >> (32 - len);
        encode[symbol] = ((reversed as u16) << 8) | len as u16;

        // Every peek pattern whose low `len` bits match the reversed code
        // resolves to this symbol.
        let fill = 1usize << (MAX_SYMBOL_LENGTH - len);
        for pad in 0..fill {
            let idx = (pad << len) | reversed as usize;
            debug_assert_eq!(decode[idx], 0);
            decode[idx] = ((symbol as u16) << 8) | len as u16;
        }

        code += 1;
        prev_len = len;
    }

    (encode, decode)
}
