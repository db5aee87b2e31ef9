//! # slipwire-codec
//!
//! Bit-packed stream codec for the slipwire transport.
//!
//! Matched writer/reader cursors over a caller-provided byte buffer:
//!
//! - **Byte-aligned bulk writes**: primitives in host endianness, plus an
//!   explicit big-endian (`*_be`) pair for portable wire data
//! - **Bit-granular writes**: raw bit spans up to 32 bits through a 64-bit
//!   shift register, packed LSB-first
//! - **Prefix-coded integers**: Huffman bucket symbol + raw remainder bits,
//!   driven by a [`CompressionModel`]; zig-zag folding for signed values and
//!   delta forms against a baseline
//! - **Failure-tolerant overflow**: every write pre-checks capacity; a failed
//!   write mutates nothing and bumps a counter, it never panics
//!
//! ## Usage
//!
//! ```rust
//! use slipwire_codec::{CompressionModel, DataStreamReader, DataStreamWriter};
//!
//! let model = CompressionModel::default();
//! let mut buf = [0u8; 64];
//!
//! let mut writer = DataStreamWriter::new(&mut buf);
//! writer.write_u32(42);
//! writer.write_packed_uint(1337, &model);
//! writer.flush();
//! let len = writer.length();
//!
//! let mut reader = DataStreamReader::new(&buf[..len]);
//! assert_eq!(reader.read_u32(), 42);
//! assert_eq!(reader.read_packed_uint(&model), 1337);
//! ```

mod model;
mod reader;
mod writer;

pub use model::{CompressionModel, MAX_SYMBOL_LENGTH};
pub use reader::DataStreamReader;
pub use writer::{DataStreamWriter, WriterState};
