//! Entropy coding stage.
//!
//! A binary arithmetic coder with adaptive bit predictions, modeling each
//! byte as a walk down an 8-bit tree. Order 0 uses a single tree; order 1
//! keys the tree on the previous byte. The coder reads and writes through
//! the bitstream module so codecs can mix entropy-coded sections with plain
//! bit fields in one stream.
//!
pub mod fpaq;

pub use fpaq::{FpaqDecoder, FpaqEncoder};
