//! Block-sorting data compressor library.
//!
//! Version 0.4.0
//!
//! - Compresses arbitrary byte streams block by block through a configurable
//!   chain of reversible byte transforms followed by an entropy coder.
//! - The transform chain is built from a context map, e.g. `"BWT"`, `"ROLZ"`,
//!   `"ROLZX"`, `"UTF8"`, `"EXE"` or combinations joined with `+`.
//! - The BWT inverse uses multi-core multi-threaded processing for large
//!   blocks.
//! - Contains SA-IS sorting to keep suffix-array construction fast on
//!   repetitive data.
//!
//! Basic usage to compress a file with the bundled binary:
//!
//! ```text
//! $> bwzip -z test.txt
//! ```
//!
//! This creates the file test.txt.bwz. Decompress it with:
//!
//! ```text
//! $> bwzip -d test.txt.bwz
//! ```
pub mod bitstream;
pub mod bwt_algorithms;
pub mod compression;
pub mod entropy;
pub mod tools;
pub mod transform;
