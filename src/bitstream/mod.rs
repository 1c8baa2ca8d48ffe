//! In-memory bit-oriented streams.
//!
//! The entropy coders and the ROLZ block framing write and read data that is
//! not byte aligned. Both sides track their position in bits so a codec can
//! resume byte-aligned reading right after an entropy-coded section.
//!
pub mod bitreader;
pub mod bitwriter;

pub use bitreader::BitReader;
pub use bitwriter::BitWriter;
