//! Byte-block transforms and their shared contract.
//!
//! Every transform maps an input block to an output block and is
//! independently invertible. A transform may also decline a block it cannot
//! improve; declining is not an error and the pipeline reacts by storing the
//! block untransformed.
//!
//! Calls carry the block's context map. "dataType" is both a hint and an
//! output: a stage that detects the content type publishes it there, and a
//! later stage in the same chain reads it to skip redundant detection or to
//! step aside (an EXE block is never alias-remapped and vice versa).
//!
use std::fmt::{Display, Formatter};

use crate::tools::context::Context;

pub mod bwt;
pub mod bwt_block_codec;
pub mod exe_codec;
pub mod rolz;
pub mod utf_codec;

pub use bwt::Bwt;
pub use bwt_block_codec::BwtBlockCodec;
pub use exe_codec::ExeCodec;
pub use rolz::RolzCodec;
pub use utf_codec::UtfCodec;

/// Byte counts reported by a successful transform call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transformed {
    pub consumed: usize,
    pub produced: usize,
}

#[derive(Debug)]
pub enum TransformError {
    /// Unusable parameters or block sizes; fatal for the transform.
    InvalidArgument(String),
    /// Decoded fields out of range; aborts the current block.
    DataCorruption(String),
    /// The transform cannot improve this block. The indices report how far
    /// input and output advanced so the caller can store the block raw.
    Declined { consumed: usize, produced: usize },
}

impl Display for TransformError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            TransformError::DataCorruption(msg) => write!(f, "data corruption: {}", msg),
            TransformError::Declined { consumed, produced } => {
                write!(f, "declined at in {} / out {}", consumed, produced)
            }
        }
    }
}

impl std::error::Error for TransformError {}

pub type TransformResult = Result<Transformed, TransformError>;

/// Shorthand constructors used throughout the codecs.
pub(crate) fn declined(consumed: usize, produced: usize) -> TransformResult {
    Err(TransformError::Declined { consumed, produced })
}

pub(crate) fn corrupt(msg: &str) -> TransformResult {
    Err(TransformError::DataCorruption(msg.to_string()))
}

/// Contract implemented by every block transform.
///
/// The block is src in its entirety; on success the counts report how many
/// bytes were consumed and produced. dst must hold at least
/// max_encoded_len(src.len()) bytes for forward calls. ctx carries per-block
/// hints between chain stages; transforms without hints ignore it.
pub trait ByteTransform {
    fn forward(&mut self, src: &[u8], dst: &mut [u8], ctx: &mut Context) -> TransformResult;
    fn inverse(&mut self, src: &[u8], dst: &mut [u8], ctx: &mut Context) -> TransformResult;
    fn max_encoded_len(&self, n: usize) -> usize;
}

/// Pass-through transform backing the "NONE" chain entry.
pub struct NullTransform;

impl ByteTransform for NullTransform {
    fn forward(&mut self, src: &[u8], dst: &mut [u8], _ctx: &mut Context) -> TransformResult {
        dst[..src.len()].copy_from_slice(src);
        Ok(Transformed { consumed: src.len(), produced: src.len() })
    }

    fn inverse(&mut self, src: &[u8], dst: &mut [u8], _ctx: &mut Context) -> TransformResult {
        dst[..src.len()].copy_from_slice(src);
        Ok(Transformed { consumed: src.len(), produced: src.len() })
    }

    fn max_encoded_len(&self, n: usize) -> usize {
        n
    }
}

/// Builds one transform from its chain name.
pub fn new_transform(name: &str, ctx: &Context) -> Result<Box<dyn ByteTransform>, TransformError> {
    match name {
        "BWT" => Ok(Box::new(BwtBlockCodec::new(ctx)?)),
        "ROLZ" | "ROLZX" => Ok(Box::new(RolzCodec::new_with_ctx(ctx)?)),
        "UTF8" => Ok(Box::new(UtfCodec::new())),
        "EXE" => Ok(Box::new(ExeCodec::new())),
        "NONE" => Ok(Box::new(NullTransform)),
        _ => Err(TransformError::InvalidArgument(format!(
            "unknown transform name: {}",
            name
        ))),
    }
}

/// Builds the full chain from the context "transform" value, e.g.
/// "EXE+BWT" or "ROLZX". Names may be joined with '+' or ','.
pub fn new_chain(ctx: &Context) -> Result<Vec<Box<dyn ByteTransform>>, TransformError> {
    let chain = ctx.get_str("transform", "NONE").to_string();
    chain
        .split(['+', ','])
        .filter(|s| !s.is_empty())
        .map(|name| new_transform(name, ctx))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chain_parse_test() {
        let mut ctx = Context::new();
        ctx.put_str("transform", "UTF8+BWT");
        assert_eq!(new_chain(&ctx).unwrap().len(), 2);

        ctx.put_str("transform", "MYSTERY");
        assert!(matches!(
            new_chain(&ctx),
            Err(TransformError::InvalidArgument(_))
        ));
    }

    #[test]
    fn null_transform_test() {
        let mut t = NullTransform;
        let src = b"some bytes";
        let mut dst = vec![0_u8; 10];
        let r = t.forward(src, &mut dst, &mut Context::new()).unwrap();
        assert_eq!(r.produced, 10);
        assert_eq!(&dst, src);
    }
}
