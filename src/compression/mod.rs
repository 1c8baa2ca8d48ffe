//! Block pipeline: container format and the compress/decompress drivers.
//!
//! The stream is a small header naming the transform chain, then one record
//! per block. Each record carries a stage mask so a declined transform can
//! drop out of one block without affecting the next; a block nothing could
//! improve travels raw.
//!
//! Record layout:
//!
//! ```text
//! mode(1)          bit i: transform stage i applied; bit 7: entropy applied
//! orig_len(4, BE)  bytes the block decodes back to
//! mid_len(4, BE)   bytes after the transform chain, before entropy
//! stored_len(4, BE)
//! payload(stored_len)
//! ```
//!
pub mod compress;
pub mod decompress;

pub use compress::compress_stream;
pub use decompress::decompress_stream;

pub const STREAM_MAGIC: [u8; 4] = *b"BWZ1";
pub const STREAM_VERSION: u8 = 1;
/// Entropy stage marker in the block mode byte.
pub const MODE_ENTROPY: u8 = 0x80;

#[cfg(test)]
mod test {
    use super::*;
    use crate::tools::context::Context;

    fn ctx(chain: &str, block_size: usize) -> Context {
        let mut ctx = Context::new();
        ctx.put_str("transform", chain);
        ctx.put_int("blockSize", block_size as i64);
        ctx.put_int("jobs", 2);
        ctx.put_str("entropy", "FPAQ");
        ctx
    }

    fn text(n: usize) -> Vec<u8> {
        b"compression pipelines move blocks through reversible transforms. "
            .iter()
            .cycle()
            .take(n)
            .copied()
            .collect()
    }

    fn noise(n: usize) -> Vec<u8> {
        let mut seed = 31_u64;
        (0..n)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (seed >> 56) as u8
            })
            .collect()
    }

    fn round_trip(chain: &str, data: &[u8], block_size: usize) -> usize {
        let packed = compress_stream(data, &ctx(chain, block_size)).unwrap();
        let out = decompress_stream(&packed, &ctx(chain, block_size)).unwrap();
        assert_eq!(out, data, "chain {} must round trip", chain);
        packed.len()
    }

    #[test]
    fn bwt_chain_test() {
        let data = text(200_000);
        let packed = round_trip("BWT", &data, 65536);
        assert!(packed < data.len());
    }

    #[test]
    fn rolz_chain_test() {
        let data = text(150_000);
        let packed = round_trip("ROLZ", &data, 65536);
        assert!(packed < data.len() / 2);
    }

    #[test]
    fn rolzx_chain_test() {
        let data = text(150_000);
        let packed = round_trip("ROLZX", &data, 65536);
        assert!(packed < data.len() / 2);
    }

    #[test]
    fn none_chain_test() {
        let data = text(10_000);
        round_trip("NONE", &data, 4096);
    }

    #[test]
    fn multi_block_test() {
        let data = text(50_000);
        round_trip("BWT", &data, 4096);
    }

    #[test]
    fn noise_stored_raw_test() {
        // Incompressible input: every stage declines, blocks travel raw with
        // only the container overhead on top
        let data = noise(65536);
        let packed = compress_stream(&data, &ctx("ROLZ", 65536)).unwrap();
        assert!(packed.len() <= data.len() + 64);
        let out = decompress_stream(&packed, &ctx("ROLZ", 65536)).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn empty_stream_test() {
        round_trip("BWT", &[], 65536);
    }

    #[test]
    fn truncated_stream_test() {
        let data = text(20_000);
        let packed = compress_stream(&data, &ctx("BWT", 65536)).unwrap();
        assert!(decompress_stream(&packed[..packed.len() / 2], &ctx("BWT", 65536)).is_err());
        assert!(decompress_stream(&packed[..3], &ctx("BWT", 65536)).is_err());
    }
}
