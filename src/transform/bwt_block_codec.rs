//! Serialization layer around the BWT: primary-index framing.
//!
//! Block format: header (h bytes) then the permuted data (n bytes).
//!
//! ```text
//! byte 0: mm II_IIII   mm = extra header bytes (0..3),
//!                      II_IIII = top 6 bits of the primary index
//! byte 1..h-1: next 8..24 bits of the primary index, big endian
//! ```
//!
//! The header size is the smallest that fits the index, so blocks under 64
//! bytes always carry a single header byte.
//!
use super::bwt::Bwt;
use super::{corrupt, ByteTransform, TransformError, TransformResult, Transformed};
use crate::tools::context::Context;

/// Encodes the primary index into dst[0..h], returning h.
fn write_header(dst: &mut [u8], primary_index: u32) -> usize {
    let mut bits = 6_u32;
    while (1_u64 << bits) <= primary_index as u64 {
        bits += 1;
    }

    let hs = ((2 + bits + 7) >> 3) as usize;
    let mut shift = ((hs - 1) << 3) as u32;
    dst[0] = ((((bits + 1) >> 3) << 6) as u8) | ((primary_index >> shift) & 0x3F) as u8;
    for slot in dst[1..hs].iter_mut() {
        shift -= 8;
        *slot = (primary_index >> shift) as u8;
    }
    hs
}

/// Decodes (primary index, header size) from the front of src.
fn read_header(src: &[u8]) -> Result<(u32, usize), TransformError> {
    let mode = src[0] as u32;
    let hs = 1 + ((mode >> 6) & 0x03) as usize;
    if src.len() < hs {
        return Err(TransformError::DataCorruption(
            "BWT block shorter than its header".to_string(),
        ));
    }

    let mut shift = ((hs - 1) << 3) as u32;
    let mut primary_index = (mode & 0x3F) << shift;
    for &byte in &src[1..hs] {
        shift -= 8;
        primary_index |= (byte as u32) << shift;
    }
    Ok((primary_index, hs))
}

/// BWT engine plus the header framing expected by the block pipeline.
pub struct BwtBlockCodec {
    bwt: Bwt,
}

impl BwtBlockCodec {
    pub fn new(ctx: &Context) -> Result<Self, TransformError> {
        let jobs = ctx.get_int("jobs", 1).max(1) as usize;
        Ok(Self { bwt: Bwt::new(jobs)? })
    }
}

impl ByteTransform for BwtBlockCodec {
    fn forward(&mut self, src: &[u8], dst: &mut [u8], ctx: &mut Context) -> TransformResult {
        let count = src.len();
        if count == 0 {
            return Ok(Transformed { consumed: 0, produced: 0 });
        }
        if dst.len() < self.max_encoded_len(count) {
            return Err(TransformError::InvalidArgument(
                "output buffer smaller than the encoded budget".to_string(),
            ));
        }

        self.bwt.forward(src, dst, ctx)?;

        // Shift the permuted bytes up and put the header in the gap
        let primary_index = self.bwt.primary_index(0);
        let mut bits = 6_u32;
        while (1_u64 << bits) <= primary_index as u64 {
            bits += 1;
        }
        let hs = ((2 + bits + 7) >> 3) as usize;
        dst.copy_within(0..count, hs);
        write_header(dst, primary_index);

        Ok(Transformed { consumed: count, produced: count + hs })
    }

    fn inverse(&mut self, src: &[u8], dst: &mut [u8], ctx: &mut Context) -> TransformResult {
        if src.is_empty() {
            return Ok(Transformed { consumed: 0, produced: 0 });
        }

        let (primary_index, hs) = read_header(src)?;
        let count = src.len() - hs;
        if primary_index as usize > count {
            return corrupt("BWT primary index out of range");
        }

        self.bwt.set_primary_index(0, primary_index);
        // The header carries only the first index; the engine must not trust
        // chunk indices left over from an earlier block
        for n in 1..8 {
            self.bwt.set_primary_index(n, 0);
        }

        let r = self.bwt.inverse(&src[hs..], dst, ctx)?;
        Ok(Transformed { consumed: r.consumed + hs, produced: r.produced })
    }

    fn max_encoded_len(&self, n: usize) -> usize {
        // Input size plus the largest header
        n + 4
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bwt_algorithms::suffix_sort::compute_bwt;

    fn codec() -> BwtBlockCodec {
        BwtBlockCodec::new(&Context::new()).unwrap()
    }

    #[test]
    fn header_boundary_sizes_test() {
        let cases = [
            (63_u32, 1_usize),
            (64, 2),
            (16383, 2),
            (16384, 3),
            (4194303, 3),
            (4194304, 4),
        ];
        let mut buf = [0_u8; 4];
        for (p, expected) in cases {
            let hs = write_header(&mut buf, p);
            assert_eq!(hs, expected, "header size for {}", p);
            let (decoded, read_hs) = read_header(&buf).unwrap();
            assert_eq!(decoded, p);
            assert_eq!(read_hs, expected);
        }
    }

    #[test]
    fn abracadabra_padded_test() {
        let mut data = b"abracadabra".to_vec();
        data.resize(64, 0);

        // Independently computed primary index, known to fit 6 bits
        let mut reference = vec![0_u8; 64];
        let mut pi = [0_u32; 8];
        compute_bwt(&data, &mut reference, &mut pi, 1);
        assert!(pi[0] < 64);

        let mut ctx = Context::new();
        let mut c = codec();
        let mut mid = vec![0_u8; c.max_encoded_len(64)];
        let r = c.forward(&data, &mut mid, &mut ctx).unwrap();
        assert_eq!(r.produced, 65);
        // One header byte: mm = 0, low six bits are the primary index
        assert_eq!(mid[0], pi[0] as u8);
        assert_eq!(&mid[1..65], &reference[..]);

        let mut out = vec![0_u8; 64];
        let mut dec = codec();
        let r = dec.inverse(&mid[..65], &mut out, &mut ctx).unwrap();
        assert_eq!(r.produced, 64);
        assert_eq!(out, data);
    }

    #[test]
    fn fresh_decoder_round_trip_test() {
        let mut seed = 0xDEADBEEF_u64;
        let data: Vec<u8> = (0..100_000)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (seed >> 56) as u8
            })
            .collect();
        let mut ctx = Context::new();
        let mut c = codec();
        let mut mid = vec![0_u8; c.max_encoded_len(data.len())];
        let r = c.forward(&data, &mut mid, &mut ctx).unwrap();

        let mut dec = codec();
        let mut out = vec![0_u8; data.len()];
        let r2 = dec.inverse(&mid[..r.produced], &mut out, &mut ctx).unwrap();
        assert_eq!(r2.consumed, r.produced);
        assert_eq!(out, data);
    }

    #[test]
    fn truncated_header_test() {
        // mode byte promising 3 extra bytes, but nothing follows
        let src = [0b1100_0001_u8];
        let mut c = codec();
        let mut out = vec![0_u8; 16];
        assert!(matches!(
            c.inverse(&src, &mut out, &mut Context::new()),
            Err(TransformError::DataCorruption(_))
        ));
    }

    #[test]
    fn out_of_range_index_test() {
        // Header says primary index 63 for a 4 byte block
        let src = [63_u8, b'a', b'b', b'c', b'd'];
        let mut c = codec();
        let mut out = vec![0_u8; 16];
        assert!(matches!(
            c.inverse(&src, &mut out, &mut Context::new()),
            Err(TransformError::DataCorruption(_))
        ));
    }

    #[test]
    fn single_byte_test() {
        let mut ctx = Context::new();
        let mut c = codec();
        let mut mid = vec![0_u8; 8];
        let r = c.forward(b"Q", &mut mid, &mut ctx).unwrap();
        assert_eq!(r.produced, 2);
        let mut out = vec![0_u8; 4];
        let r = c.inverse(&mid[..2], &mut out, &mut ctx).unwrap();
        assert_eq!(r.produced, 1);
        assert_eq!(out[0], b'Q');
    }
}
