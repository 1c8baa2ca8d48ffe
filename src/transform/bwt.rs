//! Burrows-Wheeler Transform engine.
//!
//! The forward direction delegates to the suffix-array oracle, which also
//! reports one primary index per chunk. The inverse is the heart of the
//! module and picks one of two strategies by block size:
//!
//! - mergeTPSI packs (next row << 8 | byte) per position and chases links,
//!   one byte per step. Large blocks run eight independent chases, one per
//!   chunk, interleaved to hide memory latency.
//! - biPSIv2 buckets 16-bit bigrams so each step emits two bytes. Chunks are
//!   disjoint output ranges driven by their own primary index and may run on
//!   parallel workers.
//!
//! Only the first primary index travels in the serialized block header.
//! When the remaining chunk indices are unknown the inverse falls back to a
//! single chase; the result is identical either way.
//!
use log::trace;
use rayon::prelude::*;

use super::{corrupt, ByteTransform, TransformError, TransformResult, Transformed};
use crate::bwt_algorithms::suffix_sort::{ck_size, compute_bwt};
use crate::tools::context::Context;

pub const MAX_BLOCK_SIZE: usize = 1 << 30;
/// mergeTPSI switches from one chase to eight interleaved chases here.
pub const BLOCK_SIZE_THRESHOLD1: usize = 1 << 22;
/// mergeTPSI up to here, biPSIv2 above.
pub const BLOCK_SIZE_THRESHOLD2: usize = 1 << 23;

const NB_FASTBITS: u32 = 17;
const MASK_FASTBITS: usize = (1 << NB_FASTBITS) - 1;

/// Chunk count by block size. The serialized header still carries only the
/// first index; the rest exist for the multi-chase and parallel inverses.
pub fn get_bwt_chunks(size: usize) -> usize {
    if size < 1 << 16 {
        1
    } else if size < 1 << 19 {
        2
    } else if size < 1 << 22 {
        4
    } else {
        8
    }
}

/// Byte histogram of the block. Both inverse strategies start from it:
/// mergeTPSI turns it into bucket starts, biPSIv2 into one-based bigram
/// range bases.
fn histogram(src: &[u8]) -> [u32; 256] {
    let mut counts = [0_u32; 256];
    for &byte in src {
        counts[byte as usize] += 1;
    }
    counts
}

pub struct Bwt {
    jobs: usize,
    /// Inverse scratch, grown to fit and reused across blocks
    buffer: Vec<u32>,
    primary_indexes: [u32; 8],
}

impl Bwt {
    pub fn new(jobs: usize) -> Result<Self, TransformError> {
        if jobs < 1 {
            return Err(TransformError::InvalidArgument(
                "the number of jobs must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            jobs,
            buffer: Vec::new(),
            primary_indexes: [0; 8],
        })
    }

    pub fn set_primary_index(&mut self, n: usize, primary_index: u32) -> bool {
        if n >= 8 {
            return false;
        }
        self.primary_indexes[n] = primary_index;
        true
    }

    pub fn primary_index(&self, n: usize) -> u32 {
        self.primary_indexes[n]
    }

    fn grow_buffer(&mut self, size: usize) {
        if self.buffer.len() < size {
            self.buffer.resize(size, 0);
        }
    }

    /// True when every chunk index needed for the multi-chunk inverse is
    /// present. Indices beyond the first are engine state, not header data,
    /// so a decoder fed only the header takes the single-chunk route.
    fn chunk_indexes_valid(&self, chunks: usize, count: usize) -> bool {
        self.primary_indexes[1..chunks]
            .iter()
            .all(|&pi| pi >= 1 && pi as usize <= count)
    }

    // When count <= BLOCK_SIZE_THRESHOLD2, mergeTPSI algo
    fn inverse_merge_tpsi(&mut self, src: &[u8], dst: &mut [u8]) -> TransformResult {
        let count = src.len();
        self.grow_buffer(count);

        let p_idx = self.primary_indexes[0] as usize;
        if p_idx < 1 || p_idx > count {
            return corrupt("BWT primary index out of range");
        }

        // Bucket starts from the histogram
        let mut buckets = histogram(src);
        let mut sum = 0_u32;
        for b in buckets.iter_mut() {
            let tmp = *b;
            *b = sum;
            sum += tmp;
        }

        let multi = count >= BLOCK_SIZE_THRESHOLD1 && self.chunk_indexes_valid(8, count);

        // Packed (row << 8 | byte) links, offset by -1 before the primary
        // index to absorb the cyclic rotation. Assumes count < 1 << 23.
        let buffer = &mut self.buffer[..count];
        for (i, &byte) in src.iter().enumerate().take(p_idx) {
            let val = byte as usize;
            buffer[buckets[val] as usize] = (((i as i32 - 1) << 8) | val as i32) as u32;
            buckets[val] += 1;
        }
        for (i, &byte) in src.iter().enumerate().skip(p_idx) {
            let val = byte as usize;
            buffer[buckets[val] as usize] = (((i as i32) << 8) | val as i32) as u32;
            buckets[val] += 1;
        }

        if !multi {
            let mut t = p_idx as i32 - 1;
            for slot in dst[..count].iter_mut() {
                let Some(&link) = buffer.get(t as usize) else {
                    return corrupt("BWT link chase left the block");
                };
                let ptr = link as i32;
                *slot = ptr as u8;
                t = ptr >> 8;
            }
        } else {
            // Eight chases, one per chunk, interleaved. The last chase hits
            // the negative sentinel first; the rest drain to the chunk size.
            let ck = ck_size(count, 8);
            let mut t = [0_i32; 8];
            for (j, tj) in t.iter_mut().enumerate() {
                *tj = self.primary_indexes[j] as i32 - 1;
            }

            let mut n = 0;
            loop {
                let mut ptr7 = 0_i32;
                for j in 0..8 {
                    let Some(&link) = buffer.get(t[j] as usize) else {
                        return corrupt("BWT link chase left the block");
                    };
                    let ptr = link as i32;
                    dst[n + ck * j] = ptr as u8;
                    t[j] = ptr >> 8;
                    ptr7 = ptr;
                }
                n += 1;
                if ptr7 < 0 {
                    break;
                }
            }
            while n < ck {
                for (j, tj) in t.iter_mut().enumerate().take(7) {
                    let Some(&link) = buffer.get(*tj as usize) else {
                        return corrupt("BWT link chase left the block");
                    };
                    let ptr = link as i32;
                    dst[n + ck * j] = ptr as u8;
                    *tj = ptr >> 8;
                }
                n += 1;
            }
        }

        Ok(Transformed { consumed: count, produced: count })
    }

    // When count > BLOCK_SIZE_THRESHOLD2, biPSIv2 algo
    fn inverse_bi_psi_v2(&mut self, src: &[u8], dst: &mut [u8]) -> TransformResult {
        let count = src.len();
        self.grow_buffer(count + 1);

        let p_idx = self.primary_indexes[0] as usize;
        if p_idx < 1 || p_idx > count {
            return corrupt("BWT primary index out of range");
        }

        // Bigram bucket counts, split around the primary index gap
        let mut freq = histogram(src);
        let mut buckets = vec![0_u32; 65536];
        {
            let mut sum = 1_usize;
            for c in 0..256 {
                let f = sum;
                sum += freq[c] as usize;
                freq[c] = f as u32;
                if f != sum {
                    let base = c << 8;
                    let hi = sum.min(p_idx);
                    for i in f..hi {
                        buckets[base + src[i] as usize] += 1;
                    }
                    let lo = (f - 1).max(p_idx);
                    for i in lo..sum - 1 {
                        buckets[base + src[i] as usize] += 1;
                    }
                }
            }
        }

        let lastc = src[0] as usize;
        let mut shift = 0_u32;
        while (count >> shift) > MASK_FASTBITS {
            shift += 1;
        }

        // Cumulate bucket ranges and build the pointer -> bigram lookup
        let mut fast_bits = vec![0_u16; MASK_FASTBITS + 1];
        {
            let mut v = 0_usize;
            let mut sum = 1_usize;
            for c in 0..256 {
                if c == lastc {
                    sum += 1;
                }
                for d in 0..256 {
                    let idx = (d << 8) + c;
                    let s = sum;
                    sum += buckets[idx] as usize;
                    buckets[idx] = s as u32;
                    if s == sum {
                        continue;
                    }
                    while v <= (sum - 1) >> shift {
                        fast_bits[v] = ((c << 8) | d) as u16;
                        v += 1;
                    }
                }
            }
        }

        // Fill the successor table, skipping the primary index row
        {
            let buffer = &mut self.buffer[..count + 1];
            buffer.fill(0);

            let mut n = 0_usize;
            while n < p_idx {
                let c = src[n] as usize;
                let p = freq[c] as usize;
                if p < p_idx {
                    let idx = (c << 8) | src[p] as usize;
                    buffer[buckets[idx] as usize] = n as u32;
                    buckets[idx] += 1;
                } else if p > p_idx {
                    let idx = (c << 8) | src[p - 1] as usize;
                    buffer[buckets[idx] as usize] = n as u32;
                    buckets[idx] += 1;
                }
                freq[c] += 1;
                n += 1;
            }
            while n < count {
                let c = src[n] as usize;
                let p = freq[c] as usize;
                freq[c] += 1;
                n += 1;
                if p < p_idx {
                    let idx = (c << 8) | src[p] as usize;
                    buffer[buckets[idx] as usize] = n as u32;
                    buckets[idx] += 1;
                } else if p > p_idx {
                    let idx = (c << 8) | src[p - 1] as usize;
                    buffer[buckets[idx] as usize] = n as u32;
                    buckets[idx] += 1;
                }
            }
        }

        // Transpose so buckets[(c << 8) | d] guards the (c, d) range
        for c in 0..256 {
            for d in 0..c {
                buckets.swap((d << 8) | c, (c << 8) | d);
            }
        }

        let tier = get_bwt_chunks(count);
        let chunks = if self.chunk_indexes_valid(tier, count) { tier } else { 1 };
        let ck = ck_size(count, chunks);
        let nb_tasks = self.jobs.min(chunks);
        let buffer = &self.buffer[..count + 1];
        let pi = self.primary_indexes;

        if nb_tasks == 1 {
            let mut c = 0;
            let mut start = 0;
            // Four chunks interleaved while all four fit entirely
            while c + 3 < chunks && start + 4 * ck < count {
                let end = start + ck;
                let mut p = [
                    pi[c] as usize,
                    pi[c + 1] as usize,
                    pi[c + 2] as usize,
                    pi[c + 3] as usize,
                ];
                let mut i = start + 1;
                while i <= end {
                    for (j, pj) in p.iter_mut().enumerate() {
                        let mut s = fast_bits[*pj >> shift] as usize;
                        while buckets[s] as usize <= *pj {
                            s += 1;
                        }
                        dst[ck * j + i - 1] = (s >> 8) as u8;
                        dst[ck * j + i] = s as u8;
                        *pj = buffer[*pj] as usize;
                    }
                    i += 2;
                }
                start = end + 3 * ck;
                c += 4;
            }
            while c < chunks {
                let end = (start + ck).min(count - 1);
                chase_chunk(
                    buffer,
                    &buckets,
                    &fast_bits,
                    shift,
                    pi[c] as usize,
                    &mut dst[start..=end],
                    end - start,
                );
                c += 1;
                start = end;
            }
        } else {
            dst[..count].par_chunks_mut(ck).enumerate().for_each(|(c, chunk)| {
                let start = c * ck;
                let end = (start + ck).min(count - 1);
                chase_chunk(buffer, &buckets, &fast_bits, shift, pi[c] as usize, chunk, end - start);
            });
        }

        dst[count - 1] = lastc as u8;
        Ok(Transformed { consumed: count, produced: count })
    }
}

/// One biPSIv2 chase: emits two bytes per step into out[0..=end_rel].
fn chase_chunk(
    buffer: &[u32],
    buckets: &[u32],
    fast_bits: &[u16],
    shift: u32,
    mut p: usize,
    out: &mut [u8],
    end_rel: usize,
) {
    let mut i = 1_usize;
    while i <= end_rel {
        let mut s = fast_bits[p >> shift] as usize;
        while buckets[s] as usize <= p {
            s += 1;
        }
        out[i - 1] = (s >> 8) as u8;
        out[i] = s as u8;
        p = buffer[p] as usize;
        i += 2;
    }
}

impl ByteTransform for Bwt {
    fn forward(&mut self, src: &[u8], dst: &mut [u8], _ctx: &mut Context) -> TransformResult {
        let count = src.len();
        if count == 0 {
            return Ok(Transformed { consumed: 0, produced: 0 });
        }
        if count > MAX_BLOCK_SIZE {
            return Err(TransformError::InvalidArgument(format!(
                "the max BWT block size is {}, got {}",
                MAX_BLOCK_SIZE, count
            )));
        }
        if dst.len() < count {
            return Err(TransformError::InvalidArgument(
                "invalid output block".to_string(),
            ));
        }
        if count < 2 {
            dst[0] = src[0];
            return Ok(Transformed { consumed: count, produced: count });
        }

        compute_bwt(src, &mut dst[..count], &mut self.primary_indexes, get_bwt_chunks(count));
        trace!("BWT forward of {} bytes, primary index {}", count, self.primary_indexes[0]);
        Ok(Transformed { consumed: count, produced: count })
    }

    fn inverse(&mut self, src: &[u8], dst: &mut [u8], _ctx: &mut Context) -> TransformResult {
        let count = src.len();
        if count == 0 {
            return Ok(Transformed { consumed: 0, produced: 0 });
        }
        if count > MAX_BLOCK_SIZE {
            return Err(TransformError::InvalidArgument(format!(
                "the max BWT block size is {}, got {}",
                MAX_BLOCK_SIZE, count
            )));
        }
        if dst.len() < count {
            return Err(TransformError::InvalidArgument(
                "invalid output block".to_string(),
            ));
        }
        if count < 2 {
            dst[0] = src[0];
            return Ok(Transformed { consumed: count, produced: count });
        }

        // Find the fastest way to implement inverse based on block size
        if count <= BLOCK_SIZE_THRESHOLD2 {
            self.inverse_merge_tpsi(src, dst)
        } else {
            self.inverse_bi_psi_v2(src, dst)
        }
    }

    fn max_encoded_len(&self, n: usize) -> usize {
        n
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Deterministic bytes over a 16 symbol alphabet; small alphabets route
    /// the suffix sort to SA-IS, keeping the big-block tests linear.
    fn gen_data(n: usize, mut seed: u64) -> Vec<u8> {
        (0..n)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                b'a' + (seed >> 60) as u8
            })
            .collect()
    }

    fn round_trip(data: &[u8], jobs: usize) -> Vec<u8> {
        let mut ctx = Context::new();
        let mut bwt = Bwt::new(jobs).unwrap();
        let mut mid = vec![0_u8; data.len()];
        let r = bwt.forward(data, &mut mid, &mut ctx).unwrap();
        assert_eq!(r.produced, data.len());
        let mut out = vec![0_u8; data.len()];
        let r = bwt.inverse(&mid, &mut out, &mut ctx).unwrap();
        assert_eq!(r.produced, data.len());
        out
    }

    #[test]
    fn tiny_blocks_test() {
        assert_eq!(round_trip(b"", 1), b"");
        assert_eq!(round_trip(b"x", 1), b"x");
        assert_eq!(round_trip(b"ab", 1), b"ab");
        assert_eq!(round_trip(b"banana", 1), b"banana");
        assert_eq!(round_trip(b"abracadabra", 1), b"abracadabra");
    }

    #[test]
    fn merge_tpsi_small_test() {
        let data = gen_data(100_000, 99);
        assert_eq!(round_trip(&data, 1), data);
    }

    #[test]
    fn merge_tpsi_all_zeros_test() {
        let data = vec![0_u8; 1 << 20];
        let mut ctx = Context::new();
        let mut bwt = Bwt::new(1).unwrap();
        let mut mid = vec![1_u8; data.len()];
        bwt.forward(&data, &mut mid, &mut ctx).unwrap();
        // A constant block stays a single run under the permutation
        assert!(mid.iter().all(|&b| b == 0));
        let mut out = vec![1_u8; data.len()];
        bwt.inverse(&mid, &mut out, &mut ctx).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn merge_tpsi_multi_chase_test() {
        // Above THRESHOLD1: the eight interleaved chases run
        let data = gen_data(BLOCK_SIZE_THRESHOLD1 + 765, 7);
        assert_eq!(round_trip(&data, 1), data);
    }

    #[test]
    fn merge_tpsi_single_index_fallback_test() {
        // A decoder that saw only the block header knows one index
        let data = gen_data(BLOCK_SIZE_THRESHOLD1 + 765, 7);
        let mut ctx = Context::new();
        let mut enc = Bwt::new(1).unwrap();
        let mut mid = vec![0_u8; data.len()];
        enc.forward(&data, &mut mid, &mut ctx).unwrap();

        let mut dec = Bwt::new(1).unwrap();
        dec.set_primary_index(0, enc.primary_index(0));
        let mut out = vec![0_u8; data.len()];
        dec.inverse(&mid, &mut out, &mut ctx).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn bi_psi_v2_test() {
        let data = gen_data(BLOCK_SIZE_THRESHOLD2 + 4097, 13);
        let reference = round_trip(&data, 1);
        assert_eq!(reference, data);

        // Parallel workers write disjoint chunk regions; output identical
        for jobs in [2, 4, 8] {
            assert_eq!(round_trip(&data, jobs), data);
        }
    }

    #[test]
    fn bi_psi_v2_single_index_fallback_test() {
        let data = gen_data(BLOCK_SIZE_THRESHOLD2 + 64, 5);
        let mut ctx = Context::new();
        let mut enc = Bwt::new(1).unwrap();
        let mut mid = vec![0_u8; data.len()];
        enc.forward(&data, &mut mid, &mut ctx).unwrap();

        let mut dec = Bwt::new(4).unwrap();
        dec.set_primary_index(0, enc.primary_index(0));
        let mut out = vec![0_u8; data.len()];
        dec.inverse(&mid, &mut out, &mut ctx).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn bad_primary_index_test() {
        let data = b"some block of data to permute".repeat(10);
        let mut ctx = Context::new();
        let mut bwt = Bwt::new(1).unwrap();
        let mut mid = vec![0_u8; data.len()];
        bwt.forward(&data, &mut mid, &mut ctx).unwrap();

        let mut dec = Bwt::new(1).unwrap();
        dec.set_primary_index(0, data.len() as u32 + 1);
        let mut out = vec![0_u8; data.len()];
        assert!(matches!(
            dec.inverse(&mid, &mut out, &mut ctx),
            Err(TransformError::DataCorruption(_))
        ));
    }

    #[test]
    fn jobs_validation_test() {
        assert!(Bwt::new(0).is_err());
        assert!(Bwt::new(4).is_ok());
    }
}
