//! UTF-8 alias remapping.
//!
//! Valid UTF-8 blocks are recoded by ranking the distinct code points by
//! frequency and replacing each one with its rank: one byte for the 128 most
//! frequent, two bytes (continuation bit in the low byte) for the rest, up
//! to 32767 aliases. The dictionary of packed code points travels in the
//! block header. Anything that fails validation, or does not shrink by at
//! least 10%, is declined.
//!
use log::debug;

use super::{corrupt, declined, ByteTransform, TransformError, TransformResult, Transformed};
use crate::tools::context::{Context, DataType};

pub const MIN_BLOCK_SIZE: usize = 1024;

/// Byte count of a UTF-8 sequence by lead byte high nibble; 0 = not a lead.
const SIZES: [usize; 16] = [1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 3, 4];

/// Packs 1-4 UTF-8 bytes into (length-tag << 21) | payload. None when the
/// lead byte class is invalid.
fn pack(p: &[u8]) -> Option<(u32, usize)> {
    match SIZES[(p[0] >> 4) as usize] {
        1 => Some((p[0] as u32, 1)),
        2 => Some((
            (1 << 21) | (((p[0] & 0x1F) as u32) << 6) | ((p[1] & 0x3F) as u32),
            2,
        )),
        3 => Some((
            (2 << 21)
                | (((p[0] & 0x0F) as u32) << 12)
                | (((p[1] & 0x3F) as u32) << 6)
                | ((p[2] & 0x3F) as u32),
            3,
        )),
        4 => Some((
            (3 << 21)
                | (((p[0] & 0x07) as u32) << 18)
                | (((p[1] & 0x3F) as u32) << 12)
                | (((p[2] & 0x3F) as u32) << 6)
                | ((p[3] & 0x3F) as u32),
            4,
        )),
        _ => None,
    }
}

/// Inverse of pack. Returns the byte count written, 0 for an invalid value.
fn unpack(val: u32, out: &mut [u8]) -> usize {
    match val >> 21 {
        0 => {
            out[0] = val as u8;
            1
        }
        1 => {
            out[0] = 0xC0 | (val >> 6) as u8;
            out[1] = 0x80 | (val & 0x3F) as u8;
            2
        }
        2 => {
            out[0] = 0xE0 | (val >> 12) as u8;
            out[1] = 0x80 | ((val >> 6) & 0x3F) as u8;
            out[2] = 0x80 | (val & 0x3F) as u8;
            3
        }
        3 => {
            out[0] = 0xF0 | (val >> 18) as u8;
            out[1] = 0x80 | ((val >> 12) & 0x3F) as u8;
            out[2] = 0x80 | ((val >> 6) & 0x3F) as u8;
            out[3] = 0x80 | (val & 0x3F) as u8;
            4
        }
        _ => 0,
    }
}

/// Histogram-based validation against the Unicode 14 UTF-8 table: forbidden
/// lead bytes, the four restricted continuation windows, and a requirement
/// that at least a quarter of the block is continuation bytes.
fn validate(block: &[u8]) -> bool {
    let mut freqs0 = [0_u32; 256];
    let mut pairs = vec![0_u32; 65536];
    let mut prv = 0_usize;

    for &b in block {
        let cur = b as usize;
        freqs0[cur] += 1;
        pairs[(prv << 8) + cur] += 1;
        prv = cur;
    }

    // U+0000..U+007F          00..7F
    // U+0080..U+07FF          C2..DF 80..BF
    // U+0800..U+0FFF          E0 A0..BF 80..BF
    // U+1000..U+CFFF          E1..EC 80..BF 80..BF
    // U+D000..U+D7FF          ED 80..9F 80..BF 80..BF
    // U+E000..U+FFFF          EE..EF 80..BF 80..BF
    // U+10000..U+3FFFF        F0 90..BF 80..BF 80..BF
    // U+40000..U+FFFFF        F1..F3 80..BF 80..BF 80..BF
    // U+100000..U+10FFFF      F4 80..8F 80..BF 80..BF
    if freqs0[0xC0] > 0 || freqs0[0xC1] > 0 {
        return false;
    }
    for f in &freqs0[0xF5..=0xFF] {
        if *f > 0 {
            return false;
        }
    }

    let mut continuations = 0_u32;
    for i in 0..256 {
        if !(0xA0..=0xBF).contains(&i) && pairs[(0xE0 << 8) + i] > 0 {
            return false;
        }
        if !(0x80..=0x9F).contains(&i) && pairs[(0xED << 8) + i] > 0 {
            return false;
        }
        if !(0x90..=0xBF).contains(&i) && pairs[(0xF0 << 8) + i] > 0 {
            return false;
        }
        if !(0x80..=0xBF).contains(&i) && pairs[(0xF4 << 8) + i] > 0 {
            return false;
        }
        if (0x80..=0xBF).contains(&i) {
            continuations += freqs0[i];
        }
    }

    // Ad-hoc threshold
    continuations as usize >= block.len() / 4
}

pub struct UtfCodec {
    /// Frequency then alias per packed code point, 2^23 slots, reused
    alias_map: Vec<u32>,
}

impl UtfCodec {
    pub fn new() -> Self {
        Self { alias_map: Vec::new() }
    }
}

impl Default for UtfCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteTransform for UtfCodec {
    fn forward(&mut self, src: &[u8], dst: &mut [u8], ctx: &mut Context) -> TransformResult {
        let count = src.len();
        if count == 0 {
            return Ok(Transformed { consumed: 0, produced: 0 });
        }
        if count < MIN_BLOCK_SIZE || dst.len() < count {
            return declined(0, 0);
        }
        // A block another stage already typed as something else is not ours
        let hint = ctx.data_type();
        if hint != DataType::Undefined && hint != DataType::Utf8 {
            return declined(0, 0);
        }
        let must_validate = hint != DataType::Utf8;

        // First symbols may be truncated by the block boundary
        let mut start = 0_usize;
        while start < 4 && SIZES[(src[start] >> 4) as usize] == 0 {
            start += 1;
        }

        if must_validate && !validate(&src[start..count - 4]) {
            return declined(0, 0);
        }

        if self.alias_map.is_empty() {
            self.alias_map = vec![0_u32; 1 << 23];
        } else {
            self.alias_map.fill(0);
        }
        let alias_map = &mut self.alias_map;

        // Count the distinct packed code points
        let mut symbols: Vec<u32> = Vec::with_capacity(4096);
        let mut i = start;
        while i < count - 4 {
            let Some((val, s)) = pack(&src[i..]) else {
                return declined(0, 0);
            };
            if alias_map[val as usize] == 0 {
                symbols.push(val);
                if symbols.len() >= 32768 {
                    return declined(0, 0);
                }
            }
            alias_map[val as usize] += 1;
            i += s;
        }
        if symbols.is_empty() {
            return declined(0, 0);
        }

        // Rank by descending frequency; ties broken on the symbol value so
        // the output is identical across runs
        symbols.sort_unstable_by(|&a, &b| {
            alias_map[b as usize]
                .cmp(&alias_map[a as usize])
                .then(a.cmp(&b))
        });

        // The output must beat the input by 10% or the transform is pointless
        let budget = count - count / 10;
        let n = symbols.len();
        if 4 + 3 * n + start >= budget {
            return declined(0, 0);
        }

        // Header: start, adjust (fixed up later), map size, then the map
        let mut dst_idx = 2_usize;
        dst[dst_idx] = (n >> 8) as u8;
        dst[dst_idx + 1] = n as u8;
        dst_idx += 2;
        for (rank, &sym) in symbols.iter().enumerate() {
            alias_map[sym as usize] = rank as u32;
            dst[dst_idx] = (sym >> 16) as u8;
            dst[dst_idx + 1] = (sym >> 8) as u8;
            dst[dst_idx + 2] = sym as u8;
            dst_idx += 3;
        }

        // Leading truncated bytes, stored raw
        dst[dst_idx..dst_idx + start].copy_from_slice(&src[..start]);
        dst_idx += start;

        // Emit aliases
        let mut src_idx = start;
        while src_idx < count - 4 {
            let (val, s) = pack(&src[src_idx..]).unwrap_or((0, 1));
            src_idx += s;
            let mut alias = alias_map[val as usize];
            if dst_idx + 2 > budget {
                return declined(src_idx, dst_idx);
            }
            if alias >= 128 {
                dst[dst_idx] = (alias | 0x80) as u8;
                dst_idx += 1;
                alias >>= 7;
            }
            dst[dst_idx] = alias as u8;
            dst_idx += 1;
        }

        dst[0] = start as u8;
        dst[1] = (src_idx - (count - 4)) as u8;

        // Trailing truncated bytes, stored raw
        while src_idx < count {
            dst[dst_idx] = src[src_idx];
            dst_idx += 1;
            src_idx += 1;
        }

        debug!("UTF8 codec: {} code points, {} -> {} bytes", n, count, dst_idx);
        if dst_idx < budget {
            // Publish the finding so later chain stages skip their own probes
            ctx.set_data_type(DataType::Utf8);
            Ok(Transformed { consumed: count, produced: dst_idx })
        } else {
            declined(count, dst_idx)
        }
    }

    fn inverse(&mut self, src: &[u8], dst: &mut [u8], _ctx: &mut Context) -> TransformResult {
        let count = src.len();
        if count == 0 {
            return Ok(Transformed { consumed: 0, produced: 0 });
        }
        if count < 4 {
            return corrupt("UTF8 block shorter than its header");
        }

        let start = src[0] as usize;
        let adjust = src[1] as usize;
        let n = ((src[2] as usize) << 8) + src[3] as usize;

        // Protect against invalid header fields
        if n == 0 || n >= 32768 || 3 * n >= count || 4 + 3 * n > count || start > 4 || adjust > 3 {
            return corrupt("UTF8 map header out of range");
        }

        // Build the inverse mapping; slots beyond n stay unspecified and are
        // never read for a well-formed block
        let mut map = vec![0_u32; 32768];
        let mut src_idx = 4_usize;
        for slot in map.iter_mut().take(n) {
            *slot = ((src[src_idx] as u32) << 16)
                | ((src[src_idx + 1] as u32) << 8)
                | src[src_idx + 2] as u32;
            src_idx += 3;
        }

        let src_end = count - 4 + adjust;
        let mut dst_idx = 0_usize;

        if src_idx + start > count || start > dst.len() {
            return corrupt("UTF8 block shorter than its prefix");
        }
        dst[..start].copy_from_slice(&src[src_idx..src_idx + start]);
        dst_idx += start;
        src_idx += start;

        while src_idx < src_end {
            let mut alias = src[src_idx] as usize;
            src_idx += 1;
            if alias >= 128 {
                let Some(&next) = src.get(src_idx) else {
                    return corrupt("UTF8 alias stream truncated");
                };
                src_idx += 1;
                alias = ((next as usize) << 7) + (alias & 0x7F);
            }

            if dst_idx + 4 > dst.len() {
                return corrupt("UTF8 output does not fit the buffer");
            }
            let s = unpack(map[alias], &mut dst[dst_idx..]);
            if s == 0 {
                return corrupt("UTF8 alias maps to an invalid code point");
            }
            dst_idx += s;
        }

        // Trailing raw bytes
        let tail = count - src_end;
        if src_idx + tail > count || dst_idx + tail > dst.len() {
            return corrupt("UTF8 tail out of range");
        }
        dst[dst_idx..dst_idx + tail].copy_from_slice(&src[src_idx..src_idx + tail]);
        dst_idx += tail;
        src_idx += tail;

        if src_idx == count {
            Ok(Transformed { consumed: count, produced: dst_idx })
        } else {
            corrupt("UTF8 block has trailing data")
        }
    }

    fn max_encoded_len(&self, n: usize) -> usize {
        n
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn codec() -> UtfCodec {
        UtfCodec::new()
    }

    /// Zipfian-ish text: a few very frequent code points, a long tail of
    /// rare ones, mixing 1, 2 and 3 byte sequences.
    fn utf8_block(target: usize) -> Vec<u8> {
        let mut out = String::new();
        let mut k = 0_u32;
        while out.len() < target {
            out.push_str("the quick δοκιμή ");
            out.push(char::from_u32(0x4E00 + (k % 500)).unwrap());
            out.push(char::from_u32(0x3B1 + (k % 20)).unwrap());
            out.push(' ');
            k += 1;
        }
        out.into_bytes()
    }

    #[test]
    fn pack_unpack_test() {
        let mut buf = [0_u8; 4];
        for ch in ['A', 'é', '€', '𝄞'] {
            let mut enc = [0_u8; 4];
            let s = ch.encode_utf8(&mut enc).len();
            let (val, len) = pack(&enc).unwrap();
            assert_eq!(len, s);
            assert_eq!(unpack(val, &mut buf), s);
            assert_eq!(&buf[..s], &enc[..s]);
        }
        // Continuation byte is not a lead
        assert!(pack(&[0x80, 0, 0, 0]).is_none());
    }

    #[test]
    fn validate_test() {
        let good = utf8_block(4096);
        assert!(validate(&good));

        // Overlong encodings are banned outright
        let mut bad = good.clone();
        bad[100] = 0xC0;
        assert!(!validate(&bad));

        // Plain ASCII has no continuation bytes at all
        let ascii = vec![b'a'; 4096];
        assert!(!validate(&ascii));
    }

    #[test]
    fn round_trip_test() {
        let data = utf8_block(20_000);
        let mut ctx = Context::new();
        let mut c = codec();
        let mut mid = vec![0_u8; data.len()];
        let r = c.forward(&data, &mut mid, &mut ctx).unwrap();
        assert_eq!(r.consumed, data.len());
        assert!(r.produced <= data.len() - data.len() / 10);
        // A successful pass publishes the detected type for later stages
        assert_eq!(ctx.data_type(), DataType::Utf8);

        let mut out = vec![0_u8; data.len()];
        let r2 = codec().inverse(&mid[..r.produced], &mut out, &mut ctx).unwrap();
        assert_eq!(r2.produced, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn truncated_lead_round_trip_test() {
        // Block starts mid-sequence: stray continuation bytes up front
        let mut data = utf8_block(8_000);
        data[0] = 0x99;
        data[1] = 0x8A;
        let mut ctx = Context::new();
        let mut c = codec();
        let mut mid = vec![0_u8; data.len()];
        let r = c.forward(&data, &mut mid, &mut ctx).unwrap();
        let mut out = vec![0_u8; data.len()];
        codec().inverse(&mid[..r.produced], &mut out, &mut ctx).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn declines_noise_test() {
        let mut seed = 42_u64;
        let data: Vec<u8> = (0..8192)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (seed >> 56) as u8
            })
            .collect();
        let mut mid = vec![0_u8; data.len()];
        assert!(matches!(
            codec().forward(&data, &mut mid, &mut Context::new()),
            Err(TransformError::Declined { .. })
        ));
    }

    #[test]
    fn declines_small_and_hinted_test() {
        let data = utf8_block(512);
        let mut mid = vec![0_u8; 1024];
        assert!(codec()
            .forward(&data[..512], &mut mid, &mut Context::new())
            .is_err());

        // A block another stage already classified as EXE is left alone
        let mut ctx = Context::new();
        ctx.set_data_type(DataType::Exe);
        let big = utf8_block(4096);
        let mut mid = vec![0_u8; big.len()];
        assert!(matches!(
            codec().forward(&big, &mut mid, &mut ctx),
            Err(TransformError::Declined { .. })
        ));
        assert_eq!(ctx.data_type(), DataType::Exe);
    }

    #[test]
    fn corrupt_map_test() {
        // Map size field exceeding the block
        let src = [0_u8, 0, 0x7F, 0xFF, 1, 2, 3, 4];
        let mut out = vec![0_u8; 64];
        assert!(matches!(
            codec().inverse(&src, &mut out, &mut Context::new()),
            Err(TransformError::DataCorruption(_))
        ));
    }
}
