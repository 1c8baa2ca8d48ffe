//! Reduced-Offset Lempel-Ziv codecs.
//!
//! Matches are addressed by an index into a short per-context history
//! instead of a full window offset. The history is a flat ring of 32-bit
//! slots per 16-bit context key; the top 8 bits of each slot hold a content
//! hash that prunes false candidates before any buffer access.
//!
//! Two codec variants share the match engine:
//! - RolzCodec1 scans each chunk into four streams (literals, tokens, match
//!   lengths, match indices) and hands them to the entropy coder.
//! - RolzCodec2 emits 9-bit literal-or-match symbols through a built-in
//!   binary range coder with order-1 contexts.
//!
//! Blocks are cut into chunks; the tables reset at each chunk boundary, so
//! every chunk decodes independently and matches never span a boundary.
//!
use log::trace;

use super::{corrupt, declined, ByteTransform, TransformError, TransformResult, Transformed};
use crate::bitstream::{BitReader, BitWriter};
use crate::entropy::{FpaqDecoder, FpaqEncoder};
use crate::tools::context::Context;

const HASH_SIZE: usize = 1 << 16;
const CHUNK_SIZE: usize = 1 << 24;
const HASH: u32 = 200002979;
const HASH_MASK: u32 = 0xFF00_0000;
const MIN_MATCH: usize = 3;
const MAX_MATCH1: usize = 65535 + MIN_MATCH;
const MAX_MATCH2: usize = 255 + MIN_MATCH;
const LOG_POS_CHECKS1: u32 = 4;
const LOG_POS_CHECKS2: u32 = 5;

pub const MIN_BLOCK_SIZE: usize = 64;
pub const MAX_BLOCK_SIZE: usize = 1 << 30;

const LITERAL_FLAG: u16 = 0;
const MATCH_FLAG: u16 = 1;

/// Context key: the two bytes preceding the position.
#[inline]
fn get_key(p: &[u8]) -> usize {
    u16::from_le_bytes([p[0], p[1]]) as usize
}

/// Content verification hash; only the top 8 bits are kept in a slot.
#[inline]
fn hash32(p: &[u8]) -> u32 {
    (u32::from_le_bytes([p[0], p[1], p[2], p[3]]) << 8).wrapping_mul(HASH) & HASH_MASK
}

/// Copies match_len + MIN_MATCH bytes forward. Byte-wise on purpose:
/// overlapping copies must replay the run.
fn emit_copy(buf: &mut [u8], mut dst_idx: usize, mut ref_idx: usize, mut match_len: usize) -> usize {
    buf[dst_idx] = buf[ref_idx];
    buf[dst_idx + 1] = buf[ref_idx + 1];
    buf[dst_idx + 2] = buf[ref_idx + 2];
    dst_idx += 3;
    ref_idx += 3;

    while match_len != 0 {
        buf[dst_idx] = buf[ref_idx];
        dst_idx += 1;
        ref_idx += 1;
        match_len -= 1;
    }
    dst_idx
}

/// Length escape coding: 255 is a continuation marker.
fn emit_length(buf: &mut Vec<u8>, mut v: usize) {
    while v >= 255 {
        buf.push(0xFF);
        v -= 255;
    }
    buf.push(v as u8);
}

fn read_length(buf: &[u8], idx: &mut usize) -> Result<usize, TransformError> {
    let mut res = 0_usize;
    loop {
        let Some(&b) = buf.get(*idx) else {
            return Err(TransformError::DataCorruption(
                "ROLZ length stream exhausted".to_string(),
            ));
        };
        *idx += 1;
        if b == 0xFF {
            res += 255;
            continue;
        }
        return Ok(res + b as usize);
    }
}

/// Rolling context-indexed match history shared by both codec variants.
struct MatchEngine {
    log_pos_checks: u32,
    pos_checks: usize,
    mask_checks: usize,
    max_match: usize,
    /// Write cursor per key, modulo pos_checks
    counters: Vec<usize>,
    /// pos_checks slots per key holding (hash | position)
    matches: Vec<u32>,
}

impl MatchEngine {
    fn new(log_pos_checks: u32, max_match: usize) -> Result<Self, TransformError> {
        if !(2..=8).contains(&log_pos_checks) {
            return Err(TransformError::InvalidArgument(format!(
                "invalid logPosChecks parameter: {} (must be in [2..8])",
                log_pos_checks
            )));
        }
        let pos_checks = 1 << log_pos_checks;
        Ok(Self {
            log_pos_checks,
            pos_checks,
            mask_checks: pos_checks - 1,
            max_match,
            counters: vec![0; HASH_SIZE],
            matches: vec![0; HASH_SIZE << log_pos_checks],
        })
    }

    fn reset_counters(&mut self) {
        self.counters.fill(0);
    }

    fn reset_matches(&mut self) {
        self.matches.fill(0);
    }

    /// Returns (ring distance << 16) | (length - MIN_MATCH), or -1, and
    /// registers pos either way. buf must extend at least 4 bytes past end.
    fn find_match(&mut self, buf: &[u8], pos: usize, end: usize) -> i32 {
        let key = get_key(&buf[pos - 2..]);
        let counter = self.counters[key];
        let base = key << self.log_pos_checks;
        let hash = hash32(&buf[pos..]);
        let mut best_len = 0_usize;
        let mut best_idx = -1_i32;
        let max_match = self.max_match.min(end - pos);

        // Check all recorded positions, newest first
        for d in 0..self.pos_checks {
            let slot = self.matches[base + ((counter + self.pos_checks - d) & self.mask_checks)];

            // Hash check may save a memory access
            if slot & HASH_MASK != hash {
                continue;
            }

            let r = (slot & !HASH_MASK) as usize;
            if buf[r + best_len] != buf[pos + best_len] {
                continue;
            }

            let mut n = 0_usize;
            while n + 4 < max_match && buf[r + n..r + n + 4] == buf[pos + n..pos + n + 4] {
                n += 4;
            }
            while n < max_match && buf[r + n] == buf[pos + n] {
                n += 1;
            }

            if n > best_len {
                best_idx = d as i32;
                best_len = n;
                if best_len == max_match {
                    break;
                }
            }
        }

        // Register the current position
        self.counters[key] = (counter + 1) & self.mask_checks;
        self.matches[base + self.counters[key]] = hash | pos as u32;

        if best_len < MIN_MATCH {
            -1
        } else {
            (best_idx << 16) | (best_len - MIN_MATCH) as i32
        }
    }

    /// Decoder-side registration: positions only, no content hash. The ring
    /// cursors still advance exactly as the encoder's did.
    fn register_pos(&mut self, key: usize, pos: usize) {
        self.counters[key] = (self.counters[key] + 1) & self.mask_checks;
        self.matches[(key << self.log_pos_checks) + self.counters[key]] = pos as u32;
    }

    /// Resolve a ring distance back to the stored position.
    fn match_ref(&self, key: usize, dist: usize) -> usize {
        let slot = (self.counters[key] + self.pos_checks - dist) & self.mask_checks;
        self.matches[(key << self.log_pos_checks) + slot] as usize
    }
}

// ---------------------------------------------------------------------------
// Variant 1: four streams through the entropy coder
// ---------------------------------------------------------------------------

pub struct RolzCodec1 {
    engine: MatchEngine,
}

impl RolzCodec1 {
    pub fn new(log_pos_checks: u32) -> Result<Self, TransformError> {
        Ok(Self { engine: MatchEngine::new(log_pos_checks, MAX_MATCH1)? })
    }

    fn forward(&mut self, src: &[u8], dst: &mut [u8]) -> TransformResult {
        let count = src.len();
        let src_end = count - 4;
        dst[0..4].copy_from_slice(&(count as u32).to_be_bytes());
        let lit_order: u32 = if count < (1 << 17) { 0 } else { 1 };
        dst[4] = lit_order as u8;
        let mut dst_idx = 5_usize;

        let mut size_chunk = count.min(CHUNK_SIZE);
        let mut start_chunk = 0_usize;
        let mut lit_buf: Vec<u8> = Vec::with_capacity(size_chunk.min(src_end) + 8);
        let mut tk_buf: Vec<u8> = Vec::with_capacity(size_chunk / 3 + 16);
        let mut len_buf: Vec<u8> = Vec::with_capacity(size_chunk / 4 + 16);
        let mut m_idx_buf: Vec<u8> = Vec::with_capacity(size_chunk / 3 + 16);
        self.engine.reset_counters();

        while start_chunk < src_end {
            lit_buf.clear();
            tk_buf.clear();
            len_buf.clear();
            m_idx_buf.clear();
            self.engine.reset_matches();

            let end_chunk = (start_chunk + size_chunk).min(src_end);
            size_chunk = end_chunk - start_chunk;
            // The slice runs to the end of src so the verification hash can
            // read past the match window
            let buf = &src[start_chunk..];
            let mut src_idx = 0_usize;

            // The first two bytes have no context yet: raw literals
            lit_buf.push(buf[src_idx]);
            src_idx += 1;
            if start_chunk + 1 < src_end {
                lit_buf.push(buf[src_idx]);
                src_idx += 1;
            }
            let mut first_lit_idx = src_idx;

            while src_idx < size_chunk {
                let m = self.engine.find_match(buf, src_idx, size_chunk);
                if m < 0 {
                    src_idx += 1;
                    continue;
                }

                // token LLLL_LMMM -> L literal run length, M match length
                let lit_len = src_idx - first_lit_idx;
                let mode = if lit_len < 31 { (lit_len << 3) as u8 } else { 0xF8 };
                let m_len = (m & 0xFFFF) as usize;

                if m_len >= 7 {
                    tk_buf.push(mode | 0x07);
                    emit_length(&mut len_buf, m_len - 7);
                } else {
                    tk_buf.push(mode | m_len as u8);
                }

                if lit_len > 0 {
                    if lit_len >= 31 {
                        emit_length(&mut len_buf, lit_len - 31);
                    }
                    lit_buf.extend_from_slice(&buf[first_lit_idx..src_idx]);
                }

                m_idx_buf.push((m >> 16) as u8);
                src_idx += m_len + MIN_MATCH;
                first_lit_idx = src_idx;
            }

            // Terminating token carries the trailing literal run
            let lit_len = src_idx - first_lit_idx;
            let mode = if lit_len < 31 { (lit_len << 3) as u8 } else { 0xF8 };
            tk_buf.push(mode);
            if lit_len >= 31 {
                emit_length(&mut len_buf, lit_len - 31);
            }
            lit_buf.extend_from_slice(&buf[first_lit_idx..src_idx]);

            // Entropy code the four buffers into one sub-stream
            let mut obs = BitWriter::new(size_chunk / 2 + 64);
            obs.write_bits(lit_buf.len() as u64, 32);
            obs.write_bits(tk_buf.len() as u64, 32);
            obs.write_bits(len_buf.len() as u64, 32);
            obs.write_bits(m_idx_buf.len() as u64, 32);
            let mut lit_enc = FpaqEncoder::new(&mut obs, lit_order);
            lit_enc.encode(&lit_buf);
            lit_enc.dispose();
            let mut m_enc = FpaqEncoder::new(&mut obs, 0);
            m_enc.encode(&tk_buf);
            m_enc.encode(&len_buf);
            m_enc.encode(&m_idx_buf);
            m_enc.dispose();
            obs.close();

            if dst_idx + obs.output.len() > dst.len() {
                return declined(start_chunk + src_idx, dst_idx);
            }
            dst[dst_idx..dst_idx + obs.output.len()].copy_from_slice(&obs.output);
            dst_idx += obs.output.len();
            trace!(
                "ROLZ1 chunk {}..{}: {} literals, {} tokens",
                start_chunk,
                end_chunk,
                lit_buf.len(),
                tk_buf.len()
            );
            start_chunk = end_chunk;
        }

        // Last literals, stored raw
        if dst_idx + 4 > dst.len() {
            return declined(src_end, dst_idx);
        }
        dst[dst_idx..dst_idx + 4].copy_from_slice(&src[src_end..count]);
        dst_idx += 4;

        if dst_idx < count {
            Ok(Transformed { consumed: count, produced: dst_idx })
        } else {
            declined(count, dst_idx)
        }
    }

    fn inverse(&mut self, src: &[u8], dst: &mut [u8]) -> TransformResult {
        let count = src.len();
        if count < 9 {
            return corrupt("ROLZ block too short");
        }
        let stored = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if stored < 4 || stored > MAX_BLOCK_SIZE {
            return corrupt("ROLZ stored length out of range");
        }
        let dst_end = stored - 4;
        if dst.len() < stored {
            return Err(TransformError::InvalidArgument(
                "output buffer smaller than the stored block length".to_string(),
            ));
        }
        let lit_order = src[4] as u32;
        if lit_order > 1 {
            return corrupt("ROLZ literal order flag out of range");
        }
        let mut src_idx = 5_usize;
        let mut size_chunk = dst_end.min(CHUNK_SIZE);
        let mut start_chunk = 0_usize;
        self.engine.reset_counters();

        while start_chunk < dst_end {
            self.engine.reset_matches();
            let end_chunk = (start_chunk + size_chunk).min(dst_end);
            size_chunk = end_chunk - start_chunk;

            // Decode literal, token, length and match index buffers
            let mut ibs = BitReader::new(&src[src_idx..]);
            let lit_len = ibs.read_bits(32) as usize;
            let tk_len = ibs.read_bits(32) as usize;
            let m_len_len = ibs.read_bits(32) as usize;
            let m_idx_len = ibs.read_bits(32) as usize;
            if lit_len > size_chunk || tk_len > size_chunk || m_len_len > size_chunk || m_idx_len > size_chunk
            {
                return corrupt("ROLZ stream lengths exceed the chunk");
            }

            let mut lit_buf = vec![0_u8; lit_len];
            let mut tk_buf = vec![0_u8; tk_len];
            let mut len_buf = vec![0_u8; m_len_len];
            let mut m_idx_buf = vec![0_u8; m_idx_len];
            let mut lit_dec = FpaqDecoder::new(&mut ibs, lit_order);
            lit_dec.decode(&mut lit_buf);
            lit_dec.dispose();
            let mut m_dec = FpaqDecoder::new(&mut ibs, 0);
            m_dec.decode(&mut tk_buf);
            m_dec.decode(&mut len_buf);
            m_dec.decode(&mut m_idx_buf);
            m_dec.dispose();
            src_idx += (ibs.bit_position() + 7) >> 3;
            if src_idx > count {
                return corrupt("ROLZ sub-stream ran past the block");
            }

            let out = &mut dst[start_chunk..];
            let mut dst_idx = 0_usize;
            let mut lit_idx = 0_usize;
            let mut tk_idx = 0_usize;
            let mut len_idx = 0_usize;
            let mut m_pos = 0_usize;

            let Some(&first) = lit_buf.first() else {
                return corrupt("ROLZ literal stream empty");
            };
            out[dst_idx] = first;
            dst_idx += 1;
            lit_idx += 1;
            if start_chunk + 1 < dst_end {
                let Some(&second) = lit_buf.get(1) else {
                    return corrupt("ROLZ literal stream empty");
                };
                out[dst_idx] = second;
                dst_idx += 1;
                lit_idx += 1;
            }

            while dst_idx < size_chunk {
                let Some(&mode) = tk_buf.get(tk_idx) else {
                    return corrupt("ROLZ token stream exhausted");
                };
                tk_idx += 1;
                let mut match_len = (mode & 0x07) as usize;
                if match_len == 7 {
                    match_len += read_length(&len_buf, &mut len_idx)?;
                }

                // Copy the literal run, feeding each position back into the
                // tables so the rings track the encoder bit for bit
                let lit_run = if mode < 0xF8 {
                    (mode >> 3) as usize
                } else {
                    read_length(&len_buf, &mut len_idx)? + 31
                };
                if dst_idx + lit_run > size_chunk || lit_idx + lit_run > lit_buf.len() {
                    return corrupt("ROLZ literal run leaves the chunk");
                }
                out[dst_idx..dst_idx + lit_run]
                    .copy_from_slice(&lit_buf[lit_idx..lit_idx + lit_run]);
                for n in 0..lit_run {
                    let k = dst_idx + n;
                    self.engine.register_pos(get_key(&out[k - 2..]), k);
                }
                lit_idx += lit_run;
                dst_idx += lit_run;

                if dst_idx >= size_chunk {
                    // The terminating token's literals filled the chunk
                    break;
                }

                // Sanity check
                if start_chunk + dst_idx + match_len + MIN_MATCH > dst_end {
                    return corrupt("ROLZ match runs past the block end");
                }

                let key = get_key(&out[dst_idx - 2..]);
                let Some(&m_idx) = m_idx_buf.get(m_pos) else {
                    return corrupt("ROLZ match index stream exhausted");
                };
                m_pos += 1;
                let r = self.engine.match_ref(key, m_idx as usize);
                self.engine.register_pos(key, dst_idx);
                if r >= dst_idx {
                    return corrupt("ROLZ match reference ahead of the cursor");
                }
                dst_idx = emit_copy(out, dst_idx, r, match_len);
            }

            start_chunk = end_chunk;
        }

        // Last literals, stored raw
        if src_idx + 4 > count {
            return corrupt("ROLZ tail literals missing");
        }
        dst[dst_end..dst_end + 4].copy_from_slice(&src[src_idx..src_idx + 4]);
        src_idx += 4;

        if src_idx == count {
            Ok(Transformed { consumed: count, produced: dst_end + 4 })
        } else {
            corrupt("ROLZ block has trailing data")
        }
    }
}

// ---------------------------------------------------------------------------
// Variant 2: embedded binary range coder
// ---------------------------------------------------------------------------

const PSCALE: u32 = 1 << 16;
const ADAPT: u32 = 5;
const TOP: u64 = 1 << 24;

/// Range encoder writing 9-bit literal/match symbols plus raw-but-coded
/// match index bits straight into the output block.
struct RolzEncoder<'a> {
    buf: &'a mut [u8],
    idx: usize,
    overflow: bool,
    low: u64,
    high: u64,
    c1: usize,
    ctx: usize,
    p_idx: usize,
    log_sizes: [u32; 2],
    probs: [Vec<u16>; 2],
}

impl<'a> RolzEncoder<'a> {
    fn new(lit_log_size: u32, m_log_size: u32, buf: &'a mut [u8], idx: usize) -> Self {
        Self {
            buf,
            idx,
            overflow: false,
            low: 0,
            high: u64::MAX,
            c1: 1,
            ctx: 0,
            p_idx: LITERAL_FLAG as usize,
            log_sizes: [lit_log_size, m_log_size],
            probs: [
                vec![(PSCALE >> 1) as u16; 256 << lit_log_size],
                vec![(PSCALE >> 1) as u16; 256 << m_log_size],
            ],
        }
    }

    fn reset(&mut self) {
        self.low = 0;
        self.high = u64::MAX;
        self.probs[0].fill((PSCALE >> 1) as u16);
        self.probs[1].fill((PSCALE >> 1) as u16);
    }

    fn set_mode(&mut self, flag: u16) {
        self.p_idx = flag as usize;
    }

    fn set_context(&mut self, byte: u8) {
        self.ctx = (byte as usize) << self.log_sizes[self.p_idx];
    }

    fn put_byte(&mut self, byte: u8) {
        if self.idx < self.buf.len() {
            self.buf[self.idx] = byte;
        } else {
            self.overflow = true;
        }
        self.idx += 1;
    }

    fn encode_bit(&mut self, bit: u32) {
        let slot = self.ctx + self.c1;
        let p = self.probs[self.p_idx][slot] as u64;
        let mid = self.low + (((self.high - self.low) >> 16) * p);

        if bit == 0 {
            self.high = mid;
            self.probs[self.p_idx][slot] += ((PSCALE - p as u32) >> ADAPT) as u16;
        } else {
            self.low = mid + 1;
            self.probs[self.p_idx][slot] -= (p >> ADAPT) as u16;
        }
        self.c1 = (self.c1 << 1) | bit as usize;

        loop {
            if (self.low ^ self.high) >> 56 == 0 {
                self.put_byte((self.low >> 56) as u8);
                self.low <<= 8;
                self.high = (self.high << 8) | 0xFF;
            } else if self.high - self.low < TOP {
                self.high = self.low | (u64::MAX >> 8);
            } else {
                break;
            }
        }
    }

    fn encode9_bits(&mut self, val: u16) {
        self.c1 = 1;
        for n in (0..9).rev() {
            self.encode_bit(((val >> n) & 1) as u32);
        }
    }

    fn encode_bits(&mut self, val: usize, n: u32) {
        self.c1 = 1;
        for i in (0..n).rev() {
            self.encode_bit(((val >> i) & 1) as u32);
        }
    }

    fn dispose(&mut self) {
        for _ in 0..8 {
            self.put_byte((self.low >> 56) as u8);
            self.low <<= 8;
        }
    }
}

/// Mirror of RolzEncoder over an input block.
struct RolzDecoder<'a> {
    buf: &'a [u8],
    idx: usize,
    low: u64,
    high: u64,
    current: u64,
    c1: usize,
    ctx: usize,
    p_idx: usize,
    log_sizes: [u32; 2],
    probs: [Vec<u16>; 2],
}

impl<'a> RolzDecoder<'a> {
    fn new(lit_log_size: u32, m_log_size: u32, buf: &'a [u8], idx: usize) -> Self {
        let mut current = 0_u64;
        let mut i = idx;
        for _ in 0..8 {
            current = (current << 8) | buf.get(i).copied().unwrap_or(0) as u64;
            i += 1;
        }
        Self {
            buf,
            idx: i,
            low: 0,
            high: u64::MAX,
            current,
            c1: 1,
            ctx: 0,
            p_idx: LITERAL_FLAG as usize,
            log_sizes: [lit_log_size, m_log_size],
            probs: [
                vec![(PSCALE >> 1) as u16; 256 << lit_log_size],
                vec![(PSCALE >> 1) as u16; 256 << m_log_size],
            ],
        }
    }

    fn reset(&mut self) {
        self.low = 0;
        self.high = u64::MAX;
        self.probs[0].fill((PSCALE >> 1) as u16);
        self.probs[1].fill((PSCALE >> 1) as u16);
    }

    fn set_mode(&mut self, flag: u16) {
        self.p_idx = flag as usize;
    }

    fn set_context(&mut self, byte: u8) {
        self.ctx = (byte as usize) << self.log_sizes[self.p_idx];
    }

    fn decode_bit(&mut self) -> u32 {
        let slot = self.ctx + self.c1;
        let p = self.probs[self.p_idx][slot] as u64;
        let mid = self.low + (((self.high - self.low) >> 16) * p);
        let bit;

        if self.current <= mid {
            bit = 0;
            self.high = mid;
            self.probs[self.p_idx][slot] += ((PSCALE - p as u32) >> ADAPT) as u16;
        } else {
            bit = 1;
            self.low = mid + 1;
            self.probs[self.p_idx][slot] -= (p >> ADAPT) as u16;
        }
        self.c1 = (self.c1 << 1) | bit as usize;

        loop {
            if (self.low ^ self.high) >> 56 == 0 {
                self.low <<= 8;
                self.high = (self.high << 8) | 0xFF;
                self.current = (self.current << 8) | self.buf.get(self.idx).copied().unwrap_or(0) as u64;
                self.idx += 1;
            } else if self.high - self.low < TOP {
                self.high = self.low | (u64::MAX >> 8);
            } else {
                break;
            }
        }
        bit
    }

    fn decode9_bits(&mut self) -> u16 {
        self.c1 = 1;
        for _ in 0..9 {
            self.decode_bit();
        }
        (self.c1 & 0x1FF) as u16
    }

    fn decode_bits(&mut self, n: u32) -> usize {
        self.c1 = 1;
        for _ in 0..n {
            self.decode_bit();
        }
        self.c1 & ((1 << n) - 1)
    }

    /// Reading is 8 bytes ahead of the decoded position by construction.
    fn consumed(&self) -> usize {
        self.idx
    }
}

pub struct RolzCodec2 {
    engine: MatchEngine,
    log_pos_checks: u32,
}

impl RolzCodec2 {
    pub fn new(log_pos_checks: u32) -> Result<Self, TransformError> {
        Ok(Self {
            engine: MatchEngine::new(log_pos_checks, MAX_MATCH2)?,
            log_pos_checks,
        })
    }

    fn forward(&mut self, src: &[u8], dst: &mut [u8]) -> TransformResult {
        let count = src.len();
        let src_end = count - 4;
        dst[0..4].copy_from_slice(&(count as u32).to_be_bytes());
        let mut re = RolzEncoder::new(9, self.log_pos_checks, dst, 4);

        self.engine.reset_counters();
        let mut size_chunk = count.min(CHUNK_SIZE);
        let mut start_chunk = 0_usize;
        let mut buf: &[u8] = src;
        let mut src_idx = 0_usize;

        while start_chunk < src_end {
            self.engine.reset_matches();
            let end_chunk = (start_chunk + size_chunk).min(src_end);
            size_chunk = end_chunk - start_chunk;
            re.reset();
            buf = &src[start_chunk..];
            src_idx = 0;

            // First literals, coded under an empty context
            re.set_mode(LITERAL_FLAG);
            re.set_context(0);
            re.encode9_bits((LITERAL_FLAG << 8) | buf[src_idx] as u16);
            src_idx += 1;
            if start_chunk + 1 < src_end {
                re.encode9_bits((LITERAL_FLAG << 8) | buf[src_idx] as u16);
                src_idx += 1;
            }

            while src_idx < size_chunk {
                re.set_context(buf[src_idx - 1]);
                let m = self.engine.find_match(buf, src_idx, size_chunk);

                if m < 0 {
                    re.encode9_bits((LITERAL_FLAG << 8) | buf[src_idx] as u16);
                    src_idx += 1;
                    continue;
                }

                // One match length symbol, then the ring index bits
                let match_len = (m & 0xFFFF) as usize;
                re.encode9_bits((MATCH_FLAG << 8) | match_len as u16);
                let match_idx = (m >> 16) as usize;
                re.set_mode(MATCH_FLAG);
                re.set_context(buf[src_idx - 1]);
                re.encode_bits(match_idx, self.log_pos_checks);
                re.set_mode(LITERAL_FLAG);
                src_idx += match_len + MIN_MATCH;
            }

            start_chunk = end_chunk;
        }

        // Last literals
        re.set_mode(LITERAL_FLAG);
        for _ in 0..4 {
            re.set_context(buf[src_idx - 1]);
            re.encode9_bits((LITERAL_FLAG << 8) | buf[src_idx] as u16);
            src_idx += 1;
        }
        re.dispose();

        let dst_idx = re.idx;
        if re.overflow || dst_idx >= count {
            return declined(count, dst_idx.min(dst.len()));
        }
        Ok(Transformed { consumed: count, produced: dst_idx })
    }

    fn inverse(&mut self, src: &[u8], dst: &mut [u8]) -> TransformResult {
        let count = src.len();
        if count < 12 {
            return corrupt("ROLZX block too short");
        }
        let dst_end = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if dst_end > MAX_BLOCK_SIZE || dst_end < 5 {
            return corrupt("ROLZX stored length out of range");
        }
        if dst.len() < dst_end {
            return Err(TransformError::InvalidArgument(
                "output buffer smaller than the stored block length".to_string(),
            ));
        }

        let mut rd = RolzDecoder::new(9, self.log_pos_checks, src, 4);
        self.engine.reset_counters();
        let mut size_chunk = dst_end.min(CHUNK_SIZE);
        let mut start_chunk = 0_usize;

        while start_chunk < dst_end {
            self.engine.reset_matches();
            let end_chunk = (start_chunk + size_chunk).min(dst_end);
            size_chunk = end_chunk - start_chunk;
            rd.reset();
            let out = &mut dst[start_chunk..];
            let mut dst_idx = 0_usize;

            // First literals
            rd.set_mode(LITERAL_FLAG);
            rd.set_context(0);
            let val = rd.decode9_bits();
            if (val >> 8) == MATCH_FLAG {
                return corrupt("ROLZX chunk must open with a literal");
            }
            out[dst_idx] = val as u8;
            dst_idx += 1;

            if start_chunk + 1 < dst_end - 4 {
                let val = rd.decode9_bits();
                if (val >> 8) == MATCH_FLAG {
                    return corrupt("ROLZX chunk must open with two literals");
                }
                out[dst_idx] = val as u8;
                dst_idx += 1;
            }

            while dst_idx < size_chunk {
                let saved_idx = dst_idx;
                rd.set_mode(LITERAL_FLAG);
                rd.set_context(out[dst_idx - 1]);
                let val = rd.decode9_bits();

                if (val >> 8) == LITERAL_FLAG {
                    out[dst_idx] = val as u8;
                    dst_idx += 1;
                } else {
                    // One match length and ring index
                    let match_len = (val & 0xFF) as usize;

                    // Sanity check
                    if start_chunk + dst_idx + match_len + MIN_MATCH > dst_end {
                        return corrupt("ROLZX match runs past the block end");
                    }
                    if dst_idx < 2 {
                        return corrupt("ROLZX match without context");
                    }

                    let key = get_key(&out[dst_idx - 2..]);
                    rd.set_mode(MATCH_FLAG);
                    rd.set_context(out[dst_idx - 1]);
                    let match_idx = rd.decode_bits(self.log_pos_checks);
                    let r = self.engine.match_ref(key, match_idx);
                    if r >= dst_idx {
                        return corrupt("ROLZX match reference ahead of the cursor");
                    }
                    dst_idx = emit_copy(out, dst_idx, r, match_len);
                }

                // Update the ring exactly as the encoder did
                if saved_idx >= 2 {
                    let key = get_key(&out[saved_idx - 2..]);
                    self.engine.register_pos(key, saved_idx);
                }
            }

            start_chunk = end_chunk;
        }

        if rd.consumed() == count {
            Ok(Transformed { consumed: count, produced: dst_end })
        } else {
            corrupt("ROLZX stream length mismatch")
        }
    }
}

// ---------------------------------------------------------------------------
// Facade: variant picked at construction
// ---------------------------------------------------------------------------

enum RolzDelegate {
    MultiStream(RolzCodec1),
    Embedded(RolzCodec2),
}

/// ROLZ transform with the variant resolved from configuration: a context
/// "transform" value containing "ROLZX" selects the embedded-coder variant.
pub struct RolzCodec {
    delegate: RolzDelegate,
}

impl RolzCodec {
    pub fn new(log_pos_checks: u32) -> Result<Self, TransformError> {
        Ok(Self {
            delegate: RolzDelegate::MultiStream(RolzCodec1::new(log_pos_checks)?),
        })
    }

    pub fn new_with_ctx(ctx: &Context) -> Result<Self, TransformError> {
        let transform = ctx.get_str("transform", "NONE");
        let delegate = if transform.contains("ROLZX") {
            RolzDelegate::Embedded(RolzCodec2::new(LOG_POS_CHECKS2)?)
        } else {
            RolzDelegate::MultiStream(RolzCodec1::new(LOG_POS_CHECKS1)?)
        };
        Ok(Self { delegate })
    }
}

impl ByteTransform for RolzCodec {
    fn forward(&mut self, src: &[u8], dst: &mut [u8], _ctx: &mut Context) -> TransformResult {
        let count = src.len();
        if count == 0 {
            return Ok(Transformed { consumed: 0, produced: 0 });
        }
        if count < MIN_BLOCK_SIZE {
            return declined(0, 0);
        }
        if count > MAX_BLOCK_SIZE {
            return Err(TransformError::InvalidArgument(format!(
                "the max ROLZ codec block size is {}, got {}",
                MAX_BLOCK_SIZE, count
            )));
        }
        if dst.len() < self.max_encoded_len(count) {
            return declined(0, 0);
        }

        match &mut self.delegate {
            RolzDelegate::MultiStream(c) => c.forward(src, dst),
            RolzDelegate::Embedded(c) => c.forward(src, dst),
        }
    }

    fn inverse(&mut self, src: &[u8], dst: &mut [u8], _ctx: &mut Context) -> TransformResult {
        let count = src.len();
        if count == 0 {
            return Ok(Transformed { consumed: 0, produced: 0 });
        }
        if count > MAX_BLOCK_SIZE {
            return Err(TransformError::InvalidArgument(format!(
                "the max ROLZ codec block size is {}, got {}",
                MAX_BLOCK_SIZE, count
            )));
        }

        match &mut self.delegate {
            RolzDelegate::MultiStream(c) => c.inverse(src, dst),
            RolzDelegate::Embedded(c) => c.inverse(src, dst),
        }
    }

    fn max_encoded_len(&self, n: usize) -> usize {
        if n <= 512 {
            n + 64
        } else {
            n
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rolz1() -> RolzCodec {
        RolzCodec::new(LOG_POS_CHECKS1).unwrap()
    }

    fn rolz2() -> RolzCodec {
        let mut ctx = Context::new();
        ctx.put_str("transform", "ROLZX");
        RolzCodec::new_with_ctx(&ctx).unwrap()
    }

    fn text_block(n: usize) -> Vec<u8> {
        b"the compressible quick brown fox jumps over the lazy compressible dog. "
            .iter()
            .cycle()
            .take(n)
            .copied()
            .collect()
    }

    fn noise_block(n: usize) -> Vec<u8> {
        let mut seed = 0x9E3779B97F4A7C15_u64;
        (0..n)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (seed >> 56) as u8
            })
            .collect()
    }

    fn round_trip(codec: &mut RolzCodec, fresh: &mut RolzCodec, data: &[u8]) -> usize {
        let mut ctx = Context::new();
        let mut mid = vec![0_u8; codec.max_encoded_len(data.len())];
        let r = codec.forward(data, &mut mid, &mut ctx).unwrap();
        assert_eq!(r.consumed, data.len());
        assert!(r.produced < data.len());

        let mut out = vec![0_u8; data.len()];
        let r2 = fresh.inverse(&mid[..r.produced], &mut out, &mut ctx).unwrap();
        assert_eq!(r2.consumed, r.produced);
        assert_eq!(r2.produced, data.len());
        assert_eq!(out, data, "round trip mismatch");
        r.produced
    }

    #[test]
    fn length_escape_test() {
        for v in [0_usize, 1, 200, 254, 255, 256, 509, 510, 511, 70_000] {
            let mut buf = Vec::new();
            emit_length(&mut buf, v);
            let mut idx = 0;
            assert_eq!(read_length(&buf, &mut idx).unwrap(), v);
            assert_eq!(idx, buf.len());
        }
    }

    #[test]
    fn find_match_basic_test() {
        let mut e = MatchEngine::new(4, MAX_MATCH1).unwrap();
        let buf = b"abcdefabcdefabcdef____";
        // No history yet
        assert_eq!(e.find_match(buf, 2, 18), -1);
        // Same context "ab" at 6+2: position 8 matches position 2 onward
        let m = e.find_match(buf, 8, 18);
        assert!(m >= 0);
        assert_eq!(m >> 16, 0, "newest registration wins");
        assert_eq!((m & 0xFFFF) as usize + MIN_MATCH, 10);
    }

    #[test]
    fn rolz1_small_block_test() {
        // Below 1 << 17: literal order 0
        let data = text_block(20_000);
        round_trip(&mut rolz1(), &mut rolz1(), &data);
    }

    #[test]
    fn rolz1_large_block_test() {
        // Above 1 << 17: literal order 1
        let data = text_block(300_000);
        round_trip(&mut rolz1(), &mut rolz1(), &data);
    }

    #[test]
    fn rolz1_long_match_escape_test() {
        // Alternating bytes produce maximum length matches, exercising the
        // token escape and the length continuation bytes
        let data: Vec<u8> = b"AB".iter().cycle().take(1_000_000).copied().collect();
        let produced = round_trip(&mut rolz1(), &mut rolz1(), &data);
        assert!(produced < data.len() / 100);
    }

    #[test]
    fn rolz2_round_trip_test() {
        let data = text_block(100_000);
        round_trip(&mut rolz2(), &mut rolz2(), &data);
    }

    #[test]
    fn rolz2_zeros_tiny_output_test() {
        let data = vec![0_u8; 1 << 20];
        let mut ctx = Context::new();
        let mut c = rolz2();
        let mut mid = vec![0_u8; data.len()];
        let r = c.forward(&data, &mut mid, &mut ctx).unwrap();
        assert!(r.produced < 128, "zeros should collapse, got {}", r.produced);

        let mut out = vec![1_u8; data.len()];
        let r2 = rolz2().inverse(&mid[..r.produced], &mut out, &mut ctx).unwrap();
        assert_eq!(r2.produced, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn min_block_size_test() {
        let data = vec![7_u8; MIN_BLOCK_SIZE - 1];
        let mut mid = vec![0_u8; 256];
        assert!(matches!(
            rolz1().forward(&data, &mut mid, &mut Context::new()),
            Err(TransformError::Declined { .. })
        ));
    }

    #[test]
    fn log_pos_checks_validation_test() {
        assert!(matches!(
            RolzCodec::new(1),
            Err(TransformError::InvalidArgument(_))
        ));
        assert!(matches!(
            RolzCodec::new(9),
            Err(TransformError::InvalidArgument(_))
        ));
        assert!(RolzCodec::new(8).is_ok());
    }

    #[test]
    fn noise_declines_test() {
        let data = noise_block(1 << 16);
        let mut ctx = Context::new();
        let mut mid = vec![0_u8; 1 << 16];
        assert!(matches!(
            rolz1().forward(&data, &mut mid, &mut ctx),
            Err(TransformError::Declined { .. })
        ));
        assert!(matches!(
            rolz2().forward(&data, &mut mid, &mut ctx),
            Err(TransformError::Declined { .. })
        ));
    }

    #[test]
    fn corrupt_stream_test() {
        let data = text_block(10_000);
        let mut ctx = Context::new();
        let mut c = rolz1();
        let mut mid = vec![0_u8; c.max_encoded_len(data.len())];
        let r = c.forward(&data, &mut mid, &mut ctx).unwrap();

        // Claim a bigger block than was stored
        let mut broken = mid[..r.produced].to_vec();
        broken[0..4].copy_from_slice(&(200_000_u32).to_be_bytes());
        let mut out = vec![0_u8; 200_000];
        assert!(rolz1().inverse(&broken, &mut out, &mut ctx).is_err());
    }
}
