//! Inverse side of the block pipeline.
//!
use std::fs::{self, File};
use std::io::{self, Read, Write};

use log::{info, warn};

use super::{MODE_ENTROPY, STREAM_MAGIC, STREAM_VERSION};
use crate::bitstream::BitReader;
use crate::entropy::FpaqDecoder;
use crate::tools::cli::BwOpts;
use crate::tools::context::{Context, DataType};
use crate::transform::{new_chain, ByteTransform, TransformError};

fn corrupt_stream(msg: &str) -> TransformError {
    TransformError::DataCorruption(msg.to_string())
}

/// Decompress a container stream produced by compress_stream. The chain is
/// rebuilt from the stream header; the context only contributes runtime
/// settings such as the worker count.
pub fn decompress_stream(src: &[u8], ctx: &Context) -> Result<Vec<u8>, TransformError> {
    if src.len() < 10 || src[0..4] != STREAM_MAGIC {
        return Err(corrupt_stream("not a bwz stream"));
    }
    if src[4] != STREAM_VERSION {
        return Err(corrupt_stream("unsupported stream version"));
    }
    let chain_len = src[9] as usize;
    if src.len() < 10 + chain_len {
        return Err(corrupt_stream("stream header truncated"));
    }
    let chain_name = std::str::from_utf8(&src[10..10 + chain_len])
        .map_err(|_| corrupt_stream("chain name is not valid text"))?;

    let mut chain_ctx = ctx.clone();
    chain_ctx.put_str("transform", chain_name);
    let mut chain = new_chain(&chain_ctx)?;

    let mut idx = 10 + chain_len;
    let mut out = Vec::new();

    while idx < src.len() {
        if idx + 13 > src.len() {
            return Err(corrupt_stream("block record truncated"));
        }
        let mode = src[idx];
        let orig_len = u32::from_be_bytes(src[idx + 1..idx + 5].try_into().unwrap()) as usize;
        let mid_len = u32::from_be_bytes(src[idx + 5..idx + 9].try_into().unwrap()) as usize;
        let stored_len = u32::from_be_bytes(src[idx + 9..idx + 13].try_into().unwrap()) as usize;
        idx += 13;
        if idx + stored_len > src.len() {
            return Err(corrupt_stream("block payload truncated"));
        }
        let payload = &src[idx..idx + stored_len];
        idx += stored_len;

        // Undo the entropy stage
        let mut cur = if mode & MODE_ENTROPY != 0 {
            let mut br = BitReader::new(payload);
            let mut dec = FpaqDecoder::new(&mut br, 1);
            let mut decoded = vec![0_u8; mid_len];
            dec.decode(&mut decoded);
            dec.dispose();
            decoded
        } else {
            payload.to_vec()
        };

        // Undo the transform stages in reverse order
        chain_ctx.set_data_type(DataType::Undefined);
        for i in (0..chain.len()).rev() {
            if mode & (1 << i) == 0 {
                continue;
            }
            let cap = orig_len.max(cur.len()) + orig_len / 4 + 1024;
            let mut dst = vec![0_u8; cap];
            let r = chain[i].inverse(&cur, &mut dst, &mut chain_ctx)?;
            dst.truncate(r.produced);
            cur = dst;
        }

        if cur.len() != orig_len {
            return Err(corrupt_stream("block did not decode to its original size"));
        }
        out.extend_from_slice(&cur);
    }

    Ok(out)
}

/// Decompress every `.bwz` file named in the options.
pub fn decompress(opts: &BwOpts) -> io::Result<()> {
    let mut ctx = Context::new();
    ctx.put_int("jobs", opts.jobs as i64);

    for fname in &opts.files {
        let mut data = Vec::new();
        File::open(fname)?.read_to_end(&mut data)?;

        let out_name = match fname.strip_suffix(".bwz") {
            Some(stem) => stem.to_string(),
            None => format!("{}.out", fname),
        };
        if !opts.force_overwrite && fs::metadata(&out_name).is_ok() {
            warn!("{} exists, skipping (use --force to overwrite)", out_name);
            continue;
        }

        let plain = decompress_stream(&data, &ctx)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        File::create(&out_name)?.write_all(&plain)?;
        info!("{}: {} -> {} bytes", fname, data.len(), plain.len());

        if !opts.keep_input_files {
            fs::remove_file(fname)?;
        }
    }
    Ok(())
}
