//! Forward side of the block pipeline.
//!
use std::fs::{self, File};
use std::io::{self, Read, Write};

use log::{debug, info, warn};

use super::{MODE_ENTROPY, STREAM_MAGIC, STREAM_VERSION};
use crate::bitstream::BitWriter;
use crate::entropy::FpaqEncoder;
use crate::tools::cli::BwOpts;
use crate::tools::context::{Context, DataType};
use crate::transform::{new_chain, ByteTransform, TransformError};

/// Compress a whole byte stream into the container format. The context
/// supplies the transform chain, block size and worker count.
pub fn compress_stream(src: &[u8], ctx: &Context) -> Result<Vec<u8>, TransformError> {
    let mut chain = new_chain(ctx)?;
    if chain.len() > 7 {
        return Err(TransformError::InvalidArgument(
            "transform chains are limited to 7 stages".to_string(),
        ));
    }

    // Block size is carried rounded up to a multiple of 16
    let requested = ctx.get_int("blockSize", 1 << 20).max(16) as usize;
    let block_size = (requested + 15) & !15;
    let chain_name = ctx.get_str("transform", "NONE");

    let mut out = Vec::with_capacity(src.len() / 2 + 64);
    out.extend_from_slice(&STREAM_MAGIC);
    out.push(STREAM_VERSION);
    out.extend_from_slice(&(block_size as u32).to_be_bytes());
    out.push(chain_name.len() as u8);
    out.extend_from_slice(chain_name.as_bytes());

    let mut block_ctx = ctx.clone();

    for block in src.chunks(block_size) {
        let mut mode = 0_u8;
        let mut cur = block.to_vec();
        // Detection hints are per block; a stage that types this block
        // publishes into the context and later stages read it from there
        block_ctx.set_data_type(DataType::Undefined);

        // Run the forward chain; a declined stage simply drops out
        for (i, t) in chain.iter_mut().enumerate() {
            let mut dst = vec![0_u8; t.max_encoded_len(cur.len())];
            match t.forward(&cur, &mut dst, &mut block_ctx) {
                Ok(r) => {
                    dst.truncate(r.produced);
                    cur = dst;
                    mode |= 1 << i;
                }
                Err(TransformError::Declined { .. }) => {
                    debug!("block stage {} declined, keeping {} bytes", i, cur.len());
                }
                Err(e) => return Err(e),
            }
        }
        let mid_len = cur.len();

        // Entropy stage, kept only when it pays for itself
        if ctx.get_str("entropy", "FPAQ") != "NONE" {
            let mut bw = BitWriter::new(cur.len() / 2 + 16);
            let mut enc = FpaqEncoder::new(&mut bw, 1);
            enc.encode(&cur);
            enc.dispose();
            bw.close();
            if bw.output.len() < cur.len() {
                cur = bw.output;
                mode |= MODE_ENTROPY;
            }
        }

        info!(
            "block: {} -> {} bytes (mode {:#04x})",
            block.len(),
            cur.len(),
            mode
        );
        out.push(mode);
        out.extend_from_slice(&(block.len() as u32).to_be_bytes());
        out.extend_from_slice(&(mid_len as u32).to_be_bytes());
        out.extend_from_slice(&(cur.len() as u32).to_be_bytes());
        out.extend_from_slice(&cur);
    }

    Ok(out)
}

/// Compress every input file named in the options to `<name>.bwz`.
pub fn compress(opts: &BwOpts) -> io::Result<()> {
    let mut ctx = Context::new();
    ctx.put_str("transform", &opts.transform);
    ctx.put_int("blockSize", opts.block_size as i64);
    ctx.put_int("jobs", opts.jobs as i64);

    for fname in &opts.files {
        let mut data = Vec::new();
        File::open(fname)?.read_to_end(&mut data)?;

        let out_name = format!("{}.bwz", fname);
        if !opts.force_overwrite && fs::metadata(&out_name).is_ok() {
            warn!("{} exists, skipping (use --force to overwrite)", out_name);
            continue;
        }

        let packed = compress_stream(&data, &ctx)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        File::create(&out_name)?.write_all(&packed)?;
        info!(
            "{}: {} -> {} bytes ({:.1}%)",
            fname,
            data.len(),
            packed.len(),
            100.0 * packed.len() as f64 / data.len().max(1) as f64
        );

        if !opts.keep_input_files {
            fs::remove_file(fname)?;
        }
    }
    Ok(())
}
