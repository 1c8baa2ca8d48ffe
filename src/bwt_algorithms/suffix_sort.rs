//! Suffix ordering strategies and the BWT construction oracle.
//!
//! The native strategy sorts suffix indices with the standard library's
//! unstable sort (parallel above 40k) and plain lexicographic slice
//! comparison. That is fast on diverse data but degrades when long common
//! prefixes make comparisons deep, so repetitive blocks are routed to the
//! linear SA-IS sorter instead. Both produce the identical suffix array.
//!
use super::sais::sa_is;
use log::debug;
use rayon::prelude::*;

/// Chunk size shared by the forward oracle and both inverse strategies.
/// Rounded up to even so the bigram inverse writes whole byte pairs inside
/// one chunk region.
pub fn ck_size(count: usize, chunks: usize) -> usize {
    let st = count / chunks;
    let mut ck = if st * chunks == count { st } else { st + 1 };
    if chunks > 1 && ck & 1 == 1 {
        ck += 1;
    }
    ck
}

/// Returns the suffix array of data, picking the sorting strategy.
pub fn suffix_array(data: &[u8]) -> Vec<u32> {
    if data.len() < 3_000 || prefers_sais(&data[0..5_000.min(data.len())]) {
        debug!("Suffix sort using SA-IS algorithm.");
        return sa_is(data, 256);
    }

    debug!("Suffix sort using native algorithm.");
    let mut index: Vec<u32> = (0..data.len() as u32).collect();
    if data.len() > 40_000 {
        index.par_sort_unstable_by(|&a, &b| data[a as usize..].cmp(&data[b as usize..]));
    } else {
        index.sort_unstable_by(|&a, &b| data[a as usize..].cmp(&data[b as usize..]));
    }
    index
}

/// Sample-based guess whether the block is repetitive enough that the
/// comparison sort would go quadratic.
fn prefers_sais(sample: &[u8]) -> bool {
    let mut freq = [0_u32; 256];
    for &byte in sample {
        freq[byte as usize] += 1;
    }
    let max = *freq.iter().max().unwrap() as usize;
    let distinct = freq.iter().filter(|&&f| f != 0).count();

    // A dominant symbol or a tiny alphabet means long shared prefixes
    if max * 5 >= sample.len() || distinct < 20 {
        return true;
    }

    // So does one long run
    let mut longest = 0;
    let mut run = 0;
    for i in 1..sample.len() {
        if sample[i - 1] == sample[i] {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest * 5 > sample.len()
}

/// Computes the BWT of src into dst and fills one primary index per chunk.
///
/// Convention: row r of the conceptual sorted matrix is the suffix of rank r;
/// the row holding the empty-suffix boundary is skipped, rows before it shift
/// up by one and dst[0] receives the final byte. primary_indexes[c] is the
/// shifted rank of the suffix starting at c * ck_size, plus one. The first
/// entry is the classic primary index needed to invert the permutation.
///
/// Requires src.len() >= 2 and 1 <= chunks <= 8.
pub fn compute_bwt(src: &[u8], dst: &mut [u8], primary_indexes: &mut [u32; 8], chunks: usize) {
    let n = src.len();
    debug_assert!(n >= 2 && (1..=8).contains(&chunks));

    let sa = suffix_array(src);
    let ck = ck_size(n, chunks);

    primary_indexes.fill(0);
    for (i, &s) in sa.iter().enumerate() {
        let s = s as usize;
        if s % ck == 0 && s / ck < chunks {
            primary_indexes[s / ck] = (i + 1) as u32;
        }
    }

    let pidx = primary_indexes[0] as usize;
    dst[0] = src[n - 1];
    for i in 0..pidx - 1 {
        dst[i + 1] = src[sa[i] as usize - 1];
    }
    for i in pidx..n {
        dst[i] = src[sa[i] as usize - 1];
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ck_size_test() {
        assert_eq!(ck_size(100, 1), 100);
        assert_eq!(ck_size(100, 4), 26);
        assert_eq!(ck_size(96, 8), 12);
        assert_eq!(ck_size(97, 8), 14);
    }

    #[test]
    fn strategies_agree_test() {
        // Under 3000 bytes goes to SA-IS; force the native path directly
        let data: Vec<u8> = (0..2500_u32).map(|i| (i * 31 % 251) as u8).collect();
        let sais = sa_is(&data, 256);
        let mut native: Vec<u32> = (0..data.len() as u32).collect();
        native.sort_unstable_by(|&a, &b| data[a as usize..].cmp(&data[b as usize..]));
        assert_eq!(sais, native);
    }

    #[test]
    fn repetitive_routed_to_sais_test() {
        let zeros = vec![0_u8; 5_000];
        assert!(prefers_sais(&zeros));
        let abab: Vec<u8> = b"AB".iter().cycle().take(5_000).copied().collect();
        assert!(prefers_sais(&abab));
        let diverse: Vec<u8> = (0..5_000_u32).map(|i| (i * 131 % 241) as u8).collect();
        assert!(!prefers_sais(&diverse));
    }

    #[test]
    fn banana_bwt_test() {
        let src = b"banana";
        let mut dst = [0_u8; 6];
        let mut pi = [0_u32; 8];
        compute_bwt(src, &mut dst, &mut pi, 1);
        assert_eq!(&dst, b"annbaa");
        assert_eq!(pi[0], 4);
    }

    #[test]
    fn abracadabra_bwt_test() {
        let src = b"abracadabra";
        let mut dst = [0_u8; 11];
        let mut pi = [0_u32; 8];
        compute_bwt(src, &mut dst, &mut pi, 1);
        // Known BWT of abracadabra under the shifted-rank convention
        assert_eq!(&dst, b"ardrcaaaabb");
        assert_eq!(pi[0], 3);
    }

    #[test]
    fn all_zeros_bwt_test() {
        let src = vec![0_u8; 4096];
        let mut dst = vec![1_u8; 4096];
        let mut pi = [0_u32; 8];
        compute_bwt(&src, &mut dst, &mut pi, 1);
        assert!(dst.iter().all(|&b| b == 0));
        assert_eq!(pi[0], 4096);
    }

    #[test]
    fn chunk_indexes_test() {
        let data: Vec<u8> = (0..200_u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut dst = vec![0_u8; 200];
        let mut pi = [0_u32; 8];
        compute_bwt(&data, &mut dst, &mut pi, 4);
        let sa = suffix_array(&data);
        let ck = ck_size(200, 4);
        for c in 0..4 {
            let rank = sa.iter().position(|&s| s as usize == c * ck).unwrap();
            assert_eq!(pi[c], rank as u32 + 1);
        }
    }
}
