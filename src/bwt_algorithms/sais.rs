//! SA-IS suffix array construction, using a virtual sentinel.
//!
//! The suffix type information (L, S and leftmost-S) is kept in two bit
//! vectors so the per-level bookkeeping for 64 positions fits in 8 bytes.
//! The sentinel lives one past the end of the data and is S as well as LMS;
//! it is never materialised in the text itself.
//!
use rayon::prelude::*;

const S: u32 = 1;
const LMS: u32 = 1;

/// Alphabet symbol usable as a bucket index. The recursion runs the same
/// code over the u32 summary string.
pub trait Symbol: Copy + Ord + Sync {
    fn index(self) -> usize;
}

impl Symbol for u8 {
    fn index(self) -> usize {
        self as usize
    }
}

impl Symbol for u32 {
    fn index(self) -> usize {
        self as usize
    }
}

/// L/S/LMS classification for every position, plus the virtual sentinel.
struct TypeMap {
    /// Bit per position: set = S type
    ls: Vec<u32>,
    /// Bit per position: set = leftmost S
    lms: Vec<u32>,
    /// Position of the sentinel, one past the end of the data
    last: usize,
    /// Count of LMS positions including the sentinel
    lms_count: usize,
}

impl TypeMap {
    fn build<T: Symbol>(data: &[T]) -> Self {
        let last = data.len();
        let words = last / 32 + 1;
        let mut ls = vec![0_u32; words];
        let mut lms = vec![0_u32; words];

        // The sentinel is S and LMS by definition
        ls[last >> 5] |= S << (last % 32);
        lms[last >> 5] |= LMS << (last % 32);

        // Scan right to left. The final data element is always L since the
        // sentinel sorts below everything.
        let mut current_s = false;
        let mut prev = data[last - 1];
        for (idx, &el) in data.iter().enumerate().take(last - 1).rev() {
            match el.cmp(&prev) {
                std::cmp::Ordering::Less => {
                    ls[idx >> 5] |= S << (idx % 32);
                    current_s = true;
                }
                std::cmp::Ordering::Equal => {
                    if current_s {
                        ls[idx >> 5] |= S << (idx % 32);
                    }
                }
                std::cmp::Ordering::Greater => {
                    // Leaving a run of S going left means idx+1 was leftmost S
                    if current_s {
                        lms[(idx + 1) >> 5] |= LMS << ((idx + 1) % 32);
                        current_s = false;
                    }
                }
            }
            prev = el;
        }

        let lms_count = lms.iter().map(|w| w.count_ones()).sum::<u32>() as usize;
        Self { ls, lms, last, lms_count }
    }

    fn is_lms(&self, idx: usize) -> bool {
        self.lms[idx >> 5] & (LMS << (idx % 32)) != 0
    }

    fn is_l(&self, idx: usize) -> bool {
        self.ls[idx >> 5] & (S << (idx % 32)) == 0
    }

    fn is_s(&self, idx: usize) -> bool {
        self.ls[idx >> 5] & (S << (idx % 32)) != 0
    }

    /// True if the LMS substrings starting at a and b differ. Both a and b
    /// must be LMS positions.
    fn lms_differs<T: Symbol>(&self, data: &[T], a: usize, b: usize) -> bool {
        // The sentinel equals nothing else
        if a == self.last || b == self.last {
            return true;
        }

        let mut i = if a > b { b + 1 } else { a + 1 };
        let diff = if a > b { a - b } else { b - a };

        while i != self.last - diff {
            let j = i + diff;
            // Both substrings ended on an LMS position: equal
            if self.is_lms(i) && self.is_lms(j) {
                return false;
            }
            // Only one ended: lengths differ
            if self.is_lms(i) || self.is_lms(j) {
                return true;
            }
            if data[i] != data[j] {
                return true;
            }
            i += 1;
        }
        true
    }
}

/// Frequency count of the symbols, parallel for large inputs.
fn bucket_sizes<T: Symbol>(data: &[T], alphabet: usize) -> Vec<u32> {
    if data.len() > 64_000 {
        data.par_chunks(16_000)
            .fold(
                || vec![0_u32; alphabet],
                |mut freqs, chunk| {
                    chunk.iter().for_each(|&el| freqs[el.index()] += 1);
                    freqs
                },
            )
            .reduce(
                || vec![0_u32; alphabet],
                |mut sum, f| {
                    for (s, c) in sum.iter_mut().zip(&f) {
                        *s += c;
                    }
                    sum
                },
            )
    } else {
        let mut freqs = vec![0_u32; alphabet];
        data.iter().for_each(|&el| freqs[el.index()] += 1);
        freqs
    }
}

/// First free slot of each bucket, counting from 1 past the sentinel slot.
fn bucket_heads(sizes: &[u32]) -> Vec<u32> {
    let mut heads = vec![0_u32; sizes.len()];
    let mut idx = 1_u32;
    for (head, &count) in heads.iter_mut().zip(sizes) {
        *head = idx;
        idx += count;
    }
    heads
}

/// Last slot of each bucket.
fn bucket_tails(sizes: &[u32]) -> Vec<u32> {
    let mut tails = vec![0_u32; sizes.len()];
    let mut idx = 1_u32;
    for (tail, &count) in tails.iter_mut().zip(sizes) {
        idx += count;
        *tail = idx - 1;
    }
    tails
}

/// Drop the LMS positions at their bucket tails in data order. The relative
/// order inside one bucket is a guess fixed by the later induced sorts.
fn place_lms_guess<T: Symbol>(
    data: &[T],
    sizes: &[u32],
    types: &TypeMap,
) -> Vec<Option<u32>> {
    let mut tails = bucket_tails(sizes);
    let mut buckets = vec![None; data.len() + 1];

    for idx in (0..types.last).rev() {
        if types.is_lms(idx) {
            let c = data[idx].index();
            buckets[tails[c] as usize] = Some(idx as u32);
            tails[c] -= 1;
        }
    }
    // The sentinel sorts below everything
    buckets[0] = Some(data.len() as u32);
    buckets
}

/// Left to right pass inserting each L-type predecessor at its bucket head.
fn induce_l<T: Symbol>(data: &[T], buckets: &mut [Option<u32>], sizes: &[u32], types: &TypeMap) {
    let mut heads = bucket_heads(sizes);

    for idx in 0..types.last {
        let Some(pos) = buckets[idx] else { continue };
        let prev = if pos == 0 { types.last } else { pos as usize - 1 };
        if types.is_l(prev) {
            let c = data[prev].index();
            buckets[heads[c] as usize] = Some(prev as u32);
            heads[c] += 1;
        }
    }
}

/// Right to left pass inserting each S-type predecessor at its bucket tail.
fn induce_s<T: Symbol>(data: &[T], buckets: &mut [Option<u32>], sizes: &[u32], types: &TypeMap) {
    let mut tails = bucket_tails(sizes);

    let mut idx = types.last;
    while idx > 0 {
        if let Some(pos) = buckets[idx] {
            if pos != 0 {
                let prev = pos as usize - 1;
                if types.is_s(prev) {
                    let c = data[prev].index();
                    buckets[tails[c] as usize] = Some(prev as u32);
                    tails[c] -= 1;
                }
            }
        }
        idx -= 1;
    }
}

/// Name the LMS substrings in sorted order. Returns the summary string (LMS
/// names in data order), the data offset of each summary element, and the
/// count of distinct names.
fn make_summary<T: Symbol>(
    data: &[T],
    buckets: &[Option<u32>],
    types: &TypeMap,
) -> (Vec<u32>, Vec<u32>, usize) {
    let mut names: Vec<Option<u32>> = vec![None; buckets.len()];
    let mut offsets: Vec<Option<u32>> = vec![None; buckets.len()];
    let mut current = 0_u32;

    // The sentinel gets the smallest name
    names[types.last] = Some(current);
    offsets[types.last] = Some(types.last as u32);
    let mut prev_lms = types.last;

    for &ptr in buckets[1..].iter() {
        let pos = ptr.expect("induced sort left an empty slot") as usize;
        if types.is_lms(pos) {
            if types.lms_differs(data, prev_lms, pos) {
                prev_lms = pos;
                current += 1;
            }
            names[pos] = Some(current);
            offsets[pos] = Some(pos as u32);
        }
    }

    (
        names.into_iter().flatten().collect(),
        offsets.into_iter().flatten().collect(),
        current as usize + 1,
    )
}

/// Order the LMS positions exactly, recursing while duplicate names exist.
fn summary_order(summary: Vec<u32>, unique: usize, types: &TypeMap) -> Vec<u32> {
    if unique != types.lms_count {
        // Duplicate names: sort the summary string the same way
        let sorted = sa_is(&summary, unique);
        let mut order = vec![summary.len() as u32; sorted.len() + 1];
        order[1..].copy_from_slice(&sorted);
        order
    } else {
        // All names distinct: the order is the inverse permutation
        let mut order = vec![unique as u32; summary.len() + 1];
        for (idx, &name) in summary.iter().enumerate() {
            order[name as usize + 1] = idx as u32;
        }
        order
    }
}

/// SA-IS entry: the suffix array of data under a virtual smallest sentinel,
/// sentinel row excluded. Alphabet is one past the largest symbol value.
pub fn sa_is<T: Symbol>(data: &[T], alphabet: usize) -> Vec<u32> {
    if data.is_empty() {
        return vec![];
    }

    let types = TypeMap::build(data);
    let sizes = bucket_sizes(data, alphabet);

    // Approximate pass: guessed LMS order, then induce L and S
    let mut buckets = place_lms_guess(data, &sizes, &types);
    induce_l(data, &mut buckets, &sizes, &types);
    induce_s(data, &mut buckets, &sizes, &types);

    // Name the LMS substrings off the approximate order
    let (summary, offsets, unique) = make_summary(data, &buckets, &types);
    let order = summary_order(summary, unique, &types);

    // Exact pass: place LMS in their true order, then induce L and S
    buckets.iter_mut().for_each(|slot| *slot = None);
    let mut tails = bucket_tails(&sizes);

    // order[0] is the summary's own sentinel and order[1] is the data
    // sentinel, placed below; the rest drop in reverse at bucket tails
    for &el in order.iter().skip(2).rev() {
        let data_index = offsets[el as usize] as usize;
        let c = data[data_index].index();
        buckets[tails[c] as usize] = Some(data_index as u32);
        tails[c] -= 1;
    }
    buckets[0] = Some(data.len() as u32);

    induce_l(data, &mut buckets, &sizes, &types);
    induce_s(data, &mut buckets, &sizes, &types);

    buckets
        .iter()
        .skip(1)
        .map(|el| el.expect("induced sort left an empty slot"))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn naive_sa(data: &[u8]) -> Vec<u32> {
        let mut index: Vec<u32> = (0..data.len() as u32).collect();
        index.sort_by(|&a, &b| data[a as usize..].cmp(&data[b as usize..]));
        index
    }

    #[test]
    fn type_map_test() {
        let data = b"caabage";
        let types = TypeMap::build(data);
        // c a a b a g e -> L S S L S L L, sentinel S
        assert!(types.is_l(0));
        assert!(types.is_s(1));
        assert!(types.is_s(2));
        assert!(types.is_l(3));
        assert!(types.is_s(4));
        assert!(types.is_l(5));
        assert!(types.is_l(6));
        assert!(types.is_s(7));
        assert!(types.is_lms(1));
        assert!(!types.is_lms(2));
        assert!(types.is_lms(4));
        assert!(types.is_lms(7));
        assert_eq!(types.lms_count, 3);
    }

    #[test]
    fn banana_test() {
        assert_eq!(sa_is(b"banana".as_slice(), 256), vec![5, 3, 1, 0, 4, 2]);
    }

    #[test]
    fn matches_naive_test() {
        for data in [
            b"abracadabra".as_slice(),
            b"mississippi".as_slice(),
            b"aaaaaa".as_slice(),
            b"zyxwvutsrq".as_slice(),
            b"abab".as_slice(),
            b"a".as_slice(),
        ] {
            assert_eq!(sa_is(data, 256), naive_sa(data), "data: {:?}", data);
        }
    }

    #[test]
    fn recursion_test() {
        // Enough repeated LMS substrings to force the recursive summary sort
        let data: Vec<u8> = b"banana".iter().cycle().take(600).copied().collect();
        assert_eq!(sa_is(&data, 256), naive_sa(&data));
    }

    #[test]
    fn pseudo_random_test() {
        let mut seed = 12345_u64;
        let data: Vec<u8> = (0..2000)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                (seed >> 60) as u8 + b'a'
            })
            .collect();
        assert_eq!(sa_is(&data, 256), naive_sa(&data));
    }
}
