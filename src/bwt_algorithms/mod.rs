//! Suffix-array construction backing the BWT forward transform.
//!
//! Two sorting strategies produce the identical suffix array:
//! - sais: linear-time SA-IS, best on small or repetitive blocks.
//! - suffix_sort: native comparison sort over suffix indices, multi-threaded
//!   for large blocks, best on diverse data where comparisons stay shallow.
//!
//! suffix_sort also exposes compute_bwt, the oracle that turns the suffix
//! array into the permuted block plus one primary index per chunk.
//!
pub mod sais;
pub mod suffix_sort;

pub use suffix_sort::{compute_bwt, suffix_array};
