// Fingerprinting for the cross-repetition filter.
//
// This module provides:
// - Rolling Karp-Rabin fingerprints (common + diversified) over shingles
// - The byte-shuffle permutation applied to every input byte before hashing

pub mod rolling;
pub mod shuffle;
