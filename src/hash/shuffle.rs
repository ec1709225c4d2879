// Byte-shuffle permutation shared by scatter and gather.
//
// A deterministic bijection of [0,256) applied to every input byte before
// hashing; it cheaply decorrelates structured input. Both stages derive the
// same table from the map setup time, which scatter stores in the map file
// header.
//
// Construction: for each of the 256 slots, draw a uniform byte; if the value
// is already assigned, probe linearly forward (wrapping) until an unassigned
// one is found.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A bijection of `[0,256)` derived from a seed.
#[derive(Clone)]
pub struct ByteShuffle {
    table: [u8; 256],
}

impl ByteShuffle {
    /// Build the permutation table for `seed`.
    ///
    /// A failed bijection can only come from a logic bug, never from input;
    /// it terminates the process like the other pipeline invariants.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut assigned = [false; 256];
        let mut table = [0u8; 256];
        for slot in table.iter_mut() {
            let mut value: u8 = rng.r#gen();
            while assigned[value as usize] {
                value = value.wrapping_add(1);
            }
            assigned[value as usize] = true;
            *slot = value;
        }
        if !assigned.iter().all(|&a| a) {
            crate::pipeline::fatal(25, "byte-shuffle construction is not a bijection");
        }
        Self { table }
    }

    /// Shuffle a single byte.
    #[inline(always)]
    pub fn apply(&self, byte: u8) -> u8 {
        self.table[byte as usize]
    }

    /// Shuffle a freshly read span in place.
    #[inline]
    pub fn apply_in_place(&self, bytes: &mut [u8]) {
        for b in bytes {
            *b = self.table[*b as usize];
        }
    }

    /// The raw permutation table.
    pub fn table(&self) -> &[u8; 256] {
        &self.table
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
