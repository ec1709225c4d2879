// Rolling Karp-Rabin fingerprints over fixed-length byte windows.
//
// Two hash families per shingle:
//   - **Common hash**: polynomial hash modulo a large prime M_COM, one u64
//     per shingle. M_COM fits in 30 bits, so every intermediate fits u64.
//   - **Diversified hashes**: DV parallel polynomial hashes with distinct
//     bases modulo a small prime M_DIV <= 255, byte-packed so one shingle's
//     DV fingerprints occupy DV consecutive bytes.
//
// Both roll forward in O(1) per slide. The roll steps add a bias term
// (M_COM, or 256*M_DIV) before the subtraction so the expression never goes
// negative under unsigned arithmetic; this keeps the map format bit-exact
// across implementations.

use crate::config::{DV_MAX, FilterConfig};

/// Batched fingerprint engine.
///
/// Holds the precomputed roll constants for one parameter set. The engine
/// is immutable after construction and safe to share across hasher workers.
#[derive(Clone)]
pub struct HashEngine {
    shingle_len: usize,
    filter_count: usize,
    common_modulus: u64,
    common_base: u64,
    /// B_COM^L mod M_COM: weight of the byte leaving the window.
    c_com: u64,
    div_modulus: u64,
    div_bases: [u64; DV_MAX],
    /// B_DIV[id]^L mod M_DIV.
    c_div: [u64; DV_MAX],
}

impl HashEngine {
    pub fn new(cfg: &FilterConfig) -> Self {
        let mut c_div = [0u64; DV_MAX];
        for (id, slot) in c_div.iter_mut().enumerate().take(cfg.filter_count) {
            *slot = cfg.c_div(id);
        }
        Self {
            shingle_len: cfg.shingle_len,
            filter_count: cfg.filter_count,
            common_modulus: cfg.common_modulus,
            common_base: cfg.common_base,
            c_com: cfg.c_com(),
            div_modulus: cfg.div_modulus,
            div_bases: cfg.div_bases,
            c_div,
        }
    }

    /// Shingle length L.
    #[inline]
    pub fn shingle_len(&self) -> usize {
        self.shingle_len
    }

    /// Number of diversified filters DV.
    #[inline]
    pub fn filter_count(&self) -> usize {
        self.filter_count
    }

    /// Common fingerprint of `window[..L]` by direct fold (base case).
    #[inline]
    pub fn fold_common(&self, window: &[u8]) -> u64 {
        debug_assert!(window.len() >= self.shingle_len);
        let mut h = 0u64;
        for &b in &window[..self.shingle_len] {
            h = (h * self.common_base + b as u64) % self.common_modulus;
        }
        h
    }

    /// Diversified fingerprint `id` of `window[..L]` by direct fold.
    #[inline]
    pub fn fold_div(&self, id: usize, window: &[u8]) -> u8 {
        debug_assert!(window.len() >= self.shingle_len);
        let mut h = 0u64;
        for &b in &window[..self.shingle_len] {
            h = (h * self.div_bases[id] + b as u64) % self.div_modulus;
        }
        h as u8
    }

    /// Fingerprint the `n` shingles `buf[j..j+L]` for `j in 0..n`.
    ///
    /// Fills `com[0..n]` and the byte-packed rows `div[j*DV..(j+1)*DV]`.
    /// `div` must hold one extra row (`(n+1)*DV` bytes): the roll step
    /// writes each fingerprint twice, into its own row and the next, so a
    /// single uniform update covers every slide after the base case.
    pub fn hash_batch(&self, buf: &[u8], n: usize, com: &mut [u64], div: &mut [u8]) {
        let l = self.shingle_len;
        let dv = self.filter_count;
        debug_assert!(n >= 1);
        debug_assert!(buf.len() >= n + l - 1);
        debug_assert!(com.len() >= n);
        debug_assert!(div.len() >= (n + 1) * dv);

        // Diversified hashes: fold the leftmost shingle, prime row 1.
        for id in 0..dv {
            let h = self.fold_div(id, buf);
            div[id] = h;
            div[dv + id] = h;
        }
        // Roll forward. Entering iteration j, row j still holds the
        // fingerprint of shingle j-1; the update drops buf[j-1], adds
        // buf[j+L-1], and stores the result in rows j and j+1.
        for j in 1..n {
            let entering = buf[j + l - 1] as u64;
            let leaving = buf[j - 1] as u64;
            let bias = 256 * self.div_modulus + entering;
            for id in 0..dv {
                let h = div[j * dv + id] as u64;
                let rolled =
                    (bias + h * self.div_bases[id] - self.c_div[id] * leaving) % self.div_modulus;
                div[j * dv + id] = rolled as u8;
                div[(j + 1) * dv + id] = rolled as u8;
            }
        }

        // Common hashes: fold the leftmost shingle, then roll.
        com[0] = self.fold_common(buf);
        for j in 0..n - 1 {
            com[j + 1] = ((com[j] + self.common_modulus) * self.common_base
                - self.c_com * buf[j] as u64
                + buf[j + l] as u64)
                % self.common_modulus;
        }
    }
}

// ---------------------------------------------------------------------------
// Cache prefetch utility
// ---------------------------------------------------------------------------

/// Ask the CPU to pull the cache line at `addr` towards L1 before the map
/// worker's probe loop reaches it.
///
/// `FingerprintMap::prefetch_span` walks this across the slot span a
/// shingle's compound indices will touch, a few shingles ahead of the
/// current one. Purely advisory: prefetch instructions never fault, and on
/// architectures without one this compiles to nothing.
#[inline(always)]
pub fn prefetch_read(addr: *const u8) {
    #[cfg(target_arch = "x86_64")]
    // Safety: advisory instruction, valid for any address.
    unsafe {
        use std::arch::x86_64::{_MM_HINT_T0, _mm_prefetch};
        _mm_prefetch::<_MM_HINT_T0>(addr.cast());
    }

    #[cfg(target_arch = "aarch64")]
    // Safety: advisory instruction, valid for any address.
    unsafe {
        std::arch::asm!("prfm pldl1keep, [{line}]", line = in(reg) addr);
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    let _ = addr;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
