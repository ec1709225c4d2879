// Filter parameters shared by the scatter and gather stages.
//
// Scatter and gather must run with identical values for everything except
// the test-stream length and the file paths. The map file name encodes the
// diversity modulus and the shingle length so incompatible maps are caught
// before any probing happens.

/// Number of bit-sliced filters a single map byte can carry.
pub const DV_MAX: usize = 8;

/// Default diversified-hash bases: the first eight primes above 256.
pub const DEFAULT_DIV_BASES: [u64; DV_MAX] = [257, 263, 269, 271, 277, 281, 283, 293];

/// Filter configuration.
///
/// `Default` yields the documented parameter set (L=5, LP=10, DV=8,
/// M_COM=1e9+7, M_DIV=67, batch size 8192); stream lengths default to zero
/// and must be set by the caller.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Shingle length L in bytes.
    pub shingle_len: usize,
    /// Minimum reported common-substring length LP (>= shingle_len).
    pub prefix_len: usize,
    /// Number of diversified filters in use (1..=DV_MAX).
    pub filter_count: usize,
    /// Common-hash modulus M_COM.
    pub common_modulus: u64,
    /// Common-hash base B_COM. Must exceed 255 so the biased roll step
    /// stays non-negative under unsigned arithmetic.
    pub common_base: u64,
    /// Diversified-hash modulus M_DIV. Must fit in a byte.
    pub div_modulus: u64,
    /// Diversified-hash bases, one per filter. Each > 256, pairwise
    /// distinct over the first `filter_count` entries.
    pub div_bases: [u64; DV_MAX],
    /// Reference stream length ns in bytes.
    pub reference_len: u64,
    /// Test stream length NS in bytes.
    pub test_len: u64,
    /// Shingle slots per pipeline batch.
    pub batch_size: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            shingle_len: 5,
            prefix_len: 10,
            filter_count: DV_MAX,
            common_modulus: 1_000_000_007,
            common_base: 257,
            div_modulus: 67,
            div_bases: DEFAULT_DIV_BASES,
            reference_len: 0,
            test_len: 0,
            batch_size: 8 * 1024,
        }
    }
}

impl FilterConfig {
    /// Carry length LC: the trailing bytes of one batch prepended to the
    /// next to keep the shingle stream seamless.
    #[inline]
    pub fn carry_len(&self) -> usize {
        self.shingle_len - 1
    }

    /// Number of reference shingle slots fed to the scatter pipeline.
    ///
    /// Equals `ns`: the reference string conceptually extends by LC bytes
    /// into the test string, which the carry mechanism supplies implicitly.
    #[inline]
    pub fn reference_shingles(&self) -> u64 {
        self.reference_len
    }

    /// Number of test shingle slots fed to the gather pipeline
    /// (`NS - L + 1`).
    #[inline]
    pub fn test_shingles(&self) -> u64 {
        self.test_len.saturating_sub(self.shingle_len as u64 - 1)
    }

    /// Run-length threshold: a hit run longer than this implies a common
    /// substring of length >= `prefix_len`.
    #[inline]
    pub fn run_threshold(&self) -> u64 {
        (self.prefix_len - self.shingle_len) as u64
    }

    /// Map length in bytes: one slot per compound index.
    #[inline]
    pub fn map_len(&self) -> usize {
        (self.common_modulus + self.div_modulus) as usize
    }

    /// `C_COM = B_COM^L mod M_COM`.
    pub fn c_com(&self) -> u64 {
        pow_mod(self.common_base, self.shingle_len as u32, self.common_modulus)
    }

    /// `C_DIV[id] = B_DIV[id]^L mod M_DIV`.
    pub fn c_div(&self, id: usize) -> u64 {
        pow_mod(self.div_bases[id], self.shingle_len as u32, self.div_modulus)
    }

    /// Expected optimum filtration ratio `(1 - 1/e)^(DV * (LP - L + 1))`
    /// for near-saturated independent filters.
    pub fn expected_filtration_ratio(&self) -> f64 {
        let exponent = self.filter_count as i32 * (self.prefix_len - self.shingle_len + 1) as i32;
        (1.0 - (-1.0f64).exp()).powi(exponent)
    }

    /// Validate the parameter set. Stream lengths are checked by the
    /// engines against their batch plans, not here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shingle_len < 2 {
            return Err(ConfigError::ShingleLength { got: self.shingle_len });
        }
        if self.prefix_len < self.shingle_len {
            return Err(ConfigError::PrefixLength {
                prefix: self.prefix_len,
                shingle: self.shingle_len,
            });
        }
        if self.filter_count == 0 || self.filter_count > DV_MAX {
            return Err(ConfigError::FilterCount { got: self.filter_count });
        }
        if self.common_modulus < 2 || self.common_modulus > 1 << 30 {
            return Err(ConfigError::CommonModulus { got: self.common_modulus });
        }
        if self.common_base <= 255 || self.common_base >= 1 << 16 {
            return Err(ConfigError::CommonBase { got: self.common_base });
        }
        if self.div_modulus < 2 || self.div_modulus > 255 {
            return Err(ConfigError::DivModulus { got: self.div_modulus });
        }
        for id in 0..self.filter_count {
            if self.div_bases[id] <= 256 || self.div_bases[id] >= 1 << 16 {
                return Err(ConfigError::DivBase { id, got: self.div_bases[id] });
            }
            for other in 0..id {
                if self.div_bases[other] == self.div_bases[id] {
                    return Err(ConfigError::DuplicateDivBase { got: self.div_bases[id] });
                }
            }
        }
        if self.batch_size < self.carry_len() {
            return Err(ConfigError::BatchSize {
                got: self.batch_size,
                carry: self.carry_len(),
            });
        }
        Ok(())
    }
}

/// Modular exponentiation by squaring (all intermediates < modulus^2).
pub fn pow_mod(base: u64, mut exp: u32, modulus: u64) -> u64 {
    let mut base = base % modulus;
    let mut result = 1u64 % modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * base % modulus;
        }
        base = base * base % modulus;
        exp >>= 1;
    }
    result
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Parameter validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Shingle length must be at least 2 (a carry of L-1 >= 1 byte).
    ShingleLength { got: usize },
    /// Prefix length must be >= shingle length.
    PrefixLength { prefix: usize, shingle: usize },
    /// Filter count must be in 1..=DV_MAX.
    FilterCount { got: usize },
    /// Common modulus must be in 2..=2^30 (30-bit residues keep the biased
    /// roll step inside u64).
    CommonModulus { got: u64 },
    /// Common base must be in 256..2^16 (large enough to keep the biased
    /// roll non-negative, small enough to keep products in u64).
    CommonBase { got: u64 },
    /// Diversity modulus must be in 2..=255 (byte-packed hashes).
    DivModulus { got: u64 },
    /// Diversified bases must be in 257..2^16.
    DivBase { id: usize, got: u64 },
    /// Diversified bases must be pairwise distinct.
    DuplicateDivBase { got: u64 },
    /// Batch size must cover at least the carry, so the sentinel shingles
    /// of the very first batch never spill into the second.
    BatchSize { got: usize, carry: usize },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShingleLength { got } => {
                write!(f, "shingle length must be at least 2, got {got}")
            }
            Self::PrefixLength { prefix, shingle } => {
                write!(f, "prefix length {prefix} is below shingle length {shingle}")
            }
            Self::FilterCount { got } => {
                write!(f, "filter count must be in 1..={DV_MAX}, got {got}")
            }
            Self::CommonModulus { got } => {
                write!(f, "common modulus must be in 2..=2^30, got {got}")
            }
            Self::CommonBase { got } => {
                write!(f, "common base must be in 256..65536, got {got}")
            }
            Self::DivModulus { got } => {
                write!(f, "diversity modulus must be in 2..=255, got {got}")
            }
            Self::DivBase { id, got } => {
                write!(f, "diversified base {id} must be in 257..65536, got {got}")
            }
            Self::DuplicateDivBase { got } => {
                write!(f, "diversified bases must be distinct, {got} repeats")
            }
            Self::BatchSize { got, carry } => {
                write!(f, "batch size {got} is below the carry length {carry}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(FilterConfig::default().validate().is_ok());
    }

    #[test]
    fn default_matches_documented_parameters() {
        let cfg = FilterConfig::default();
        assert_eq!(cfg.shingle_len, 5);
        assert_eq!(cfg.prefix_len, 10);
        assert_eq!(cfg.filter_count, 8);
        assert_eq!(cfg.common_modulus, 1_000_000_007);
        assert_eq!(cfg.div_modulus, 67);
        assert_eq!(cfg.batch_size, 8192);
        assert_eq!(cfg.carry_len(), 4);
        assert_eq!(cfg.run_threshold(), 5);
    }

    #[test]
    fn pow_mod_matches_naive_fold() {
        // Cross-check against L successive multiply-mods.
        let cfg = FilterConfig::default();
        let mut naive = 1u64;
        for _ in 0..cfg.shingle_len {
            naive = naive * cfg.common_base % cfg.common_modulus;
        }
        assert_eq!(cfg.c_com(), naive);

        for id in 0..cfg.filter_count {
            let mut naive = 1u64;
            for _ in 0..cfg.shingle_len {
                naive = naive * cfg.div_bases[id] % cfg.div_modulus;
            }
            assert_eq!(cfg.c_div(id), naive);
        }
    }

    #[test]
    fn shingle_counts() {
        let cfg = FilterConfig {
            reference_len: 1000,
            test_len: 100,
            ..FilterConfig::default()
        };
        assert_eq!(cfg.reference_shingles(), 1000);
        assert_eq!(cfg.test_shingles(), 96); // NS - L + 1
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let base = FilterConfig {
            reference_len: 100,
            test_len: 100,
            ..FilterConfig::default()
        };

        let mut cfg = base.clone();
        cfg.shingle_len = 1;
        assert!(matches!(cfg.validate(), Err(ConfigError::ShingleLength { .. })));

        let mut cfg = base.clone();
        cfg.prefix_len = 3;
        assert!(matches!(cfg.validate(), Err(ConfigError::PrefixLength { .. })));

        let mut cfg = base.clone();
        cfg.filter_count = 9;
        assert!(matches!(cfg.validate(), Err(ConfigError::FilterCount { .. })));

        let mut cfg = base.clone();
        cfg.common_modulus = (1 << 30) + 1;
        assert!(matches!(cfg.validate(), Err(ConfigError::CommonModulus { .. })));

        let mut cfg = base.clone();
        cfg.common_base = 255;
        assert!(matches!(cfg.validate(), Err(ConfigError::CommonBase { .. })));

        let mut cfg = base.clone();
        cfg.div_modulus = 256;
        assert!(matches!(cfg.validate(), Err(ConfigError::DivModulus { .. })));

        let mut cfg = base.clone();
        cfg.div_bases[3] = cfg.div_bases[2];
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateDivBase { .. })));

        let mut cfg = base.clone();
        cfg.batch_size = cfg.carry_len() - 1;
        assert!(matches!(cfg.validate(), Err(ConfigError::BatchSize { .. })));
    }

    #[test]
    fn expected_ratio_is_small_for_defaults() {
        let ratio = FilterConfig::default().expected_filtration_ratio();
        // DV=8, LP-L+1=6: 0.632^48, comfortably below 1e-9.
        assert!(ratio > 0.0 && ratio < 1e-9);
    }
}
