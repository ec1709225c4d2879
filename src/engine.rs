// Scatter and gather engines.
//
// Both stages drive the same three-stage pipeline; they differ only in where
// the reader positions its input and in what the map worker does with a
// batch of fingerprints:
//   - scatter's map worker clears filter bits for every reference shingle;
//   - gather's map worker probes the bits and folds hits into run-length
//     counters.
//
// The entry points here operate on in-memory byte sources; `io` wraps them
// with master-file and map-file handling.

use std::io::Read;

use crate::config::{ConfigError, FilterConfig};
use crate::hash::rolling::HashEngine;
use crate::hash::shuffle::ByteShuffle;
use crate::map::FingerprintMap;
use crate::pipeline::{
    BatchPlan, BatchWorker, Container, Pipeline, fatal, ring_slot, short_read_exit_code,
};

/// How far ahead of the current shingle the map span is prefetched.
const PREFETCH_DISTANCE: usize = 8;

/// Demo-string span lengths: scatter plants one contiguous 20-byte zero
/// span, gather plants two adjacent 10-byte halves across a batch seam.
const DEMO_SPAN: usize = 20;
const DEMO_HALF_SPAN: usize = DEMO_SPAN / 2;

// ---------------------------------------------------------------------------
// Demo-string injection
// ---------------------------------------------------------------------------

/// Opt-in diagnostic: overwrite a fixed span of the (already shuffled)
/// input with zeros so scatter and gather share a known 20-byte common
/// substring. Off by default because it alters user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoInjection {
    Off,
    /// Scatter side: zero bytes [0..20) of batch `full_batches / 2`.
    Reference,
    /// Gather side: zero the last 10 bytes of batch `full_batches / 3` and
    /// the first 10 bytes of the following batch.
    Test,
}

impl DemoInjection {
    fn batch_id(self, plan: &BatchPlan) -> u32 {
        match self {
            DemoInjection::Off => 0,
            DemoInjection::Reference => plan.full_batch_count() / 2,
            DemoInjection::Test => plan.full_batch_count() / 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker 1: reader
// ---------------------------------------------------------------------------

/// Fills a container's byte buffer: carry prefix, exact read, byte-shuffle,
/// optional demo span. Keeps the carry privately so the previous container
/// can be handed to the hasher without sharing.
struct ReadWorker<R> {
    reader: R,
    shuffle: ByteShuffle,
    /// Trailing LC bytes of the previous batch; LC zeros before batch 1.
    carry: Vec<u8>,
    demo: DemoInjection,
    demo_batch_id: u32,
}

impl<R: Read + Send> ReadWorker<R> {
    fn new(reader: R, shuffle: &ByteShuffle, carry_len: usize, demo: DemoInjection, plan: &BatchPlan) -> Self {
        Self {
            reader,
            shuffle: shuffle.clone(),
            carry: vec![0u8; carry_len],
            demo,
            demo_batch_id: demo.batch_id(plan),
        }
    }

    fn inject_demo_span(&self, batch_id: u32, batch_size: usize, fresh: &mut [u8]) {
        match self.demo {
            DemoInjection::Off => {}
            DemoInjection::Reference => {
                if batch_id == self.demo_batch_id && batch_size >= DEMO_SPAN {
                    fresh[..DEMO_SPAN].fill(0);
                }
            }
            DemoInjection::Test => {
                if batch_id == self.demo_batch_id && batch_size >= DEMO_HALF_SPAN {
                    fresh[batch_size - DEMO_HALF_SPAN..].fill(0);
                }
                if batch_id == self.demo_batch_id + 1 && batch_size >= DEMO_HALF_SPAN {
                    fresh[..DEMO_HALF_SPAN].fill(0);
                }
            }
        }
    }
}

impl<R: Read + Send> BatchWorker for ReadWorker<R> {
    fn process(&mut self, batch_id: u32, batch_size: usize, container: &mut Container) {
        let lc = self.carry.len();
        container.buf[..lc].copy_from_slice(&self.carry);

        let fresh = &mut container.buf[lc..lc + batch_size];
        if let Err(e) = self.reader.read_exact(fresh) {
            // The stream length was verified before the pipeline started, so
            // a short read here is unrecoverable mid-flight state.
            fatal(
                short_read_exit_code(ring_slot(batch_id)),
                &format!("short read at batch {batch_id}: {e}"),
            );
        }
        self.shuffle.apply_in_place(fresh);
        self.inject_demo_span(batch_id, batch_size, fresh);

        // The carry is taken after injection so seam shingles agree with
        // what the next batch will see.
        self.carry
            .copy_from_slice(&container.buf[batch_size..batch_size + lc]);
    }
}

// ---------------------------------------------------------------------------
// Worker 2: hasher
// ---------------------------------------------------------------------------

/// Pure compute: fingerprints the batch into the container's hash arrays.
struct HashWorker {
    engine: HashEngine,
}

impl BatchWorker for HashWorker {
    fn process(&mut self, _batch_id: u32, batch_size: usize, container: &mut Container) {
        self.engine
            .hash_batch(&container.buf, batch_size, &mut container.com, &mut container.div);
    }
}

// ---------------------------------------------------------------------------
// Worker 3, scatter variant: map writer
// ---------------------------------------------------------------------------

struct ScatterMapWorker {
    map: FingerprintMap,
    filter_count: usize,
    /// Shingle indices below this are sentinel-junk in batch 1.
    first_batch_skip: usize,
    /// Prefetch span: all probes for one shingle land in [com, com+M_DIV].
    div_span: usize,
}

impl BatchWorker for ScatterMapWorker {
    fn process(&mut self, batch_id: u32, batch_size: usize, container: &mut Container) {
        let j0 = if batch_id == 1 { self.first_batch_skip } else { 0 };
        let dv = self.filter_count;
        for j in j0..batch_size {
            if j + PREFETCH_DISTANCE < batch_size {
                self.map
                    .prefetch_span(container.com[j + PREFETCH_DISTANCE], self.div_span);
            }
            self.map
                .mark(container.com[j], &container.div[j * dv..j * dv + dv]);
        }
    }
}

// ---------------------------------------------------------------------------
// Worker 3, gather variant: map prober + run-length detector
// ---------------------------------------------------------------------------

/// Turns a per-shingle hit/miss stream into substring candidates.
///
/// A run of `count` consecutive hits means `count` positions agree on a
/// possible `L + count - 1`-byte common substring; `count > LP - L` is
/// exactly "a common substring of length >= LP is plausible here".
#[derive(Debug, Clone)]
pub struct RunDetector {
    threshold: u64,
    count: u64,
    residue: u64,
    max_count: u64,
}

impl RunDetector {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            count: 0,
            residue: 0,
            max_count: 0,
        }
    }

    #[inline(always)]
    pub fn observe(&mut self, hit: bool) {
        if hit {
            self.count += 1;
        } else {
            self.count = 0;
        }
        if self.count > self.threshold {
            self.residue += 1;
        }
        if self.count > self.max_count {
            self.max_count = self.count;
        }
    }

    /// Number of positions surviving the filter so far.
    #[inline]
    pub fn residue(&self) -> u64 {
        self.residue
    }

    /// Longest hit run observed so far, in shingles.
    #[inline]
    pub fn max_count(&self) -> u64 {
        self.max_count
    }
}

struct GatherMapWorker<'m> {
    map: &'m FingerprintMap,
    filter_count: usize,
    first_batch_skip: usize,
    div_span: usize,
    detector: RunDetector,
}

impl BatchWorker for GatherMapWorker<'_> {
    fn process(&mut self, batch_id: u32, batch_size: usize, container: &mut Container) {
        let j0 = if batch_id == 1 { self.first_batch_skip } else { 0 };
        let dv = self.filter_count;
        for j in j0..batch_size {
            if j + PREFETCH_DISTANCE < batch_size {
                self.map
                    .prefetch_span(container.com[j + PREFETCH_DISTANCE], self.div_span);
            }
            let hit = self
                .map
                .is_hit(container.com[j], &container.div[j * dv..j * dv + dv]);
            self.detector.observe(hit);
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a scatter run over an in-memory stream.
#[derive(Debug)]
pub struct ScatterOutcome {
    /// The populated fingerprint map.
    pub map: FingerprintMap,
    /// Reference shingles recorded (sentinel slots excluded).
    pub shingles: u64,
    /// Batches driven through the pipeline.
    pub batches: u32,
}

/// Result of a gather run over an in-memory stream.
#[derive(Debug, Clone)]
pub struct GatherOutcome {
    /// Positions surviving the filter.
    pub residue: u64,
    /// Longest hit run, in shingles.
    pub max_count: u64,
    /// Test shingles checked (sentinel slots excluded).
    pub shingles: u64,
    /// Batches driven through the pipeline.
    pub batches: u32,
}

impl GatherOutcome {
    /// Upper bound on the longest surviving substring, in bytes.
    pub fn longest_candidate(&self, shingle_len: usize) -> u64 {
        if self.max_count == 0 {
            0
        } else {
            self.max_count + shingle_len as u64 - 1
        }
    }

    /// Measured filtration ratio `residue / shingles`.
    pub fn filtration_ratio(&self) -> f64 {
        if self.shingles == 0 {
            0.0
        } else {
            self.residue as f64 / self.shingles as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Scatter: fingerprint `reference_shingles()` slots from `reader` and
/// populate a fresh map.
///
/// `reader` must yield exactly `cfg.reference_len` bytes, already positioned
/// at the start of the reference stream.
pub fn scatter_stream<R: Read + Send>(
    cfg: &FilterConfig,
    reader: R,
    shuffle: &ByteShuffle,
    demo: DemoInjection,
) -> Result<ScatterOutcome, EngineError> {
    cfg.validate()?;
    let plan = plan_for(cfg, cfg.reference_shingles())?;
    let map = FingerprintMap::new(cfg.map_len())
        .map_err(|_| EngineError::MapAlloc { bytes: cfg.map_len() })?;

    let pipeline = Pipeline::new(cfg, plan);
    let mut reader = ReadWorker::new(reader, shuffle, cfg.carry_len(), demo, &plan);
    let mut hasher = HashWorker { engine: HashEngine::new(cfg) };
    let mut writer = ScatterMapWorker {
        map,
        filter_count: cfg.filter_count,
        first_batch_skip: cfg.carry_len(),
        div_span: cfg.div_modulus as usize,
    };
    pipeline.run(&mut reader, &mut hasher, &mut writer);

    Ok(ScatterOutcome {
        map: writer.map,
        shingles: plan.shingle_count() - cfg.carry_len() as u64,
        batches: plan.batch_count(),
    })
}

/// Gather: fingerprint `test_shingles()` slots from `reader`, probe `map`,
/// and report the surviving run-length residue.
///
/// `reader` must be positioned at the start of the test stream (offset `ns`
/// of the master file).
pub fn gather_stream<R: Read + Send>(
    cfg: &FilterConfig,
    reader: R,
    shuffle: &ByteShuffle,
    map: &FingerprintMap,
    demo: DemoInjection,
) -> Result<GatherOutcome, EngineError> {
    cfg.validate()?;
    if map.len() != cfg.map_len() {
        return Err(EngineError::MapLength {
            expected: cfg.map_len(),
            got: map.len(),
        });
    }
    let plan = plan_for(cfg, cfg.test_shingles())?;

    let pipeline = Pipeline::new(cfg, plan);
    let mut reader = ReadWorker::new(reader, shuffle, cfg.carry_len(), demo, &plan);
    let mut hasher = HashWorker { engine: HashEngine::new(cfg) };
    let mut prober = GatherMapWorker {
        map,
        filter_count: cfg.filter_count,
        first_batch_skip: cfg.carry_len(),
        div_span: cfg.div_modulus as usize,
        detector: RunDetector::new(cfg.run_threshold()),
    };
    pipeline.run(&mut reader, &mut hasher, &mut prober);

    Ok(GatherOutcome {
        residue: prober.detector.residue(),
        max_count: prober.detector.max_count(),
        shingles: plan.shingle_count() - cfg.carry_len() as u64,
        batches: plan.batch_count(),
    })
}

fn plan_for(cfg: &FilterConfig, shingle_count: u64) -> Result<BatchPlan, EngineError> {
    let plan = BatchPlan::new(shingle_count, cfg.batch_size);
    if plan.batch_count() < 3 {
        return Err(EngineError::BatchCount { batches: plan.batch_count() });
    }
    Ok(plan)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum EngineError {
    /// Invalid parameter set.
    Config(ConfigError),
    /// The stream partitions into fewer batches than the pipeline depth.
    BatchCount { batches: u32 },
    /// The fingerprint map could not be allocated.
    MapAlloc { bytes: usize },
    /// The supplied map does not match the configured moduli.
    MapLength { expected: usize, got: usize },
}

impl EngineError {
    /// Documented process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::BatchCount { .. } => 10,
            Self::MapAlloc { .. } => 11,
            Self::MapLength { .. } => 27,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::BatchCount { batches } => {
                write!(f, "stream yields {batches} batches, pipeline needs at least 3")
            }
            Self::MapAlloc { bytes } => {
                write!(f, "failed to allocate {bytes}-byte fingerprint map")
            }
            Self::MapLength { expected, got } => {
                write!(f, "map length {got} does not match configured {expected}")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
