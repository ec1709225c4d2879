// File-level scatter and gather.
//
// Wraps the in-memory engines with master-file handling and the map file
// format. The master file is the reference stream (`ns` bytes) concatenated
// with the test stream (`NS` bytes); gather seeks to offset `ns`. The map
// file is an 8-byte little-endian setup time followed by the raw map body;
// the setup time doubles as the byte-shuffle seed, which is how gather
// reproduces scatter's permutation.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::FilterConfig;
use crate::engine::{self, DemoInjection, EngineError};
use crate::hash::shuffle::ByteShuffle;
use crate::map::FingerprintMap;

const BUF_SIZE: usize = 64 * 1024;

/// Size of the setup-time header prefixed to the map body.
pub const MAP_HEADER_LEN: u64 = 8;

// ---------------------------------------------------------------------------
// Map file naming
// ---------------------------------------------------------------------------

/// Full map file path for a prefix: `<prefix>_<M_DIV>_<L>.map`.
///
/// Encoding the diversity modulus and shingle length in the name keeps
/// incompatible map files distinguishable on disk.
pub fn map_file_name(prefix: &Path, cfg: &FilterConfig) -> PathBuf {
    PathBuf::from(format!(
        "{}_{}_{}.map",
        prefix.display(),
        cfg.div_modulus,
        cfg.shingle_len
    ))
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `scatter_file()`.
#[derive(Debug, Clone)]
pub struct ScatterStats {
    /// Where the map was written.
    pub map_path: PathBuf,
    /// Map setup time (unix seconds); the byte-shuffle seed.
    pub setup_time: u64,
    /// Reference shingles recorded.
    pub shingles: u64,
    /// Batches driven through the pipeline.
    pub batches: u32,
    /// Map body length in bytes.
    pub map_len: u64,
    /// Wall-clock time of the pipeline plus map write.
    pub elapsed: Duration,
}

/// Statistics returned by `gather_file()`.
#[derive(Debug, Clone)]
pub struct GatherStats {
    /// Map file the probes ran against.
    pub map_path: PathBuf,
    /// Setup time read back from the map file.
    pub setup_time: u64,
    /// Positions surviving the filter.
    pub residue: u64,
    /// Longest hit run, in shingles.
    pub max_count: u64,
    /// Upper bound on the longest surviving substring, in bytes.
    pub longest_candidate: u64,
    /// Test shingles checked.
    pub shingles: u64,
    /// Batches driven through the pipeline.
    pub batches: u32,
    /// Measured filtration ratio `residue / shingles`.
    pub filtration_ratio: f64,
    /// Expected optimum ratio for saturated independent filters.
    pub expected_ratio: f64,
    /// Wall-clock time of map load plus pipeline.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Scatter
// ---------------------------------------------------------------------------

/// Read the reference stream from `master_path`, build the fingerprint map
/// and persist it under `map_prefix`.
pub fn scatter_file(
    cfg: &FilterConfig,
    master_path: &Path,
    map_prefix: &Path,
    demo: bool,
) -> Result<ScatterStats, FilterIoError> {
    let started = Instant::now();
    let reader = open_master(master_path, cfg.reference_len, 0)?;

    let setup_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let shuffle = ByteShuffle::from_seed(setup_time);

    let demo = if demo { DemoInjection::Reference } else { DemoInjection::Off };
    let outcome = engine::scatter_stream(cfg, reader, &shuffle, demo)?;

    let map_path = map_file_name(map_prefix, cfg);
    write_map_file(&map_path, setup_time, &outcome.map)?;

    Ok(ScatterStats {
        map_path,
        setup_time,
        shingles: outcome.shingles,
        batches: outcome.batches,
        map_len: outcome.map.len() as u64,
        elapsed: started.elapsed(),
    })
}

// ---------------------------------------------------------------------------
// Gather
// ---------------------------------------------------------------------------

/// Load the map written by a compatible scatter run, read the test stream
/// from offset `ns` of `master_path`, and report the surviving residue.
pub fn gather_file(
    cfg: &FilterConfig,
    master_path: &Path,
    map_prefix: &Path,
    demo: bool,
) -> Result<GatherStats, FilterIoError> {
    let started = Instant::now();
    let map_path = map_file_name(map_prefix, cfg);
    let (setup_time, map) = read_map_file(&map_path, cfg)?;
    let shuffle = ByteShuffle::from_seed(setup_time);

    let reader = open_master(
        master_path,
        cfg.reference_len + cfg.test_len,
        cfg.reference_len,
    )?;

    let demo = if demo { DemoInjection::Test } else { DemoInjection::Off };
    let outcome = engine::gather_stream(cfg, reader, &shuffle, &map, demo)?;

    Ok(GatherStats {
        map_path,
        setup_time,
        residue: outcome.residue,
        max_count: outcome.max_count,
        longest_candidate: outcome.longest_candidate(cfg.shingle_len),
        shingles: outcome.shingles,
        batches: outcome.batches,
        filtration_ratio: outcome.filtration_ratio(),
        expected_ratio: cfg.expected_filtration_ratio(),
        elapsed: started.elapsed(),
    })
}

// ---------------------------------------------------------------------------
// Master file
// ---------------------------------------------------------------------------

/// Open the master file, verify it holds at least `need` bytes, and seek to
/// `offset`. During testing the file may be longer than `ns + NS`.
fn open_master(
    path: &Path,
    need: u64,
    offset: u64,
) -> Result<BufReader<File>, FilterIoError> {
    let file = File::open(path).map_err(|source| FilterIoError::MasterOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let have = file
        .metadata()
        .map_err(|source| FilterIoError::MasterOpen {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if have < need {
        return Err(FilterIoError::MasterTooShort {
            path: path.to_path_buf(),
            need,
            have,
        });
    }
    let mut reader = BufReader::with_capacity(BUF_SIZE, file);
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(FilterIoError::Io)?;
    Ok(reader)
}

// ---------------------------------------------------------------------------
// Map file
// ---------------------------------------------------------------------------

/// Persist `[setup_time LE u64][map body]`.
pub fn write_map_file(
    path: &Path,
    setup_time: u64,
    map: &FingerprintMap,
) -> Result<(), FilterIoError> {
    let file = File::create(path).map_err(|source| FilterIoError::MapOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::with_capacity(BUF_SIZE, file);
    writer
        .write_all(&setup_time.to_le_bytes())
        .map_err(FilterIoError::Io)?;
    writer.write_all(map.as_bytes()).map_err(FilterIoError::Io)?;
    writer.flush().map_err(FilterIoError::Io)?;
    Ok(())
}

/// Load a map file, validating its length against the configured moduli.
pub fn read_map_file(
    path: &Path,
    cfg: &FilterConfig,
) -> Result<(u64, FingerprintMap), FilterIoError> {
    let file = File::open(path).map_err(|source| FilterIoError::MapOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let need = MAP_HEADER_LEN + cfg.map_len() as u64;
    let have = file
        .metadata()
        .map_err(|source| FilterIoError::MapOpen {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if have < need {
        return Err(FilterIoError::MapTooShort {
            path: path.to_path_buf(),
            need,
            have,
        });
    }

    let mut reader = BufReader::with_capacity(BUF_SIZE, file);
    let mut header = [0u8; 8];
    reader.read_exact(&mut header).map_err(FilterIoError::Io)?;
    let setup_time = u64::from_le_bytes(header);

    let mut body = Vec::new();
    body.try_reserve_exact(cfg.map_len())
        .map_err(|_| FilterIoError::Engine(EngineError::MapAlloc { bytes: cfg.map_len() }))?;
    body.resize(cfg.map_len(), 0);
    reader.read_exact(&mut body).map_err(FilterIoError::Io)?;

    Ok((setup_time, FingerprintMap::from_bytes(body)))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file-level scatter/gather.
#[derive(Debug)]
pub enum FilterIoError {
    /// Engine-level failure (config, batch plan, map allocation).
    Engine(EngineError),
    /// Master file could not be opened or sized.
    MasterOpen { path: PathBuf, source: io::Error },
    /// Master file holds fewer bytes than the configured streams.
    MasterTooShort { path: PathBuf, need: u64, have: u64 },
    /// Map file could not be opened or created.
    MapOpen { path: PathBuf, source: io::Error },
    /// Map file is shorter than header + configured map length.
    MapTooShort { path: PathBuf, need: u64, have: u64 },
    /// Other I/O failure (read, write, seek).
    Io(io::Error),
}

impl FilterIoError {
    /// Documented process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Engine(e) => e.exit_code(),
            Self::MasterOpen { .. } | Self::MasterTooShort { .. } => 12,
            Self::MapOpen { .. } => 26,
            Self::MapTooShort { .. } => 27,
            Self::Io(_) => 1,
        }
    }
}

impl std::fmt::Display for FilterIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "{e}"),
            Self::MasterOpen { path, source } => {
                write!(f, "master file {}: {source}", path.display())
            }
            Self::MasterTooShort { path, need, have } => write!(
                f,
                "master file {} holds {have} bytes, streams need {need}",
                path.display()
            ),
            Self::MapOpen { path, source } => {
                write!(f, "map file {}: {source}", path.display())
            }
            Self::MapTooShort { path, need, have } => write!(
                f,
                "map file {} holds {have} bytes, expected {need}",
                path.display()
            ),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for FilterIoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            Self::MasterOpen { source, .. } | Self::MapOpen { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for FilterIoError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
