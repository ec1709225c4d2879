//! Crossrep: probabilistic cross-repetition filtering between byte streams.
//!
//! The crate filters a very large "test" byte stream against a much smaller
//! "reference" stream to find the positions where a common substring of at
//! least a configured length might occur, discarding the overwhelming
//! majority of positions that provably cannot. It is a one-sided filter:
//! reference shingles are never missed, false positives are expected and
//! bounded.
//!
//! The crate provides:
//! - Rolling common + diversified Karp-Rabin fingerprints (`hash`)
//! - The bit-sliced fingerprint map (`map`)
//! - The three-stage batch pipeline (`pipeline`)
//! - Scatter/gather engines over in-memory streams (`engine`)
//! - File-oriented helpers and the map file format (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::io::Cursor;
//! use crossrep::config::FilterConfig;
//! use crossrep::engine::{self, DemoInjection};
//! use crossrep::hash::shuffle::ByteShuffle;
//!
//! let reference = b"the quick brown fox jumps over the lazy dog".repeat(64);
//! let test = b"a lazy dog sleeps while the quick brown fox runs".repeat(64);
//!
//! let cfg = FilterConfig {
//!     common_modulus: 1_000_003,
//!     reference_len: reference.len() as u64,
//!     test_len: test.len() as u64,
//!     batch_size: 512,
//!     ..FilterConfig::default()
//! };
//! let shuffle = ByteShuffle::from_seed(1);
//!
//! let scatter = engine::scatter_stream(
//!     &cfg, Cursor::new(reference), &shuffle, DemoInjection::Off,
//! ).unwrap();
//! let gather = engine::gather_stream(
//!     &cfg, Cursor::new(test), &shuffle, &scatter.map, DemoInjection::Off,
//! ).unwrap();
//! println!("{} candidate positions survive", gather.residue);
//! ```

pub mod affinity;
pub mod config;
pub mod engine;
pub mod hash;
pub mod io;
pub mod map;
pub mod pipeline;

#[cfg(feature = "cli")]
pub mod cli;
