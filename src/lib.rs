//! Coordinate-indexed kernels for population-scale peak analysis.
//!
//! Two independent pieces, composed by the command-line tools in
//! `main.rs` and by downstream analysis scripts:
//!
//! - [`NearestIndex`]: per-chromosome sorted positions answering "which
//!   entry is closest to this coordinate" and "which entries fall within a
//!   distance of it", with an optional draw-without-replacement mode and a
//!   pluggable on-disk cache.
//! - [`cluster_peaks`]: a single-pass greedy merge of a coordinate-sorted,
//!   multi-population peak stream into consensus clusters, with
//!   per-population read and height normalization computed in a pre-pass.

pub mod cluster;
pub mod error;
pub mod index_cache;
pub mod input;
pub mod nearest;
pub mod normalize;
pub mod peakpop_structs;
pub mod sorts;

pub use cluster::{cluster_peaks, Cluster, ClusterConfig, MergeStats};
pub use error::{PeakError, Result};
pub use index_cache::{load_or_build, FileStore, IndexStore, MemoryStore, NoStore};
pub use nearest::NearestIndex;
pub use normalize::NormalizationTable;
pub use peakpop_structs::{Peak, PositionEntry};
