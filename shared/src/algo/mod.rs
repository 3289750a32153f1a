//! Algorithms for streaming and reproducible simulation
//!
//! This module provides chunked iteration, seeded parallel processing and
//! running statistics.

pub mod chunks;
pub mod parallel;
pub mod stats;

pub use chunks::{chunk_count, map_chunks, reduce_chunks, ChunkSizes, ChunkSlices};
pub use parallel::{process_rows_in_parallel, seeded_streams, stream_seed};
pub use stats::StreamingStats;
