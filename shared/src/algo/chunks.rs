//! Chunk iteration over long sample ranges.
//!
//! Every streaming stage of the simulation walks its data with the same
//! partitioning of `[0, num_samples)`: full chunks of `chunk_size` samples
//! followed by one shorter tail chunk of `num_samples % chunk_size` samples,
//! emitted only when it is non-empty. Because the partitioning depends only on
//! the two sizes, every stage sees the same chunk boundaries and a pipeline can
//! be resumed at a chunk index.
//!
//! Both iterators are lazy, finite and `Clone`, so a partition can be restarted
//! by cloning the iterator before consuming it.

use std::ops::Range;

/// Number of chunks needed to cover `num_samples` with chunks of `chunk_size`.
///
/// # Panics
/// Panics if `chunk_size` is zero.
pub fn chunk_count(num_samples: usize, chunk_size: usize) -> usize {
    assert!(chunk_size > 0, "chunk_size must be greater than zero");
    num_samples.div_ceil(chunk_size)
}

/// Iterator over the sizes of consecutive chunks.
#[derive(Debug, Clone)]
pub struct ChunkSizes {
    remaining: usize,
    chunk_size: usize,
}

impl ChunkSizes {
    /// Partition `num_samples` into chunks of at most `chunk_size`.
    ///
    /// # Panics
    /// Panics if `chunk_size` is zero.
    pub fn new(num_samples: usize, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be greater than zero");
        Self {
            remaining: num_samples,
            chunk_size,
        }
    }
}

impl Iterator for ChunkSizes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let size = self.remaining.min(self.chunk_size);
        self.remaining -= size;
        Some(size)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.div_ceil(self.chunk_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for ChunkSizes {}

/// Iterator over the index ranges of consecutive chunks.
///
/// The ranges are contiguous, start at zero and end at `num_samples`.
#[derive(Debug, Clone)]
pub struct ChunkSlices {
    start: usize,
    sizes: ChunkSizes,
}

impl ChunkSlices {
    /// Partition `[0, num_samples)` into ranges of at most `chunk_size`.
    ///
    /// # Panics
    /// Panics if `chunk_size` is zero.
    pub fn new(num_samples: usize, chunk_size: usize) -> Self {
        Self {
            start: 0,
            sizes: ChunkSizes::new(num_samples, chunk_size),
        }
    }
}

impl Iterator for ChunkSlices {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        let size = self.sizes.next()?;
        let range = self.start..self.start + size;
        self.start += size;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.sizes.size_hint()
    }
}

impl ExactSizeIterator for ChunkSlices {}

/// Reduce a chunked source chunk by chunk.
///
/// `read` loads one chunk, `reduce` collapses a chunk into a partial result and
/// `combine` folds the partial results. Only one chunk is resident at a time.
pub fn reduce_chunks<C, R, E, F, G, H>(
    num_samples: usize,
    chunk_size: usize,
    mut read: F,
    reduce: G,
    combine: H,
) -> Result<Option<R>, E>
where
    F: FnMut(Range<usize>) -> Result<C, E>,
    G: Fn(&C) -> R,
    H: Fn(R, R) -> R,
{
    let mut acc = None;
    for range in ChunkSlices::new(num_samples, chunk_size) {
        let chunk = read(range)?;
        let partial = reduce(&chunk);
        acc = Some(match acc {
            Some(prev) => combine(prev, partial),
            None => partial,
        });
    }
    Ok(acc)
}

/// Map a chunked source into a chunked sink.
///
/// Each chunk is read, transformed and written before the next one is loaded.
/// Returns the number of chunks processed.
pub fn map_chunks<C, D, E, F, G, W>(
    num_samples: usize,
    chunk_size: usize,
    mut read: F,
    map: G,
    mut write: W,
) -> Result<usize, E>
where
    F: FnMut(Range<usize>) -> Result<C, E>,
    G: Fn(C) -> D,
    W: FnMut(D) -> Result<(), E>,
{
    let mut processed = 0;
    for range in ChunkSlices::new(num_samples, chunk_size) {
        let chunk = read(range)?;
        write(map(chunk))?;
        processed += 1;
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_partition() {
        let sizes: Vec<usize> = ChunkSizes::new(12, 4).collect();
        assert_eq!(sizes, vec![4, 4, 4]);
    }

    #[test]
    fn test_tail_chunk() {
        let sizes: Vec<usize> = ChunkSizes::new(10, 4).collect();
        assert_eq!(sizes, vec![4, 4, 2]);

        let slices: Vec<Range<usize>> = ChunkSlices::new(10, 4).collect();
        assert_eq!(slices, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn test_chunk_larger_than_total() {
        let slices: Vec<Range<usize>> = ChunkSlices::new(3, 100).collect();
        assert_eq!(slices, vec![0..3]);
    }

    #[test]
    fn test_empty_range_yields_nothing() {
        assert_eq!(ChunkSizes::new(0, 8).count(), 0);
        assert_eq!(chunk_count(0, 8), 0);
    }

    #[test]
    fn test_partition_is_contiguous_and_exhaustive() {
        for num_samples in [1usize, 7, 64, 65, 1000] {
            for chunk_size in [1usize, 3, 8, 64, 999, 5000] {
                let slices: Vec<Range<usize>> =
                    ChunkSlices::new(num_samples, chunk_size).collect();
                assert_eq!(slices.len(), chunk_count(num_samples, chunk_size));
                assert_eq!(slices.first().map(|r| r.start), Some(0));
                assert_eq!(slices.last().map(|r| r.end), Some(num_samples));
                for pair in slices.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                    assert_eq!(pair[0].len(), chunk_size);
                }
                assert!(slices.iter().all(|r| !r.is_empty()));
            }
        }
    }

    #[test]
    fn test_restartable_by_clone() {
        let slices = ChunkSlices::new(9, 4);
        let first: Vec<_> = slices.clone().collect();
        let second: Vec<_> = slices.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_exact_size() {
        let sizes = ChunkSizes::new(10, 3);
        assert_eq!(sizes.len(), 4);
    }

    #[test]
    #[should_panic(expected = "chunk_size must be greater than zero")]
    fn test_zero_chunk_size_panics() {
        let _ = ChunkSizes::new(10, 0);
    }

    #[test]
    fn test_reduce_chunks_max() {
        let data: Vec<u32> = (0..23).map(|i| (i * 7) % 19).collect();
        let max = reduce_chunks(
            data.len(),
            5,
            |r| Ok::<_, ()>(data[r].to_vec()),
            |c| c.iter().copied().max().unwrap_or(0),
            |a, b| a.max(b),
        )
        .unwrap();
        assert_eq!(max, data.iter().copied().max());
    }

    #[test]
    fn test_reduce_chunks_empty_source() {
        let result = reduce_chunks(0, 5, |_| Ok::<Vec<u32>, ()>(vec![]), |c| c.len(), |a, b| a + b)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_map_chunks_writes_every_chunk() {
        let data: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut out = Vec::new();
        let n = map_chunks(
            data.len(),
            4,
            |r| Ok::<_, ()>(data[r].to_vec()),
            |c| c.into_iter().map(|v| v * 2.0).collect::<Vec<_>>(),
            |c| {
                out.extend(c);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(n, 3);
        assert_eq!(out, data.iter().map(|v| v * 2.0).collect::<Vec<_>>());
    }

    #[test]
    fn test_map_chunks_propagates_errors() {
        let result = map_chunks(
            10,
            4,
            |r| if r.start >= 4 { Err("read failed") } else { Ok(r.len()) },
            |n| n,
            |_| Ok(()),
        );
        assert_eq!(result, Err("read failed"));
    }
}
