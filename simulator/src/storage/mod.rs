//! Chunked array storage for simulation outputs.
//!
//! Simulation outputs are 2D arrays (`rows × samples`) that grow along the
//! sample axis one chunk at a time. A [`Storage`] backend creates named
//! [`ChunkedArray`]s and keeps a small metadata document describing the run.
//! Each array distinguishes samples that were appended from samples that were
//! flushed: after an interruption, recreating an array without `overwrite`
//! truncates it back to its flushed length, which is where an interrupted run
//! resumes. Arrays opened with [`Storage::open_array`] are read-only views of
//! the flushed samples and never modify what a writer holds.
//!
//! Backends:
//! - [`MemoryStorage`]: arrays held in process memory
//! - [`FileStorage`]: one directory per run, raw binary rows with JSON sidecars

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::errors::StorageError;
use crate::params::RunMetadata;
use bytemuck::Pod;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Element types that can be stored in a chunked array.
pub trait ArrayElement: Pod + Default + Send + Sync + 'static {
    /// Type tag recorded with the array
    const TYPE_NAME: &'static str;
}

impl ArrayElement for f64 {
    const TYPE_NAME: &'static str = "f64";
}

impl ArrayElement for u8 {
    const TYPE_NAME: &'static str = "u8";
}

/// Creation parameters of a chunked array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayParams {
    /// Samples per chunk, also the unit of appends during a run
    pub chunk_size: usize,
    /// Name of the compression filter recorded with the array
    pub compression: Option<String>,
    /// Recreate an existing array instead of resuming it
    pub overwrite: bool,
}

impl ArrayParams {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            compression: None,
            overwrite: true,
        }
    }

    pub fn resume(mut self) -> Self {
        self.overwrite = false;
        self
    }
}

/// Description of a stored array, as persisted by the backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayHeader {
    pub name: String,
    pub element: String,
    pub rows: usize,
    pub flushed_len: usize,
    pub params: ArrayParams,
}

/// 2D array growing along the sample axis.
pub trait ChunkedArray<T: ArrayElement> {
    fn name(&self) -> &str;

    fn params(&self) -> &ArrayParams;

    /// Number of rows, fixed at creation.
    fn rows(&self) -> usize;

    /// Samples appended so far, flushed or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(rows, samples)`
    fn shape(&self) -> (usize, usize) {
        (self.rows(), self.len())
    }

    /// Samples guaranteed to survive an interruption.
    fn flushed_len(&self) -> usize;

    /// Append a `rows × n` chunk.
    ///
    /// A failed append leaves the array length unchanged. Read-only handles
    /// fail with [`StorageError::ReadOnly`], as do `flush` and `truncate`.
    fn append(&mut self, chunk: ArrayView2<'_, T>) -> StorageResult<()>;

    /// Persist everything appended so far.
    fn flush(&mut self) -> StorageResult<()>;

    /// Drop samples past `len`. No-op if the array is not longer than `len`.
    fn truncate(&mut self, len: usize) -> StorageResult<()>;

    /// Read samples `range` of every row.
    fn read(&self, range: Range<usize>) -> StorageResult<Array2<T>>;

    /// Read samples `range` of a single row.
    fn read_row(&self, row: usize, range: Range<usize>) -> StorageResult<Array1<T>> {
        if row >= self.rows() {
            return Err(StorageError::Shape {
                name: self.name().to_string(),
                expected: self.rows(),
                actual: row + 1,
            });
        }
        Ok(self.read(range)?.row(row).to_owned())
    }
}

/// Where a backend keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageLocation {
    Memory,
    Directory(PathBuf),
}

/// Backend creating and opening named chunked arrays.
pub trait Storage {
    /// Create array `name` with `rows` rows.
    ///
    /// If the array exists and `params.overwrite` is false it is reopened and
    /// truncated to its flushed length; the row count and element type must
    /// match. Otherwise it is recreated empty.
    fn create_array<T: ArrayElement>(
        &mut self,
        name: &str,
        rows: usize,
        params: ArrayParams,
    ) -> StorageResult<Box<dyn ChunkedArray<T>>>;

    /// Open an existing array for reading.
    ///
    /// The handle never covers unflushed samples. Opening does not touch the
    /// stored data.
    fn open_array<T: ArrayElement>(&self, name: &str) -> StorageResult<Box<dyn ChunkedArray<T>>>;

    fn contains(&self, name: &str) -> bool;

    /// Store the description of the run.
    fn save_metadata(&mut self, metadata: &RunMetadata) -> StorageResult<()>;

    /// Stored run description, [`StorageError::NotFound`] if none was saved.
    fn load_metadata(&self) -> StorageResult<RunMetadata>;

    fn location(&self) -> StorageLocation;
}

pub(crate) fn check_chunk_rows<T>(
    name: &str,
    rows: usize,
    chunk: &ArrayView2<'_, T>,
) -> StorageResult<()> {
    if chunk.nrows() != rows {
        return Err(StorageError::Shape {
            name: name.to_string(),
            expected: rows,
            actual: chunk.nrows(),
        });
    }
    Ok(())
}

pub(crate) fn check_range(name: &str, range: &Range<usize>, len: usize) -> StorageResult<()> {
    if range.start > range.end || range.end > len {
        return Err(StorageError::Range {
            name: name.to_string(),
            start: range.start,
            end: range.end,
            len,
        });
    }
    Ok(())
}

pub(crate) fn read_only(name: &str) -> StorageError {
    StorageError::ReadOnly(name.to_string())
}

pub(crate) fn check_element<T: ArrayElement>(header: &ArrayHeader) -> StorageResult<()> {
    if header.element != T::TYPE_NAME {
        return Err(StorageError::ElementType {
            name: header.name.clone(),
            found: header.element.clone(),
            requested: T::TYPE_NAME.to_string(),
        });
    }
    Ok(())
}
