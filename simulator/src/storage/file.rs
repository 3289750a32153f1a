//! Directory-backed storage.
//!
//! Layout of a run directory:
//!
//! ```text
//! <root>/metadata.json           parameter table
//! <root>/<array>.json            ArrayHeader sidecar (shape, params, flushed length)
//! <root>/<array>.<row>.bin       raw little-endian samples of one row
//! ```
//!
//! Appends go straight to the row files. `flush` syncs the row files and then
//! rewrites the sidecar, so the recorded flushed length never exceeds what is
//! durable on disk. Readers are bounded by the flushed length in the sidecar
//! and open the row files for reading only.

use super::{
    check_chunk_rows, check_element, check_range, read_only, ArrayElement, ArrayHeader,
    ArrayParams, ChunkedArray, Storage, StorageLocation, StorageResult,
};
use crate::errors::StorageError;
use crate::params::RunMetadata;
use log::{debug, warn};
use ndarray::{aview1, Array2, ArrayView2};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::ops::Range;
use std::path::{Path, PathBuf};

#[cfg(not(target_endian = "little"))]
compile_error!("file storage writes raw samples and requires a little-endian target");

const METADATA_FILE: &str = "metadata.json";

/// Storage backend keeping every array of a run in one directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Use `root` as run directory, creating it if needed.
    pub fn create(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Open an existing run directory.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(StorageError::NotFound(root.display().to_string()));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn header_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    fn row_path(&self, name: &str, row: usize) -> PathBuf {
        self.root.join(format!("{name}.{row}.bin"))
    }

    fn read_header(&self, name: &str) -> StorageResult<ArrayHeader> {
        let path = self.header_path(name);
        if !path.exists() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Open the row files of an existing array for appending, dropping
    /// unflushed samples.
    fn resume<T: ArrayElement>(&self, header: ArrayHeader) -> StorageResult<FileArray<T>> {
        let bytes = (header.flushed_len * std::mem::size_of::<T>()) as u64;
        let mut files = Vec::with_capacity(header.rows);
        for row in 0..header.rows {
            let file = OpenOptions::new()
                .read(true)
                .append(true)
                .open(self.row_path(&header.name, row))?;
            file.set_len(bytes)?;
            files.push(file);
        }
        Ok(self.array(header, Some(files)))
    }

    /// Handle on `header`, read-only when `files` is `None`.
    fn array<T: ArrayElement>(
        &self,
        header: ArrayHeader,
        files: Option<Vec<File>>,
    ) -> FileArray<T> {
        FileArray {
            writable: files.is_some(),
            len: header.flushed_len,
            header_path: self.header_path(&header.name),
            row_paths: (0..header.rows)
                .map(|row| self.row_path(&header.name, row))
                .collect(),
            header,
            files: files.unwrap_or_default(),
            _element: PhantomData,
        }
    }

    /// Delete row files of an earlier array with more than `rows` rows.
    fn remove_stale_rows(&self, name: &str, rows: usize) -> StorageResult<()> {
        let mut row = rows;
        loop {
            let path = self.row_path(name, row);
            if !path.exists() {
                return Ok(());
            }
            fs::remove_file(&path)?;
            debug!("Removed stale row file {}", path.display());
            row += 1;
        }
    }
}

impl Storage for FileStorage {
    fn create_array<T: ArrayElement>(
        &mut self,
        name: &str,
        rows: usize,
        params: ArrayParams,
    ) -> StorageResult<Box<dyn ChunkedArray<T>>> {
        let exists = self.header_path(name).exists();
        if exists && !params.overwrite {
            let header = self.read_header(name)?;
            check_element::<T>(&header)?;
            if header.rows != rows {
                return Err(StorageError::Shape {
                    name: name.to_string(),
                    expected: header.rows,
                    actual: rows,
                });
            }
            warn!(
                "Resuming array '{}' in {} at sample {}",
                name,
                self.root.display(),
                header.flushed_len
            );
            return Ok(Box::new(self.resume::<T>(header)?));
        }
        if exists {
            warn!("Overwriting array '{}' in {}", name, self.root.display());
            self.remove_stale_rows(name, rows)?;
        }

        let header = ArrayHeader {
            name: name.to_string(),
            element: T::TYPE_NAME.to_string(),
            rows,
            flushed_len: 0,
            params,
        };
        let mut files = Vec::with_capacity(rows);
        for row in 0..rows {
            let path = self.row_path(name, row);
            File::create(&path)?;
            files.push(OpenOptions::new().read(true).append(true).open(&path)?);
        }
        let array = self.array::<T>(header, Some(files));
        array.write_header()?;
        debug!("Created array '{}' with {} rows", name, rows);
        Ok(Box::new(array))
    }

    fn open_array<T: ArrayElement>(&self, name: &str) -> StorageResult<Box<dyn ChunkedArray<T>>> {
        let header = self.read_header(name)?;
        check_element::<T>(&header)?;
        Ok(Box::new(self.array::<T>(header, None)))
    }

    fn contains(&self, name: &str) -> bool {
        self.header_path(name).exists()
    }

    fn save_metadata(&mut self, metadata: &RunMetadata) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(self.root.join(METADATA_FILE), json)?;
        Ok(())
    }

    fn load_metadata(&self) -> StorageResult<RunMetadata> {
        let path = self.root.join(METADATA_FILE);
        if !path.exists() {
            return Err(StorageError::NotFound(METADATA_FILE.to_string()));
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn location(&self) -> StorageLocation {
        StorageLocation::Directory(self.root.clone())
    }
}

/// Handle to a stored array. Read-only handles hold no open row files.
struct FileArray<T> {
    header: ArrayHeader,
    header_path: PathBuf,
    files: Vec<File>,
    row_paths: Vec<PathBuf>,
    len: usize,
    writable: bool,
    _element: PhantomData<T>,
}

impl<T: ArrayElement> FileArray<T> {
    fn ensure_writable(&self) -> StorageResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(read_only(&self.header.name))
        }
    }

    fn write_header(&self) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(&self.header)?;
        let tmp = self.header_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.header_path)?;
        Ok(())
    }

    /// Restore every row file to `len` samples after a partial append.
    fn rollback(&mut self) -> StorageResult<()> {
        let bytes = (self.len * std::mem::size_of::<T>()) as u64;
        for file in &self.files {
            file.set_len(bytes)?;
        }
        Ok(())
    }

    fn append_rows(&mut self, chunk: &ArrayView2<'_, T>) -> StorageResult<()> {
        for (file, values) in self.files.iter_mut().zip(chunk.rows()) {
            match values.as_slice() {
                Some(slice) => file.write_all(bytemuck::cast_slice(slice))?,
                None => {
                    let owned: Vec<T> = values.iter().copied().collect();
                    file.write_all(bytemuck::cast_slice(&owned))?;
                }
            }
        }
        Ok(())
    }
}

impl<T: ArrayElement> ChunkedArray<T> for FileArray<T> {
    fn name(&self) -> &str {
        &self.header.name
    }

    fn params(&self) -> &ArrayParams {
        &self.header.params
    }

    fn rows(&self) -> usize {
        self.header.rows
    }

    fn len(&self) -> usize {
        self.len
    }

    fn flushed_len(&self) -> usize {
        self.header.flushed_len
    }

    fn append(&mut self, chunk: ArrayView2<'_, T>) -> StorageResult<()> {
        self.ensure_writable()?;
        check_chunk_rows(&self.header.name, self.header.rows, &chunk)?;
        if let Err(e) = self.append_rows(&chunk) {
            if let Err(rollback) = self.rollback() {
                warn!(
                    "Failed to roll back array '{}' after a failed append: {}",
                    self.header.name, rollback
                );
            }
            return Err(e);
        }
        self.len += chunk.ncols();
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.ensure_writable()?;
        for file in &mut self.files {
            file.flush()?;
            file.sync_data()?;
        }
        self.header.flushed_len = self.len;
        self.write_header()
    }

    fn truncate(&mut self, len: usize) -> StorageResult<()> {
        self.ensure_writable()?;
        if len >= self.len {
            return Ok(());
        }
        self.len = len;
        self.rollback()?;
        if self.header.flushed_len > len {
            self.header.flushed_len = len;
            self.write_header()?;
        }
        Ok(())
    }

    fn read(&self, range: Range<usize>) -> StorageResult<Array2<T>> {
        check_range(&self.header.name, &range, self.len)?;
        let n = range.len();
        let size = std::mem::size_of::<T>();
        let mut out = Array2::<T>::default((self.header.rows, n));
        for (path, mut row) in self.row_paths.iter().zip(out.rows_mut()) {
            let mut buf = vec![T::default(); n];
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start((range.start * size) as u64))?;
            file.read_exact(bytemuck::cast_slice_mut(&mut buf))?;
            row.assign(&aview1(&buf));
        }
        Ok(out)
    }
}
