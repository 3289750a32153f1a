use super::{
    check_chunk_rows, check_element, check_range, read_only, ArrayElement, ArrayHeader,
    ArrayParams, ChunkedArray, Storage, StorageLocation, StorageResult,
};
use crate::errors::StorageError;
use crate::params::RunMetadata;
use log::warn;
use ndarray::{Array2, ArrayView2};
use std::any::Any;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

struct MemoryData<T> {
    header: ArrayHeader,
    rows: Vec<Vec<T>>,
}

impl<T: ArrayElement> MemoryData<T> {
    fn len(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    fn truncate_to_flushed(&mut self) {
        let flushed = self.header.flushed_len;
        for row in &mut self.rows {
            row.truncate(flushed);
        }
    }
}

type Shared<T> = Arc<RwLock<MemoryData<T>>>;

/// In-process storage backend.
///
/// Array handles share their data with the storage, so an array can be
/// reopened after its handle was dropped. Read-only handles see the flushed
/// samples only, even while a writer holds unflushed ones.
#[derive(Default)]
pub struct MemoryStorage {
    arrays: HashMap<String, Arc<dyn Any + Send + Sync>>,
    headers: HashMap<String, ArrayHeader>,
    metadata: Option<RunMetadata>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared<T: ArrayElement>(&self, name: &str) -> StorageResult<Shared<T>> {
        let slot = self
            .arrays
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        if let Some(header) = self.headers.get(name) {
            check_element::<T>(header)?;
        }
        Arc::clone(slot)
            .downcast::<RwLock<MemoryData<T>>>()
            .map_err(|_| StorageError::ElementType {
                name: name.to_string(),
                found: "unknown".to_string(),
                requested: T::TYPE_NAME.to_string(),
            })
    }
}

impl Storage for MemoryStorage {
    fn create_array<T: ArrayElement>(
        &mut self,
        name: &str,
        rows: usize,
        params: ArrayParams,
    ) -> StorageResult<Box<dyn ChunkedArray<T>>> {
        if self.arrays.contains_key(name) && !params.overwrite {
            let data = self.shared::<T>(name)?;
            {
                let mut guard = data.write().unwrap_or_else(PoisonError::into_inner);
                if guard.header.rows != rows {
                    return Err(StorageError::Shape {
                        name: name.to_string(),
                        expected: guard.header.rows,
                        actual: rows,
                    });
                }
                guard.truncate_to_flushed();
                warn!(
                    "Resuming array '{}' at sample {}",
                    name, guard.header.flushed_len
                );
            }
            return Ok(Box::new(MemoryArray::new(data, true)));
        }

        let header = ArrayHeader {
            name: name.to_string(),
            element: T::TYPE_NAME.to_string(),
            rows,
            flushed_len: 0,
            params,
        };
        let data: Shared<T> = Arc::new(RwLock::new(MemoryData {
            header: header.clone(),
            rows: vec![Vec::new(); rows],
        }));
        self.arrays
            .insert(name.to_string(), Arc::clone(&data) as Arc<dyn Any + Send + Sync>);
        self.headers.insert(name.to_string(), header);
        Ok(Box::new(MemoryArray::new(data, true)))
    }

    fn open_array<T: ArrayElement>(&self, name: &str) -> StorageResult<Box<dyn ChunkedArray<T>>> {
        Ok(Box::new(MemoryArray::new(self.shared::<T>(name)?, false)))
    }

    fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    fn save_metadata(&mut self, metadata: &RunMetadata) -> StorageResult<()> {
        self.metadata = Some(metadata.clone());
        Ok(())
    }

    fn load_metadata(&self) -> StorageResult<RunMetadata> {
        self.metadata
            .clone()
            .ok_or_else(|| StorageError::NotFound("metadata".to_string()))
    }

    fn location(&self) -> StorageLocation {
        StorageLocation::Memory
    }
}

/// Handle to an in-memory array. Name, params and row count are fixed at
/// creation and cached here.
struct MemoryArray<T> {
    name: String,
    params: ArrayParams,
    rows: usize,
    writable: bool,
    data: Shared<T>,
}

impl<T: ArrayElement> MemoryArray<T> {
    fn new(data: Shared<T>, writable: bool) -> Self {
        let (name, params, rows) = {
            let guard = data.read().unwrap_or_else(PoisonError::into_inner);
            (
                guard.header.name.clone(),
                guard.header.params.clone(),
                guard.header.rows,
            )
        };
        Self {
            name,
            params,
            rows,
            writable,
            data,
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, MemoryData<T>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn visible_len(&self, data: &MemoryData<T>) -> usize {
        if self.writable {
            data.len()
        } else {
            data.header.flushed_len.min(data.len())
        }
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(read_only(&self.name))
        }
    }
}

impl<T: ArrayElement> ChunkedArray<T> for MemoryArray<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &ArrayParams {
        &self.params
    }

    fn rows(&self) -> usize {
        self.rows
    }

    fn len(&self) -> usize {
        self.visible_len(&self.read_guard())
    }

    fn flushed_len(&self) -> usize {
        self.read_guard().header.flushed_len
    }

    fn append(&mut self, chunk: ArrayView2<'_, T>) -> StorageResult<()> {
        self.ensure_writable()?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        check_chunk_rows(&self.name, self.rows, &chunk)?;
        for (row, values) in guard.rows.iter_mut().zip(chunk.rows()) {
            row.extend(values.iter().copied());
        }
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.ensure_writable()?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.header.flushed_len = guard.len();
        Ok(())
    }

    fn truncate(&mut self, len: usize) -> StorageResult<()> {
        self.ensure_writable()?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        for row in &mut guard.rows {
            row.truncate(len);
        }
        guard.header.flushed_len = guard.header.flushed_len.min(len);
        Ok(())
    }

    fn read(&self, range: Range<usize>) -> StorageResult<Array2<T>> {
        let guard = self.read_guard();
        check_range(&self.name, &range, self.visible_len(&guard))?;
        let n = range.len();
        Ok(Array2::from_shape_fn((self.rows, n), |(r, k)| {
            guard.rows[r][range.start + k]
        }))
    }
}
