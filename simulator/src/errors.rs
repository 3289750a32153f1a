use shared::noise::NoiseError;
use thiserror::Error;

/// Errors raised by the storage adapters.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("array '{name}' expects {expected} rows, got a chunk with {actual}")]
    Shape {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("array '{0}' not found in storage")]
    NotFound(String),

    #[error("array '{name}' has {len} samples, cannot read {start}..{end}")]
    Range {
        name: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("array '{name}' exists with element type {found}, requested {requested}")]
    ElementType {
        name: String,
        found: String,
        requested: String,
    },

    #[error("array '{0}' was opened for reading only")]
    ReadOnly(String),
}

/// Errors raised by the simulation pipeline.
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("bin {bin} holds {count} photons, dithering supports at most {max} per bin")]
    PrecisionOverflow { bin: usize, count: u32, max: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("parameter mismatch: {0}")]
    ParameterMismatch(String),
}

impl From<NoiseError> for SimulationError {
    fn from(err: NoiseError) -> Self {
        match err {
            NoiseError::InvalidMean { .. } => SimulationError::Configuration(err.to_string()),
            NoiseError::CountOverflow { index, count } => SimulationError::PrecisionOverflow {
                bin: index,
                count: count.min(u32::MAX as f64) as u32,
                max: u8::MAX as u32,
            },
        }
    }
}

pub type Result<T, E = SimulationError> = std::result::Result<T, E>;
