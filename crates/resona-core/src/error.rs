//! Error types for Resona

use thiserror::Error;

/// Engine error type.
///
/// Every variant maps onto a stable integer code so the C ABI can report
/// errors without exposing Rust types; the message half of the pair is kept
/// in thread-local storage by the ABI layer.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid handle: {0}")]
    InvalidHandle(u64),

    #[error("Handle is of the wrong type: {0}")]
    HandleType(String),

    #[error("Invalid property: {0}")]
    InvalidProperty(u32),

    #[error("Property type mismatch: {0}")]
    PropertyType(String),

    #[error("Value {value} out of range [{min}, {max}]")]
    Range { value: f64, min: f64, max: f64 },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Library is not initialized")]
    Uninitialized,

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Byte stream does not support {0}")]
    ByteStreamUnsupportedOperation(&'static str),

    #[error("Byte stream not found: {0}")]
    ByteStreamNotFound(String),

    #[error("Byte stream error: {0}")]
    ByteStreamCustom(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable integer code for the C ABI.
    pub fn code(&self) -> i32 {
        match self {
            EngineError::InvalidHandle(_) => 1,
            EngineError::HandleType(_) => 2,
            EngineError::InvalidProperty(_) => 3,
            EngineError::PropertyType(_) => 4,
            EngineError::Range { .. } => 5,
            EngineError::NotSupported(_) => 6,
            EngineError::Invariant(_) => 7,
            EngineError::Validation(_) => 8,
            EngineError::Internal(_) => 9,
            EngineError::Uninitialized => 10,
            EngineError::AudioDevice(_) => 11,
            EngineError::ByteStreamUnsupportedOperation(_) => 12,
            EngineError::ByteStreamNotFound(_) => 13,
            EngineError::ByteStreamCustom(_) => 14,
            EngineError::UnsupportedFormat(_) => 15,
            EngineError::LimitExceeded(_) => 16,
            EngineError::Io(_) => 17,
        }
    }
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_nonzero() {
        let errs = [
            EngineError::InvalidHandle(1),
            EngineError::Uninitialized,
            EngineError::Range {
                value: 2.0,
                min: 0.0,
                max: 1.0,
            },
        ];
        let codes: Vec<i32> = errs.iter().map(|e| e.code()).collect();
        for (i, a) in codes.iter().enumerate() {
            assert_ne!(*a, 0);
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
