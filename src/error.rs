//! Error types and handling for shmmap

/// Result type alias for shmmap operations
pub type Result<T> = std::result::Result<T, ShmMapError>;

/// Errors reported by the region provider, the allocator and the map
#[derive(Debug, thiserror::Error)]
pub enum ShmMapError {
    /// I/O related errors (opening, sizing or mapping the backing file)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Allocation request larger than the biggest size class
    #[error("Request too large: requested {requested} bytes, max block size is {max}")]
    RequestTooLarge { requested: usize, max: usize },

    /// The bump pointer cannot carve another block
    #[error("Arena exhausted: requested {requested} bytes, {available} bytes left")]
    ArenaExhausted { requested: usize, available: usize },

    /// Offset resolves outside the mapped region
    #[error("Offset {offset} is outside the region (limit {limit})")]
    OffsetOutOfRange { offset: i64, limit: usize },

    /// Block header carries a size class that does not exist
    #[error("Corrupt block at offset {offset}: size class {size_class} not in 0..{class_count}")]
    CorruptBlock {
        offset: i64,
        size_class: i32,
        class_count: usize,
    },

    /// Persisted headers do not describe a usable layout
    #[error("Corrupt layout: {message}")]
    CorruptLayout { message: String },

    /// Platform-specific errors
    #[error("Platform error: {message}")]
    Platform { message: String },

    /// Cross-process lock could not be taken or released
    #[error("Lock error: {message}")]
    Lock {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl ShmMapError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a request too large error
    pub fn request_too_large(requested: usize, max: usize) -> Self {
        Self::RequestTooLarge { requested, max }
    }

    /// Create an arena exhausted error
    pub fn arena_exhausted(requested: usize, available: usize) -> Self {
        Self::ArenaExhausted {
            requested,
            available,
        }
    }

    /// Create an out of range offset error
    pub fn offset_out_of_range(offset: i64, limit: usize) -> Self {
        Self::OffsetOutOfRange { offset, limit }
    }

    /// Create a corrupt block error
    pub fn corrupt_block(offset: i64, size_class: i32, class_count: usize) -> Self {
        Self::CorruptBlock {
            offset,
            size_class,
            class_count,
        }
    }

    /// Create a corrupt layout error
    pub fn corrupt_layout(message: impl Into<String>) -> Self {
        Self::CorruptLayout {
            message: message.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Create a lock error
    pub fn lock(source: std::io::Error, context: &str) -> Self {
        Self::Lock {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Allocation failed because of size, not because of corruption
    pub fn is_capacity_error(&self) -> bool {
        matches!(
            self,
            Self::RequestTooLarge { .. } | Self::ArenaExhausted { .. }
        )
    }

    /// The persisted state looks damaged or an offset came from elsewhere
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::OffsetOutOfRange { .. } | Self::CorruptBlock { .. } | Self::CorruptLayout { .. }
        )
    }
}

impl From<std::io::Error> for ShmMapError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ShmMapError::arena_exhausted(48, 12);
        assert!(matches!(err, ShmMapError::ArenaExhausted { .. }));
        assert!(err.is_capacity_error());
        assert!(!err.is_integrity_error());

        let err = ShmMapError::corrupt_block(128, -3, 16);
        assert!(err.is_integrity_error());

        let err = ShmMapError::invalid_parameter("capacity", "must be greater than 0");
        assert!(!err.is_capacity_error());
        assert!(!err.is_integrity_error());
    }

    #[test]
    fn test_error_display() {
        let err = ShmMapError::request_too_large(2_000_000, 1 << 20);
        let display = format!("{}", err);
        assert!(display.contains("Request too large"));
        assert!(display.contains("2000000"));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = ShmMapError::from_io(io, "Failed to open data file");
        assert!(format!("{}", err).contains("Failed to open data file: gone"));
    }
}
