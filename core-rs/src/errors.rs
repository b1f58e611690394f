//! Error types for slotlock core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlotError {
    #[error("Unable to resolve instance number: no free slot in {base_port}+1..={base_port}+{ceiling}")]
    ResolutionExhausted { ceiling: u32, base_port: u16 },

    #[error("Transient probe error: {0}")]
    TransientProbe(String),

    #[error("Cache directory error: {0}")]
    CacheDirectoryIo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, SlotError>;
