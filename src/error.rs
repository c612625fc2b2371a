//! Error types for the cache engine.
//!
//! One variant per failure class named in the design's error-handling
//! section: bad options, OS I/O, bad file format, on-disk corruption,
//! undecodable data, and errors surfaced by user callbacks.

use std::error::Error as StdError;
use std::path::PathBuf;

/// Bytes of context shown around a corrupt entry, for the hex dump in
/// [`CacheError::Corruption`]. Small and fixed so a giant bucket doesn't
/// end up entirely in an error message.
const CORRUPTION_DUMP_WINDOW: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("invalid cache option: {0}")]
    Config(String),

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache format error: {0}")]
    Format(String),

    #[error("corrupt cache file {path:?} at offset {offset}: {context} (bytes: {dump})")]
    Corruption {
        path: PathBuf,
        offset: u64,
        context: String,
        dump: String,
    },

    #[error("unsupported data: {0}")]
    UnsupportedData(String),

    #[error("backing-store callback failed: {0}")]
    Callback(Box<dyn StdError + Send + Sync>),
}

impl CacheError {
    pub fn corruption(path: &std::path::Path, offset: u64, context: &str, bytes: &[u8]) -> Self {
        let window = &bytes[..bytes.len().min(CORRUPTION_DUMP_WINDOW)];
        let dump = window
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        CacheError::Corruption {
            path: path.to_path_buf(),
            offset,
            context: context.to_string(),
            dump,
        }
    }

    pub fn callback<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        CacheError::Callback(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
