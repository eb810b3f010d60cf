//! Internal fallible-path errors.
//!
//! None of these cross the operation-callback boundary (§7): the engine
//! catches them and either downgrades to "uncached" (cache I/O failures) or
//! maps them onto the read/write failure callback (driver failures are
//! modelled separately, as [`crate::driver::DriverError`]). This enum exists
//! purely so the path manager and on-disk format layer have a typed way to
//! report trouble to the engine.

use std::path::PathBuf;

/// Errors from the path & version manager or the on-disk format layer.
#[derive(Debug, thiserror::Error)]
pub enum SimFsError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SimFsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimFsError::Io {
            path: path.into(),
            source,
        }
    }
}
