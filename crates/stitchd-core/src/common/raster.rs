//! Interface to the raster store.

use crate::{RasterMetadata, Result};

/// Resolves a raster path to the metadata echoed in a response.
///
/// Lookups are made fresh for every request item; implementations must not
/// assume a path's metadata is stable between calls.
pub trait RasterProvider: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`crate::Error::Raster`] if the path cannot be opened or
    /// described.
    fn metadata(&self, path: &str) -> Result<RasterMetadata>;
}
