//! # Request, Raster and Image Types
//!
//! Shared value types that flow through the service: the decoded client
//! [`Request`], the [`RasterMetadata`] a raster store reports for a path, and
//! the byte-valued [`Image`] an inference engine produces.
//!
//! ## Constants
//!
//! - [`MAX_FIELD_LEN`] - Largest string or list a `u8` length prefix can
//!   describe.
//! - [`STATUS_OK`] / [`STATUS_FAILED`] - Leading status byte of a response.

use crate::{Error, Result};
use core::fmt;

/// Upper bound for `u8`-prefixed strings (in bytes) and lists (in entries).
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// Status byte of a response carrying imputed rasters.
pub const STATUS_OK: u8 = 0;

/// Status byte of a response carrying a failure message.
pub const STATUS_FAILED: u8 = 1;

/// One imputation request as decoded from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub geohash: String,
    /// Epoch seconds.
    pub timestamp: i64,
    /// Ordered source images; the first one also supplies the response's
    /// raster metadata.
    pub source_image_paths: Vec<String>,
    pub reference_image_path: String,
}

impl Request {
    /// Path whose raster metadata describes the imputed image.
    pub fn primary_source(&self) -> Option<&str> {
        self.source_image_paths.first().map(String::as_str)
    }
}

/// All requests submitted over a single connection, in wire order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestBatch {
    pub requests: Vec<Request>,
}

impl RequestBatch {
    pub const fn new(requests: Vec<Request>) -> Self {
        Self { requests }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl From<Vec<Request>> for RequestBatch {
    fn from(requests: Vec<Request>) -> Self {
        Self::new(requests)
    }
}

/// GDAL-compatible pixel data type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelType {
    Unknown,
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
    /// Any code without a dedicated variant, preserved verbatim.
    Other(u32),
}

impl PixelType {
    pub const fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Unknown,
            1 => Self::Byte,
            2 => Self::UInt16,
            3 => Self::Int16,
            4 => Self::UInt32,
            5 => Self::Int32,
            6 => Self::Float32,
            7 => Self::Float64,
            other => Self::Other(other),
        }
    }

    pub const fn code(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Byte => 1,
            Self::UInt16 => 2,
            Self::Int16 => 3,
            Self::UInt32 => 4,
            Self::Int32 => 5,
            Self::Float32 => 6,
            Self::Float64 => 7,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "Other({code})"),
            named => write!(f, "{named:?}"),
        }
    }
}

/// Per-band description of a raster.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandInfo {
    pub pixel_type: PixelType,
    pub no_data: Option<f64>,
}

/// Geometry and band layout of a raster, as reported by a raster store.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterMetadata {
    pub width: u32,
    pub height: u32,
    pub geotransform: [f64; 6],
    /// Projection as WKT.
    pub projection: String,
    pub bands: Vec<BandInfo>,
}

impl RasterMetadata {
    /// The first band, whose type and no-data value head the response.
    pub fn primary_band(&self) -> Option<&BandInfo> {
        self.bands.first()
    }
}

/// Byte-valued raster of `height x width x bands`, row-major and
/// band-interleaved.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    bands: usize,
    pixels: Vec<u8>,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bands", &self.bands)
            .finish_non_exhaustive()
    }
}

impl Image {
    /// Wraps an interleaved pixel buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the buffer length does not equal
    /// `width * height * bands`.
    pub fn new(width: u32, height: u32, bands: usize, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(bands))
            .ok_or_else(|| Error::InvalidRequest {
                reason: format!("image shape {width}x{height}x{bands} overflows"),
            })?;

        if pixels.len() != expected {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "image buffer holds {} byte(s), shape {width}x{height}x{bands} needs {expected}",
                    pixels.len()
                ),
            });
        }

        Ok(Self {
            width,
            height,
            bands,
            pixels,
        })
    }

    /// An image with every sample set to `value`.
    pub fn filled(width: u32, height: u32, bands: usize, value: u8) -> Self {
        Self {
            width,
            height,
            bands,
            pixels: vec![value; width as usize * height as usize * bands],
        }
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn bands(&self) -> usize {
        self.bands
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// `true` when the image holds no samples at all.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Row-major samples of a single band.
    pub fn band_plane(&self, band: usize) -> impl Iterator<Item = u8> + '_ {
        self.pixels.iter().skip(band).step_by(self.bands).copied()
    }

    /// Nearest-neighbour resample to `width x height`. Band count is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the image is empty, since there is
    /// nothing to sample from.
    pub fn resize(self, width: u32, height: u32) -> Result<Self> {
        if width == self.width && height == self.height {
            return Ok(self);
        }
        if self.is_empty() {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "cannot resize empty {}x{}x{} image to {width}x{height}",
                    self.width, self.height, self.bands
                ),
            });
        }

        let mut pixels = Vec::with_capacity(width as usize * height as usize * self.bands);
        for row in 0..height {
            let src_row = scale_index(row, height, self.height);
            for col in 0..width {
                let src_col = scale_index(col, width, self.width);
                let start = (src_row as usize * self.width as usize + src_col as usize) * self.bands;
                pixels.extend_from_slice(&self.pixels[start..start + self.bands]);
            }
        }

        Ok(Self {
            width,
            height,
            bands: self.bands,
            pixels,
        })
    }
}

/// Maps a destination index onto the source axis by pixel centres.
fn scale_index(dst: u32, dst_len: u32, src_len: u32) -> u32 {
    if src_len == 0 {
        return 0;
    }
    let src = ((u64::from(dst) * 2 + 1) * u64::from(src_len)) / (u64::from(dst_len) * 2);
    (src as u32).min(src_len - 1)
}

/// One imputed image together with the metadata it is reported with.
#[derive(Clone, Debug, PartialEq)]
pub struct ImputedRaster {
    pub metadata: RasterMetadata,
    /// Must already match the metadata's width and height.
    pub image: Image,
}

/// Everything a connection receives back.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// Status `0`, one raster per request in request order.
    Success(Vec<ImputedRaster>),
    /// Status `1` and a short human-readable reason.
    Failure(String),
}
