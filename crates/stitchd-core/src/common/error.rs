//! Error types for the imputation service.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable failure in the request pipeline. Failures are
//! handled at the narrowest scope that keeps the service live: a single
//! connection, or a single dispatch batch.
//!
//! ## Error Cases
//! - `Protocol`: The byte stream did not match the wire format.
//! - `UnsupportedPixelType`: A raster band cannot be carried by the response
//!   framing.
//! - `Engine`: The inference engine failed for a whole batch.
//! - `Raster`: Metadata for a raster path could not be resolved.
//! - `UnknownGeohash`: The geohash is not part of the startup vocabulary.
//! - `InvalidRequest`: The request decoded but is semantically unusable.
//! - `ChannelError`: An internal lane between a worker and the dispatcher
//!   failed.
//! - `JobTimeout`: The dispatcher did not answer within the configured bound.
//! - `ReadTimeout`: The peer did not send a complete request in time.
//! - `ServiceShutdown`: The request raced with service termination.
//! - `Io`: Socket or filesystem failure.
//!
//! `Error` is `Clone` so a single engine failure can be delivered to every
//! job of the failed batch.

use crate::types::PixelType;
use std::sync::Arc;

pub type Result<T> = core::result::Result<T, Error>;

/// Framing violations detected while decoding or encoding wire messages.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input ended before `field` could be read completely.
    #[error("truncated {field}: needed {needed} byte(s), {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// A string field did not contain valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// A string or list is longer than its length prefix can express.
    #[error("{field} has length {len}, maximum is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// The status byte of a response is not a known value.
    #[error("unknown response status {0}")]
    UnknownStatus(u8),
}

/// Unified error type for the imputation service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Malformed, truncated or oversized wire data.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A band uses a pixel type other than 8-bit unsigned.
    #[error("Band {band} has unsupported pixel type {pixel_type}")]
    UnsupportedPixelType { band: usize, pixel_type: PixelType },

    /// The inference engine failed; every job of the batch receives this.
    #[error("Engine error: {reason}")]
    Engine { reason: String },

    /// Raster metadata could not be read.
    #[error("Raster error for '{path}': {reason}")]
    Raster { path: String, reason: String },

    /// The geohash is not part of the encoder vocabulary.
    #[error("Unknown geohash '{geohash}'")]
    UnknownGeohash { geohash: String },

    /// The request decoded but cannot be served.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Internal lane send/receive failure (e.g. a closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// No outcome arrived within the configured bound.
    #[error("Timed out after {waited_ms} ms waiting for the dispatcher")]
    JobTimeout { waited_ms: u64 },

    /// The peer did not deliver a whole request within the configured bound.
    #[error("Timed out after {waited_ms} ms waiting for a request")]
    ReadTimeout { waited_ms: u64 },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// Socket or filesystem failure.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
