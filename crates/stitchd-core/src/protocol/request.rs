//! Request framing.
//!
//! ```text
//! u8 batchCount
//! repeat batchCount times:
//!   u8 geohashLen, geohashLen bytes (UTF-8)
//!   i64 timestamp
//!   u8 sourceCount
//!   repeat sourceCount times: u8 len, len bytes (UTF-8 path)
//!   u8 refLen, refLen bytes (UTF-8 path)
//! ```

use super::wire::{WireReader, put_short_string, short_len};
use crate::{ProtocolError, Request, RequestBatch};
use bytes::{BufMut, BytesMut};

/// Decodes one request batch from the front of `buf`.
///
/// Returns the batch and the number of bytes it occupied. Trailing bytes are
/// left untouched.
///
/// # Errors
///
/// [`ProtocolError::Truncated`] if `buf` ends inside the frame, and
/// [`ProtocolError::InvalidUtf8`] for a malformed string.
pub fn decode_request_batch(buf: &[u8]) -> Result<(RequestBatch, usize), ProtocolError> {
    let mut reader = WireReader::new(buf);
    let count = reader.u8("batch count")?;

    let mut requests = Vec::with_capacity(count as usize);
    for _ in 0..count {
        requests.push(decode_request(&mut reader)?);
    }

    Ok((RequestBatch::new(requests), reader.position()))
}

fn decode_request(reader: &mut WireReader<'_>) -> Result<Request, ProtocolError> {
    let geohash = reader.short_string("geohash")?;
    let timestamp = reader.i64("timestamp")?;

    let source_count = reader.u8("source count")?;
    let mut source_image_paths = Vec::with_capacity(source_count as usize);
    for _ in 0..source_count {
        source_image_paths.push(reader.short_string("source image path")?);
    }

    let reference_image_path = reader.short_string("reference image path")?;

    Ok(Request {
        geohash,
        timestamp,
        source_image_paths,
        reference_image_path,
    })
}

/// Resumable walk over the length prefixes of a request frame.
///
/// Reads only counts and string lengths, never copies a field, and keeps its
/// place between calls so every byte is stepped over once however the frame
/// arrives. It stops at the last field that is fully buffered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RequestScan {
    pos: usize,
    items_left: u8,
    step: ScanStep,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ScanStep {
    #[default]
    BatchCount,
    Geohash,
    Timestamp,
    SourceCount,
    Sources(u8),
    Reference,
    Done,
}

impl RequestScan {
    /// Bytes of the frame confirmed so far.
    #[cfg(test)]
    pub(crate) const fn scanned(&self) -> usize {
        self.pos
    }

    /// Continues over `buf`, which must start at the same frame as every
    /// earlier call. Returns the frame length once the frame is complete.
    pub(crate) fn resume(&mut self, buf: &[u8]) -> Option<usize> {
        loop {
            self.step = match self.step {
                ScanStep::BatchCount => {
                    self.items_left = self.byte(buf)?;
                    self.next_item()
                }
                ScanStep::Geohash => {
                    self.short_field(buf)?;
                    ScanStep::Timestamp
                }
                ScanStep::Timestamp => {
                    self.skip(buf, 8)?;
                    ScanStep::SourceCount
                }
                ScanStep::SourceCount => ScanStep::Sources(self.byte(buf)?),
                ScanStep::Sources(0) => ScanStep::Reference,
                ScanStep::Sources(left) => {
                    self.short_field(buf)?;
                    ScanStep::Sources(left - 1)
                }
                ScanStep::Reference => {
                    self.short_field(buf)?;
                    self.items_left -= 1;
                    self.next_item()
                }
                ScanStep::Done => return Some(self.pos),
            };
        }
    }

    const fn next_item(&self) -> ScanStep {
        if self.items_left == 0 {
            ScanStep::Done
        } else {
            ScanStep::Geohash
        }
    }

    fn byte(&mut self, buf: &[u8]) -> Option<u8> {
        let value = *buf.get(self.pos)?;
        self.pos += 1;
        Some(value)
    }

    fn skip(&mut self, buf: &[u8], len: usize) -> Option<()> {
        let end = self.pos + len;
        if buf.len() < end {
            return None;
        }
        self.pos = end;
        Some(())
    }

    /// A `u8` length and its bytes, consumed together or not at all.
    fn short_field(&mut self, buf: &[u8]) -> Option<()> {
        let len = *buf.get(self.pos)? as usize;
        self.skip(buf, 1 + len)
    }
}

/// Appends the wire form of `batch` to `dst`.
///
/// On error `dst` is left exactly as it was.
///
/// # Errors
///
/// [`ProtocolError::FieldTooLong`] if the batch, a path list or a string
/// exceeds 255 entries/bytes.
pub fn encode_request_batch(batch: &RequestBatch, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let start = dst.len();
    let result = write_request_batch(batch, dst);
    if result.is_err() {
        dst.truncate(start);
    }
    result
}

fn write_request_batch(batch: &RequestBatch, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    dst.put_u8(short_len(batch.len(), "batch count")?);

    for request in &batch.requests {
        put_short_string(dst, &request.geohash, "geohash")?;
        dst.put_i64(request.timestamp);

        dst.put_u8(short_len(request.source_image_paths.len(), "source count")?);
        for path in &request.source_image_paths {
            put_short_string(dst, path, "source image path")?;
        }

        put_short_string(dst, &request.reference_image_path, "reference image path")?;
    }

    Ok(())
}
