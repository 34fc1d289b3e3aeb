//! [`tokio_util::codec`] adapters for both ends of a connection.
//!
//! Frames carry no outer length prefix, so a decoder has to walk the
//! buffered bytes to learn whether a whole frame is present. A truncated
//! frame is only an error once the peer has closed its side.

use super::{
    decode_request_batch, decode_response, encode_request_batch, encode_response,
    request::RequestScan,
};
use crate::{Error, ProtocolError, RequestBatch, Response};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const fn is_incomplete(err: &Error) -> bool {
    matches!(err, Error::Protocol(ProtocolError::Truncated { .. }))
}

/// Server side: decodes request batches, encodes responses.
///
/// Partial frames are measured with a [`RequestScan`] that picks up where
/// the previous read left off; the full decode runs once, when the whole
/// frame is buffered.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServerCodec {
    scan: RequestScan,
}

impl ServerCodec {
    /// Bytes of the pending frame already measured.
    #[cfg(test)]
    pub(crate) const fn scanned(&self) -> usize {
        self.scan.scanned()
    }
}

impl Decoder for ServerCodec {
    type Item = RequestBatch;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() || self.scan.resume(src).is_none() {
            return Ok(None);
        }
        self.scan = RequestScan::default();
        let (batch, consumed) = decode_request_batch(src)?;
        src.advance(consumed);
        Ok(Some(batch))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        self.scan = RequestScan::default();
        let (batch, consumed) = decode_request_batch(src)?;
        src.advance(consumed);
        Ok(Some(batch))
    }
}

impl Encoder<Response> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_response(&item, dst)
    }
}

/// Client side: encodes request batches, decodes responses.
///
/// The response framing is positional, so the codec remembers how many
/// requests the last encoded batch carried.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientCodec {
    expected: usize,
}

impl ClientCodec {
    /// Number of rasters the next successful response will carry.
    pub const fn expected(&self) -> usize {
        self.expected
    }
}

impl Encoder<RequestBatch> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, item: RequestBatch, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_request_batch(&item, dst)?;
        self.expected = item.len();
        Ok(())
    }
}

impl Decoder for ClientCodec {
    type Item = Response;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match decode_response(src, self.expected) {
            Ok((response, consumed)) => {
                src.advance(consumed);
                Ok(Some(response))
            }
            Err(e) if is_incomplete(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let (response, consumed) = decode_response(src, self.expected)?;
        src.advance(consumed);
        Ok(Some(response))
    }
}
