//! Big-endian field primitives shared by the request and response framing.

use crate::{MAX_FIELD_LEN, ProtocolError};
use bytes::{BufMut, BytesMut};

/// Bounds-checked cursor over a borrowed buffer.
///
/// Every read names the field it belongs to so a short buffer reports exactly
/// where the frame was cut.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub(crate) const fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, needed: usize, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        let available = self.buf.len() - self.pos;
        if available < needed {
            return Err(ProtocolError::Truncated {
                field,
                needed,
                available,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], ProtocolError> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        Ok(self.take(1, field)?[0])
    }

    pub(crate) fn u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        self.take_array(field).map(u32::from_be_bytes)
    }

    pub(crate) fn i64(&mut self, field: &'static str) -> Result<i64, ProtocolError> {
        self.take_array(field).map(i64::from_be_bytes)
    }

    pub(crate) fn f64(&mut self, field: &'static str) -> Result<f64, ProtocolError> {
        self.take_array(field).map(f64::from_be_bytes)
    }

    pub(crate) fn bytes(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        self.take(len, field)
    }

    /// `u8` length followed by UTF-8 bytes.
    pub(crate) fn short_string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let len = self.u8(field)? as usize;
        self.utf8(len, field)
    }

    /// `u32` length followed by UTF-8 bytes.
    pub(crate) fn long_string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let len = self.u32(field)? as usize;
        self.utf8(len, field)
    }

    fn utf8(&mut self, len: usize, field: &'static str) -> Result<String, ProtocolError> {
        let raw = self.take(len, field)?;
        core::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8 { field })
    }
}

/// Checks that `len` fits a `u8` prefix and returns it as one.
pub(crate) fn short_len(len: usize, field: &'static str) -> Result<u8, ProtocolError> {
    u8::try_from(len).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len,
        max: MAX_FIELD_LEN,
    })
}

pub(crate) fn put_short_string(
    dst: &mut BytesMut,
    value: &str,
    field: &'static str,
) -> Result<(), ProtocolError> {
    let len = short_len(value.len(), field)?;
    dst.put_u8(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn put_long_string(
    dst: &mut BytesMut,
    value: &str,
    field: &'static str,
) -> Result<(), ProtocolError> {
    let len = u32::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: value.len(),
        max: u32::MAX as usize,
    })?;
    dst.put_u32(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

/// Longest prefix of `value` that fits a `u8` length without splitting a
/// character.
pub(crate) fn clamp_short(value: &str) -> &str {
    if value.len() <= MAX_FIELD_LEN {
        return value;
    }
    let mut end = MAX_FIELD_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
