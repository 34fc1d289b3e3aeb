//! Response framing.
//!
//! ```text
//! u8 status                       0 = success, 1 = failure
//! status 0, repeat batchCount times:
//!   u32 width, u32 height
//!   f64 x6 (geotransform)
//!   u32 projLen, projLen bytes (UTF-8)
//!   u32 primaryPixelType
//!   u8 hasNoData, [f64 noDataValue if hasNoData]
//!   u8 bandCount
//!   repeat bandCount times:
//!     u32 pixelType
//!     height*width bytes, row-major, only for 8-bit unsigned bands
//! status 1:
//!   u8 messageLen, messageLen bytes (UTF-8)
//! ```
//!
//! The success framing is positional: nothing marks where one raster ends,
//! so a reader needs the request's batch count to know how many follow.

use super::wire::{WireReader, clamp_short, put_long_string, put_short_string, short_len};
use crate::{
    BandInfo, Error, Image, ImputedRaster, PixelType, ProtocolError, RasterMetadata, Response,
    Result, STATUS_FAILED, STATUS_OK,
};
use bytes::{BufMut, BytesMut};

/// Appends the wire form of `response` to `dst`.
///
/// Every raster is validated before its bytes are kept: on error `dst` is
/// truncated back to its original length, so a failed encode never leaves a
/// partial success frame behind.
///
/// # Errors
///
/// - [`Error::UnsupportedPixelType`] for a band that is not 8-bit unsigned.
/// - [`Error::InvalidRequest`] if an image does not match its metadata.
/// - [`Error::Protocol`] if a count or string overflows its prefix.
pub fn encode_response(response: &Response, dst: &mut BytesMut) -> Result<()> {
    let start = dst.len();
    let result = write_response(response, dst);
    if result.is_err() {
        dst.truncate(start);
    }
    result
}

fn write_response(response: &Response, dst: &mut BytesMut) -> Result<()> {
    match response {
        Response::Success(rasters) => {
            dst.put_u8(STATUS_OK);
            for raster in rasters {
                write_raster(raster, dst)?;
            }
        }
        Response::Failure(message) => {
            dst.put_u8(STATUS_FAILED);
            put_short_string(dst, clamp_short(message), "failure message")?;
        }
    }
    Ok(())
}

fn write_raster(raster: &ImputedRaster, dst: &mut BytesMut) -> Result<()> {
    let ImputedRaster { metadata, image } = raster;

    if image.width() != metadata.width || image.height() != metadata.height {
        return Err(Error::InvalidRequest {
            reason: format!(
                "image is {}x{}, raster is {}x{}",
                image.width(),
                image.height(),
                metadata.width,
                metadata.height
            ),
        });
    }

    let primary = metadata.primary_band().ok_or_else(|| Error::InvalidRequest {
        reason: "raster has no bands".to_string(),
    })?;

    let band_count = short_len(metadata.bands.len(), "band count")?;
    if image.bands() < metadata.bands.len() {
        return Err(Error::InvalidRequest {
            reason: format!(
                "image has {} band(s), raster declares {}",
                image.bands(),
                metadata.bands.len()
            ),
        });
    }
    if let Some((band, info)) = metadata
        .bands
        .iter()
        .enumerate()
        .find(|(_, info)| info.pixel_type != PixelType::Byte)
    {
        return Err(Error::UnsupportedPixelType {
            band,
            pixel_type: info.pixel_type,
        });
    }

    dst.put_u32(metadata.width);
    dst.put_u32(metadata.height);
    for value in metadata.geotransform {
        dst.put_f64(value);
    }
    put_long_string(dst, &metadata.projection, "projection")?;

    dst.put_u32(primary.pixel_type.code());
    match primary.no_data {
        Some(value) => {
            dst.put_u8(1);
            dst.put_f64(value);
        }
        None => dst.put_u8(0),
    }

    dst.put_u8(band_count);
    let plane_len = metadata.width as usize * metadata.height as usize;
    for (band, info) in metadata.bands.iter().enumerate() {
        dst.put_u32(info.pixel_type.code());
        if image.bands() == 1 {
            dst.put_slice(image.pixels());
        } else {
            dst.reserve(plane_len);
            dst.extend(image.band_plane(band));
        }
    }

    Ok(())
}

/// Decodes a response for a request batch of `expected` items.
///
/// Returns the response and the number of bytes it occupied.
///
/// # Errors
///
/// - [`Error::Protocol`] for truncated or malformed input, or an unknown
///   status byte.
/// - [`Error::UnsupportedPixelType`] if a band header announces a type whose
///   payload this framing never carries.
pub fn decode_response(buf: &[u8], expected: usize) -> Result<(Response, usize)> {
    let mut reader = WireReader::new(buf);

    let response = match reader.u8("status")? {
        STATUS_OK => {
            let mut rasters = Vec::with_capacity(expected);
            for _ in 0..expected {
                rasters.push(decode_raster(&mut reader)?);
            }
            Response::Success(rasters)
        }
        STATUS_FAILED => Response::Failure(reader.short_string("failure message")?),
        other => return Err(ProtocolError::UnknownStatus(other).into()),
    };

    Ok((response, reader.position()))
}

fn decode_raster(reader: &mut WireReader<'_>) -> Result<ImputedRaster> {
    let width = reader.u32("width")?;
    let height = reader.u32("height")?;

    let mut geotransform = [0.0_f64; 6];
    for value in &mut geotransform {
        *value = reader.f64("geotransform")?;
    }

    let projection = reader.long_string("projection")?;
    // Repeated by the first band header below.
    let _primary_type = reader.u32("primary pixel type")?;
    let primary_no_data = match reader.u8("no-data flag")? {
        0 => None,
        _ => Some(reader.f64("no-data value")?),
    };

    let band_count = reader.u8("band count")? as usize;
    let plane_len = width as usize * height as usize;
    let mut bands = Vec::with_capacity(band_count);
    let mut planes = Vec::with_capacity(band_count);
    for band in 0..band_count {
        let pixel_type = PixelType::from_code(reader.u32("band pixel type")?);
        if pixel_type != PixelType::Byte {
            return Err(Error::UnsupportedPixelType { band, pixel_type });
        }
        planes.push(reader.bytes(plane_len, "band pixels")?);
        // Only the first band's no-data value travels on the wire.
        let no_data = if band == 0 { primary_no_data } else { None };
        bands.push(BandInfo { pixel_type, no_data });
    }

    let mut pixels = Vec::with_capacity(plane_len * band_count);
    for i in 0..plane_len {
        pixels.extend(planes.iter().map(|plane| plane[i]));
    }
    let image = Image::new(width, height, band_count, pixels)?;

    Ok(ImputedRaster {
        metadata: RasterMetadata {
            width,
            height,
            geotransform,
            projection,
            bands,
        },
        image,
    })
}
