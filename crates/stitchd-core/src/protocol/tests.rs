use super::*;
use crate::{
    BandInfo, Error, Image, ImputedRaster, PixelType, ProtocolError, RasterMetadata, Request,
    RequestBatch, Response,
};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

fn request(geohash: &str, timestamp: i64, sources: &[&str], reference: &str) -> Request {
    Request {
        geohash: geohash.to_string(),
        timestamp,
        source_image_paths: sources.iter().map(|s| (*s).to_string()).collect(),
        reference_image_path: reference.to_string(),
    }
}

fn metadata(width: u32, height: u32, bands: &[PixelType], no_data: Option<f64>) -> RasterMetadata {
    RasterMetadata {
        width,
        height,
        geotransform: [-120.5, 0.0001, 0.0, 37.25, 0.0, -0.0001],
        projection: "GEOGCS[\"WGS 84\"]".to_string(),
        bands: bands
            .iter()
            .enumerate()
            .map(|(i, &pixel_type)| BandInfo {
                pixel_type,
                no_data: if i == 0 { no_data } else { None },
            })
            .collect(),
    }
}

#[test]
fn decodes_single_request_frame() {
    let bytes = [
        0x01, // batch count
        0x05, b'9', b'q', b'6', b'q', b'p', // geohash
        0, 0, 0, 0, 0, 0, 0, 0, // timestamp
        0x01, // source count
        0x08, b'/', b'a', b'/', b'b', b'.', b't', b'i', b'f', // source path
        0x00, // empty reference path
    ];

    let (batch, consumed) = decode_request_batch(&bytes).unwrap();

    assert_eq!(consumed, bytes.len());
    assert_eq!(batch.len(), 1);
    let request = &batch.requests[0];
    assert_eq!(request.geohash, "9q6qp");
    assert_eq!(request.timestamp, 0);
    assert_eq!(request.source_image_paths, vec!["/a/b.tif".to_string()]);
    assert_eq!(request.reference_image_path, "");
}

#[test]
fn declared_length_past_end_is_truncated_not_padded() {
    // The source path length byte says 1, which makes the reference length
    // byte 0x2f (47) while only 8 bytes remain.
    let bytes = [
        0x01, 0x05, 0x39, 0x71, 0x36, 0x71, 0x70, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x01, 0x01, 0x07, 0x2f, 0x61, 0x2f, 0x62, 0x2e, 0x74, 0x69, 0x66, 0x00,
    ];

    let err = decode_request_batch(&bytes).unwrap_err();
    assert_eq!(
        err,
        ProtocolError::Truncated {
            field: "reference image path",
            needed: 0x2f,
            available: 8,
        }
    );
}

#[test]
fn request_batch_round_trips() {
    let batch = RequestBatch::new(vec![
        request(
            "9q6qp",
            1_561_939_200,
            &["/s2/a.tif", "/s2/b.tif", "/s2/c.tif"],
            "/modis/m.tif",
        ),
        request("9q6qr", -86_400, &["/s2/\u{e9}t\u{e9}.tif"], "/modis/n.tif"),
    ]);

    let mut dst = BytesMut::new();
    encode_request_batch(&batch, &mut dst).unwrap();
    let (decoded, consumed) = decode_request_batch(&dst).unwrap();

    assert_eq!(consumed, dst.len());
    assert_eq!(decoded, batch);
}

#[test]
fn request_round_trips_at_length_limits() {
    let long = "x".repeat(255);
    let sources: Vec<&str> = (0..255).map(|_| "p").collect();
    let batch = RequestBatch::new(vec![request(&long, i64::MAX, &sources, &long)]);

    let mut dst = BytesMut::new();
    encode_request_batch(&batch, &mut dst).unwrap();
    let (decoded, _) = decode_request_batch(&dst).unwrap();
    assert_eq!(decoded, batch);
}

#[test]
fn oversized_fields_are_rejected_without_writing() {
    let long = "x".repeat(256);
    let batch = RequestBatch::new(vec![request("9q6qp", 0, &["/a.tif"], &long)]);

    let mut dst = BytesMut::from(&b"prefix"[..]);
    let err = encode_request_batch(&batch, &mut dst).unwrap_err();

    assert!(matches!(
        err,
        ProtocolError::FieldTooLong {
            field: "reference image path",
            len: 256,
            ..
        }
    ));
    assert_eq!(&dst[..], b"prefix");
}

#[test]
fn invalid_utf8_is_a_protocol_error() {
    let bytes = [0x01, 0x02, 0xff, 0xfe];
    let err = decode_request_batch(&bytes).unwrap_err();
    assert_eq!(err, ProtocolError::InvalidUtf8 { field: "geohash" });
}

#[test]
fn success_response_has_exact_layout() {
    let image = Image::new(2, 1, 2, vec![1, 10, 2, 20]).unwrap();
    let raster = ImputedRaster {
        metadata: metadata(2, 1, &[PixelType::Byte, PixelType::Byte], Some(0.0)),
        image,
    };

    let mut dst = BytesMut::new();
    encode_response(&Response::Success(vec![raster.clone()]), &mut dst).unwrap();

    let mut expected = vec![0_u8];
    expected.extend_from_slice(&2_u32.to_be_bytes());
    expected.extend_from_slice(&1_u32.to_be_bytes());
    for value in raster.metadata.geotransform {
        expected.extend_from_slice(&value.to_be_bytes());
    }
    expected.extend_from_slice(&(raster.metadata.projection.len() as u32).to_be_bytes());
    expected.extend_from_slice(raster.metadata.projection.as_bytes());
    expected.extend_from_slice(&1_u32.to_be_bytes());
    expected.push(1);
    expected.extend_from_slice(&0.0_f64.to_be_bytes());
    expected.push(2);
    expected.extend_from_slice(&1_u32.to_be_bytes());
    expected.extend_from_slice(&[1, 2]);
    expected.extend_from_slice(&1_u32.to_be_bytes());
    expected.extend_from_slice(&[10, 20]);

    assert_eq!(&dst[..], &expected[..]);

    let (decoded, consumed) = decode_response(&dst, 1).unwrap();
    assert_eq!(consumed, dst.len());
    assert_eq!(decoded, Response::Success(vec![raster]));
}

#[test]
fn missing_no_data_writes_single_flag_byte() {
    let raster = ImputedRaster {
        metadata: metadata(1, 1, &[PixelType::Byte], None),
        image: Image::filled(1, 1, 1, 9),
    };
    let mut dst = BytesMut::new();
    encode_response(&Response::Success(vec![raster]), &mut dst).unwrap();

    let projection_len = "GEOGCS[\"WGS 84\"]".len();
    // status + dims + geotransform + projection + primary type
    let flag_at = 1 + 8 + 48 + 4 + projection_len + 4;
    assert_eq!(dst[flag_at], 0);
    // band count follows the flag directly
    assert_eq!(dst[flag_at + 1], 1);
    assert_eq!(dst.len(), flag_at + 2 + 4 + 1);
}

#[test]
fn unsupported_pixel_type_fails_before_writing() {
    let raster = ImputedRaster {
        metadata: metadata(2, 2, &[PixelType::Byte, PixelType::UInt16], None),
        image: Image::filled(2, 2, 2, 0),
    };

    let mut dst = BytesMut::new();
    let err = encode_response(&Response::Success(vec![raster]), &mut dst).unwrap_err();

    assert!(matches!(
        err,
        Error::UnsupportedPixelType {
            band: 1,
            pixel_type: PixelType::UInt16
        }
    ));
    assert!(dst.is_empty());
}

#[test]
fn image_must_match_raster_shape() {
    let raster = ImputedRaster {
        metadata: metadata(4, 4, &[PixelType::Byte], None),
        image: Image::filled(2, 2, 1, 0),
    };
    let mut dst = BytesMut::new();
    let err = encode_response(&Response::Success(vec![raster]), &mut dst).unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
}

#[test]
fn failure_response_carries_clamped_message() {
    let mut dst = BytesMut::new();
    encode_response(&Response::Failure("engine unavailable".into()), &mut dst).unwrap();
    assert_eq!(dst[0], 1);
    assert_eq!(dst[1] as usize, "engine unavailable".len());
    assert_eq!(&dst[2..], b"engine unavailable");

    // 200 two-byte characters: clamped to 127 characters (254 bytes).
    let long = "\u{e9}".repeat(200);
    let mut dst = BytesMut::new();
    encode_response(&Response::Failure(long), &mut dst).unwrap();
    assert_eq!(dst[1], 254);

    let (decoded, _) = decode_response(&dst, 3).unwrap();
    assert_eq!(decoded, Response::Failure("\u{e9}".repeat(127)));
}

#[test]
fn unknown_status_is_rejected() {
    let err = decode_response(&[7], 1).unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::UnknownStatus(7))
    ));
}

#[test]
fn server_codec_waits_for_complete_frame() {
    let batch = RequestBatch::new(vec![request("9q6qp", 42, &["/a.tif"], "/m.tif")]);
    let mut wire = BytesMut::new();
    encode_request_batch(&batch, &mut wire).unwrap();

    let mut codec = ServerCodec::default();
    let mut src = BytesMut::new();
    for (i, byte) in wire.iter().enumerate() {
        src.extend_from_slice(&[*byte]);
        let decoded = codec.decode(&mut src).unwrap();
        if i + 1 < wire.len() {
            assert!(decoded.is_none(), "decoded early at byte {i}");
        } else {
            assert_eq!(decoded, Some(batch.clone()));
        }
    }
    assert!(src.is_empty());
}

#[test]
fn server_codec_reports_truncation_at_eof() {
    let mut codec = ServerCodec::default();
    let mut src = BytesMut::from(&[0x01, 0x05, b'9', b'q'][..]);

    assert!(codec.decode(&mut src).unwrap().is_none());
    let err = codec.decode_eof(&mut src).unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::Truncated {
            field: "geohash",
            ..
        })
    ));
}

#[test]
fn client_codec_tracks_expected_count() {
    let batch = RequestBatch::new(vec![
        request("9q6qp", 1, &["/a.tif"], "/m.tif"),
        request("9q6qp", 2, &["/b.tif"], "/n.tif"),
    ]);

    let mut client = ClientCodec::default();
    let mut wire = BytesMut::new();
    client.encode(batch.clone(), &mut wire).unwrap();
    assert_eq!(client.expected(), 2);

    let mut server = ServerCodec::default();
    assert_eq!(server.decode(&mut wire).unwrap(), Some(batch));

    let rasters: Vec<_> = (0..2)
        .map(|i| ImputedRaster {
            metadata: metadata(3, 2, &[PixelType::Byte], Some(-1.0)),
            image: Image::filled(3, 2, 1, i),
        })
        .collect();
    let mut reply = BytesMut::new();
    server
        .encode(Response::Success(rasters.clone()), &mut reply)
        .unwrap();

    // One byte short of the second raster: still waiting.
    let mut partial = BytesMut::from(&reply[..reply.len() - 1]);
    assert!(client.decode(&mut partial).unwrap().is_none());

    assert_eq!(
        client.decode(&mut reply).unwrap(),
        Some(Response::Success(rasters))
    );
}

#[test]
fn server_codec_measures_each_byte_once() {
    let path = "p".repeat(255);
    let sources: Vec<&str> = (0..64).map(|_| path.as_str()).collect();
    let batch = RequestBatch::new(
        (0..255)
            .map(|i| request("9q6qp", i, &sources, &path))
            .collect(),
    );
    let mut wire = BytesMut::new();
    encode_request_batch(&batch, &mut wire).unwrap();
    assert!(wire.len() > 4_000_000);

    let mut codec = ServerCodec::default();
    let mut src = BytesMut::new();
    let mut decoded = None;
    let mut last_scanned = 0;
    for chunk in wire.chunks(8 * 1024) {
        assert!(decoded.is_none(), "decoded before the final chunk");
        src.extend_from_slice(chunk);
        decoded = codec.decode(&mut src).unwrap();
        if decoded.is_none() {
            // Progress is kept between reads and never runs past the buffer.
            assert!(codec.scanned() >= last_scanned);
            assert!(codec.scanned() <= src.len());
            assert!(src.len() - codec.scanned() <= 256);
            last_scanned = codec.scanned();
        }
    }

    assert_eq!(decoded, Some(batch));
    assert!(src.is_empty());
    assert_eq!(codec.scanned(), 0);
}

#[test]
fn server_codec_decodes_back_to_back_frames() {
    let first = RequestBatch::new(vec![request("9q6qp", 1, &["/a.tif"], "/m.tif")]);
    let second = RequestBatch::new(vec![request("9q6qr", 2, &[], "")]);
    let mut src = BytesMut::new();
    encode_request_batch(&first, &mut src).unwrap();
    encode_request_batch(&second, &mut src).unwrap();

    let mut codec = ServerCodec::default();
    assert_eq!(codec.decode(&mut src).unwrap(), Some(first));
    assert_eq!(codec.decode(&mut src).unwrap(), Some(second));
    assert!(src.is_empty());
}

#[test]
fn server_codec_accepts_empty_batch() {
    let mut codec = ServerCodec::default();
    let mut src = BytesMut::from(&[0x00][..]);
    assert_eq!(codec.decode(&mut src).unwrap(), Some(RequestBatch::default()));
    assert!(src.is_empty());
}
