use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use platelens_contracts::capture::{CapturedImage, StorageEncoding, TransportEncoding};
use platelens_contracts::error::ScanError;

/// Produces both encodings of a capture from the same original bytes: the
/// bare base64 payload for the analysis request and the full data-URI for
/// persistence and display. No resize or re-encode happens here, so both
/// decode back to byte-identical content.
pub fn encode(capture: &CapturedImage) -> Result<(TransportEncoding, StorageEncoding), ScanError> {
    image::load_from_memory(&capture.bytes)
        .map_err(|err| ScanError::ReadFailure(format!("not a decodable image: {err}")))?;

    let payload = BASE64.encode(&capture.bytes);
    let storage = StorageEncoding::new(format!("data:{};base64,{payload}", capture.mime_type));
    let transport = TransportEncoding {
        data: payload,
        mime_type: capture.mime_type.clone(),
    };
    Ok((transport, storage))
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};

    use super::encode;
    use platelens_contracts::capture::CapturedImage;
    use platelens_contracts::error::ScanError;

    fn red_jpeg() -> Vec<u8> {
        let mut canvas = RgbImage::new(10, 10);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([255, 0, 0]);
        }
        let mut bytes = Vec::new();
        canvas
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, 90))
            .expect("jpeg encode");
        bytes
    }

    #[test]
    fn both_encodings_round_trip_to_the_original_bytes() -> anyhow::Result<()> {
        let original = red_jpeg();
        let capture = CapturedImage::new(original.clone(), "image/jpeg");

        let (transport, storage) = encode(&capture)?;
        assert_eq!(BASE64.decode(&transport.data)?, original);
        assert_eq!(BASE64.decode(storage.payload())?, original);
        assert_eq!(transport.mime_type, "image/jpeg");
        Ok(())
    }

    #[test]
    fn storage_encoding_is_a_data_uri() -> anyhow::Result<()> {
        let capture = CapturedImage::new(red_jpeg(), "image/jpeg");
        let (transport, storage) = encode(&capture)?;
        assert_eq!(
            storage.as_str(),
            format!("data:image/jpeg;base64,{}", transport.data)
        );
        Ok(())
    }

    #[test]
    fn undecodable_bytes_are_a_read_failure() {
        let capture = CapturedImage::new(b"not an image at all".to_vec(), "image/jpeg");
        let err = encode(&capture).err().expect("garbage must not encode");
        assert!(matches!(err, ScanError::ReadFailure(_)));
    }
}
