//! JPEG encoding and multipart framing for the live feed.

use actix_web::web::Bytes;
use anyhow::{Result, anyhow};
use image::{ImageBuffer, Rgb, codecs::jpeg::JpegEncoder};
use video_ingest::Frame;

/// Boundary token announced in the stream's `Content-Type`.
pub const MULTIPART_BOUNDARY: &str = "frame";

/// Encode a BGR8 frame as JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let rgb = bgr_to_rgb(&frame.data);
    let image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(frame.width as u32, frame.height as u32, rgb)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// One self-delimiting part of a `multipart/x-mixed-replace` body.
pub fn multipart_part(jpeg: &[u8], sequence: u64) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 96);
    payload.extend_from_slice(b"--");
    payload.extend_from_slice(MULTIPART_BOUNDARY.as_bytes());
    payload.extend_from_slice(b"\r\n");
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    payload.extend_from_slice(format!("Content-Length: {}\r\n", jpeg.len()).as_bytes());
    payload.extend_from_slice(format!("X-Sequence: {sequence}\r\n\r\n").as_bytes());
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
    }
    output
}
