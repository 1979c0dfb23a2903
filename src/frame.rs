//! Decoded video frames and view rotation.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("frame {seq} is not a valid JPEG image: {source}")]
pub struct DecodeError {
    pub seq: u64,
    #[source]
    source: image::ImageError,
}

#[derive(Error, Debug)]
#[error("JPEG encoding failed: {0}")]
pub struct EncodeError(#[from] image::ImageError);

/// One decoded image extracted from the stream, plus its capture-order
/// position within the current connection.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub seq: u64,
}

impl Frame {
    /// Decodes one delimited byte range into a frame.
    ///
    /// The range is already consumed from the accumulation buffer by the
    /// time this runs; a decode failure therefore drops the frame without
    /// any risk of reprocessing the same corrupt bytes.
    pub fn decode(data: &[u8], seq: u64) -> Result<Self, DecodeError> {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
            .map_err(|source| DecodeError { seq, source })?;
        Ok(Self {
            image: image.to_rgb8(),
            seq,
        })
    }

    /// Re-encodes the frame as JPEG, for the HTTP re-broadcast, snapshot,
    /// and recording paths.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Bytes, EncodeError> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        encoder.encode_image(&self.image)?;
        Ok(Bytes::from(out))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Clockwise view rotation in 90° steps.
///
/// Applied when a frame is read, never when it is stored, so changing the
/// rotation affects every read that follows but never mutates frames already
/// in the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Self::None),
            90 => Some(Self::Cw90),
            180 => Some(Self::Cw180),
            270 => Some(Self::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Cw180 => 180,
            Self::Cw270 => 270,
        }
    }

    /// Advances by one 90° step, wrapping back to 0°.
    pub fn step_90(self) -> Self {
        match self {
            Self::None => Self::Cw90,
            Self::Cw90 => Self::Cw180,
            Self::Cw180 => Self::Cw270,
            Self::Cw270 => Self::None,
        }
    }

    /// Rotates the image clockwise by this angle.
    ///
    /// A single parameterized transform; the result is pixel-identical to
    /// applying 90° rotations repeatedly.
    pub fn apply(self, image: &RgbImage) -> RgbImage {
        match self {
            Self::None => image.clone(),
            Self::Cw90 => imageops::rotate90(image),
            Self::Cw180 => imageops::rotate180(image),
            Self::Cw270 => imageops::rotate270(image),
        }
    }
}

/// Deterministic gradient image for unit tests.
#[cfg(test)]
pub(crate) fn test_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}
