//! Frame decoding and conversion utilities.

use image::RgbImage;
use std::time::Instant;

use super::types::Frame;

impl Frame {
    /// Decode a JPEG (or any format `image` can sniff) into an RGB frame.
    ///
    /// DSLR live view hands back compressed preview images, so every
    /// preview capture goes through here.
    pub fn from_jpeg(bytes: &[u8]) -> Result<Frame, image::ImageError> {
        let decoded = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = decoded.dimensions();
        Ok(Frame::new(width, height, decoded.into_raw(), Instant::now()))
    }

    /// Convert into the in-memory image representation used by review and save.
    ///
    /// Returns `None` if the pixel buffer does not match the frame dimensions.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width(), self.height(), self.data().to_vec())
    }
}
