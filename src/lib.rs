//! Decodes 8-bit truecolor PNG files into raw, row-major pixel bytes.
//!
//! ```no_run
//! let bytes = std::fs::read("image.png").unwrap();
//! let image = scanline_png::decode(&bytes).unwrap();
//!
//! for row in image.rows() {
//!     println!("{:?}", &row[..3]);
//! }
//! ```

pub mod chunk;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod header;

pub use decoder::{CancelToken, Decoder, Limits};
pub use error::{DecodeError, EncodeError, Feature};
pub use header::{BitDepth, ColorType, PngHeader};

use std::io::Read;

pub const PNG_MAGIC_BYTES: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// A fully reconstructed image: `height` rows of `stride()` bytes each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    width: u32,
    height: u32,
    color_type: ColorType,
    bit_depth: BitDepth,
    bytes_per_pixel: usize,
    pixels: Vec<u8>,
}

impl RawImage {
    pub(crate) fn new(header: &PngHeader, bytes_per_pixel: usize, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            pixels.len(),
            header.width as usize * header.height as usize * bytes_per_pixel
        );

        RawImage {
            width: header.width,
            height: header.height,
            color_type: header.color_type,
            bit_depth: header.bit_depth,
            bytes_per_pixel,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_type(&self) -> ColorType {
        self.color_type
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }

        let start = y as usize * self.stride();
        self.pixels.get(start..start + self.stride())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.pixels.chunks_exact(self.stride())
    }

    /// The `bytes_per_pixel()` samples of the pixel at (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width {
            return None;
        }

        let start = x as usize * self.bytes_per_pixel;
        self.row(y)?.get(start..start + self.bytes_per_pixel)
    }
}

/// Decodes a complete PNG file held in memory.
pub fn decode(bytes: &[u8]) -> Result<RawImage, DecodeError> {
    Decoder::new(bytes).decode()
}

/// Decodes a PNG from any byte stream, with default limits and no deadline.
pub fn decode_reader<R: Read>(reader: R) -> Result<RawImage, DecodeError> {
    Decoder::new(reader).decode()
}

/// Reads only the signature and IHDR chunk.
pub fn decode_header(bytes: &[u8]) -> Result<PngHeader, DecodeError> {
    Decoder::new(bytes).read_header()
}
