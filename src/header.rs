use crate::{
    chunk::{Chunk, ChunkType},
    error::{DecodeError, Feature},
};
use num_enum::TryFromPrimitive;

pub const HEADER_LENGTH: usize = 13;

/// Largest width or height the format allows.
const MAX_DIMENSION: u32 = (1 << 31) - 1;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum BitDepth {
    One = 1,
    Two = 2,
    Four = 4,
    Eight = 8,
    Sixteen = 16,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum ColorType {
    Grayscale = 0,
    Truecolor = 2,
    Indexed = 3,
    GrayscaleAlpha = 4,
    TruecolorAlpha = 6,
}

impl ColorType {
    pub fn sample_multiplier(&self) -> usize {
        match self {
            ColorType::Grayscale => 1,
            ColorType::Truecolor => 3,
            ColorType::Indexed => 1,
            ColorType::GrayscaleAlpha => 2,
            ColorType::TruecolorAlpha => 4,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum CompressionMethod {
    Deflate = 0,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum FilterMethod {
    Adaptive = 0,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum InterlaceMethod {
    None = 0,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: BitDepth,
    pub color_type: ColorType,
    pub compression_method: CompressionMethod,
    pub filter_method: FilterMethod,
    pub interlace_method: InterlaceMethod,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn unsupported(feature: Feature, value: u8) -> DecodeError {
    DecodeError::UnsupportedFeature { feature, value }
}

impl PngHeader {
    /// Header for an 8-bit truecolor, non-interlaced image.
    pub fn truecolor8(width: u32, height: u32) -> Self {
        PngHeader {
            width,
            height,
            bit_depth: BitDepth::Eight,
            color_type: ColorType::Truecolor,
            compression_method: CompressionMethod::Deflate,
            filter_method: FilterMethod::Adaptive,
            interlace_method: InterlaceMethod::None,
        }
    }

    pub fn from_chunk(chunk: &Chunk) -> Result<Self, DecodeError> {
        if chunk.chunk_type != ChunkType::ImageHeader {
            return Err(DecodeError::WrongChunkType { found: chunk.chunk_type });
        }

        let data = &chunk.data[..];
        if data.len() != HEADER_LENGTH {
            return Err(DecodeError::MalformedHeader("payload must be 13 bytes"));
        }

        let width = read_u32(data, 0);
        let height = read_u32(data, 4);
        if width == 0 || height == 0 {
            return Err(DecodeError::MalformedHeader("width and height must be non-zero"));
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(DecodeError::MalformedHeader("width or height above 2^31-1"));
        }

        let bit_depth = data[8];
        let color_type = data[9];
        let compression_method = data[10];
        let filter_method = data[11];
        let interlace_method = data[12];

        let header = PngHeader {
            width,
            height,
            bit_depth: TryFrom::try_from(bit_depth)
                .map_err(|_| unsupported(Feature::BitDepth, bit_depth))?,
            color_type: TryFrom::try_from(color_type)
                .map_err(|_| unsupported(Feature::ColorType, color_type))?,
            compression_method: TryFrom::try_from(compression_method)
                .map_err(|_| unsupported(Feature::CompressionMethod, compression_method))?,
            filter_method: TryFrom::try_from(filter_method)
                .map_err(|_| unsupported(Feature::FilterMethod, filter_method))?,
            interlace_method: TryFrom::try_from(interlace_method)
                .map_err(|_| unsupported(Feature::Interlace, interlace_method))?,
        };

        header.check_pixel_format()?;

        Ok(header)
    }

    /// Only 8-bit truecolor scanlines are reconstructed; everything else is
    /// turned away here instead of being decoded with the wrong layout.
    fn check_pixel_format(&self) -> Result<(), DecodeError> {
        match (self.color_type, self.bit_depth) {
            (ColorType::Truecolor, BitDepth::Eight) => Ok(()),
            (ColorType::Truecolor, bit_depth) => {
                Err(unsupported(Feature::BitDepth, bit_depth as u8))
            },
            (color_type, _) => Err(unsupported(Feature::ColorType, color_type as u8)),
        }
    }

    /// Stride between neighbouring pixels for the filter rules. Sub-byte depths
    /// round up to one byte.
    pub fn bytes_per_pixel(&self) -> usize {
        ((self.bit_depth as usize * self.color_type.sample_multiplier()) + 7) / 8
    }

    /// Bytes in one reconstructed row, without the filter tag.
    pub fn bytes_per_scanline(&self) -> Result<usize, DecodeError> {
        let bits = u64::from(self.width)
            * self.bit_depth as u64
            * self.color_type.sample_multiplier() as u64;

        usize::try_from((bits + 7) / 8).map_err(|_| DecodeError::ImageTooLarge)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LENGTH] {
        let mut bytes = [0u8; HEADER_LENGTH];
        bytes[0..4].copy_from_slice(&self.width.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.height.to_be_bytes());
        bytes[8] = self.bit_depth as u8;
        bytes[9] = self.color_type as u8;
        bytes[10] = self.compression_method as u8;
        bytes[11] = self.filter_method as u8;
        bytes[12] = self.interlace_method as u8;
        bytes
    }
}
