use crate::chunk::ChunkType;
use miniz_oxide::inflate::TINFLStatus;
use std::fmt;
use thiserror::Error;

/// Header field whose value this decoder does not handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Feature {
    CompressionMethod,
    FilterMethod,
    Interlace,
    ColorType,
    BitDepth,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Feature::CompressionMethod => "compression method",
            Feature::FilterMethod => "filter method",
            Feature::Interlace => "interlace method",
            Feature::ColorType => "color type",
            Feature::BitDepth => "bit depth",
        };

        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("input does not start with the PNG signature")]
    InvalidSignature,

    /// The stream ended inside a chunk. `chunk_type` is `None` when the cut
    /// happened before the type tag was read.
    #[error("chunk truncated (type: {chunk_type:?})")]
    TruncatedChunk { chunk_type: Option<ChunkType> },

    #[error("chunk declares length {0}, above the 2^31-1 maximum")]
    InvalidChunkLength(u32),

    #[error("CRC mismatch in {chunk_type} chunk: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch { chunk_type: ChunkType, stored: u32, computed: u32 },

    #[error("first chunk must be IHDR, found {found}")]
    MissingHeader { found: ChunkType },

    #[error("expected an IHDR chunk, got {found}")]
    WrongChunkType { found: ChunkType },

    #[error("malformed IHDR chunk: {0}")]
    MalformedHeader(&'static str),

    #[error("more than one IHDR chunk")]
    DuplicateHeader,

    #[error("unsupported {feature}: {value}")]
    UnsupportedFeature { feature: Feature, value: u8 },

    #[error("unknown filter type {tag} on scanline {row}")]
    UnknownFilterType { row: u32, tag: u8 },

    #[error("scanline {row} truncated: needs {expected} bytes, {available} left")]
    TruncatedScanline { row: u32, expected: usize, available: usize },

    #[error("stream ended before the IEND chunk")]
    UnexpectedEof,

    #[error("no IDAT chunk before IEND")]
    MissingImageData,

    #[error("image data inflates past the {expected} bytes the header allows")]
    ExcessImageData { expected: usize },

    #[error("failed to inflate image data: {0:?}")]
    Decompression(TINFLStatus),

    // The width/height specified in the image contains too many
    // bytes to address with a usize on this platform.
    #[error("image dimensions overflow addressable memory")]
    ImageTooLarge,

    #[error("image is {width}x{height}, limit is {max_width}x{max_height}")]
    DimensionsExceedLimits { width: u32, height: u32, max_width: u32, max_height: u32 },

    #[error("decoding was cancelled")]
    Cancelled,

    #[error("decoding deadline exceeded")]
    DeadlineExceeded,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decoder already failed on an earlier error")]
    AlreadyFailed,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("width and height must both be non-zero")]
    ZeroDimensions,

    #[error("pixel buffer holds {got} bytes, expected {expected}")]
    PixelLengthMismatch { expected: usize, got: usize },

    #[error("image dimensions overflow addressable memory")]
    ImageTooLarge,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
