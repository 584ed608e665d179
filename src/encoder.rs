//! Minimal writer for 8-bit truecolor images. Every scanline is stored with
//! filter type `None`.

use crate::{
    chunk::{write_chunk, ChunkType},
    error::EncodeError,
    filter::FilterType,
    header::PngHeader,
    PNG_MAGIC_BYTES,
};
use miniz_oxide::deflate::compress_to_vec_zlib;
use std::io::Write;
use tracing::debug;

/// Maximum payload per IDAT chunk; larger streams are split.
pub const IDAT_CHUNK_SIZE: usize = 8192;

const COMPRESSION_LEVEL: u8 = 6;

/// `width * height` copies of `color`, row-major.
pub fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> Result<Vec<u8>, EncodeError> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .filter(|count| count.checked_mul(color.len()).is_some())
        .ok_or(EncodeError::ImageTooLarge)?;

    Ok(color.repeat(pixel_count))
}

pub fn encode_rgb(width: u32, height: u32, pixels: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::new();
    encode_rgb_to(&mut bytes, width, height, pixels)?;
    Ok(bytes)
}

pub fn encode_rgb_to<W: Write>(
    writer: &mut W,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<(), EncodeError> {
    if width == 0 || height == 0 {
        return Err(EncodeError::ZeroDimensions);
    }

    let header = PngHeader::truecolor8(width, height);
    let bytes_per_scanline = (width as usize)
        .checked_mul(header.bytes_per_pixel())
        .ok_or(EncodeError::ImageTooLarge)?;
    let expected = bytes_per_scanline
        .checked_mul(height as usize)
        .ok_or(EncodeError::ImageTooLarge)?;

    if pixels.len() != expected {
        return Err(EncodeError::PixelLengthMismatch { expected, got: pixels.len() });
    }

    let mut scanline_data = Vec::with_capacity(expected + height as usize);
    for row in pixels.chunks_exact(bytes_per_scanline) {
        scanline_data.push(FilterType::None as u8);
        scanline_data.extend_from_slice(row);
    }

    let compressed_data = compress_to_vec_zlib(&scanline_data, COMPRESSION_LEVEL);
    debug!(width, height, compressed = compressed_data.len(), "encoding PNG");

    writer.write_all(&PNG_MAGIC_BYTES)?;
    write_chunk(writer, ChunkType::ImageHeader, &header.to_bytes())?;
    for data in compressed_data.chunks(IDAT_CHUNK_SIZE) {
        write_chunk(writer, ChunkType::ImageData, data)?;
    }
    write_chunk(writer, ChunkType::ImageEnd, &[])?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkReader;

    #[test]
    fn writes_expected_chunk_sequence() {
        let bytes = encode_rgb(10, 6, &solid_rgb(10, 6, [255, 0, 0]).unwrap()).unwrap();

        let mut reader = ChunkReader::new(&bytes[..]);
        reader.read_signature().unwrap();

        let header = reader.next_chunk().unwrap().unwrap();
        assert_eq!(header.chunk_type, ChunkType::ImageHeader);
        assert_eq!(header.data, PngHeader::truecolor8(10, 6).to_bytes());

        let data = reader.next_chunk().unwrap().unwrap();
        assert_eq!(data.chunk_type, ChunkType::ImageData);

        let inflated = miniz_oxide::inflate::decompress_to_vec_zlib(&data.data).unwrap();
        assert_eq!(inflated.len(), 6 * (1 + 30));
        for row in inflated.chunks_exact(31) {
            assert_eq!(row[0], 0);
            assert_eq!(&row[1..4], &[255, 0, 0]);
        }

        let end = reader.next_chunk().unwrap().unwrap();
        assert_eq!(end.chunk_type, ChunkType::ImageEnd);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn large_streams_span_several_idat_chunks() {
        // Noise compresses poorly, so the zlib stream outgrows one chunk.
        let mut state = 0x1234_5678u32;
        let pixels: Vec<u8> = (0..96 * 96 * 3)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let bytes = encode_rgb(96, 96, &pixels).unwrap();

        let mut reader = ChunkReader::new(&bytes[..]);
        reader.read_signature().unwrap();
        let mut idat_chunks = 0;
        while let Some(chunk) = reader.next_chunk().unwrap() {
            if chunk.chunk_type == ChunkType::ImageData {
                assert!(chunk.data.len() <= IDAT_CHUNK_SIZE);
                idat_chunks += 1;
            }
        }
        assert!(idat_chunks > 1);

        assert_eq!(crate::decode(&bytes).unwrap().into_pixels(), pixels);
    }

    #[test]
    fn solid_fill_size_overflow() {
        assert!(matches!(
            solid_rgb(u32::MAX, u32::MAX, [1, 2, 3]),
            Err(EncodeError::ImageTooLarge)
        ));
        assert_eq!(solid_rgb(2, 1, [1, 2, 3]).unwrap(), vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(encode_rgb(0, 6, &[]), Err(EncodeError::ZeroDimensions)));
        assert!(matches!(
            encode_rgb(2, 2, &[0; 11]),
            Err(EncodeError::PixelLengthMismatch { expected: 12, got: 11 })
        ));
    }
}
