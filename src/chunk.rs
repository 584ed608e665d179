//! Signature and chunk framing.
//!
//! A chunk on the wire is `length (4, BE) | type (4) | data (length) | crc (4, BE)`,
//! where the CRC covers `type ++ data`.

use crate::{error::DecodeError, PNG_MAGIC_BYTES};
use crc32fast::Hasher;
use std::{
    fmt,
    io::{self, Read, Write},
};
use tracing::{debug, trace};

/// Largest chunk length the format allows.
pub const MAX_CHUNK_LENGTH: u32 = (1 << 31) - 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChunkType {
    ImageHeader,
    ImageData,
    ImageEnd,
    Unknown([u8; 4]),
}

impl ChunkType {
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        match bytes {
            b"IHDR" => ChunkType::ImageHeader,
            b"IDAT" => ChunkType::ImageData,
            b"IEND" => ChunkType::ImageEnd,
            unknown_chunk_type => ChunkType::Unknown(*unknown_chunk_type),
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        match self {
            ChunkType::ImageHeader => *b"IHDR",
            ChunkType::ImageData => *b"IDAT",
            ChunkType::ImageEnd => *b"IEND",
            ChunkType::Unknown(bytes) => bytes,
        }
    }

    /// Critical chunks have an uppercase first letter (bit 5 clear).
    pub fn is_critical(self) -> bool {
        self.to_bytes()[0] & 0x20 == 0
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_type: ChunkType,
    pub data: Vec<u8>,
    pub crc: u32,
}

impl Chunk {
    pub fn length(&self) -> u32 {
        // Bounded by MAX_CHUNK_LENGTH when read.
        self.data.len() as u32
    }

    pub fn byte_size(&self) -> usize {
        // length bytes + chunk type bytes + data bytes + crc bytes
        4 + 4 + self.data.len() + 4
    }
}

pub(crate) fn chunk_crc(chunk_type: &[u8; 4], data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    hasher.finalize()
}

/// Writes one complete chunk, computing its CRC.
pub fn write_chunk<W: Write>(writer: &mut W, chunk_type: ChunkType, data: &[u8]) -> io::Result<()> {
    let length = u32::try_from(data.len())
        .ok()
        .filter(|length| *length <= MAX_CHUNK_LENGTH)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "chunk data too long"))?;
    let type_bytes = chunk_type.to_bytes();

    writer.write_all(&length.to_be_bytes())?;
    writer.write_all(&type_bytes)?;
    writer.write_all(data)?;
    writer.write_all(&chunk_crc(&type_bytes, data).to_be_bytes())
}

/// Reads into `buf` until it is full or the reader is exhausted, returning the
/// number of bytes filled.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}

/// Pulls the signature and then chunks off a byte stream, one at a time.
#[derive(Debug)]
pub struct ChunkReader<R> {
    reader: R,
    offset: u64,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Byte offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    pub fn read_signature(&mut self) -> Result<(), DecodeError> {
        let mut signature = [0u8; 8];
        let read = read_full(&mut self.reader, &mut signature)?;
        self.offset += read as u64;

        if read < signature.len() || signature != PNG_MAGIC_BYTES {
            return Err(DecodeError::InvalidSignature);
        }

        Ok(())
    }

    /// Reads the next chunk. Returns `Ok(None)` when the stream ends cleanly on a
    /// chunk boundary; a stream that ends anywhere inside a chunk is an error.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, DecodeError> {
        let start = self.offset;

        let mut length_bytes = [0u8; 4];
        match read_full(&mut self.reader, &mut length_bytes)? {
            0 => return Ok(None),
            4 => {},
            _ => return Err(DecodeError::TruncatedChunk { chunk_type: None }),
        }

        let length = u32::from_be_bytes(length_bytes);
        if length > MAX_CHUNK_LENGTH {
            return Err(DecodeError::InvalidChunkLength(length));
        }

        let mut type_bytes = [0u8; 4];
        if read_full(&mut self.reader, &mut type_bytes)? != type_bytes.len() {
            return Err(DecodeError::TruncatedChunk { chunk_type: None });
        }
        let chunk_type = ChunkType::from_bytes(&type_bytes);

        // Grows with what actually arrives instead of trusting `length` up front.
        let mut data = Vec::new();
        (&mut self.reader).take(u64::from(length)).read_to_end(&mut data)?;
        if data.len() != length as usize {
            return Err(DecodeError::TruncatedChunk { chunk_type: Some(chunk_type) });
        }

        let mut crc_bytes = [0u8; 4];
        if read_full(&mut self.reader, &mut crc_bytes)? != crc_bytes.len() {
            return Err(DecodeError::TruncatedChunk { chunk_type: Some(chunk_type) });
        }
        let stored = u32::from_be_bytes(crc_bytes);
        let computed = chunk_crc(&type_bytes, &data);

        if stored != computed {
            debug!(%chunk_type, offset = start, stored, computed, "chunk CRC mismatch");
            return Err(DecodeError::CrcMismatch { chunk_type, stored, computed });
        }

        let chunk = Chunk { chunk_type, data, crc: stored };
        self.offset += chunk.byte_size() as u64;
        trace!(%chunk_type, length, offset = start, "read chunk");

        Ok(Some(chunk))
    }
}
