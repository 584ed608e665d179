use crate::{
    chunk::{ChunkReader, ChunkType},
    error::DecodeError,
    filter,
    header::PngHeader,
    RawImage,
};
use miniz_oxide::inflate::{decompress_to_vec_zlib_with_limit, TINFLStatus};
use std::{
    io::Read,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tracing::debug;

/// Upper bounds on the declared image size, checked before anything
/// proportional to the image is allocated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Limits {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Limits { max_width: 17_000, max_height: 17_000 }
    }
}

impl Limits {
    pub fn unlimited() -> Self {
        Limits { max_width: u32::MAX, max_height: u32::MAX }
    }

    fn check(&self, header: &PngHeader) -> Result<(), DecodeError> {
        if header.width > self.max_width || header.height > self.max_height {
            return Err(DecodeError::DimensionsExceedLimits {
                width: header.width,
                height: header.height,
                max_width: self.max_width,
                max_height: self.max_height,
            });
        }

        Ok(())
    }
}

/// Lets another thread abort a decode. Checked between chunk reads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Where a [`Decoder`] is in the stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Nothing has been read yet.
    Start,
    /// Reading the 8-byte PNG signature.
    ExpectSignature,
    /// Signature accepted, the next chunk must be IHDR.
    ExpectHeader,
    /// Header parsed, collecting IDAT until IEND.
    ReadingChunks,
    /// IEND was read.
    Done,
    /// An error was returned. The decoder reads nothing more.
    Failed,
}

/// Walks a PNG stream: signature, then IHDR, then chunks up to IEND, then
/// inflate and scanline reconstruction.
///
/// Each decoder owns its reader and buffers, so separate images can be decoded
/// on separate threads without coordination.
#[derive(Debug)]
pub struct Decoder<R> {
    chunks: ChunkReader<R>,
    state: State,
    header: Option<PngHeader>,
    limits: Limits,
    cancel_token: Option<CancelToken>,
    deadline: Option<Instant>,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            chunks: ChunkReader::new(reader),
            state: State::Start,
            header: None,
            limits: Limits::default(),
            cancel_token: None,
            deadline: None,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cancel_token(mut self, cancel_token: CancelToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn transition(&mut self, next: State) {
        debug!(from = ?self.state, to = ?next, offset = self.chunks.offset(), "decoder state");
        self.state = next;
    }

    fn check_interrupted(&self) -> Result<(), DecodeError> {
        if self.cancel_token.as_ref().map_or(false, CancelToken::is_cancelled) {
            return Err(DecodeError::Cancelled);
        }

        if self.deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            return Err(DecodeError::DeadlineExceeded);
        }

        Ok(())
    }

    /// Moves to [`State::Failed`] when `result` is an error.
    fn fail_on_error<T>(&mut self, result: Result<T, DecodeError>) -> Result<T, DecodeError> {
        if let Err(err) = &result {
            debug!(error = %err, "decoding failed");
            self.transition(State::Failed);
        }

        result
    }

    /// Reads the signature and the IHDR chunk. Calling it again returns the
    /// header already read. Once an error has been returned, every later
    /// call fails with [`DecodeError::AlreadyFailed`].
    pub fn read_header(&mut self) -> Result<PngHeader, DecodeError> {
        if self.state == State::Failed {
            return Err(DecodeError::AlreadyFailed);
        }

        if let Some(header) = &self.header {
            return Ok(header.clone());
        }

        let result = self.read_signature_and_header();
        self.fail_on_error(result)
    }

    fn read_signature_and_header(&mut self) -> Result<PngHeader, DecodeError> {
        self.transition(State::ExpectSignature);
        self.chunks.read_signature()?;

        self.transition(State::ExpectHeader);
        self.check_interrupted()?;
        let chunk = self.chunks.next_chunk()?.ok_or(DecodeError::UnexpectedEof)?;
        if chunk.chunk_type != ChunkType::ImageHeader {
            return Err(DecodeError::MissingHeader { found: chunk.chunk_type });
        }

        let header = PngHeader::from_chunk(&chunk)?;
        self.limits.check(&header)?;
        debug!(
            width = header.width,
            height = header.height,
            bit_depth = ?header.bit_depth,
            color_type = ?header.color_type,
            "read IHDR"
        );

        self.header = Some(header.clone());
        self.transition(State::ReadingChunks);

        Ok(header)
    }

    /// Collects the IDAT payloads, in file order, until IEND.
    fn read_image_data(&mut self) -> Result<Vec<u8>, DecodeError> {
        let mut compressed_data = Vec::new();
        let mut image_data_chunks = 0usize;

        while self.state == State::ReadingChunks {
            self.check_interrupted()?;
            let chunk = self.chunks.next_chunk()?.ok_or(DecodeError::UnexpectedEof)?;

            match chunk.chunk_type {
                ChunkType::ImageData => {
                    compressed_data.extend_from_slice(&chunk.data);
                    image_data_chunks += 1;
                },
                ChunkType::ImageEnd => self.transition(State::Done),
                ChunkType::ImageHeader => return Err(DecodeError::DuplicateHeader),
                chunk_type => debug!(
                    %chunk_type,
                    critical = chunk_type.is_critical(),
                    length = chunk.length(),
                    "skipping chunk"
                ),
            }
        }

        if image_data_chunks == 0 {
            return Err(DecodeError::MissingImageData);
        }

        debug!(chunks = image_data_chunks, bytes = compressed_data.len(), "collected IDAT");
        Ok(compressed_data)
    }

    pub fn decode(mut self) -> Result<RawImage, DecodeError> {
        let header = self.read_header()?;
        let result = self.decode_image(&header);
        self.fail_on_error(result)
    }

    fn decode_image(&mut self, header: &PngHeader) -> Result<RawImage, DecodeError> {
        let bytes_per_pixel = header.bytes_per_pixel();
        // One filter tag per row plus the row itself.
        let expected_len = header
            .bytes_per_scanline()?
            .checked_add(1)
            .and_then(|row| row.checked_mul(header.height as usize))
            .ok_or(DecodeError::ImageTooLarge)?;

        let now = Instant::now();
        let compressed_data = self.read_image_data()?;
        debug!(elapsed = ?now.elapsed(), "chunk reading done");

        let now = Instant::now();
        let scanline_data = decompress_to_vec_zlib_with_limit(&compressed_data, expected_len)
            .map_err(|status| match status {
                TINFLStatus::HasMoreOutput => {
                    DecodeError::ExcessImageData { expected: expected_len }
                },
                status => DecodeError::Decompression(status),
            })?;
        debug!(elapsed = ?now.elapsed(), bytes = scanline_data.len(), "inflated");

        let now = Instant::now();
        let pixels =
            filter::reconstruct(&scanline_data, header.width, header.height, bytes_per_pixel)?;
        debug!(elapsed = ?now.elapsed(), "reconstructed scanlines");

        Ok(RawImage::new(header, bytes_per_pixel, pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunk::write_chunk,
        filter::{filter_row, FilterType},
        PNG_MAGIC_BYTES,
    };
    use miniz_oxide::deflate::compress_to_vec_zlib;
    use std::time::Duration;

    struct TestImage {
        width: u32,
        rows: Vec<Vec<u8>>,
        filters: Vec<FilterType>,
    }

    impl TestImage {
        fn new(width: u32, height: u32) -> Self {
            let rows = (0..height)
                .map(|y| {
                    (0..width * 3).map(|x| (x * 29 + y * 53 + (x ^ y) * 7) as u8).collect()
                })
                .collect();
            let all = [
                FilterType::None,
                FilterType::Sub,
                FilterType::Up,
                FilterType::Average,
                FilterType::Paeth,
            ];
            let filters = (0..height as usize).map(|y| all[y % all.len()]).collect();

            TestImage { width, rows, filters }
        }

        fn pixels(&self) -> Vec<u8> {
            self.rows.concat()
        }

        fn scanline_data(&self) -> Vec<u8> {
            let mut data = Vec::new();
            let mut prior = vec![0u8; self.width as usize * 3];

            for (row, filter_type) in self.rows.iter().zip(&self.filters) {
                data.push(*filter_type as u8);
                data.extend(filter_row(*filter_type, row, &prior, 3));
                prior = row.clone();
            }

            data
        }

        fn ihdr(&self) -> Vec<u8> {
            PngHeader::truecolor8(self.width, self.rows.len() as u32).to_bytes().to_vec()
        }

        fn idat(&self) -> Vec<u8> {
            compress_to_vec_zlib(&self.scanline_data(), 6)
        }
    }

    struct PngBuilder(Vec<u8>);

    impl PngBuilder {
        fn new() -> Self {
            PngBuilder(PNG_MAGIC_BYTES.to_vec())
        }

        fn chunk(mut self, chunk_type: &[u8; 4], data: &[u8]) -> Self {
            write_chunk(&mut self.0, ChunkType::from_bytes(chunk_type), data).unwrap();
            self
        }

        fn build(self) -> Vec<u8> {
            self.0
        }
    }

    fn simple_png(image: &TestImage) -> Vec<u8> {
        PngBuilder::new()
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"IDAT", &image.idat())
            .chunk(b"IEND", &[])
            .build()
    }

    fn decode(bytes: &[u8]) -> Result<RawImage, DecodeError> {
        Decoder::new(bytes).decode()
    }

    #[test]
    fn decodes_all_filter_types() {
        let image = TestImage::new(7, 11);
        let bytes = simple_png(&image);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.width(), 7);
        assert_eq!(decoded.height(), 11);
        assert_eq!(decoded.bytes_per_pixel(), 3);
        assert_eq!(decoded.pixels(), &image.pixels()[..]);
    }

    #[test]
    fn concatenates_split_image_data_and_skips_other_chunks() {
        let image = TestImage::new(5, 9);
        let idat = image.idat();
        let (first, rest) = idat.split_at(3);
        let (second, third) = rest.split_at(rest.len() / 2);

        let bytes = PngBuilder::new()
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"gAMA", &[0, 0, 177, 143])
            .chunk(b"IDAT", first)
            .chunk(b"tEXt", b"Comment\0split")
            .chunk(b"IDAT", second)
            .chunk(b"IDAT", &[])
            .chunk(b"IDAT", third)
            .chunk(b"IEND", &[])
            .build();

        assert_eq!(decode(&bytes).unwrap().into_pixels(), image.pixels());
    }

    #[test]
    fn bytes_after_end_chunk_are_not_read() {
        let image = TestImage::new(2, 2);
        let mut bytes = simple_png(&image);
        bytes.extend_from_slice(b"garbage");

        assert_eq!(decode(&bytes).unwrap().into_pixels(), image.pixels());
    }

    #[test]
    fn invalid_signature() {
        let image = TestImage::new(2, 2);
        let mut bytes = PngBuilder::new().chunk(b"IHDR", &image.ihdr()).build();
        bytes[1] = b'p';

        assert!(matches!(decode(&bytes), Err(DecodeError::InvalidSignature)));
        assert!(matches!(decode(&[]), Err(DecodeError::InvalidSignature)));
    }

    #[test]
    fn header_must_come_first() {
        let image = TestImage::new(2, 2);
        let bytes = PngBuilder::new()
            .chunk(b"IDAT", &image.idat())
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"IEND", &[])
            .build();

        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::MissingHeader { found: ChunkType::ImageData })
        ));
    }

    #[test]
    fn signature_only_is_unexpected_eof() {
        assert!(matches!(decode(&PNG_MAGIC_BYTES), Err(DecodeError::UnexpectedEof)));
    }

    #[test]
    fn missing_end_chunk_is_unexpected_eof() {
        let image = TestImage::new(2, 2);
        let bytes = PngBuilder::new()
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"IDAT", &image.idat())
            .build();

        assert!(matches!(decode(&bytes), Err(DecodeError::UnexpectedEof)));
    }

    #[test]
    fn truncated_chunk_propagates() {
        let image = TestImage::new(2, 2);
        let bytes = simple_png(&image);

        // Cut inside the IDAT payload.
        let cut = PNG_MAGIC_BYTES.len() + 25 + 10;
        assert!(matches!(
            decode(&bytes[..cut]),
            Err(DecodeError::TruncatedChunk { chunk_type: Some(ChunkType::ImageData) })
        ));
    }

    #[test]
    fn end_without_image_data() {
        let image = TestImage::new(2, 2);
        let bytes = PngBuilder::new().chunk(b"IHDR", &image.ihdr()).chunk(b"IEND", &[]).build();

        assert!(matches!(decode(&bytes), Err(DecodeError::MissingImageData)));
    }

    #[test]
    fn second_header_is_rejected() {
        let image = TestImage::new(2, 2);
        let bytes = PngBuilder::new()
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"IDAT", &image.idat())
            .chunk(b"IEND", &[])
            .build();

        assert!(matches!(decode(&bytes), Err(DecodeError::DuplicateHeader)));
    }

    #[test]
    fn crc_mismatch_propagates() {
        let image = TestImage::new(2, 2);
        let mut bytes = simple_png(&image);
        // Last byte of the IHDR CRC.
        bytes[PNG_MAGIC_BYTES.len() + 24] ^= 0x55;

        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::CrcMismatch { chunk_type: ChunkType::ImageHeader, .. })
        ));
    }

    #[test]
    fn unsupported_header_is_never_decoded() {
        let image = TestImage::new(2, 2);
        let mut ihdr = image.ihdr();
        ihdr[9] = 6;
        let bytes = PngBuilder::new()
            .chunk(b"IHDR", &ihdr)
            .chunk(b"IDAT", &image.idat())
            .chunk(b"IEND", &[])
            .build();

        assert!(matches!(decode(&bytes), Err(DecodeError::UnsupportedFeature { value: 6, .. })));
    }

    #[test]
    fn corrupt_zlib_stream() {
        let image = TestImage::new(2, 2);
        let bytes = PngBuilder::new()
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"IDAT", &[1, 2, 3, 4])
            .chunk(b"IEND", &[])
            .build();

        assert!(matches!(decode(&bytes), Err(DecodeError::Decompression(_))));
    }

    #[test]
    fn unknown_filter_type_propagates() {
        let image = TestImage::new(3, 3);
        let mut scanlines = image.scanline_data();
        scanlines[2 * (3 * 3 + 1)] = 9;
        let idat = compress_to_vec_zlib(&scanlines, 6);
        let bytes = PngBuilder::new()
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"IDAT", &idat)
            .chunk(b"IEND", &[])
            .build();

        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::UnknownFilterType { row: 2, tag: 9 })
        ));
    }

    #[test]
    fn short_scanline_data() {
        let image = TestImage::new(3, 3);
        let mut scanlines = image.scanline_data();
        scanlines.truncate(scanlines.len() - 4);
        let idat = compress_to_vec_zlib(&scanlines, 6);
        let bytes = PngBuilder::new()
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"IDAT", &idat)
            .chunk(b"IEND", &[])
            .build();

        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::TruncatedScanline { row: 2, expected: 10, available: 6 })
        ));
    }

    #[test]
    fn cancelled_decode() {
        let image = TestImage::new(2, 2);
        let bytes = simple_png(&image);

        let token = CancelToken::new();
        token.clone().cancel();
        assert!(token.is_cancelled());

        let result = Decoder::new(&bytes[..]).with_cancel_token(token).decode();
        assert!(matches!(result, Err(DecodeError::Cancelled)));
    }

    #[test]
    fn expired_deadline() {
        let image = TestImage::new(2, 2);
        let bytes = simple_png(&image);

        let result = Decoder::new(&bytes[..]).with_deadline(Instant::now()).decode();
        assert!(matches!(result, Err(DecodeError::DeadlineExceeded)));

        let far = Instant::now() + Duration::from_secs(3600);
        assert!(Decoder::new(&bytes[..]).with_deadline(far).decode().is_ok());
    }

    #[test]
    fn limits_are_enforced() {
        let image = TestImage::new(12, 3);
        let bytes = simple_png(&image);

        let limits = Limits { max_width: 10, max_height: 10 };
        assert!(matches!(
            Decoder::new(&bytes[..]).with_limits(limits).decode(),
            Err(DecodeError::DimensionsExceedLimits { width: 12, height: 3, .. })
        ));
        assert!(Decoder::new(&bytes[..]).with_limits(Limits::unlimited()).decode().is_ok());
    }

    #[test]
    fn header_is_read_once() {
        let image = TestImage::new(4, 2);
        let bytes = simple_png(&image);

        let mut decoder = Decoder::new(&bytes[..]);
        assert_eq!(decoder.state(), State::Start);

        let header = decoder.read_header().unwrap();
        assert_eq!(header, PngHeader::truecolor8(4, 2));
        assert_eq!(decoder.state(), State::ReadingChunks);
        assert_eq!(decoder.read_header().unwrap(), header);

        assert_eq!(decoder.decode().unwrap().into_pixels(), image.pixels());
    }

    #[test]
    fn no_retry_after_bad_signature() {
        // A valid PNG behind 8 junk bytes must not be picked up by a second call.
        let image = TestImage::new(1, 1);
        let mut bytes = vec![0u8; 8];
        bytes.extend(simple_png(&image));

        let mut decoder = Decoder::new(&bytes[..]);
        assert!(matches!(decoder.read_header(), Err(DecodeError::InvalidSignature)));
        assert_eq!(decoder.state(), State::Failed);

        assert!(matches!(decoder.read_header(), Err(DecodeError::AlreadyFailed)));
        assert_eq!(decoder.state(), State::Failed);
        assert!(matches!(decoder.decode(), Err(DecodeError::AlreadyFailed)));
    }

    #[test]
    fn header_errors_are_final() {
        let image = TestImage::new(2, 2);
        let bytes = PngBuilder::new()
            .chunk(b"tEXt", b"Comment\0first")
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"IDAT", &image.idat())
            .chunk(b"IEND", &[])
            .build();

        let mut decoder = Decoder::new(&bytes[..]);
        assert!(matches!(decoder.read_header(), Err(DecodeError::MissingHeader { .. })));
        assert_eq!(decoder.state(), State::Failed);
        assert!(matches!(decoder.read_header(), Err(DecodeError::AlreadyFailed)));
    }

    #[test]
    fn inflate_stops_at_declared_size() {
        // A 1x1 image needs 4 bytes, the payload inflates to 1 MiB.
        let image = TestImage::new(1, 1);
        let idat = compress_to_vec_zlib(&vec![0u8; 1 << 20], 6);
        let bytes = PngBuilder::new()
            .chunk(b"IHDR", &image.ihdr())
            .chunk(b"IDAT", &idat)
            .chunk(b"IEND", &[])
            .build();

        assert!(matches!(decode(&bytes), Err(DecodeError::ExcessImageData { expected: 4 })));
    }

    #[test]
    fn exactly_sized_image_data_decodes() {
        let bytes = PngBuilder::new()
            .chunk(b"IHDR", &PngHeader::truecolor8(1, 2).to_bytes())
            .chunk(b"IDAT", &compress_to_vec_zlib(&[0, 1, 2, 3, 2, 4, 4, 4], 6))
            .chunk(b"IEND", &[])
            .build();

        assert_eq!(decode(&bytes).unwrap().into_pixels(), vec![1, 2, 3, 5, 6, 7]);
    }
}
