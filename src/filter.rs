//! Scanline reconstruction: undoes the per-row filters applied before compression.
//!
//! Every row of the inflated stream is one filter-type byte followed by
//! `width * bytes_per_pixel` filtered bytes. Rows are rebuilt strictly in order,
//! since Up, Average and Paeth read the previous reconstructed row.

use crate::error::DecodeError;
use core::mem;
use num_enum::TryFromPrimitive;
use tracing::{trace, warn};

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum FilterType {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

/// Picks whichever of `a` (left), `b` (up) or `c` (upper left) is closest to
/// `a + b - c`. Ties go to `a`, then `b`, then `c`.
#[inline(always)]
pub fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let (a16, b16, c16) = (i16::from(a), i16::from(b), i16::from(c));
    let p = a16 + b16 - c16;
    let pa = (p - a16).abs();
    let pb = (p - b16).abs();
    let pc = (p - c16).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Reverses `filter_type` on `current` in place.
///
/// `prior` is the previous reconstructed row (all zeros for the first row) and
/// must be as long as `current`. Neighbours to the left of the first pixel read
/// as zero. All arithmetic wraps modulo 256.
pub fn unfilter_row(
    filter_type: FilterType,
    current: &mut [u8],
    prior: &[u8],
    bytes_per_pixel: usize,
) {
    debug_assert_eq!(current.len(), prior.len());
    debug_assert!(bytes_per_pixel > 0);

    let bpp = bytes_per_pixel;
    let lead = bpp.min(current.len());

    match filter_type {
        FilterType::None => {},
        FilterType::Sub => {
            for i in lead..current.len() {
                current[i] = current[i].wrapping_add(current[i - bpp]);
            }
        },
        FilterType::Up => {
            for (current_byte, above) in current.iter_mut().zip(prior) {
                *current_byte = current_byte.wrapping_add(*above);
            }
        },
        FilterType::Average => {
            for (current_byte, above) in current[..lead].iter_mut().zip(prior) {
                *current_byte = current_byte.wrapping_add(*above / 2);
            }

            for i in lead..current.len() {
                let average = (u16::from(current[i - bpp]) + u16::from(prior[i])) / 2;
                current[i] = current[i].wrapping_add(average as u8);
            }
        },
        FilterType::Paeth => {
            for (current_byte, above) in current[..lead].iter_mut().zip(prior) {
                *current_byte = current_byte.wrapping_add(paeth_predictor(0, *above, 0));
            }

            for i in lead..current.len() {
                let predictor = paeth_predictor(current[i - bpp], prior[i], prior[i - bpp]);
                current[i] = current[i].wrapping_add(predictor);
            }
        },
    }
}

/// Rebuilds `height` rows of `width * bytes_per_pixel` bytes from the inflated
/// scanline stream.
///
/// Bytes past the last row are ignored. A stream that runs out before the last
/// row is complete is an error; it is never padded.
pub fn reconstruct(
    scanline_data: &[u8],
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Result<Vec<u8>, DecodeError> {
    let bytes_per_scanline =
        (width as usize).checked_mul(bytes_per_pixel).ok_or(DecodeError::ImageTooLarge)?;
    let output_len =
        bytes_per_scanline.checked_mul(height as usize).ok_or(DecodeError::ImageTooLarge)?;
    let row_len = bytes_per_scanline + 1;

    // Don't trust the header for the allocation size when the data is shorter.
    let mut output = Vec::with_capacity(output_len.min(scanline_data.len()));
    let mut last_scanline = vec![0u8; bytes_per_scanline];
    let mut current_scanline = vec![0u8; bytes_per_scanline];

    let mut offset = 0;
    for row in 0..height {
        let line = scanline_data.get(offset..offset + row_len).ok_or(
            DecodeError::TruncatedScanline {
                row,
                expected: row_len,
                available: scanline_data.len() - offset,
            },
        )?;

        let tag = line[0];
        let filter_type =
            FilterType::try_from(tag).map_err(|_| DecodeError::UnknownFilterType { row, tag })?;
        trace!(row, ?filter_type, "unfiltering scanline");

        current_scanline.copy_from_slice(&line[1..]);
        unfilter_row(filter_type, &mut current_scanline, &last_scanline, bytes_per_pixel);
        output.extend_from_slice(&current_scanline);

        mem::swap(&mut last_scanline, &mut current_scanline);
        offset += row_len;
    }

    if offset < scanline_data.len() {
        warn!(extra = scanline_data.len() - offset, "ignoring bytes after the last scanline");
    }

    Ok(output)
}

/// Forward filter, the encoder-side counterpart of `unfilter_row`.
#[cfg(test)]
pub(crate) fn filter_row(filter_type: FilterType, row: &[u8], prior: &[u8], bpp: usize) -> Vec<u8> {
    let left = |i: usize| if i >= bpp { row[i - bpp] } else { 0 };
    let upper_left = |i: usize| if i >= bpp { prior[i - bpp] } else { 0 };

    (0..row.len())
        .map(|i| {
            let predictor = match filter_type {
                FilterType::None => 0,
                FilterType::Sub => left(i),
                FilterType::Up => prior[i],
                FilterType::Average => ((u16::from(left(i)) + u16::from(prior[i])) / 2) as u8,
                FilterType::Paeth => paeth_predictor(left(i), prior[i], upper_left(i)),
            };
            row[i].wrapping_sub(predictor)
        })
        .collect()
}
