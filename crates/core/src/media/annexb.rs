//! Annex B byte-stream splitting (ITU-T H.264 / H.265 Annex B).
//!
//! Hardware encoders hand out access units as Annex B byte streams where
//! each NAL unit is preceded by a start code:
//! - 4-byte: `0x00 0x00 0x00 0x01`
//! - 3-byte: `0x00 0x00 0x01`

use std::ops::Range;

/// Locate every NAL unit in an Annex B byte stream.
///
/// Returns the byte ranges of the NAL payloads, start codes excluded, in
/// stream order. Empty NALs (two adjacent start codes) are skipped. Data
/// before the first start code is ignored.
///
/// The start code length is tracked per NAL so that boundaries between
/// adjacent NALs stay correct when 3-byte and 4-byte start codes mix.
pub fn nal_ranges(data: &[u8]) -> Vec<Range<usize>> {
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut starts: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            starts.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            starts.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut ranges = Vec::with_capacity(starts.len());
    for (idx, &(start, _)) in starts.iter().enumerate() {
        let end = match starts.get(idx + 1) {
            Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
            None => data.len(),
        };
        if start < end {
            ranges.push(start..end);
        }
    }
    ranges
}

/// Borrowing variant of [`nal_ranges`].
pub fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    nal_ranges(data).into_iter().map(|r| &data[r]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        assert_eq!(nal_units(&data), vec![&[0x65, 0xAA, 0xBB][..]]);
    }

    #[test]
    fn single_nal_3byte_sc() {
        let data = [0, 0, 1, 0x67, 0x42, 0x00];
        assert_eq!(nal_units(&data), vec![&[0x67, 0x42, 0x00][..]]);
    }

    #[test]
    fn mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = nal_units(&data);
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0], &[0x67, 0x42]);
        assert_eq!(nals[1], &[0x68, 0xCE]);
    }

    #[test]
    fn ranges_exclude_start_codes() {
        let data = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x68];
        assert_eq!(nal_ranges(&data), vec![4..6, 9..10]);
    }

    #[test]
    fn adjacent_start_codes_skip_empty_nal() {
        let data = [0, 0, 0, 1, 0, 0, 0, 1, 0x41, 0x9A];
        assert_eq!(nal_units(&data), vec![&[0x41, 0x9A][..]]);
    }

    #[test]
    fn empty_and_unframed_data() {
        assert!(nal_units(&[]).is_empty());
        assert!(nal_units(&[0xFF, 0xFE]).is_empty());
    }
}
