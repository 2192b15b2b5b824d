// SPDX-License-Identifier: GPL-2.0-or-later

//! RFC 7233 byte-range parsing, single-range only. Conditional-request
//! headers (`If-Range`, `If-Modified-Since`, ...) are out of scope since
//! nothing here serves a browser cache.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseRangeError {
    #[error("invalid range")]
    Invalid,

    #[error("range does not overlap content")]
    NoOverlap,

    #[error("cannot serve multipart range requests")]
    Multipart,
}

/// A single resolved byte range, `[start, start+length)` within a resource
/// of some total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRange {
    pub start: u64,
    pub length: u64,
}

impl HttpRange {
    #[must_use]
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.start + self.length - 1, size)
    }
}

/// Parses a `Range` header value against a resource of `size` bytes.
/// `None` (no header present) resolves to the whole resource. Multiple
/// ranges are rejected with [`ParseRangeError::Multipart`] rather than
/// served as `multipart/byteranges` — a client asking for one range may
/// not understand a multipart reply.
pub fn parse_range(header: Option<&str>, size: u64) -> Result<HttpRange, ParseRangeError> {
    let Some(header) = header else {
        return Ok(HttpRange { start: 0, length: size });
    };

    const PREFIX: &str = "bytes=";
    let Some(spec) = header.strip_prefix(PREFIX) else {
        return Err(ParseRangeError::Invalid);
    };

    let mut ranges = Vec::new();
    let mut no_overlap = false;

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let dash = part.find('-').ok_or(ParseRangeError::Invalid)?;
        let start = part[..dash].trim();
        let end = part[dash + 1..].trim();

        let range = if start.is_empty() {
            // suffix-length form: "-N" means the last N bytes.
            if end.is_empty() {
                return Err(ParseRangeError::Invalid);
            }
            let suffix_len: u64 = end.parse().map_err(|_| ParseRangeError::Invalid)?;
            let suffix_len = suffix_len.min(size);
            HttpRange { start: size - suffix_len, length: suffix_len }
        } else {
            let start: u64 = start.parse().map_err(|_| ParseRangeError::Invalid)?;
            if start >= size {
                no_overlap = true;
                continue;
            }
            let length = if end.is_empty() {
                size - start
            } else {
                let mut last: u64 = end.parse().map_err(|_| ParseRangeError::Invalid)?;
                if start > last {
                    return Err(ParseRangeError::Invalid);
                }
                if last >= size {
                    last = size - 1;
                }
                last - start + 1
            };
            HttpRange { start, length }
        };
        ranges.push(range);
    }

    if ranges.is_empty() {
        return if no_overlap { Err(ParseRangeError::NoOverlap) } else { Ok(HttpRange { start: 0, length: size }) };
    }
    if ranges.len() > 1 {
        return Err(ParseRangeError::Multipart);
    }
    Ok(ranges[0])
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(None, 100, 0, 100; "no header serves whole file")]
    #[test_case(Some("bytes=0-99"), 100, 0, 100; "full explicit range")]
    #[test_case(Some("bytes=10-19"), 100, 10, 10; "bounded range")]
    #[test_case(Some("bytes=90-"), 100, 90, 10; "open ended range")]
    #[test_case(Some("bytes=-10"), 100, 90, 10; "suffix range")]
    #[test_case(Some("bytes=50-1000"), 100, 50, 50; "end clamped to size")]
    fn parses(header: Option<&str>, size: u64, start: u64, length: u64) {
        let got = parse_range(header, size).unwrap();
        assert_eq!(got, HttpRange { start, length });
    }

    #[test]
    fn rejects_out_of_bounds_start() {
        let err = parse_range(Some("bytes=200-300"), 100).unwrap_err();
        assert!(matches!(err, ParseRangeError::NoOverlap));
    }

    #[test]
    fn rejects_malformed_header() {
        let err = parse_range(Some("nope"), 100).unwrap_err();
        assert!(matches!(err, ParseRangeError::Invalid));
    }

    #[test]
    fn rejects_multiple_ranges() {
        let err = parse_range(Some("bytes=0-9,20-29"), 100).unwrap_err();
        assert!(matches!(err, ParseRangeError::Multipart));
    }

    #[test]
    fn content_range_header_value() {
        let r = HttpRange { start: 10, length: 10 };
        assert_eq!(r.content_range(100), "bytes 10-19/100");
    }
}
