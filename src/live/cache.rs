// SPDX-License-Identifier: GPL-2.0-or-later

//! The parsed playlist cache (§4.7) and the `_HLS_msn`/`_HLS_part` query
//! parameters that gate a blocking `playlist()` read.

use serde::Deserialize;

/// What the publisher last read back off the rolling playlist file the
/// transcoder child writes. `part_index` is the part index of the last
/// part appended to the in-progress (not yet `EXTINF`-terminated) segment;
/// `-1` until the first part of a new segment lands.
#[derive(Debug, Clone, Default)]
pub struct PlaylistCache {
    pub media_sequence: u64,
    pub part_index: i64,
    pub content: Vec<u8>,
}

impl PlaylistCache {
    /// `(msn > N) OR (msn == N AND (P == -1 OR partIndex >= P))` (§4.7).
    #[must_use]
    pub fn satisfies(&self, query: &PlaylistQuery) -> bool {
        let Some(msn) = query.msn else {
            return true;
        };
        if self.media_sequence > msn {
            return true;
        }
        if self.media_sequence < msn {
            return false;
        }
        match query.part {
            None | Some(-1) => true,
            Some(part) => self.part_index >= part,
        }
    }
}

/// `_HLS_msn`/`_HLS_part` (§4.7). Mirrors the low-latency HLS blocking
/// playlist request convention: both present or neither, `part` may be
/// `-1` to mean "any part of the next media sequence".
#[derive(Debug, Default)]
pub struct PlaylistQuery {
    pub msn: Option<u64>,
    pub part: Option<i64>,
}

impl<'de> Deserialize<'de> for PlaylistQuery {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        #[derive(Deserialize)]
        struct Temp {
            #[serde(rename = "_HLS_msn")]
            msn: Option<String>,
            #[serde(rename = "_HLS_part")]
            part: Option<String>,
        }
        let temp = Temp::deserialize(deserializer)?;

        let msn = temp.msn.map(|s| s.parse::<u64>()).transpose().map_err(Error::custom)?;
        let part = temp.part.map(|s| s.parse::<i64>()).transpose().map_err(Error::custom)?;

        match (msn, part) {
            (Some(_), None) | (None, Some(_)) => Err(Error::custom("_HLS_msn and _HLS_part must be given together")),
            _ => Ok(Self { msn, part }),
        }
    }
}

/// Scans a rolling playlist's text for its current media sequence and the
/// part index of its in-progress segment. Not a full m3u8 parser: it only
/// extracts what `satisfies` needs, tolerating the rest of the playlist
/// verbatim in `content`.
#[must_use]
pub fn parse_playlist(content: &[u8]) -> (u64, i64) {
    let text = String::from_utf8_lossy(content);

    let media_sequence = text
        .lines()
        .find_map(|line| line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:"))
        .and_then(|n| n.trim().parse::<u64>().ok())
        .unwrap_or(0);

    // Parts belonging to a segment that is already EXTINF-terminated don't
    // count; only parts appended after the last EXTINF line are "current".
    let last_extinf = text.lines().rposition(|line| line.starts_with("#EXTINF:"));
    let part_index = text
        .lines()
        .enumerate()
        .filter(|(i, line)| last_extinf.map_or(true, |last| *i > last) && line.starts_with("#EXT-X-PART:"))
        .count();

    let part_index = if part_index == 0 {
        -1
    } else {
        i64::try_from(part_index - 1).unwrap_or(i64::MAX)
    };

    (media_sequence, part_index)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_playlist_no_parts_yet() {
        let playlist = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:5\n#EXTINF:6.0,\nseg5.m4s\n";
        assert_eq!(parse_playlist(playlist.as_bytes()), (5, -1));
    }

    #[test]
    fn test_parse_playlist_in_progress_parts() {
        let playlist = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:5\n#EXTINF:6.0,\nseg5.m4s\n#EXT-X-PART:DURATION=0.3,URI=\"p0\"\n#EXT-X-PART:DURATION=0.3,URI=\"p1\"\n";
        assert_eq!(parse_playlist(playlist.as_bytes()), (5, 1));
    }

    #[test]
    fn test_parse_playlist_missing_media_sequence_defaults_zero() {
        assert_eq!(parse_playlist(b"#EXTM3U\n"), (0, -1));
    }

    #[test]
    fn test_satisfies_next_sequence() {
        let cache = PlaylistCache {
            media_sequence: 6,
            part_index: 0,
            content: vec![],
        };
        assert!(cache.satisfies(&PlaylistQuery { msn: Some(6), part: Some(-1) }));
        assert!(!cache.satisfies(&PlaylistQuery { msn: Some(7), part: Some(-1) }));
    }

    #[test]
    fn test_satisfies_same_sequence_part_threshold() {
        let cache = PlaylistCache {
            media_sequence: 5,
            part_index: 3,
            content: vec![],
        };
        assert!(cache.satisfies(&PlaylistQuery { msn: Some(5), part: Some(3) }));
        assert!(cache.satisfies(&PlaylistQuery { msn: Some(5), part: Some(2) }));
        assert!(!cache.satisfies(&PlaylistQuery { msn: Some(5), part: Some(4) }));
    }

    #[test]
    fn test_satisfies_no_query_is_immediate() {
        let cache = PlaylistCache::default();
        assert!(cache.satisfies(&PlaylistQuery::default()));
    }
}
