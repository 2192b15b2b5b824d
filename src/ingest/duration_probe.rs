// SPDX-License-Identifier: GPL-2.0-or-later

//! Segment duration probing (SPEC_FULL §C.4): reads the `mvhd` box's
//! timescale/duration fields out of a finished segment's `moov` atom so the
//! finalizer can record the segment's true length instead of always
//! assuming the nominal value the transcoder was configured with. A
//! minimal, read-only box walk, not a general MP4 parser — unrelated to
//! the write-only box muxer kept elsewhere in the workspace for reference.

use std::path::Path;
use tokio::io::AsyncReadExt;

/// Bound on how much of the file is read while hunting for `moov`/`mvhd`.
/// The transcoder contract requires a front-loaded `moov` (§6), so this
/// comfortably covers it without reading the much larger `mdat` that
/// follows.
const MAX_PROBE_BYTES: u64 = 4 * 1024 * 1024;

/// Returns the segment's actual duration in whole seconds, or `None` if the
/// file is missing `moov`/`mvhd`, truncated, or otherwise unparseable. A
/// `None` here is a "fall back to nominal" signal to the caller, never an
/// error — a probe failure must not block finalization.
pub async fn probe_duration_secs(path: &Path) -> Option<i64> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let len = file.metadata().await.ok()?.len();
    let probe_len = usize::try_from(len.min(MAX_PROBE_BYTES)).ok()?;
    let mut buf = vec![0u8; probe_len];
    file.read_exact(&mut buf).await.ok()?;
    mvhd_duration_secs(&buf)
}

fn mvhd_duration_secs(buf: &[u8]) -> Option<i64> {
    let moov = find_box(buf, b"moov")?;
    let mvhd = find_box(moov, b"mvhd")?;

    let version = *mvhd.first()?;
    let (timescale, duration) = match version {
        0 => {
            // version(1) + flags(3) + creation_time(4) + modification_time(4) = 12
            let timescale = u32::from_be_bytes(mvhd.get(12..16)?.try_into().ok()?);
            let duration = u32::from_be_bytes(mvhd.get(16..20)?.try_into().ok()?);
            (u64::from(timescale), u64::from(duration))
        }
        1 => {
            // version(1) + flags(3) + creation_time(8) + modification_time(8) = 20
            let timescale = u32::from_be_bytes(mvhd.get(20..24)?.try_into().ok()?);
            let duration = u64::from_be_bytes(mvhd.get(24..32)?.try_into().ok()?);
            (u64::from(timescale), duration)
        }
        _ => return None,
    };

    if timescale == 0 {
        return None;
    }
    i64::try_from(duration / timescale).ok()
}

/// Walks sibling boxes in `buf`, returning the body (past the 8- or
/// 16-byte header) of the first one whose type matches `want`.
fn find_box<'a>(buf: &'a [u8], want: &[u8; 4]) -> Option<&'a [u8]> {
    let mut pos = 0usize;
    while pos + 8 <= buf.len() {
        let size32 = u32::from_be_bytes(buf.get(pos..pos + 4)?.try_into().ok()?);
        let box_type = buf.get(pos + 4..pos + 8)?;

        let (header_len, body_len) = if size32 == 1 {
            let size64 = u64::from_be_bytes(buf.get(pos + 8..pos + 16)?.try_into().ok()?);
            (16usize, usize::try_from(size64.checked_sub(16)?).ok()?)
        } else if size32 == 0 {
            (8usize, buf.len() - pos - 8)
        } else {
            (8usize, usize::try_from(size32)?.checked_sub(8)?)
        };

        let body_start = pos + header_len;
        let body_end = body_start.checked_add(body_len)?;
        if body_end > buf.len() {
            return None;
        }
        if box_type == want {
            return Some(&buf[body_start..body_end]);
        }
        pos = body_end;
    }
    None
}
