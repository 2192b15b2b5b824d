// SPDX-License-Identifier: GPL-2.0-or-later

//! Serves a single file on disk with HTTP byte-range support (§4.8), built
//! on axum 0.8's `Body::from_stream` rather than a hand-rolled
//! `http_body::Body` impl.

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use http::{header, HeaderMap, StatusCode};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::range::{parse_range, ParseRangeError};

/// Serves `path`, honoring a `Range` request header. `Content-Type` is
/// guessed from the file extension since the container format is
/// muxer-determined and opaque to this crate (§6).
pub async fn serve_file(headers: &HeaderMap, path: &Path) -> std::io::Result<Response> {
    let content_type = mime_guess::from_path(path).first_or_octet_stream().to_string();
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let range = match parse_range(range_header, size) {
        Ok(r) => r,
        Err(ParseRangeError::NoOverlap) => {
            let mut resp = (StatusCode::RANGE_NOT_SATISFIABLE, "range not satisfiable").into_response();
            resp.headers_mut()
                .insert(header::CONTENT_RANGE, format!("bytes */{size}").parse().expect("ascii digits form a valid header value"));
            return Ok(resp);
        }
        Err(e) => return Ok((StatusCode::RANGE_NOT_SATISFIABLE, e.to_string()).into_response()),
    };

    file.seek(std::io::SeekFrom::Start(range.start)).await?;
    let is_partial = range_header.is_some();
    let status = if is_partial { StatusCode::PARTIAL_CONTENT } else { StatusCode::OK };

    let body = Body::from_stream(ReaderStream::new(file.take(range.length)));

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type.as_str())
        .header(header::CONTENT_LENGTH, range.length)
        .header(header::ACCEPT_RANGES, "bytes");
    if is_partial {
        builder = builder.header(header::CONTENT_RANGE, range.content_range(size));
    }
    Ok(builder.body(body).expect("headers set above are all valid ASCII"))
}
