// SPDX-License-Identifier: GPL-2.0-or-later

use metastore::Camera;
use url::Url;

/// Builds the RTSP source URL for `camera` (§4.4), deterministic from
/// camera state. `password` must already be decrypted; the caller is
/// responsible for never logging it — `Url`'s `Display` impl renders the
/// password percent-encoded but still in clear text.
pub fn rtsp_url(camera: &Camera, password: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!("rtsp://{}:{}/axis-media/media.amp", camera.host, camera.port))?;

    // `set_username`/`set_password` percent-encode for us.
    _ = url.set_username(&camera.username);
    _ = url.set_password(Some(password));

    let zipstream = if camera.compression_hint_enabled { "on" } else { "off" };
    let resolution = format!("{}x{}", camera.width, camera.height);

    url.query_pairs_mut()
        .append_pair("videocodec", &camera.codec)
        .append_pair("streamprofile", &camera.profile_name)
        .append_pair("zipstream", zipstream)
        .append_pair("resolution", &resolution)
        .append_pair("fps", &camera.fps.to_string());

    Ok(url)
}
