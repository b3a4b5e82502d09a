//! DLNA transport headers shared by every media response.

use axum::http::{header, response::Builder, HeaderName, HeaderValue};

pub static CONTENT_FEATURES: HeaderName = HeaderName::from_static("contentfeatures.dlna.org");
pub static TRANSFER_MODE: HeaderName = HeaderName::from_static("transfermode.dlna.org");
pub static CAPTION_INFO: HeaderName = HeaderName::from_static("captioninfo.sec");

const FLAGS: &str = "DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

/// `contentFeatures.dlna.org` value; `OP=01` advertises byte seeking.
pub fn content_features(ranges: bool) -> String {
    let op = if ranges { "01" } else { "00" };
    format!("DLNA.ORG_OP={op};{FLAGS}")
}

/// Headers common to media and subtitle responses.
pub fn media_headers(builder: Builder, ranges: bool) -> Builder {
    builder
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(&TRANSFER_MODE, "Streaming")
        .header(&CONTENT_FEATURES, content_features(ranges))
}

/// `CaptionInfo.sec` pointing at the subtitle companion, if the host is
/// known and usable in a header.
pub fn caption_info(host: Option<&str>, subtitle_ext: &str) -> Option<HeaderValue> {
    let host = host?;
    HeaderValue::from_str(&format!("http://{host}/mediasub{subtitle_ext}")).ok()
}
