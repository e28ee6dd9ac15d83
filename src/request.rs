//! Incoming request type.

use bytes::Bytes;

/// An incoming HTTP request with its body already collected.
///
/// The host owns the connection and reads the body; the engine only ever sees
/// complete requests.
pub type Request = http::Request<Bytes>;

/// Header conveniences used by the engine, available to handlers too.
pub trait RequestExt {
    /// Header value as text. Lookup is case-insensitive; values that are not
    /// visible ASCII read as absent.
    fn header_str(&self, name: &str) -> Option<&str>;

    /// The `Origin` header.
    fn origin(&self) -> Option<&str> {
        self.header_str("origin")
    }

    /// The media type of the body, lowercased and without parameters:
    /// `application/json; charset=utf-8` reads as `application/json`.
    fn media_type(&self) -> Option<String> {
        let raw = self.header_str("content-type")?;
        let essence = raw.split(';').next().unwrap_or(raw).trim();
        Some(essence.to_ascii_lowercase())
    }
}

impl RequestExt for Request {
    fn header_str(&self, name: &str) -> Option<&str> {
        self.headers().get(name)?.to_str().ok()
    }
}
