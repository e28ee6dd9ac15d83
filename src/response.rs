//! Response side of the engine.
//!
//! The engine writes through [`ResponseWriter`], the same narrow surface a
//! streaming server response offers: headers, one status line, body bytes.
//! [`BufferedResponse`] is the in-memory implementation used by the bundled
//! host adapter and by tests.
//!
//! Handlers and middlewares override the outcome with a [`CustomResponse`].

use std::io;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use tracing::{debug, warn};

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// Destination of a dispatched response.
pub trait ResponseWriter {
    /// Headers still to be sent. Mutating them after the status was written
    /// is allowed but a streaming implementation may ignore it.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Writes the status line. Only the first call has an effect.
    fn write_status(&mut self, status: StatusCode);

    /// Appends body bytes, writing `200 OK` first if no status was written.
    fn write_body(&mut self, chunk: &[u8]) -> io::Result<()>;
}

/// Adapts a [`ResponseWriter`] to [`io::Write`] so readers can be copied into
/// it with [`io::copy`].
pub(crate) struct BodyWriter<'a>(pub(crate) &'a mut dyn ResponseWriter);

impl io::Write for BodyWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_body(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── BufferedResponse ──────────────────────────────────────────────────────────

/// A response collected in memory.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// The written status, `200 OK` if none was written.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as text, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Converts into a response a hyper service can return.
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseWriter for BufferedResponse {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        match self.status {
            None => self.status = Some(status),
            Some(written) if written != status => {
                debug!(written = written.as_u16(), ignored = status.as_u16(), "superfluous status write");
            }
            Some(_) => {}
        }
    }

    fn write_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}

// ── CustomResponse ────────────────────────────────────────────────────────────

/// Status, headers and body a handler or middleware wants to force.
///
/// Every part is optional: an unset status keeps `200 OK`, unset headers keep
/// the computed `content-type`, an empty body keeps the serialized payload.
///
/// ```rust
/// use http::StatusCode;
/// use tessel::CustomResponse;
///
/// let forbidden = CustomResponse::new()
///     .set_status(StatusCode::FORBIDDEN)
///     .set_header("x-reason", "blocked")
///     .set_body_string("blocked");
/// assert_eq!(forbidden.status(), Some(StatusCode::FORBIDDEN));
/// ```
#[derive(Clone, Debug, Default)]
pub struct CustomResponse {
    status: Option<StatusCode>,
    headers: Option<HeaderMap>,
    body: Bytes,
}

impl CustomResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn set_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn set_body_string(self, body: impl Into<String>) -> Self {
        self.set_body(body.into())
    }

    /// Appends a header value, keeping earlier values for the same name.
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        if let Some((name, value)) = parse_header(name, value) {
            self.headers.get_or_insert_with(HeaderMap::new).append(name, value);
        }
        self
    }

    /// Sets a header, replacing earlier values for the same name.
    pub fn set_header(mut self, name: &str, value: &str) -> Self {
        if let Some((name, value)) = parse_header(name, value) {
            self.headers.get_or_insert_with(HeaderMap::new).insert(name, value);
        }
        self
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Appends every custom header to `writer`.
    pub(crate) fn copy_headers(&self, writer: &mut dyn ResponseWriter) {
        if let Some(headers) = &self.headers {
            let target = writer.headers_mut();
            for (name, value) in headers {
                target.append(name.clone(), value.clone());
            }
        }
    }
}

fn parse_header(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => Some((name, value)),
        _ => {
            warn!(name, "dropping invalid custom response header");
            None
        }
    }
}
