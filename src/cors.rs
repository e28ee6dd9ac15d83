//! Cross-origin resource sharing.
//!
//! Only origins on the allow-list get an `access-control-allow-origin`
//! header; `"*"` on the list allows every origin. With an empty list CORS is
//! off: no headers are added and `OPTIONS` requests are not answered.

use std::collections::HashSet;

use http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use http::StatusCode;
use tracing::debug;

use crate::method::Method;
use crate::registry::Registry;
use crate::request::{Request, RequestExt};
use crate::response::ResponseWriter;

const ALLOW_METHODS: &str = "GET, POST, PUT, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Requested-With";
const WILDCARD: &str = "*";

/// The origin allow-list.
#[derive(Clone, Debug, Default)]
pub(crate) struct Cors {
    origins: HashSet<String>,
}

impl Cors {
    pub(crate) fn allow(&mut self, origin: impl Into<String>) {
        self.origins.insert(origin.into());
    }

    pub(crate) fn is_enabled(&self) -> bool {
        !self.origins.is_empty()
    }

    /// Exact match, or any origin when the wildcard is listed. A request
    /// without an `Origin` header counts as the empty origin.
    pub(crate) fn is_allowed(&self, origin: Option<&str>) -> bool {
        self.origins.contains(origin.unwrap_or_default()) || self.origins.contains(WILDCARD)
    }

    /// Value of `access-control-allow-origin` for this request, if any: the
    /// request's own origin, or `*` when it sent none and the wildcard is
    /// listed.
    pub(crate) fn allow_origin_value(&self, origin: Option<&str>) -> Option<HeaderValue> {
        if !self.is_enabled() || !self.is_allowed(origin) {
            return None;
        }
        match origin {
            Some(origin) => HeaderValue::from_str(origin).ok(),
            None if self.origins.contains(WILDCARD) => Some(HeaderValue::from_static(WILDCARD)),
            None => None,
        }
    }

    /// Adds `access-control-allow-origin` when the request's origin is allowed.
    pub(crate) fn apply(&self, req: &Request, writer: &mut dyn ResponseWriter) {
        if let Some(value) = self.allow_origin_value(req.origin()) {
            writer.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
    }
}

/// Answers a preflight request with `204` when CORS is enabled, the path
/// names a registered `GET` or `POST` route and the origin is allowed.
/// Returns whether the request was answered.
pub(crate) fn preflight(
    cors: &Cors,
    registry: &Registry,
    path: &str,
    req: &Request,
    writer: &mut dyn ResponseWriter,
) -> bool {
    if !cors.is_enabled() || req.method() != http::Method::OPTIONS {
        return false;
    }

    let known = registry.resolve(path, Method::Get).is_some() || registry.resolve(path, Method::Post).is_some();
    if !known {
        debug!(path, "preflight for unknown route");
        return false;
    }

    let Some(allow_origin) = cors.allow_origin_value(req.origin()) else {
        debug!(path, origin = ?req.origin(), "preflight from disallowed origin");
        return false;
    };

    let headers = writer.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
    writer.write_status(StatusCode::NO_CONTENT);
    true
}
