//! Middleware layer.
//!
//! Middlewares run after binding and validation, before the handler, in the
//! order they were attached to the route. Each one sees what was bound, may
//! add values to [`Params::set_additional`], and either lets the request
//! through (`Ok(None)`), answers it itself (`Ok(Some(custom))`), or fails
//! (`Err`, answered with `500`).
//!
//! ```rust
//! use http::StatusCode;
//! use tessel::middleware::{self, Bound};
//! use tessel::{CustomResponse, RequestExt};
//!
//! let auth = middleware::from_fn(|_: Bound<'_>, params, req| {
//!     match req.header_str("authorization") {
//!         Some(token) => {
//!             params.set_additional("token", token);
//!             Ok(None)
//!         }
//!         None => Ok(Some(CustomResponse::new().set_status(StatusCode::UNAUTHORIZED))),
//!     }
//! });
//! # let _ = auth;
//! ```

use std::any::Any;
use std::sync::Arc;

use crate::error::BoxError;
use crate::params::Params;
use crate::request::Request;
use crate::response::CustomResponse;

/// What the request was bound to.
#[derive(Clone, Copy)]
pub enum Bound<'a> {
    /// A simple route; the values are in [`Params`].
    Params,
    /// A typed route; the decoded record.
    Record(&'a (dyn Any + Send + Sync)),
}

impl<'a> Bound<'a> {
    /// The decoded record, if this is a typed route bound to `T`.
    pub fn record<T: Any>(&self) -> Option<&'a T> {
        match self {
            Self::Record(record) => record.downcast_ref::<T>(),
            Self::Params         => None,
        }
    }
}

impl std::fmt::Debug for Bound<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Params    => f.write_str("Params"),
            Self::Record(_) => f.write_str("Record(..)"),
        }
    }
}

/// `Some` short-circuits the chain with that response.
pub type MiddlewareResult = Result<Option<CustomResponse>, BoxError>;

/// A shareable middleware.
pub type Middleware = Arc<dyn Fn(Bound<'_>, &mut Params, &Request) -> MiddlewareResult + Send + Sync>;

/// Wraps a function or closure as a [`Middleware`].
pub fn from_fn<F>(f: F) -> Middleware
where
    F: Fn(Bound<'_>, &mut Params, &Request) -> MiddlewareResult + Send + Sync + 'static,
{
    Arc::new(f)
}
