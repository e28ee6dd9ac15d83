//! Error types.
//!
//! "No route matched" is not an error. [`Engine::run`](crate::Engine::run)
//! reports it as `Ok(false)` so the host can try another router. Everything
//! that goes wrong after a route matched is an [`Error`], and by that point the
//! response has almost always been written already (see [`Error::is_handled`]).

use thiserror::Error;

use crate::method::Method;
use crate::validation::ValidationFailure;

/// Boxed error returned by handlers and middlewares.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a single dispatch.
#[derive(Debug, Error)]
pub enum Error {
    /// The resolved route was registered under a different method. Lookup keys
    /// include the method, so this only fires if the registry is inconsistent.
    #[error("route {route} not same method {method}")]
    MethodMismatch { route: String, method: Method },

    /// Query, form or JSON data could not be bound. Answered with `400`.
    #[error("binding failed: {0}")]
    Binding(#[from] BindError),

    /// The bound record broke one of its declared rules. Answered with `422`.
    #[error("validator error: {0}")]
    Validation(#[from] ValidationFailure),

    /// A middleware returned an error. Answered with `500`.
    #[error("middleware failed: {0}")]
    Middleware(#[source] BoxError),

    /// The handler returned an error. Answered with `500`.
    #[error("handler returned error: {0}")]
    Handler(#[source] BoxError),

    /// The handler returned neither a payload nor a custom response.
    #[error("no data found on route return")]
    EmptyPayload,

    /// The payload could not be encoded as JSON. Answered with `400`.
    #[error("error writing data: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Writing to the response (or accepting connections, in the host adapter)
    /// failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the engine took ownership of the request and wrote a response.
    ///
    /// Only [`Error::MethodMismatch`] leaves the response untouched. For every
    /// other variant the caller must not write to the response again.
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::MethodMismatch { .. })
    }
}

/// Why request data could not be bound to a handler's input.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid form data: {0}")]
    Form(String),

    /// Query or form values exist but do not fit the handler's record type.
    #[error("request data cannot be converted into {0}")]
    Record(&'static str),
}

/// A loosely-typed value could not be read as the requested type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionError {
    #[error("value {value} not convertible to {target}")]
    NotConvertible { value: String, target: &'static str },
}

/// Failure of a strict [`Params`](crate::Params) read.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error(transparent)]
    Coercion(#[from] CoercionError),
}
