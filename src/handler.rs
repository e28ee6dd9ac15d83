//! Handler trait and type erasure.
//!
//! # Handler shapes
//!
//! A route handler comes in one of two shapes, picked at registration time by
//! the signature of the function passed in:
//!
//! ```text
//! fn simple(params: &Params, req: &Request) -> HandlerResult<R>
//! fn typed(record: T, params: &Params, req: &Request) -> HandlerResult<R>
//! ```
//!
//! The second argument of [`Handler`] is a marker ([`Simple`] or [`Typed`])
//! so both blanket impls can coexist. Registration turns either shape into a
//! [`RouteHandler`], the sum type the engine dispatches on:
//!
//! ```text
//! engine.post("/users", create_user, [])
//!        ↓ Handler<Typed<NewUser>>
//! create_user.into_route_handler()
//!        ↓
//! Shape::Typed(Box<TypedEndpoint<..>>)     ← knows how to decode NewUser
//!        ↓ decode_json / decode_map at request time
//! Box<BoundCall<..>>                        ← the decoded record plus the fn
//!        ↓ validate, then invoke
//! create_user(record, &params, &req)
//! ```
//!
//! Nothing inspects types at runtime; the record type is fixed when the
//! handler is boxed.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BoxError;
use crate::params::Params;
use crate::request::Request;
use crate::response::CustomResponse;
use crate::validation::{Validate, ValidationFailure, Validator};
use crate::value::Value;

// ── Handler results ───────────────────────────────────────────────────────────

/// What a handler returns: a payload and an optional response override, or
/// an error that turns into `500`.
pub type HandlerResult<R> = Result<Reply<R>, BoxError>;

/// A successful handler outcome.
#[derive(Debug)]
pub struct Reply<R> {
    pub(crate) payload: R,
    pub(crate) custom: Option<CustomResponse>,
}

impl<R> Reply<R> {
    pub fn new(payload: R) -> Self {
        Self { payload, custom: None }
    }

    /// Attaches a response override. Its headers replace the computed
    /// `content-type`, its status replaces `200`, and a non-empty body
    /// replaces the payload.
    pub fn with_custom(mut self, custom: CustomResponse) -> Self {
        self.custom = Some(custom);
        self
    }

    pub fn payload(&self) -> &R {
        &self.payload
    }

    pub fn custom(&self) -> Option<&CustomResponse> {
        self.custom.as_ref()
    }

    pub(crate) fn into_payload(self) -> Reply<Payload>
    where
        R: IntoPayload,
    {
        Reply { payload: self.payload.into_payload(), custom: self.custom }
    }
}

impl Reply<()> {
    /// A reply made only of a response override.
    pub fn custom_only(custom: CustomResponse) -> Self {
        Reply::new(()).with_custom(custom)
    }
}

/// Shorthand for `Ok(Reply::new(payload))`.
pub fn ok<R>(payload: R) -> HandlerResult<R> {
    Ok(Reply::new(payload))
}

// ── Payload ───────────────────────────────────────────────────────────────────

/// Body of a successful reply, before it is written.
pub enum Payload {
    /// Nothing. Only valid together with a custom response.
    Empty,
    /// Written as `text/html`.
    Text(String),
    /// Already encoded JSON, or the encoding error.
    Json(serde_json::Result<Vec<u8>>),
    /// Copied to the response as a download, then dropped.
    Stream(Box<dyn Read + Send>),
}

impl Payload {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::Json(serde_json::to_vec(value))
    }

    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty         => f.write_str("Empty"),
            Self::Text(text)    => f.debug_tuple("Text").field(text).finish(),
            Self::Json(Ok(raw)) => f.debug_tuple("Json").field(&String::from_utf8_lossy(raw)).finish(),
            Self::Json(Err(e))  => f.debug_tuple("Json").field(e).finish(),
            Self::Stream(_)     => f.write_str("Stream(..)"),
        }
    }
}

/// Serializes the wrapped value as the JSON body.
#[derive(Clone, Debug, PartialEq)]
pub struct Json<T>(pub T);

/// Conversion from a handler's return value into a [`Payload`].
pub trait IntoPayload {
    fn into_payload(self) -> Payload;
}

impl IntoPayload for Payload {
    fn into_payload(self) -> Payload {
        self
    }
}

impl IntoPayload for () {
    fn into_payload(self) -> Payload {
        Payload::Empty
    }
}

impl IntoPayload for String {
    fn into_payload(self) -> Payload {
        Payload::Text(self)
    }
}

impl IntoPayload for &'static str {
    fn into_payload(self) -> Payload {
        Payload::Text(self.to_owned())
    }
}

impl<T: Serialize> IntoPayload for Json<T> {
    fn into_payload(self) -> Payload {
        Payload::json(&self.0)
    }
}

/// `null` is no payload, a JSON string is text, anything else is JSON.
impl IntoPayload for serde_json::Value {
    fn into_payload(self) -> Payload {
        match self {
            serde_json::Value::Null      => Payload::Empty,
            serde_json::Value::String(s) => Payload::Text(s),
            other                        => Payload::json(&other),
        }
    }
}

impl<T: IntoPayload> IntoPayload for Option<T> {
    fn into_payload(self) -> Payload {
        self.map_or(Payload::Empty, IntoPayload::into_payload)
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Marker for handlers taking `(&Params, &Request)`.
#[derive(Debug)]
pub enum Simple {}

/// Marker for handlers taking `(T, &Params, &Request)`.
#[derive(Debug)]
pub struct Typed<T>(PhantomData<fn() -> T>);

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any function or
/// closure with one of the two handler signatures; closures need their
/// argument types spelled out so the shape can be inferred.
///
/// The trait is sealed: only the blanket impls below can satisfy it.
pub trait Handler<M>: private::Sealed<M> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_route_handler(self) -> RouteHandler;
}

mod private {
    pub trait Sealed<M> {}
}

impl<F, R> private::Sealed<Simple> for F
where
    F: Fn(&Params, &Request) -> HandlerResult<R> + Send + Sync + 'static,
    R: IntoPayload + 'static,
{
}

impl<F, R> Handler<Simple> for F
where
    F: Fn(&Params, &Request) -> HandlerResult<R> + Send + Sync + 'static,
    R: IntoPayload + 'static,
{
    fn into_route_handler(self) -> RouteHandler {
        let call = move |params: &Params, req: &Request| (self)(params, req).map(Reply::into_payload);
        RouteHandler(Shape::Simple(Box::new(call)))
    }
}

impl<F, T, R> private::Sealed<Typed<T>> for F
where
    F: Fn(T, &Params, &Request) -> HandlerResult<R> + Send + Sync + 'static,
    T: DeserializeOwned + Validate + Send + Sync + 'static,
    R: IntoPayload + 'static,
{
}

impl<F, T, R> Handler<Typed<T>> for F
where
    F: Fn(T, &Params, &Request) -> HandlerResult<R> + Send + Sync + 'static,
    T: DeserializeOwned + Validate + Send + Sync + 'static,
    R: IntoPayload + 'static,
{
    fn into_route_handler(self) -> RouteHandler {
        let endpoint = TypedEndpoint::<F, T, R> { handler: Arc::new(self), _types: PhantomData };
        RouteHandler(Shape::Typed(Box::new(endpoint)))
    }
}

// ── Erased shapes ─────────────────────────────────────────────────────────────

/// A handler with its shape fixed.
///
/// `#[doc(hidden)] pub` because it is the return type of
/// [`Handler::into_route_handler`].
#[doc(hidden)]
pub struct RouteHandler(pub(crate) Shape);

pub(crate) type SimpleFn = dyn Fn(&Params, &Request) -> HandlerResult<Payload> + Send + Sync;

pub(crate) enum Shape {
    Simple(Box<SimpleFn>),
    Typed(Box<dyn RecordEndpoint>),
}

/// Decodes request data into a typed handler's record.
pub(crate) trait RecordEndpoint: Send + Sync {
    fn record_type(&self) -> &'static str;

    fn decode_json(&self, body: &[u8]) -> serde_json::Result<Box<dyn BoundRecord>>;

    /// Round-trips a flat value map through JSON into the record.
    fn decode_map(&self, values: &HashMap<String, Value>) -> serde_json::Result<Box<dyn BoundRecord>>;

    /// The `required` failure for a field the body left out.
    fn missing_field(&self, wire: &str) -> ValidationFailure;
}

/// A decoded record together with the handler that will receive it.
pub(crate) trait BoundRecord {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationFailure>;

    fn as_any(&self) -> &(dyn Any + Send + Sync);

    fn invoke(self: Box<Self>, params: &Params, req: &Request) -> HandlerResult<Payload>;
}

struct TypedEndpoint<F, T, R> {
    handler: Arc<F>,
    _types: PhantomData<fn() -> (T, R)>,
}

impl<F, T, R> TypedEndpoint<F, T, R>
where
    F: Fn(T, &Params, &Request) -> HandlerResult<R> + Send + Sync + 'static,
    T: DeserializeOwned + Validate + Send + Sync + 'static,
    R: IntoPayload + 'static,
{
    fn bind(&self, record: T) -> Box<dyn BoundRecord> {
        Box::new(BoundCall::<F, T, R> { record, handler: Arc::clone(&self.handler), _reply: PhantomData })
    }
}

impl<F, T, R> RecordEndpoint for TypedEndpoint<F, T, R>
where
    F: Fn(T, &Params, &Request) -> HandlerResult<R> + Send + Sync + 'static,
    T: DeserializeOwned + Validate + Send + Sync + 'static,
    R: IntoPayload + 'static,
{
    fn record_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn decode_json(&self, body: &[u8]) -> serde_json::Result<Box<dyn BoundRecord>> {
        let record: T = serde_json::from_slice(body)?;
        Ok(self.bind(record))
    }

    fn decode_map(&self, values: &HashMap<String, Value>) -> serde_json::Result<Box<dyn BoundRecord>> {
        let record: T = serde_json::from_value(serde_json::to_value(values)?)?;
        Ok(self.bind(record))
    }

    fn missing_field(&self, wire: &str) -> ValidationFailure {
        ValidationFailure::missing_field::<T>(wire)
    }
}

struct BoundCall<F, T, R> {
    record: T,
    handler: Arc<F>,
    _reply: PhantomData<fn() -> R>,
}

impl<F, T, R> BoundRecord for BoundCall<F, T, R>
where
    F: Fn(T, &Params, &Request) -> HandlerResult<R> + Send + Sync + 'static,
    T: DeserializeOwned + Validate + Send + Sync + 'static,
    R: IntoPayload + 'static,
{
    fn validate(&self, validator: &Validator) -> Result<(), ValidationFailure> {
        validator.validate(&self.record)
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        &self.record
    }

    fn invoke(self: Box<Self>, params: &Params, req: &Request) -> HandlerResult<Payload> {
        let BoundCall { record, handler, .. } = *self;
        (*handler)(record, params, req).map(Reply::into_payload)
    }
}
