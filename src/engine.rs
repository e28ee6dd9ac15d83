//! The dispatch engine.
//!
//! [`Engine::run`] takes one complete request through a fixed sequence:
//!
//! ```text
//! strip prefix → preflight → resolve → bind → validate → CORS header
//!              → middlewares → handler → write response
//! ```
//!
//! Every step after resolution either passes the request on or writes the
//! final response itself and stops. Once a route has matched the engine owns
//! the response, so the caller only has to look at the returned `bool`.

use std::io;

use http::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use http::StatusCode;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::cors::{self, Cors};
use crate::error::{BindError, Error};
use crate::extract::{self, Extracted, Target};
use crate::handler::{BoundRecord, Handler, Payload, Reply, Shape, SimpleFn};
use crate::method::Method;
use crate::middleware::{Bound, Middleware};
use crate::params::Params;
use crate::registry::{Registry, Resolved, Route};
use crate::request::Request;
use crate::response::{BodyWriter, CustomResponse, ResponseWriter};
use crate::validation::{ValidationFailure, Validator};

const TEXT_HTML: &str = "text/html";
const APPLICATION_JSON: &str = "application/json";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const ATTACHMENT: &str = "attachment; filename=\"file\"";

// ── Engine ────────────────────────────────────────────────────────────────────

/// Routes requests to registered handlers.
///
/// Registration takes `&self`, so an engine shared behind an `Arc` can still
/// gain routes while serving.
///
/// ```rust
/// use bytes::Bytes;
/// use tessel::{ok, BufferedResponse, Engine, HandlerResult, Params, Request};
///
/// fn hello(params: &Params, _: &Request) -> HandlerResult<String> {
///     ok(format!("hello {}", params.string("name", "world")))
/// }
///
/// let engine = Engine::new();
/// engine.get("/hello", hello, []);
///
/// let req = http::Request::get("/hello?name=ann").body(Bytes::new()).unwrap();
/// let mut res = BufferedResponse::new();
/// assert!(engine.run(&req, &mut res).unwrap());
/// assert_eq!(res.text(), "hello ann");
/// ```
pub struct Engine {
    registry: Registry,
    cors: Cors,
    prefix: String,
    verbose_errors: bool,
    validator: Validator,
}

impl Engine {
    pub fn new() -> Self {
        EngineBuilder::default().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn from_config(config: Config) -> Self {
        EngineBuilder::from(config).build()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn verbose_errors(&self) -> bool {
        self.verbose_errors
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Registers `handler` under `(template, method)`, replacing any earlier
    /// registration of the same pair.
    ///
    /// Templates with placeholders are tried in registration order, before
    /// any literal path; register the most specific template first.
    pub fn register<M, H>(
        &self,
        method: Method,
        template: &str,
        handler: H,
        middlewares: impl IntoIterator<Item = Middleware>,
    ) -> &Self
    where
        H: Handler<M>,
    {
        self.registry.register(Route {
            template: template.to_owned(),
            method,
            handler: handler.into_route_handler(),
            middlewares: middlewares.into_iter().collect(),
        });
        self
    }

    pub fn get<M, H>(&self, template: &str, handler: H, middlewares: impl IntoIterator<Item = Middleware>) -> &Self
    where
        H: Handler<M>,
    {
        self.register(Method::Get, template, handler, middlewares)
    }

    pub fn post<M, H>(&self, template: &str, handler: H, middlewares: impl IntoIterator<Item = Middleware>) -> &Self
    where
        H: Handler<M>,
    {
        self.register(Method::Post, template, handler, middlewares)
    }

    /// Starts a registration that takes middlewares one at a time.
    ///
    /// ```rust
    /// use tessel::{middleware, ok, Engine, HandlerResult, Method, Params, Request};
    ///
    /// fn list(_: &Params, _: &Request) -> HandlerResult<&'static str> {
    ///     ok("[]")
    /// }
    ///
    /// let engine = Engine::new();
    /// engine
    ///     .route(Method::Get, "/items", list)
    ///     .middleware(middleware::from_fn(|_, _, _| Ok(None)))
    ///     .register();
    /// ```
    pub fn route<M, H>(&self, method: Method, template: &str, handler: H) -> RouteBuilder<'_>
    where
        H: Handler<M>,
    {
        RouteBuilder {
            engine: self,
            route: Route {
                template: template.to_owned(),
                method,
                handler: handler.into_route_handler(),
                middlewares: Vec::new(),
            },
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Dispatches one request.
    ///
    /// - `Ok(false)`: no route matched and nothing was written; the host
    ///   decides what to answer.
    /// - `Ok(true)`: a response was written.
    /// - `Err(e)`: the request failed. The failure response has been written
    ///   unless [`Error::is_handled`] says otherwise.
    pub fn run(&self, req: &Request, writer: &mut dyn ResponseWriter) -> Result<bool, Error> {
        let full_path = req.uri().path();
        let path = full_path.strip_prefix(self.prefix.as_str()).unwrap_or(full_path);

        if cors::preflight(&self.cors, &self.registry, path, req, writer) {
            debug!(path, "preflight answered");
            return Ok(true);
        }

        let Some(method) = Method::from_request(req.method()) else {
            return Ok(false);
        };
        let Some(Resolved { template, route, path_params }) = self.registry.resolve(path, method) else {
            return Ok(false);
        };

        if route.method != method {
            warn!(route = %template, %method, "resolved route has a different method");
            return Err(Error::MethodMismatch { route: route.template.clone(), method });
        }

        let target = match &route.handler.0 {
            Shape::Simple(_)        => Target::Params,
            Shape::Typed(endpoint)  => Target::Record(endpoint.as_ref()),
        };
        let Extracted { values, record } = match extract::read_values(req, method, target) {
            Ok(extracted) => extracted,
            Err(e) => {
                // A field absent from a JSON body fails `required`, not binding.
                if let (Target::Record(endpoint), Some(wire)) = (target, extract::missing_field(&e)) {
                    return Err(reject_record(&template, endpoint.missing_field(&wire), writer));
                }
                return Err(self.reject_binding(&template, e, writer));
            }
        };

        let invocation = match (&route.handler.0, record) {
            (Shape::Simple(call), _)        => Invocation::Simple(call.as_ref()),
            (Shape::Typed(_), Some(record)) => Invocation::Typed(record),
            (Shape::Typed(endpoint), None)  => {
                let e = BindError::Record(endpoint.record_type());
                return Err(self.reject_binding(&template, e, writer));
            }
        };

        let mut params = Params::new(values.unwrap_or_default());
        if let Some(captures) = path_params {
            params.merge_path_params(captures);
        }

        if let Invocation::Typed(record) = &invocation {
            if let Err(failure) = record.validate(&self.validator) {
                return Err(reject_record(&template, failure, writer));
            }
        }

        self.cors.apply(req, writer);

        let bound = match &invocation {
            Invocation::Typed(record) => Bound::Record(record.as_any()),
            Invocation::Simple(_)     => Bound::Params,
        };
        for middleware in &route.middlewares {
            match middleware(bound, &mut params, req) {
                Ok(None) => {}
                Ok(Some(custom)) => {
                    debug!(route = %template, "middleware answered the request");
                    write_custom(&custom, writer)?;
                    return Ok(true);
                }
                Err(e) => {
                    error!(route = %template, status = 500, error = %e, "middleware failed");
                    writer.write_status(StatusCode::INTERNAL_SERVER_ERROR);
                    if self.verbose_errors {
                        write_text(writer, &e.to_string());
                    }
                    return Err(Error::Middleware(e));
                }
            }
        }

        let outcome = match invocation {
            Invocation::Simple(call)    => call(&params, req),
            Invocation::Typed(record)   => record.invoke(&params, req),
        };
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                error!(route = %template, status = 500, error = %e, "handler returned error");
                let text = e.to_string();
                writer.write_status(StatusCode::INTERNAL_SERVER_ERROR);
                write_text(writer, &text);
                if self.verbose_errors {
                    write_text(writer, &text);
                }
                return Err(Error::Handler(e));
            }
        };

        respond(&template, reply, writer)
    }

    fn reject_binding(&self, template: &str, e: BindError, writer: &mut dyn ResponseWriter) -> Error {
        warn!(route = template, status = 400, error = %e, "request data could not be bound");
        writer.write_status(StatusCode::BAD_REQUEST);
        if self.verbose_errors {
            write_text(writer, &e.to_string());
        }
        Error::Binding(e)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// What the handler will be called with.
enum Invocation<'r> {
    Simple(&'r SimpleFn),
    Typed(Box<dyn BoundRecord>),
}

// ── Response writing ──────────────────────────────────────────────────────────

fn respond(template: &str, reply: Reply<Payload>, writer: &mut dyn ResponseWriter) -> Result<bool, Error> {
    let Reply { payload, custom } = reply;

    let mut body = Vec::new();
    let mut stream = None;
    match payload {
        Payload::Empty if custom.is_none() => {
            error!(route = template, status = 500, "handler returned no payload");
            writer.write_status(StatusCode::INTERNAL_SERVER_ERROR);
            return Err(Error::EmptyPayload);
        }
        Payload::Empty => {}
        Payload::Text(text) => {
            writer.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_HTML));
            body = text.into_bytes();
        }
        Payload::Json(Ok(json)) => {
            writer.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
            body = json;
        }
        Payload::Json(Err(e)) => {
            warn!(route = template, status = 400, error = %e, "payload could not be serialized");
            writer.write_status(StatusCode::BAD_REQUEST);
            write_text(writer, &format!("error writing data: {e}"));
            return Err(Error::Serialization(e));
        }
        Payload::Stream(reader) => stream = Some(reader),
    }

    let mut status = StatusCode::OK;
    if let Some(custom) = &custom {
        if custom.headers().is_some() {
            writer.headers_mut().remove(CONTENT_TYPE);
            custom.copy_headers(writer);
        }
        if let Some(custom_status) = custom.status() {
            status = custom_status;
        }
        if !custom.body().is_empty() {
            writer.write_status(status);
            writer.write_body(custom.body())?;
            debug!(route = template, status = status.as_u16(), "custom response written");
            return Ok(true);
        }
    }

    if let Some(mut reader) = stream {
        if custom.as_ref().and_then(CustomResponse::headers).is_none() {
            writer.headers_mut().insert(CONTENT_DISPOSITION, HeaderValue::from_static(ATTACHMENT));
        }
        writer.write_status(status);
        let copied = io::copy(&mut reader, &mut BodyWriter(&mut *writer));
        drop(reader);
        let copied = copied?;
        debug!(route = template, status = status.as_u16(), bytes = copied, "stream written");
        return Ok(true);
    }

    writer.write_status(status);
    writer.write_body(&body)?;
    debug!(route = template, status = status.as_u16(), "response written");
    Ok(true)
}

fn reject_record(template: &str, failure: ValidationFailure, writer: &mut dyn ResponseWriter) -> Error {
    warn!(route = template, status = 422, error = %failure, "validation failed");
    writer.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    writer.write_status(StatusCode::UNPROCESSABLE_ENTITY);
    write_quietly(writer, &failure.body());
    Error::Validation(failure)
}

/// Writes a middleware's short-circuit response.
fn write_custom(custom: &CustomResponse, writer: &mut dyn ResponseWriter) -> Result<(), Error> {
    custom.copy_headers(writer);
    if let Some(status) = custom.status() {
        writer.write_status(status);
    }
    if !custom.body().is_empty() {
        writer.write_body(custom.body())?;
    }
    Ok(())
}

/// Error text for failure responses. The failure is already being reported,
/// so a broken connection here is only logged.
fn write_text(writer: &mut dyn ResponseWriter, text: &str) {
    writer.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    write_quietly(writer, text.as_bytes());
}

fn write_quietly(writer: &mut dyn ResponseWriter, body: &[u8]) {
    if let Err(e) = writer.write_body(body) {
        debug!(error = %e, "failed to write error body");
    }
}

// ── Builders ──────────────────────────────────────────────────────────────────

/// Engine settings.
#[derive(Debug, Default)]
pub struct EngineBuilder {
    prefix: String,
    verbose_errors: bool,
    cors: Cors,
    validator: Validator,
}

impl EngineBuilder {
    /// Path prefix stripped before routing, e.g. `/api`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Echo binding and middleware error text in failure responses, and
    /// handler error text a second time.
    pub fn verbose_errors(mut self, verbose: bool) -> Self {
        self.verbose_errors = verbose;
        self
    }

    /// Adds an origin to the CORS allow-list. `"*"` allows every origin.
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors.allow(origin);
        self
    }

    /// Validator used for every typed route.
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            registry: Registry::new(),
            cors: self.cors,
            prefix: self.prefix,
            verbose_errors: self.verbose_errors,
            validator: self.validator,
        }
    }
}

impl From<Config> for EngineBuilder {
    fn from(config: Config) -> Self {
        config
            .cors_origins
            .into_iter()
            .fold(Engine::builder(), |builder, origin| builder.allow_origin(origin))
            .prefix(config.prefix)
            .verbose_errors(config.verbose_errors)
    }
}

/// A registration in progress, created by [`Engine::route`].
#[must_use = "a route is only added by calling `register`"]
pub struct RouteBuilder<'e> {
    engine: &'e Engine,
    route: Route,
}

impl<'e> RouteBuilder<'e> {
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.route.middlewares.push(middleware);
        self
    }

    pub fn register(self) -> &'e Engine {
        self.engine.registry.register(self.route);
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ok, HandlerResult};
    use crate::response::BufferedResponse;
    use bytes::Bytes;

    fn pong(_: &Params, _: &Request) -> HandlerResult<&'static str> {
        ok("pong")
    }

    fn request(method: http::Method, uri: &str) -> Request {
        http::Request::builder().method(method).uri(uri).body(Bytes::new()).unwrap()
    }

    #[test]
    fn builder_settings_reach_the_engine() {
        let engine = Engine::builder().prefix("/api").verbose_errors(true).build();
        assert_eq!(engine.prefix(), "/api");
        assert!(engine.verbose_errors());

        let engine = Engine::new();
        assert_eq!(engine.prefix(), "");
        assert!(!engine.verbose_errors());
    }

    #[test]
    fn config_converts_into_builder() {
        let config = Config {
            prefix: "/v1".into(),
            verbose_errors: true,
            cors_origins: vec!["https://a.com".into()],
        };
        let engine = Engine::from_config(config);
        assert_eq!(engine.prefix(), "/v1");
        assert!(engine.verbose_errors());
        assert!(engine.cors.is_allowed(Some("https://a.com")));
    }

    #[test]
    fn unroutable_methods_are_not_handled() {
        let engine = Engine::new();
        engine.get("/ping", pong, []);

        for method in [http::Method::DELETE, http::Method::PATCH, http::Method::OPTIONS] {
            let mut res = BufferedResponse::new();
            assert!(!engine.run(&request(method, "/ping"), &mut res).unwrap());
            assert!(res.body().is_empty());
        }
    }

    #[test]
    fn route_builder_registers_with_middlewares() {
        let engine = Engine::new();
        engine
            .route(Method::Get, "/ping", pong)
            .middleware(crate::middleware::from_fn(|_, _, _| {
                Ok(Some(CustomResponse::new().set_status(StatusCode::FORBIDDEN)))
            }))
            .register();

        let mut res = BufferedResponse::new();
        assert!(engine.run(&request(http::Method::GET, "/ping"), &mut res).unwrap());
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn registration_chains() {
        let engine = Engine::new();
        engine.get("/a", pong, []).post("/b", pong, []);

        let mut res = BufferedResponse::new();
        assert!(engine.run(&request(http::Method::POST, "/b"), &mut res).unwrap());
        assert_eq!(res.text(), "pong");
        assert_eq!(res.header("content-type"), Some("text/html"));
    }
}
