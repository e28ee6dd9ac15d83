//! # tessel
//!
//! A per-request HTTP routing and dispatch engine for hosts that already own
//! the server loop.
//!
//! ## The contract
//!
//! The host accepts connections, terminates TLS and reads request bodies.
//! tessel does not. It takes one complete request and a place to write the
//! response, and does the part that changes between applications:
//!
//! - Path templates: `/users/{id}` captures one segment per placeholder
//! - Binding: query strings, form bodies and JSON bodies into [`Params`] or a
//!   typed record
//! - Validation: declared rules, failures reported by wire name
//! - Middlewares: per-route chains that can pass data on or answer early
//! - Responses: text, JSON or streamed payloads, with [`CustomResponse`]
//!   overrides
//! - CORS: origin allow-list and preflight answers
//!
//! A small hyper host ([`Server`]) is bundled for services that have nothing
//! else in front.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde::{Deserialize, Serialize};
//! use tessel::{ok, Engine, HandlerResult, Json, Params, Request, Rules, Server, Validate};
//!
//! #[derive(Deserialize, Serialize)]
//! struct NewUser {
//!     name: String,
//! }
//!
//! impl Validate for NewUser {
//!     fn validate(&self, rules: &mut Rules<'_>) {
//!         rules.field("name", &self.name).required().max(40);
//!     }
//! }
//!
//! fn get_user(params: &Params, _: &Request) -> HandlerResult<String> {
//!     ok(format!("user {}", params.string("id", "unknown")))
//! }
//!
//! fn create_user(user: NewUser, _: &Params, _: &Request) -> HandlerResult<Json<NewUser>> {
//!     ok(Json(user))
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = Engine::builder().prefix("/api").build();
//!     engine
//!         .get("/users/{id}", get_user, [])
//!         .post("/users", create_user, []);
//!
//!     Server::bind(([0, 0, 0, 0], 3000)).serve(Arc::new(engine)).await.unwrap();
//! }
//! ```

mod config;
mod cors;
mod engine;
mod error;
mod extract;
mod handler;
mod method;
mod params;
mod registry;
mod request;
mod response;
mod server;
mod template;
mod validation;
mod value;

pub mod middleware;

pub use config::Config;
pub use engine::{Engine, EngineBuilder, RouteBuilder};
pub use error::{BindError, BoxError, CoercionError, Error, ParamError};
pub use handler::{ok, Handler, HandlerResult, IntoPayload, Json, Payload, Reply, RouteHandler, Simple, Typed};
pub use method::Method;
pub use middleware::{Bound, Middleware, MiddlewareResult};
pub use params::Params;
pub use request::{Request, RequestExt};
pub use response::{BufferedResponse, CustomResponse, ResponseWriter};
pub use server::{serve_listener, Server};
pub use template::PathMatcher;
pub use validation::{check_wire_names, field_path, Field, FieldError, FieldPath, FieldRules, Measure, Rules, Validate, ValidationFailure, Validator};
pub use value::Value;
