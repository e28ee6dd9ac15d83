//! Minimal tessel example: JSON and text endpoints, a typed form, an auth
//! middleware and a file download.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl 'http://localhost:3000/api/hello?name=alice'
//!   curl http://localhost:3000/api/users/42
//!   curl -X POST http://localhost:3000/api/users \
//!        -H 'content-type: application/json' \
//!        -H 'authorization: Bearer demo' \
//!        -d '{"userName":"alice","email":"alice@example.com"}'
//!   curl -X POST http://localhost:3000/api/users \
//!        -H 'content-type: application/json' \
//!        -H 'authorization: Bearer demo' \
//!        -d '{"userName":"","email":"nope"}'
//!   curl http://localhost:3000/api/download

use std::io::Cursor;
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tessel::middleware::{self, Bound};
use tessel::{
    ok, Config, CustomResponse, Engine, Field, HandlerResult, Json, Params, Payload, Reply, Request,
    RequestExt, Rules, Server, Validate,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config {
        prefix: "/api".into(),
        verbose_errors: true,
        cors_origins: vec!["*".into()],
    };
    let engine = Engine::from_config(config);

    let auth = middleware::from_fn(|_: Bound<'_>, params, req| match req.header_str("authorization") {
        Some(token) => {
            params.set_additional("token", token);
            Ok(None)
        }
        None => Ok(Some(
            CustomResponse::new()
                .set_status(StatusCode::UNAUTHORIZED)
                .set_body_string("missing authorization"),
        )),
    });

    engine
        .get("/hello",      hello,       [])
        .get("/users/{id}", get_user,    [])
        .post("/users",     create_user, [auth])
        .get("/download",   download,    []);

    if let Err(e) = Server::bind(([0, 0, 0, 0], 3000)).serve(Arc::new(engine)).await {
        tracing::error!("server error: {e}");
    }
}

// GET /hello?name=..
fn hello(params: &Params, _: &Request) -> HandlerResult<Json<serde_json::Value>> {
    ok(Json(json!({ "hello": params.string("name", "world") })))
}

// GET /users/{id}
fn get_user(params: &Params, _: &Request) -> HandlerResult<String> {
    let id = params.int("id")?;
    ok(format!("<h1>user {id}</h1>"))
}

#[derive(Debug, Deserialize, Serialize)]
struct NewUser {
    #[serde(rename = "userName")]
    name: String,
    email: String,
}

impl Validate for NewUser {
    const FIELDS: &'static [Field] = &[Field::new("name").wire("userName"), Field::new("email")];

    fn validate(&self, rules: &mut Rules<'_>) {
        rules.field("name", &self.name).required().max(40);
        rules.field("email", &self.email).required().email();
    }
}

// POST /users → 201 with a location header
fn create_user(user: NewUser, _: &Params, _: &Request) -> HandlerResult<Json<NewUser>> {
    let created = CustomResponse::new()
        .set_status(StatusCode::CREATED)
        .set_header("content-type", "application/json")
        .set_header("location", "/api/users/99");
    Ok(Reply::new(Json(user)).with_custom(created))
}

// GET /download → streamed as an attachment
fn download(_: &Params, _: &Request) -> HandlerResult<Payload> {
    ok(Payload::stream(Cursor::new(b"hello from tessel\n".to_vec())))
}
