//! End-to-end dispatch through `Engine::run` with an in-memory response.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tessel::middleware::{self, Bound};
use tessel::{
    check_wire_names, ok, BindError, BufferedResponse, CustomResponse, Engine, Error, Field, HandlerResult, Json,
    Params, Payload, Reply, Request, Rules, Validate,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn get(uri: &str) -> Request {
    http::Request::get(uri).body(Bytes::new()).unwrap()
}

fn with_body(method: http::Method, uri: &str, content_type: &str, body: &str) -> Request {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", content_type)
        .body(Bytes::copy_from_slice(body.as_bytes()))
        .unwrap()
}

fn post_json(uri: &str, body: &str) -> Request {
    with_body(http::Method::POST, uri, "application/json", body)
}

fn post_form(uri: &str, body: &str) -> Request {
    with_body(http::Method::POST, uri, "application/x-www-form-urlencoded", body)
}

fn run(engine: &Engine, req: &Request) -> (Result<bool, Error>, BufferedResponse) {
    let mut res = BufferedResponse::new();
    let outcome = engine.run(req, &mut res);
    (outcome, res)
}

fn json_body(res: &BufferedResponse) -> JsonValue {
    serde_json::from_slice(res.body()).unwrap()
}

fn hello(params: &Params, _: &Request) -> HandlerResult<Json<JsonValue>> {
    ok(Json(json!({ "hello": params.string("name", "world") })))
}

fn page(_: &Params, _: &Request) -> HandlerResult<String> {
    ok("<p>hi</p>".to_owned())
}

fn echo_params(params: &Params, _: &Request) -> HandlerResult<Json<BTreeMap<String, tessel::Value>>> {
    ok(Json(params.data().clone().into_iter().collect()))
}

fn failing(_: &Params, _: &Request) -> HandlerResult<String> {
    Err("database unavailable".into())
}

#[derive(Debug, Deserialize)]
struct Point {
    x: i64,
    y: i64,
}

impl Validate for Point {}

fn sum(point: Point, _: &Params, _: &Request) -> HandlerResult<Json<JsonValue>> {
    ok(Json(json!({ "sum": point.x + point.y })))
}

#[derive(Debug, Deserialize, Serialize)]
struct Address {
    #[serde(rename = "zipCode")]
    zip_code: String,
}

impl Validate for Address {
    const FIELDS: &'static [Field] = &[Field::new("zip_code").wire("zipCode")];

    fn validate(&self, rules: &mut Rules<'_>) {
        rules.field("zip_code", &self.zip_code).required().len(5);
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Signup {
    #[serde(rename = "userName")]
    name: String,
    #[serde(default)]
    age: u32,
    #[serde(rename = "addr")]
    address: Option<Address>,
}

impl Validate for Signup {
    const FIELDS: &'static [Field] = &[
        Field::new("name").wire("userName"),
        Field::new("age"),
        Field::new("address").wire("addr").record(Address::FIELDS),
    ];

    fn validate(&self, rules: &mut Rules<'_>) {
        rules.field("name", &self.name).required();
        rules.field("age", &self.age).gte(18);
        rules.nested("address", &self.address);
    }
}

fn signup(user: Signup, _: &Params, _: &Request) -> HandlerResult<String> {
    ok(format!("welcome {}", user.name))
}

// ── Routing and binding ───────────────────────────────────────────────────────

#[test]
fn query_values_reach_simple_handlers() {
    let engine = Engine::new();
    engine.get("/hello", hello, []);

    let (outcome, res) = run(&engine, &get("/hello?name=alice"));
    assert!(outcome.unwrap());
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.header("content-type"), Some("application/json"));
    assert_eq!(json_body(&res), json!({ "hello": "alice" }));

    let (_, res) = run(&engine, &get("/hello"));
    assert_eq!(json_body(&res), json!({ "hello": "world" }));
}

#[test]
fn strings_are_written_as_html() {
    let engine = Engine::new();
    engine.get("/page", page, []);

    let (outcome, res) = run(&engine, &get("/page"));
    assert!(outcome.unwrap());
    assert_eq!(res.header("content-type"), Some("text/html"));
    assert_eq!(res.text(), "<p>hi</p>");
}

#[test]
fn json_bodies_bind_typed_records() {
    let engine = Engine::new();
    engine.post("/sum", sum, []);

    let (outcome, res) = run(&engine, &post_json("/sum", r#"{"x": 2, "y": 40}"#));
    assert!(outcome.unwrap());
    assert_eq!(json_body(&res), json!({ "sum": 42 }));
}

#[test]
fn form_bodies_bind_params() {
    let engine = Engine::new();
    engine.post("/echo", echo_params, []);

    let (outcome, res) = run(&engine, &post_form("/echo", "a=1&b=two&a=3"));
    assert!(outcome.unwrap());
    assert_eq!(json_body(&res), json!({ "a": "1", "b": "two" }));
}

#[test]
fn json_bodies_bind_params_on_simple_routes() {
    let engine = Engine::new();
    engine.post("/echo", echo_params, []);

    let (_, res) = run(&engine, &post_json("/echo", r#"{"n": 5, "flag": true}"#));
    assert_eq!(json_body(&res), json!({ "n": 5, "flag": true }));
}

#[test]
fn unknown_routes_are_not_handled() {
    let engine = Engine::new();
    engine.get("/hello", hello, []);

    for req in [get("/nope"), post_json("/hello", "{}"), get("/hello/")] {
        let (outcome, res) = run(&engine, &req);
        assert!(!outcome.unwrap());
        assert!(res.body().is_empty());
        assert!(res.headers().is_empty());
    }
}

#[test]
fn path_captures_are_params() {
    let engine = Engine::new();
    engine.get("/users/{id}/posts/{postId}", echo_params, []);

    let (_, res) = run(&engine, &get("/users/7/posts/99?id=ignored&q=x"));
    assert_eq!(json_body(&res), json!({ "id": "7", "postId": "99", "q": "x" }));
}

#[test]
fn prefix_is_stripped_before_routing() {
    let engine = Engine::builder().prefix("/api").build();
    engine.get("/hello", hello, []);

    let (outcome, _) = run(&engine, &get("/api/hello"));
    assert!(outcome.unwrap());
    let (outcome, _) = run(&engine, &get("/api/other"));
    assert!(!outcome.unwrap());
}

#[test]
fn put_is_routed_as_post() {
    let engine = Engine::new();
    engine.post("/sum", sum, []);

    let req = with_body(http::Method::PUT, "/sum", "application/json", r#"{"x": 1, "y": 1}"#);
    let (outcome, res) = run(&engine, &req);
    assert!(outcome.unwrap());
    assert_eq!(json_body(&res), json!({ "sum": 2 }));
}

// ── Failures ──────────────────────────────────────────────────────────────────

#[test]
fn handler_errors_are_500_with_the_message() {
    let engine = Engine::new();
    engine.get("/fail", failing, []);

    let (outcome, res) = run(&engine, &get("/fail"));
    let err = outcome.unwrap_err();
    assert!(matches!(err, Error::Handler(_)));
    assert!(err.is_handled());
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.text(), "database unavailable");

    let verbose = Engine::builder().verbose_errors(true).build();
    verbose.get("/fail", failing, []);
    let (_, res) = run(&verbose, &get("/fail"));
    assert_eq!(res.text(), "database unavailabledatabase unavailable");
}

#[test]
fn malformed_json_is_400() {
    let engine = Engine::new();
    engine.post("/sum", sum, []);

    let (outcome, res) = run(&engine, &post_json("/sum", "{broken"));
    assert!(matches!(outcome, Err(Error::Binding(BindError::Json(_)))));
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.body().is_empty());

    let verbose = Engine::builder().verbose_errors(true).build();
    verbose.post("/sum", sum, []);
    let (_, res) = run(&verbose, &post_json("/sum", "{broken"));
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(!res.body().is_empty());
}

#[test]
fn query_that_does_not_fit_the_record_is_400() {
    let engine = Engine::new();
    engine.get("/sum", sum, []);

    let (outcome, res) = run(&engine, &get("/sum?x=1&y=2"));
    assert!(matches!(outcome, Err(Error::Binding(BindError::Record(_)))));
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[test]
fn empty_payload_without_custom_response_is_500() {
    let engine = Engine::new();
    engine.get("/nothing", |_: &Params, _: &Request| ok(()), []);

    let (outcome, res) = run(&engine, &get("/nothing"));
    assert!(matches!(outcome, Err(Error::EmptyPayload)));
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn unserializable_payload_is_400() {
    let engine = Engine::new();
    engine.get(
        "/bad",
        |_: &Params, _: &Request| ok(Json(BTreeMap::from([(vec![1u8], 1)]))),
        [],
    );

    let (outcome, res) = run(&engine, &get("/bad"));
    assert!(matches!(outcome, Err(Error::Serialization(_))));
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.text().starts_with("error writing data: "));
}

// ── Validation ────────────────────────────────────────────────────────────────

#[test]
fn single_validation_failure_is_422_by_wire_name() {
    let engine = Engine::new();
    engine.post("/signup", signup, []);

    let (outcome, res) = run(&engine, &post_json("/signup", r#"{"userName": "", "age": 30}"#));
    assert!(matches!(outcome, Err(Error::Validation(_))));
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(res.header("content-type"), Some("application/json"));
    assert_eq!(json_body(&res), json!({ "error": "Field 'userName' is required" }));
}

#[test]
fn several_validation_failures_are_listed_with_nested_paths() {
    let engine = Engine::new();
    engine.post("/signup", signup, []);

    let body = r#"{"userName": "ann", "age": 12, "addr": {"zipCode": "1"}}"#;
    let (_, res) = run(&engine, &post_json("/signup", body));
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        json_body(&res),
        json!({
            "error": "validation errors",
            "list": [
                "Field 'age', requires 'gte' = '18'",
                "Field 'addr.zipCode', requires 'len' = '5'",
            ],
        })
    );
}

#[test]
fn missing_required_field_is_422_not_400() {
    let engine = Engine::new();
    engine.post("/signup", signup, []);

    let (outcome, res) = run(&engine, &post_json("/signup", "{}"));
    assert!(matches!(outcome, Err(Error::Validation(_))));
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(res.header("content-type"), Some("application/json"));
    assert_eq!(json_body(&res), json!({ "error": "Field 'userName' is required" }));
}

#[test]
fn signup_description_matches_serde_names() {
    let sample = Signup {
        name: "ann".into(),
        age: 30,
        address: Some(Address { zip_code: "12345".into() }),
    };
    assert_eq!(check_wire_names(&sample), Ok(()));
}

#[test]
fn valid_records_reach_the_handler() {
    let engine = Engine::new();
    engine.post("/signup", signup, []);

    let (outcome, res) = run(&engine, &post_json("/signup", r#"{"userName": "ann", "age": 30}"#));
    assert!(outcome.unwrap());
    assert_eq!(res.text(), "welcome ann");
}

// ── Custom responses and streams ──────────────────────────────────────────────

#[test]
fn custom_response_overrides_status_headers_and_body() {
    let engine = Engine::new();
    engine.get(
        "/created",
        |_: &Params, _: &Request| {
            let custom = CustomResponse::new()
                .set_status(StatusCode::CREATED)
                .add_header("location", "/things/1");
            Ok(Reply::new(Json(json!({ "id": 1 }))).with_custom(custom))
        },
        [],
    );
    engine.get(
        "/replaced",
        |_: &Params, _: &Request| {
            Ok(Reply::new("ignored").with_custom(CustomResponse::new().set_body_string("custom body")))
        },
        [],
    );

    let (_, res) = run(&engine, &get("/created"));
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(res.header("location"), Some("/things/1"));
    assert_eq!(res.header("content-type"), None);
    assert_eq!(json_body(&res), json!({ "id": 1 }));

    let (_, res) = run(&engine, &get("/replaced"));
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.header("content-type"), Some("text/html"));
    assert_eq!(res.text(), "custom body");
}

#[test]
fn custom_only_reply_is_not_an_empty_payload() {
    let engine = Engine::new();
    engine.get(
        "/gone",
        |_: &Params, _: &Request| Ok(Reply::custom_only(CustomResponse::new().set_status(StatusCode::GONE))),
        [],
    );

    let (outcome, res) = run(&engine, &get("/gone"));
    assert!(outcome.unwrap());
    assert_eq!(res.status(), StatusCode::GONE);
    assert!(res.body().is_empty());
}

#[test]
fn streams_are_downloads_unless_headers_are_customized() {
    let engine = Engine::new();
    engine.get(
        "/file",
        |_: &Params, _: &Request| ok(Payload::stream(Cursor::new(b"file body".to_vec()))),
        [],
    );
    engine.get(
        "/inline",
        |_: &Params, _: &Request| {
            let custom = CustomResponse::new().set_header("content-type", "text/plain");
            Ok(Reply::new(Payload::stream(Cursor::new(b"inline".to_vec()))).with_custom(custom))
        },
        [],
    );
    engine.get(
        "/replaced",
        |_: &Params, _: &Request| {
            let custom = CustomResponse::new().set_body_string("custom body");
            Ok(Reply::new(Payload::stream(Cursor::new(b"never copied".to_vec()))).with_custom(custom))
        },
        [],
    );
    engine.get(
        "/accepted",
        |_: &Params, _: &Request| {
            let custom = CustomResponse::new().set_status(StatusCode::ACCEPTED);
            Ok(Reply::new(Payload::stream(Cursor::new(b"later".to_vec()))).with_custom(custom))
        },
        [],
    );

    let (outcome, res) = run(&engine, &get("/file"));
    assert!(outcome.unwrap());
    assert_eq!(res.header("content-disposition"), Some("attachment; filename=\"file\""));
    assert_eq!(res.text(), "file body");

    let (_, res) = run(&engine, &get("/inline"));
    assert_eq!(res.header("content-disposition"), None);
    assert_eq!(res.header("content-type"), Some("text/plain"));
    assert_eq!(res.text(), "inline");

    let (outcome, res) = run(&engine, &get("/replaced"));
    assert!(outcome.unwrap());
    assert_eq!(res.header("content-disposition"), None);
    assert_eq!(res.text(), "custom body");

    let (_, res) = run(&engine, &get("/accepted"));
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(res.header("content-disposition"), Some("attachment; filename=\"file\""));
    assert_eq!(res.text(), "later");
}

// ── Middlewares ───────────────────────────────────────────────────────────────

#[test]
fn middlewares_pass_data_to_the_handler() {
    let engine = Engine::new();
    let tag = middleware::from_fn(|_, params, _| {
        params.set_additional("tenant", "acme");
        Ok(None)
    });
    engine.get(
        "/tenant",
        |params: &Params, _: &Request| {
            let tenant = params.additional("tenant").and_then(|v| v.as_str()).unwrap_or("none");
            ok(tenant.to_owned())
        },
        [tag],
    );

    let (_, res) = run(&engine, &get("/tenant"));
    assert_eq!(res.text(), "acme");
}

#[test]
fn middleware_short_circuit_skips_the_handler() {
    let engine = Engine::new();
    let deny = middleware::from_fn(|_, _, _| {
        Ok(Some(
            CustomResponse::new()
                .set_status(StatusCode::FORBIDDEN)
                .set_header("x-denied", "yes")
                .set_body_string("forbidden"),
        ))
    });
    let never = middleware::from_fn(|_, _, _| Err("second middleware must not run".into()));
    engine.get("/fail", failing, [deny, never]);

    let (outcome, res) = run(&engine, &get("/fail"));
    assert!(outcome.unwrap());
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.header("x-denied"), Some("yes"));
    assert_eq!(res.text(), "forbidden");
}

#[test]
fn middleware_errors_are_500() {
    let boom = || middleware::from_fn(|_, _, _| Err("token expired".into()));

    let engine = Engine::new();
    engine.get("/hello", hello, [boom()]);
    let (outcome, res) = run(&engine, &get("/hello"));
    assert!(matches!(outcome, Err(Error::Middleware(_))));
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(res.body().is_empty());

    let verbose = Engine::builder().verbose_errors(true).build();
    verbose.get("/hello", hello, [boom()]);
    let (_, res) = run(&verbose, &get("/hello"));
    assert_eq!(res.text(), "token expired");
}

#[test]
fn middlewares_see_the_bound_record() {
    let engine = Engine::new();
    let only_small = middleware::from_fn(|bound: Bound<'_>, _, _| {
        let too_big = bound.record::<Point>().is_some_and(|p| p.x > 100);
        Ok(too_big.then(|| CustomResponse::new().set_status(StatusCode::PAYLOAD_TOO_LARGE)))
    });
    engine.post("/sum", sum, [only_small]);

    let (_, res) = run(&engine, &post_json("/sum", r#"{"x": 1000, "y": 1}"#));
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let (_, res) = run(&engine, &post_json("/sum", r#"{"x": 1, "y": 1}"#));
    assert_eq!(res.status(), StatusCode::OK);
}

// ── CORS ──────────────────────────────────────────────────────────────────────

fn with_origin(mut req: Request, origin: &str) -> Request {
    req.headers_mut().insert("origin", origin.parse().unwrap());
    req
}

fn options(uri: &str, origin: &str) -> Request {
    let req = http::Request::builder()
        .method(http::Method::OPTIONS)
        .uri(uri)
        .body(Bytes::new())
        .unwrap();
    with_origin(req, origin)
}

#[test]
fn allowed_origins_get_the_allow_origin_header() {
    let engine = Engine::builder().allow_origin("https://app.example").build();
    engine.get("/hello", hello, []);

    let (_, res) = run(&engine, &with_origin(get("/hello"), "https://app.example"));
    assert_eq!(res.header("access-control-allow-origin"), Some("https://app.example"));

    let (outcome, res) = run(&engine, &with_origin(get("/hello"), "https://evil.example"));
    assert!(outcome.unwrap());
    assert_eq!(res.header("access-control-allow-origin"), None);
}

#[test]
fn wildcard_without_origin_header_allows_any() {
    let engine = Engine::builder().allow_origin("*").build();
    engine.get("/hello", hello, []);

    let (_, res) = run(&engine, &get("/hello"));
    assert_eq!(res.header("access-control-allow-origin"), Some("*"));
}

#[test]
fn preflight_is_answered_for_known_routes() {
    let engine = Engine::builder().allow_origin("*").build();
    engine.post("/sum", sum, []);

    let (outcome, res) = run(&engine, &options("/sum", "https://app.example"));
    assert!(outcome.unwrap());
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.header("access-control-allow-origin"), Some("https://app.example"));
    assert_eq!(res.header("access-control-allow-methods"), Some("GET, POST, PUT, OPTIONS"));
    assert_eq!(
        res.header("access-control-allow-headers"),
        Some("Content-Type, Authorization, X-Requested-With")
    );

    let (outcome, _) = run(&engine, &options("/unknown", "https://app.example"));
    assert!(!outcome.unwrap());
}

// ── Sharing ───────────────────────────────────────────────────────────────────

#[test]
fn engine_serves_and_registers_from_many_threads() {
    let engine = Arc::new(Engine::new());
    engine.get("/items/{id}", echo_params, []);

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let engine = Arc::clone(&engine);
            scope.spawn(move || {
                engine.get(&format!("/worker/{worker}"), page, []);
                for i in 0..50 {
                    let (outcome, res) = run(&engine, &get(&format!("/items/{i}")));
                    assert!(outcome.unwrap());
                    assert_eq!(json_body(&res), json!({ "id": i.to_string() }));
                }
            });
        }
    });

    for worker in 0..8 {
        let (outcome, _) = run(&engine, &get(&format!("/worker/{worker}")));
        assert!(outcome.unwrap());
    }
}
