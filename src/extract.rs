//! Binding request data.
//!
//! `GET` reads the query string. `POST` reads a JSON body when the media type
//! is `application/json`, a form body when it is
//! `application/x-www-form-urlencoded`, and nothing otherwise. Flat values are
//! always strings; typed routes get them through a JSON round trip, so a
//! record only binds from a query or form when all its fields accept strings.

use std::collections::HashMap;

use tracing::debug;
use url::form_urlencoded;

use crate::error::BindError;
use crate::handler::{BoundRecord, RecordEndpoint};
use crate::method::Method;
use crate::request::{Request, RequestExt};
use crate::value::Value;

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";

/// What the route wants bound.
#[derive(Clone, Copy)]
pub(crate) enum Target<'a> {
    Params,
    Record(&'a dyn RecordEndpoint),
}

/// Outcome of binding. A JSON body bound to a record has no flat values; a
/// query or form whose values do not fit the record has no record.
#[derive(Default)]
pub(crate) struct Extracted {
    pub(crate) values: Option<HashMap<String, Value>>,
    pub(crate) record: Option<Box<dyn BoundRecord>>,
}

pub(crate) fn read_values(req: &Request, method: Method, target: Target<'_>) -> Result<Extracted, BindError> {
    let values = match method {
        Method::Get => flat(form_urlencoded::parse(req.uri().query().unwrap_or_default().as_bytes())),
        Method::Post => match req.media_type().as_deref() {
            Some(JSON) => return read_json(req.body(), target),
            Some(FORM) => {
                check_form(req.body())?;
                flat(form_urlencoded::parse(req.body()))
            }
            _ => HashMap::new(),
        },
    };

    Ok(match target {
        Target::Params => Extracted { values: Some(values), record: None },
        Target::Record(endpoint) => coerce(values, endpoint),
    })
}

fn read_json(body: &[u8], target: Target<'_>) -> Result<Extracted, BindError> {
    match target {
        Target::Record(endpoint) => Ok(Extracted { values: None, record: Some(endpoint.decode_json(body)?) }),
        Target::Params => {
            let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)?;
            let values = object.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect();
            Ok(Extracted { values: Some(values), record: None })
        }
    }
}

/// The wire name serde reports for a field a JSON body left out.
pub(crate) fn missing_field(e: &BindError) -> Option<String> {
    let BindError::Json(e) = e else {
        return None;
    };
    if !e.is_data() {
        return None;
    }
    let message = e.to_string();
    let (name, _) = message.strip_prefix("missing field `")?.split_once('`')?;
    Some(name.to_owned())
}

fn coerce(values: HashMap<String, Value>, endpoint: &dyn RecordEndpoint) -> Extracted {
    let record = match endpoint.decode_map(&values) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(record = endpoint.record_type(), error = %e, "flat values do not fit record");
            None
        }
    };
    Extracted { values: Some(values), record }
}

/// First value wins for repeated keys.
fn flat<'a>(pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>) -> HashMap<String, Value> {
    let mut values = HashMap::new();
    for (key, value) in pairs {
        values
            .entry(key.into_owned())
            .or_insert_with(|| Value::Str(value.into_owned()));
    }
    values
}

/// Rejects bodies that are not UTF-8 or carry malformed `%` escapes.
fn check_form(body: &[u8]) -> Result<(), BindError> {
    let text = std::str::from_utf8(body).map_err(|e| BindError::Form(e.to_string()))?;

    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                let end = (i + 3).min(bytes.len());
                let shown = String::from_utf8_lossy(&bytes[i..end]);
                return Err(BindError::Form(format!("invalid URL escape {shown:?}")));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}
