//! Per-request parameter accessor.

use std::collections::HashMap;

use crate::error::ParamError;
use crate::value::Value;

/// Typed reads over the values bound from a request.
///
/// `data` holds the query string, form body or JSON object fields, with path
/// captures merged on top. `additional` is never filled from the request; it
/// exists so middlewares can hand values (an authenticated user id, a tenant)
/// to the handler that runs after them.
///
/// ```rust
/// use std::collections::HashMap;
/// use tessel::{Params, Value};
///
/// let params = Params::new(HashMap::from([("page".to_owned(), Value::from("3"))]));
/// assert_eq!(params.int("page"), Ok(3));
/// assert!(params.float_or_nan("missing").is_nan());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Params {
    data: HashMap<String, Value>,
    additional: HashMap<String, Value>,
}

impl Params {
    pub fn new(data: HashMap<String, Value>) -> Self {
        Self { data, additional: HashMap::new() }
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn float(&self, key: &str) -> Result<f64, ParamError> {
        Ok(self.require(key)?.as_float()?)
    }

    /// Like [`Params::float`], but a missing key or an unconvertible value
    /// both read as NaN.
    pub fn float_or_nan(&self, key: &str) -> f64 {
        self.data
            .get(key)
            .and_then(|v| v.as_float().ok())
            .unwrap_or(f64::NAN)
    }

    pub fn int(&self, key: &str) -> Result<i64, ParamError> {
        Ok(self.require(key)?.as_int()?)
    }

    /// `true` only for a boolean `true` or the string `"true"`. Absent keys
    /// are `false`.
    pub fn bool(&self, key: &str) -> bool {
        self.data.get(key).is_some_and(Value::as_bool)
    }

    /// The string under `key`, or `default` when the key is absent or holds
    /// something other than a string.
    pub fn string<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.data.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn set_additional(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.additional.insert(key.into(), value.into());
    }

    pub fn additional(&self, key: &str) -> Option<&Value> {
        self.additional.get(key)
    }

    /// Path captures win over same-named query or form values.
    pub(crate) fn merge_path_params(&mut self, captures: HashMap<String, String>) {
        self.data.extend(captures.into_iter().map(|(k, v)| (k, Value::Str(v))));
    }

    fn require(&self, key: &str) -> Result<&Value, ParamError> {
        self.data
            .get(key)
            .ok_or_else(|| ParamError::KeyNotFound(key.to_owned()))
    }
}
