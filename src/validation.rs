//! Declarative validation of bound records.
//!
//! A record type describes its fields once through [`Validate::FIELDS`] (the
//! declared name, the wire name it travels under, and the description of a
//! nested record) and states its rules in [`Validate::validate`]:
//!
//! ```rust
//! use serde::Deserialize;
//! use tessel::{Field, Rules, Validate, Validator};
//!
//! #[derive(Deserialize)]
//! struct Address {
//!     #[serde(rename = "zipCode")]
//!     zip_code: String,
//! }
//!
//! impl Validate for Address {
//!     const FIELDS: &'static [Field] = &[Field::new("zip_code").wire("zipCode")];
//!
//!     fn validate(&self, rules: &mut Rules<'_>) {
//!         rules.field("zip_code", &self.zip_code).required().len(5);
//!     }
//! }
//!
//! #[derive(Deserialize)]
//! struct Signup {
//!     name: String,
//!     address: Address,
//! }
//!
//! impl Validate for Signup {
//!     const FIELDS: &'static [Field] = &[
//!         Field::new("name"),
//!         Field::new("address").record(Address::FIELDS),
//!     ];
//!
//!     fn validate(&self, rules: &mut Rules<'_>) {
//!         rules.field("name", &self.name).required().min(2);
//!         rules.nested("address", &self.address);
//!     }
//! }
//!
//! let signup = Signup { name: "al".into(), address: Address { zip_code: "123".into() } };
//! let failure = Validator::new().validate(&signup).unwrap_err();
//! assert_eq!(failure.messages(), ["Field 'address.zipCode', requires 'len' = '5'"]);
//! ```
//!
//! Failures are reported by wire name so clients see the names they sent.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, trace, warn};

// ── Type description ──────────────────────────────────────────────────────────

/// One field of a record, as seen by error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub wire: Option<&'static str>,
    pub nested: Option<&'static [Field]>,
}

impl Field {
    pub const fn new(name: &'static str) -> Self {
        Self { name, wire: None, nested: None }
    }

    /// The name the field has in JSON and form data.
    pub const fn wire(mut self, wire: &'static str) -> Self {
        self.wire = Some(wire);
        self
    }

    /// The description of the record held by this field.
    pub const fn record(mut self, fields: &'static [Field]) -> Self {
        self.nested = Some(fields);
        self
    }

    fn wire_name(&self) -> &'static str {
        self.wire.unwrap_or(self.name)
    }
}

/// A record that can be checked before it reaches its handler.
///
/// Both items default to "nothing": a record without rules always passes.
pub trait Validate {
    const FIELDS: &'static [Field] = &[];

    fn validate(&self, rules: &mut Rules<'_>) {
        let _ = rules;
    }
}

impl<T: Validate> Validate for Option<T> {
    const FIELDS: &'static [Field] = T::FIELDS;

    fn validate(&self, rules: &mut Rules<'_>) {
        if let Some(inner) = self {
            inner.validate(rules);
        }
    }
}

// ── Measure ───────────────────────────────────────────────────────────────────

/// How rules see a field value.
///
/// `size` is the number itself for numbers and the length for strings
/// (in chars) and sequences. `text` is only present for strings.
pub trait Measure {
    fn is_zero(&self) -> bool;

    fn size(&self) -> Option<f64>;

    fn text(&self) -> Option<&str> {
        None
    }

    /// Absent values skip every rule except `required`.
    fn is_absent(&self) -> bool {
        false
    }
}

impl Measure for str {
    fn is_zero(&self) -> bool { self.is_empty() }
    fn size(&self) -> Option<f64> { Some(self.chars().count() as f64) }
    fn text(&self) -> Option<&str> { Some(self) }
}

impl Measure for String {
    fn is_zero(&self) -> bool { self.is_empty() }
    fn size(&self) -> Option<f64> { self.as_str().size() }
    fn text(&self) -> Option<&str> { Some(self) }
}

impl Measure for bool {
    fn is_zero(&self) -> bool { !*self }
    fn size(&self) -> Option<f64> { None }
}

impl<T> Measure for [T] {
    fn is_zero(&self) -> bool { self.is_empty() }
    fn size(&self) -> Option<f64> { Some(self.len() as f64) }
}

impl<T> Measure for Vec<T> {
    fn is_zero(&self) -> bool { self.is_empty() }
    fn size(&self) -> Option<f64> { Some(self.len() as f64) }
}

impl<T: Measure + ?Sized> Measure for &T {
    fn is_zero(&self) -> bool { (**self).is_zero() }
    fn size(&self) -> Option<f64> { (**self).size() }
    fn text(&self) -> Option<&str> { (**self).text() }
    fn is_absent(&self) -> bool { (**self).is_absent() }
}

impl<T: Measure> Measure for Option<T> {
    fn is_zero(&self) -> bool { self.is_none() }
    fn size(&self) -> Option<f64> { self.as_ref().and_then(Measure::size) }
    fn text(&self) -> Option<&str> { self.as_ref().and_then(Measure::text) }
    fn is_absent(&self) -> bool { self.is_none() }
}

macro_rules! measure_number {
    ($($ty:ty),*) => {$(
        impl Measure for $ty {
            fn is_zero(&self) -> bool { *self == 0 as $ty }
            fn size(&self) -> Option<f64> { Some(*self as f64) }
        }
    )*};
}

measure_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

// ── Rules ─────────────────────────────────────────────────────────────────────

/// A rule that did not hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Declared names of the enclosing fields, outermost first.
    pub namespace: Vec<&'static str>,
    /// Declared name of the failing field, or its wire name when the field
    /// was missing from a JSON body and is not described.
    pub field: Cow<'static, str>,
    pub tag: &'static str,
    pub param: String,
}

/// Collects rule failures for one record.
pub struct Rules<'v> {
    validator: &'v Validator,
    namespace: Vec<&'static str>,
    errors: Vec<FieldError>,
}

impl<'v> Rules<'v> {
    fn new(validator: &'v Validator) -> Self {
        Self { validator, namespace: Vec::new(), errors: Vec::new() }
    }

    /// Starts a rule chain for one field. The chain stops at the first rule
    /// that fails.
    pub fn field<'r, V: Measure + ?Sized>(&'r mut self, name: &'static str, value: &'r V) -> FieldRules<'r, 'v, V> {
        FieldRules { rules: self, name, value, failed: false }
    }

    /// Runs the rules of a nested record under `name`.
    pub fn nested<T: Validate + ?Sized>(&mut self, name: &'static str, value: &T) -> &mut Self {
        self.namespace.push(name);
        value.validate(self);
        self.namespace.pop();
        self
    }

    /// Records a failure of an application-defined rule when `passed` is false.
    pub fn custom(&mut self, name: &'static str, tag: &'static str, param: impl Into<String>, passed: bool) -> &mut Self {
        if !passed {
            self.push(name, tag, param.into());
        }
        self
    }

    fn push(&mut self, field: &'static str, tag: &'static str, param: String) {
        trace!(field, tag, param = %param, "validation rule failed");
        self.errors.push(FieldError { namespace: self.namespace.clone(), field: Cow::Borrowed(field), tag, param });
    }
}

/// Rule chain for a single field, created by [`Rules::field`].
pub struct FieldRules<'r, 'v, V: ?Sized> {
    rules: &'r mut Rules<'v>,
    name: &'static str,
    value: &'r V,
    failed: bool,
}

impl<V: Measure + ?Sized> FieldRules<'_, '_, V> {
    pub fn required(self) -> Self {
        self.check("required", String::new(), |v| !v.is_zero())
    }

    pub fn min(self, n: impl Into<f64>) -> Self {
        let n = n.into();
        self.check("min", n.to_string(), |v| v.size().is_some_and(|s| s >= n))
    }

    pub fn max(self, n: impl Into<f64>) -> Self {
        let n = n.into();
        self.check("max", n.to_string(), |v| v.size().is_some_and(|s| s <= n))
    }

    pub fn len(self, n: impl Into<f64>) -> Self {
        let n = n.into();
        self.check("len", n.to_string(), |v| v.size() == Some(n))
    }

    pub fn gt(self, n: impl Into<f64>) -> Self {
        let n = n.into();
        self.check("gt", n.to_string(), |v| v.size().is_some_and(|s| s > n))
    }

    pub fn gte(self, n: impl Into<f64>) -> Self {
        let n = n.into();
        self.check("gte", n.to_string(), |v| v.size().is_some_and(|s| s >= n))
    }

    pub fn lt(self, n: impl Into<f64>) -> Self {
        let n = n.into();
        self.check("lt", n.to_string(), |v| v.size().is_some_and(|s| s < n))
    }

    pub fn lte(self, n: impl Into<f64>) -> Self {
        let n = n.into();
        self.check("lte", n.to_string(), |v| v.size().is_some_and(|s| s <= n))
    }

    /// Strings must equal `param`; numbers and lengths must equal it as a
    /// number.
    pub fn eq(self, param: impl fmt::Display) -> Self {
        let param = param.to_string();
        let expected = param.clone();
        self.check("eq", param, move |v| same(v, &expected))
    }

    pub fn ne(self, param: impl fmt::Display) -> Self {
        let param = param.to_string();
        let expected = param.clone();
        self.check("ne", param, move |v| !same(v, &expected))
    }

    /// Strings must be one of `options`; numbers must print as one of them.
    pub fn oneof(self, options: &[&str]) -> Self {
        let param = options.join(" ");
        self.check("oneof", param, |v| match v.text() {
            Some(text) => options.iter().any(|o| *o == text),
            None => v.size().is_some_and(|s| {
                let printed = s.to_string();
                options.iter().any(|o| *o == printed)
            }),
        })
    }

    pub fn email(self) -> Self {
        self.check("email", String::new(), |v| v.text().is_some_and(is_email))
    }

    pub fn url(self) -> Self {
        self.check("url", String::new(), |v| {
            v.text().is_some_and(|text| url::Url::parse(text).is_ok())
        })
    }

    pub fn alphanum(self) -> Self {
        self.check("alphanum", String::new(), |v| {
            v.text()
                .is_some_and(|text| !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric()))
        })
    }

    /// Matches the text against the pattern registered under `tag` with
    /// [`Validator::register_pattern`]. An unknown tag always fails.
    pub fn pattern(self, tag: &'static str) -> Self {
        let regex = self.rules.validator.patterns.get(tag).cloned();
        if regex.is_none() {
            warn!(tag, "no pattern registered for validation tag");
        }
        let param = regex.as_ref().map(|r| r.as_str().to_owned()).unwrap_or_default();
        self.check(tag, param, |v| {
            matches!((&regex, v.text()), (Some(regex), Some(text)) if regex.is_match(text))
        })
    }

    fn check(mut self, tag: &'static str, param: String, passed: impl FnOnce(&V) -> bool) -> Self {
        if self.failed || (tag != "required" && self.value.is_absent()) {
            return self;
        }
        if !passed(self.value) {
            self.rules.push(self.name, tag, param);
            self.failed = true;
        }
        self
    }
}

fn same<V: Measure + ?Sized>(value: &V, expected: &str) -> bool {
    match value.text() {
        Some(text) => text == expected,
        None => matches!((value.size(), expected.parse::<f64>()), (Some(s), Ok(e)) if s == e),
    }
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
}

// ── Field paths ───────────────────────────────────────────────────────────────

/// The name a failure is reported under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldPath {
    /// Every segment was found in the record description; wire names joined
    /// with `.`.
    Resolved(String),
    /// Some segment was not described; the declared leaf name.
    Fallback(String),
}

impl FieldPath {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Resolved(path) | Self::Fallback(path) => path,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translates the declared path of `error` into wire names using the root
/// record's description.
pub fn field_path(error: &FieldError, fields: &'static [Field]) -> FieldPath {
    let fallback = || FieldPath::Fallback(error.field.clone().into_owned());
    let segments: Vec<&str> = error.namespace.iter().copied().chain([&*error.field]).collect();

    let mut current = fields;
    let mut path: Vec<&'static str> = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let Some(field) = current.iter().find(|f| f.name == *segment) else {
            debug!(segment, leaf = %error.field, "field not described, falling back to declared name");
            return fallback();
        };
        path.push(field.wire_name());

        if i + 1 == segments.len() {
            break;
        }
        match field.nested {
            Some(nested) => current = nested,
            None => {
                debug!(segment, leaf = %error.field, "nested record not described, falling back to declared name");
                return fallback();
            }
        }
    }
    FieldPath::Resolved(path.join("."))
}

fn message(error: &FieldError, fields: &'static [Field]) -> String {
    let path = field_path(error, fields);
    match error.tag {
        "required" => format!("Field '{path}' is required"),
        tag        => format!("Field '{path}', requires '{tag}' = '{}'", error.param),
    }
}

// ── Validator ─────────────────────────────────────────────────────────────────

/// Runs record rules and formats their failures.
///
/// Built once and shared by the engine; custom patterns are compiled at
/// registration, never per request.
#[derive(Clone, Debug, Default)]
pub struct Validator {
    patterns: HashMap<&'static str, Regex>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `pattern` available to [`FieldRules::pattern`] under `tag`.
    pub fn register_pattern(mut self, tag: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        self.patterns.insert(tag, Regex::new(pattern)?);
        Ok(self)
    }

    pub fn validate<T: Validate + ?Sized>(&self, record: &T) -> Result<(), ValidationFailure> {
        let mut rules = Rules::new(self);
        record.validate(&mut rules);
        if rules.errors.is_empty() {
            return Ok(());
        }

        let messages = rules.errors.iter().map(|e| message(e, T::FIELDS)).collect();
        Err(ValidationFailure { errors: rules.errors, messages })
    }
}

/// Every rule failure of one record, with its formatted message.
#[derive(Clone, Debug, Error)]
#[error("{}", .messages.join("; "))]
pub struct ValidationFailure {
    errors: Vec<FieldError>,
    messages: Vec<String>,
}

impl ValidationFailure {
    /// A `required` failure for a field a JSON body left out. `wire` is the
    /// name the decoder reported; a top-level field described with that wire
    /// name is reported under its declared name.
    pub(crate) fn missing_field<T: Validate + ?Sized>(wire: &str) -> Self {
        let field = T::FIELDS
            .iter()
            .find(|f| f.wire_name() == wire)
            .map_or_else(|| Cow::Owned(wire.to_owned()), |f| Cow::Borrowed(f.name));
        let error = FieldError { namespace: Vec::new(), field, tag: "required", param: String::new() };
        let messages = vec![message(&error, T::FIELDS)];
        Self { errors: vec![error], messages }
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// `{"error": msg}` for a single failure,
    /// `{"error": "validation errors", "list": [..]}` otherwise.
    pub fn to_json(&self) -> serde_json::Value {
        match self.messages.as_slice() {
            [single] => json!({ "error": single }),
            list     => json!({ "error": "validation errors", "list": list }),
        }
    }

    /// The pretty-printed response body.
    pub(crate) fn body(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.to_json()).unwrap_or_default()
    }
}

// ── Wire-name check ───────────────────────────────────────────────────────────

/// Checks the wire names in `T::FIELDS` against what serde actually writes.
///
/// `sample` is serialized and every described field, nested ones included,
/// must appear under its wire name. Returns the dotted paths that do not.
/// Meant for tests: pass a fully populated sample, since absent optional
/// records cannot be checked.
///
/// ```rust
/// use serde::Serialize;
/// use tessel::{check_wire_names, Field, Validate};
///
/// #[derive(Serialize)]
/// struct Login {
///     #[serde(rename = "userName")]
///     name: String,
/// }
///
/// impl Validate for Login {
///     const FIELDS: &'static [Field] = &[Field::new("name").wire("userName")];
/// }
///
/// assert!(check_wire_names(&Login { name: "ann".into() }).is_ok());
/// ```
pub fn check_wire_names<T: Validate + Serialize>(sample: &T) -> Result<(), Vec<String>> {
    let value = serde_json::to_value(sample).map_err(|e| vec![e.to_string()])?;
    let mut unknown = Vec::new();
    collect_unknown(T::FIELDS, &value, "", &mut unknown);
    if unknown.is_empty() { Ok(()) } else { Err(unknown) }
}

fn collect_unknown(fields: &[Field], value: &serde_json::Value, prefix: &str, unknown: &mut Vec<String>) {
    for field in fields {
        let path = match prefix {
            "" => field.wire_name().to_owned(),
            _  => format!("{prefix}.{}", field.wire_name()),
        };
        match (value.get(field.wire_name()), field.nested) {
            (None, _) => unknown.push(path),
            (Some(inner), Some(nested)) if !inner.is_null() => collect_unknown(nested, inner, &path, unknown),
            (Some(_), _) => {}
        }
    }
}
