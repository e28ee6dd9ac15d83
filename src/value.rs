//! Loosely-typed request values and their coercions.
//!
//! Query strings, form bodies and path captures only ever produce strings,
//! JSON bodies add numbers, booleans and null. [`Value`] is the closed set of
//! shapes a parameter can take; the `as_*` methods read it as the type a
//! handler actually wants.

use serde::Serialize;

use crate::error::CoercionError;

/// A single parameter value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Reads the value as a float.
    ///
    /// Numbers widen to `f64`. Strings are parsed as an integer literal first
    /// (`"13"`, `"0x1f"`, `"-7"`) and then as a float literal (`"14.5"`,
    /// `"1e3"`). `Null` and booleans are not convertible.
    pub fn as_float(&self) -> Result<f64, CoercionError> {
        match self {
            Self::Int(i)   => Ok(*i as f64),
            Self::Uint(u)  => Ok(*u as f64),
            Self::Float(f) => Ok(*f),
            Self::Str(s)   => parse_int_literal(s)
                .map(|i| i as f64)
                .or_else(|| s.parse::<f64>().ok())
                .ok_or_else(|| self.not_convertible("float")),
            Self::Null | Self::Bool(_) => Err(self.not_convertible("float")),
        }
    }

    /// Reads the value as a signed integer.
    ///
    /// Same acceptance rules as [`Value::as_float`]; fractional values are
    /// truncated toward zero and `u64` values above `i64::MAX` wrap.
    pub fn as_int(&self) -> Result<i64, CoercionError> {
        match self {
            Self::Int(i)   => Ok(*i),
            Self::Uint(u)  => Ok(*u as i64),
            Self::Float(f) => Ok(*f as i64),
            Self::Str(s)   => parse_int_literal(s)
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .ok_or_else(|| self.not_convertible("int")),
            Self::Null | Self::Bool(_) => Err(self.not_convertible("int")),
        }
    }

    /// `true` only for `Bool(true)` and the exact string `"true"`.
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Str(s)  => s == "true",
            _             => false,
        }
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _            => None,
        }
    }

    /// Flattens a decoded JSON value. Arrays and objects keep their JSON text.
    pub(crate) fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null      => Self::Null,
            serde_json::Value::Bool(b)   => Self::Bool(b),
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::Uint(u)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            nested @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Self::Str(nested.to_string())
            }
        }
    }

    fn not_convertible(&self, target: &'static str) -> CoercionError {
        let value = match self {
            Self::Null     => "null".to_owned(),
            Self::Bool(b)  => b.to_string(),
            Self::Int(i)   => i.to_string(),
            Self::Uint(u)  => u.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s)   => format!("{s:?}"),
        };
        CoercionError::NotConvertible { value, target }
    }
}

/// Parses an integer literal with an optional sign and base prefix: `0x`/`0X`
/// (hex), `0o`/`0O` or a bare leading `0` (octal), `0b`/`0B` (binary).
/// Underscores may separate digits (`1_000`, `0x_ff`).
fn parse_int_literal(s: &str) -> Option<i64> {
    let (negative, unsigned) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _    => (false, s),
    };

    let stripped;
    let unsigned = if unsigned.contains('_') {
        if !separators_ok(unsigned) {
            return None;
        }
        stripped = unsigned.replace('_', "");
        stripped.as_str()
    } else {
        unsigned
    };

    let lower = unsigned.get(..2).map(str::to_ascii_lowercase);
    let (radix, digits) = match lower.as_deref() {
        Some("0x") => (16, &unsigned[2..]),
        Some("0o") => (8, &unsigned[2..]),
        Some("0b") => (2, &unsigned[2..]),
        _ if unsigned.len() > 1 && unsigned.starts_with('0') => (8, &unsigned[1..]),
        _ => (10, unsigned),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    let magnitude = u64::from_str_radix(digits, radix).ok()?;

    if negative {
        if magnitude == i64::MIN.unsigned_abs() {
            Some(i64::MIN)
        } else {
            i64::try_from(magnitude).ok().map(|m| -m)
        }
    } else {
        i64::try_from(magnitude).ok()
    }
}

/// Each `_` must sit between two digits, or between a base prefix and a
/// digit.
fn separators_ok(literal: &str) -> bool {
    let bytes = literal.as_bytes();
    let prefixed = bytes.len() >= 2
        && bytes[0] == b'0'
        && matches!(bytes[1].to_ascii_lowercase(), b'x' | b'o' | b'b');
    let (mut after_digit, rest) = if prefixed { (true, &bytes[2..]) } else { (false, bytes) };

    let mut after_underscore = false;
    for &b in rest {
        if b == b'_' {
            if !after_digit {
                return false;
            }
            after_digit = false;
            after_underscore = true;
        } else {
            after_digit = b.is_ascii_alphanumeric();
            after_underscore = false;
        }
    }
    !after_underscore
}

macro_rules! from_signed {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self { Self::Int(v as i64) }
        }
    )*};
}

macro_rules! from_unsigned {
    ($($t:ty),*) => {$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self { Self::Uint(v as u64) }
        }
    )*};
}

from_signed!(i8, i16, i32, i64, isize);
from_unsigned!(u8, u16, u32, u64, usize);

impl From<f32> for Value {
    fn from(v: f32) -> Self { Self::Float(f64::from(v)) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Self::Float(v) }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Self::Str(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Self::Str(v.to_owned()) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
