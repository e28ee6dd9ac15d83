//! Route methods.
//!
//! Routes are keyed by `GET` or `POST` only. `PUT` is folded into `POST`
//! before lookup, and any other request method is never routed (an `OPTIONS`
//! preflight is answered separately, see [`crate::cors`]).

use std::fmt;
use std::str::FromStr;

/// The method a route is registered under.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get  => "GET",
            Self::Post => "POST",
        }
    }

    /// Maps an inbound request method onto a route method.
    ///
    /// `PUT` is treated as `POST`. Returns `None` for everything that can never
    /// match a route.
    pub fn from_request(method: &http::Method) -> Option<Self> {
        if method == http::Method::GET {
            Some(Self::Get)
        } else if method == http::Method::POST || method == http::Method::PUT {
            Some(Self::Post)
        } else {
            None
        }
    }
}

/// Parses `"GET"` or `"POST"`. Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET"  => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            _      => Err(()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
