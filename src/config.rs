//! Engine configuration.
//!
//! Every field is optional when deserializing; missing ones keep their
//! defaults (no prefix, terse errors, CORS off).

use serde::Deserialize;

/// Settings an [`Engine`](crate::Engine) can be built from.
///
/// ```rust
/// use tessel::{Config, Engine};
///
/// let config: Config = serde_json::from_str(r#"{ "prefix": "/api", "cors_origins": ["*"] }"#).unwrap();
/// let engine = Engine::from_config(config);
/// assert_eq!(engine.prefix(), "/api");
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Stripped from the request path before routing.
    pub prefix: String,
    /// Echo error text in failure responses.
    pub verbose_errors: bool,
    /// Allowed CORS origins; `"*"` allows any.
    pub cors_origins: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_default() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn all_fields() {
        let config: Config = serde_json::from_str(
            r#"{ "prefix": "/v2", "verbose_errors": true, "cors_origins": ["https://a.com", "*"] }"#,
        )
        .unwrap();
        assert_eq!(config.prefix, "/v2");
        assert!(config.verbose_errors);
        assert_eq!(config.cors_origins, ["https://a.com", "*"]);
    }
}
