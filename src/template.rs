//! Path templates.
//!
//! A template such as `/users/{id}/posts/{postId}` compiles to the anchored
//! pattern `^/users/([^/]+)/posts/([^/]+)$` plus the ordered names
//! `["id", "postId"]`. Each placeholder captures exactly one path segment.
//!
//! Templates without placeholders are not compiled at all; the registry looks
//! them up as literal keys. Templates with two placeholders back to back
//! (`/a/{x}{y}`) have no decidable boundary between the captures and are
//! rejected.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

const SEGMENT: &str = "([^/]+)";

/// A compiled path template.
#[derive(Debug)]
pub struct PathMatcher {
    template: String,
    keys: Vec<String>,
    regex: Regex,
}

impl PathMatcher {
    /// Compiles `template`, or returns `None` when it has no placeholders or
    /// is ambiguous.
    pub fn compile(template: &str) -> Option<Self> {
        let mut pattern = String::from("^");
        let mut keys: Vec<String> = Vec::new();
        let mut literal_start = 0;
        let mut cursor = 0;

        while let Some(open) = template[cursor..].find('{').map(|i| cursor + i) {
            let Some(close) = template[open + 1..]
                .find(['{', '}'])
                .map(|i| open + 1 + i)
            else {
                break;
            };

            // `{{` or `{}` is literal text, keep scanning after the brace.
            if template.as_bytes()[close] == b'{' || close == open + 1 {
                cursor = open + 1;
                continue;
            }

            let literal = &template[literal_start..open];
            if !keys.is_empty() && literal.is_empty() {
                warn!(template, "rejecting path template with adjacent placeholders");
                return None;
            }

            pattern.push_str(&regex::escape(literal));
            pattern.push_str(SEGMENT);
            keys.push(template[open + 1..close].to_owned());

            literal_start = close + 1;
            cursor = close + 1;
        }

        if keys.is_empty() {
            return None;
        }

        pattern.push_str(&regex::escape(&template[literal_start..]));
        pattern.push('$');

        match Regex::new(&pattern) {
            Ok(regex) => Some(Self { template: template.to_owned(), keys, regex }),
            Err(e) => {
                warn!(template, pattern, error = %e, "path template did not compile");
                None
            }
        }
    }

    /// The template this matcher was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Placeholder names, left to right.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Matches a concrete path and returns the captured segments by name.
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        Some(
            self.keys
                .iter()
                .enumerate()
                .map(|(i, key)| {
                    let value = caps.get(i + 1).map_or("", |m| m.as_str());
                    (key.clone(), value.to_owned())
                })
                .collect(),
        )
    }
}
