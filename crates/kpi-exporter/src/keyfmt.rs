// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bucket key formatting for histogram and top-k topics.
//!
//! Histogram producers emit bucket bounds as bare integers (`"0"`, `"10"`,
//! `"200"`). Stored as field names those sort lexicographically, so
//! `"200"` lands before `"30"`. A key format such as `%04d` pads every bucket
//! to a fixed width and restores numeric order.
//!
//! Supported templates are a small printf subset: exactly one `%d`
//! directive with optional `0` or `-` flag and a width, surrounded by
//! literal text. `%%` is a literal percent sign.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Key formatting errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyFormatError {
    #[error("invalid key format {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("malformed bucket key {key:?}: not an integer")]
    MalformedKey { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Padding {
    Spaces,
    Zeros,
    Left,
}

/// A parsed integer key template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyFormat {
    template: String,
    prefix: String,
    suffix: String,
    width: usize,
    padding: Padding,
}

impl KeyFormat {
    /// Parse a printf-style template such as `%04d` or `bucket_%06d`.
    pub fn parse(template: &str) -> Result<Self, KeyFormatError> {
        let invalid = |reason: &str| KeyFormatError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut directive: Option<(usize, Padding)> = None;
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            let literal = if directive.is_some() {
                &mut suffix
            } else {
                &mut prefix
            };

            if c != '%' {
                literal.push(c);
                continue;
            }

            if chars.peek() == Some(&'%') {
                chars.next();
                literal.push('%');
                continue;
            }

            if directive.is_some() {
                return Err(invalid("more than one directive"));
            }

            let padding = match chars.peek() {
                Some('0') => {
                    chars.next();
                    Padding::Zeros
                }
                Some('-') => {
                    chars.next();
                    Padding::Left
                }
                _ => Padding::Spaces,
            };

            let mut width_digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                width_digits.push(*d);
                chars.next();
            }
            let width = if width_digits.is_empty() {
                0
            } else {
                width_digits
                    .parse::<usize>()
                    .map_err(|_| invalid("width out of range"))?
            };

            match chars.next() {
                Some('d') => directive = Some((width, padding)),
                Some(other) => {
                    return Err(invalid(&format!(
                        "unsupported verb '%{}', only %d is allowed",
                        other
                    )))
                }
                None => return Err(invalid("dangling '%'")),
            }
        }

        let (width, padding) = directive.ok_or_else(|| invalid("missing %d directive"))?;

        Ok(Self {
            template: template.to_string(),
            prefix,
            suffix,
            width,
            padding,
        })
    }

    /// Render a bucket key through the template.
    ///
    /// The key must parse as a signed 64-bit integer.
    pub fn render(&self, key: &str) -> Result<String, KeyFormatError> {
        let value: i64 = key.parse().map_err(|_| KeyFormatError::MalformedKey {
            key: key.to_string(),
        })?;

        let sign = if value < 0 { "-" } else { "" };
        let digits = value.unsigned_abs().to_string();
        let len = sign.len() + digits.len();
        let fill = self.width.saturating_sub(len);

        let mut out = String::with_capacity(self.prefix.len() + len + fill + self.suffix.len());
        out.push_str(&self.prefix);
        match self.padding {
            Padding::Zeros => {
                out.push_str(sign);
                out.extend(std::iter::repeat('0').take(fill));
                out.push_str(&digits);
            }
            Padding::Spaces => {
                out.extend(std::iter::repeat(' ').take(fill));
                out.push_str(sign);
                out.push_str(&digits);
            }
            Padding::Left => {
                out.push_str(sign);
                out.push_str(&digits);
                out.extend(std::iter::repeat(' ').take(fill));
            }
        }
        out.push_str(&self.suffix);
        Ok(out)
    }

    /// The template this format was parsed from.
    pub fn template(&self) -> &str {
        &self.template
    }
}

impl TryFrom<String> for KeyFormat {
    type Error = KeyFormatError;

    fn try_from(template: String) -> Result<Self, Self::Error> {
        Self::parse(&template)
    }
}

impl From<KeyFormat> for String {
    fn from(format: KeyFormat) -> Self {
        format.template
    }
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}
