//! Physical collection naming.
//!
//! A name template is a literal collection name that may contain `$VARIABLE`
//! references. The only variable is `$DATE`, which expands to the UTC
//! calendar date as `YYYYMMDD`. Templates containing it shard a model into
//! one physical collection per day.

use crate::error::ConfigurationError;
use chrono::{DateTime, Utc};
use std::fmt;

/// Variable expanding to the UTC date (`YYYYMMDD`)
pub const DATE_VARIABLE: &str = "DATE";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Date,
}

/// Parsed, validated name template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl NameTemplate {
    /// Parse a template, rejecting unknown variables and dangling `$`
    pub fn parse(template: &str) -> Result<Self, ConfigurationError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }

            let mut variable = String::new();
            while let Some(&(_, next)) = chars.peek() {
                let valid = if variable.is_empty() {
                    next.is_ascii_alphabetic() || next == '_'
                } else {
                    next.is_ascii_alphanumeric() || next == '_'
                };
                if !valid {
                    break;
                }
                variable.push(next);
                chars.next();
            }

            if variable.is_empty() {
                return Err(ConfigurationError::DanglingSigil {
                    template: template.to_string(),
                    offset,
                });
            }

            if variable != DATE_VARIABLE {
                return Err(ConfigurationError::UnknownVariable {
                    template: template.to_string(),
                    variable,
                });
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Date);
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// Whether the resolved name depends on the current time
    pub fn is_dynamic(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Date))
    }

    /// Expand the template for the given instant
    pub fn resolve(&self, now: DateTime<Utc>) -> String {
        let mut name = String::with_capacity(self.source.len() + 8);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Date => name.push_str(&now.format("%Y%m%d").to_string()),
            }
        }
        name
    }

    /// The template as written
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for NameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Resolve a template string to a physical collection name
pub fn resolve(template: &str, now: DateTime<Utc>) -> Result<String, ConfigurationError> {
    Ok(NameTemplate::parse(template)?.resolve(now))
}
