//! `+directive=value` annotations in field descriptions
//!
//! Directives are lines of a field's comment block:
//!
//! ```text
//! // Number of task managers
//! // +minimum=1
//! // +ui:order=2
//! // +ui:widget=updown
//! ```
//!
//! Structural directives land in the input schema, `ui:` and `err:`
//! directives in the UI schema. Lines that are not directives stay as
//! free text.

use serde_json::{Map, Number, Value as JsonValue};

use crate::error::DirectiveError;

/// A recognised directive with a parsed value
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Title(String),
    Description(String),
    Minimum(Number),
    Maximum(Number),
    MinLength(u64),
    MaxLength(u64),
    Pattern(String),
    MinItems(u64),
    MaxItems(u64),
    Format(String),
    UiOrder(i64),
    UiTitle(String),
    UiDescription(String),
    UiHidden(JsonValue),
    UiWidget(String),
    UiOptions(JsonValue),
    ErrOptions(JsonValue),
}

impl Directive {
    /// Parse one directive from its key and raw value
    pub fn parse(field: &str, key: &str, value: &str) -> Result<Self, DirectiveError> {
        let invalid = |reason: &str| DirectiveError {
            field: field.to_string(),
            directive: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let text = || -> Result<String, DirectiveError> {
            if value.is_empty() {
                Err(invalid("value is empty"))
            } else {
                Ok(value.to_string())
            }
        };
        let count = || value.parse::<u64>().map_err(|_| invalid("expected a non-negative integer"));
        let number = || parse_number(value).ok_or_else(|| invalid("expected a number"));
        let object = || match serde_json::from_str::<JsonValue>(value) {
            Ok(v @ JsonValue::Object(_)) => Ok(v),
            Ok(_) => Err(invalid("expected a JSON object")),
            Err(e) => Err(invalid(&e.to_string())),
        };

        Ok(match key {
            "title" => Self::Title(text()?),
            "description" => Self::Description(text()?),
            "minimum" => Self::Minimum(number()?),
            "maximum" => Self::Maximum(number()?),
            "minLength" => Self::MinLength(count()?),
            "maxLength" => Self::MaxLength(count()?),
            "minItems" => Self::MinItems(count()?),
            "maxItems" => Self::MaxItems(count()?),
            "pattern" => {
                regex::Regex::new(value).map_err(|e| invalid(&e.to_string()))?;
                Self::Pattern(value.to_string())
            }
            "format" => Self::Format(text()?),
            "ui:order" => Self::UiOrder(
                value
                    .parse::<i64>()
                    .map_err(|_| invalid("expected an integer"))?,
            ),
            "ui:title" => Self::UiTitle(text()?),
            "ui:description" => Self::UiDescription(text()?),
            "ui:hidden" => Self::UiHidden(
                serde_json::from_str(value).map_err(|e| invalid(&e.to_string()))?,
            ),
            "ui:widget" => Self::UiWidget(text()?),
            "ui:options" => Self::UiOptions(object()?),
            "err:options" => Self::ErrOptions(object()?),
            _ => return Err(invalid("unknown directive")),
        })
    }

    /// Write a structural directive into a schema node
    pub fn apply_structural(&self, node: &mut Map<String, JsonValue>) {
        let (key, value) = match self {
            Self::Title(v) => ("title", JsonValue::from(v.as_str())),
            Self::Description(v) => ("description", JsonValue::from(v.as_str())),
            Self::Minimum(n) => ("minimum", JsonValue::Number(n.clone())),
            Self::Maximum(n) => ("maximum", JsonValue::Number(n.clone())),
            Self::MinLength(n) => ("minLength", JsonValue::from(*n)),
            Self::MaxLength(n) => ("maxLength", JsonValue::from(*n)),
            Self::Pattern(v) => ("pattern", JsonValue::from(v.as_str())),
            Self::MinItems(n) => ("minItems", JsonValue::from(*n)),
            Self::MaxItems(n) => ("maxItems", JsonValue::from(*n)),
            Self::Format(v) => ("format", JsonValue::from(v.as_str())),
            _ => return,
        };
        node.insert(key.to_string(), value);
    }

    /// Write a UI directive into a UI schema node
    ///
    /// `ui:order` is collected by the parent level instead.
    pub fn apply_ui(&self, node: &mut Map<String, JsonValue>) {
        let (key, value) = match self {
            Self::UiTitle(v) => ("ui:title", JsonValue::from(v.as_str())),
            Self::UiDescription(v) => ("ui:description", JsonValue::from(v.as_str())),
            Self::UiHidden(v) => ("ui:hidden", v.clone()),
            Self::UiWidget(v) => ("ui:widget", JsonValue::from(v.as_str())),
            Self::UiOptions(v) => ("ui:options", v.clone()),
            Self::ErrOptions(v) => ("err:options", v.clone()),
            _ => return,
        };
        node.insert(key.to_string(), value);
    }
}

/// A description split into directives and free text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub directives: Vec<Directive>,
    /// Lines that are not directives, joined with newlines
    pub text: Option<String>,
    /// Whether any directive line was seen, well-formed or not
    pub found: bool,
}

impl Annotations {
    /// Split a field description, logging and skipping malformed directives
    pub fn parse(field: &str, description: &str) -> Self {
        let mut annotations = Annotations::default();
        let mut text = Vec::new();

        for line in description.lines() {
            let line = line.trim();
            let Some((key, value)) = directive_line(line) else {
                if !line.is_empty() {
                    text.push(line);
                }
                continue;
            };
            annotations.found = true;
            match Directive::parse(field, key, value) {
                Ok(directive) => annotations.directives.push(directive),
                Err(err) => tracing::warn!(%err, "skipping malformed directive"),
            }
        }

        if !text.is_empty() {
            annotations.text = Some(text.join("\n"));
        }
        annotations
    }

    /// Explicit ordering value, the last one wins
    pub fn order(&self) -> Option<i64> {
        self.directives.iter().rev().find_map(|d| match d {
            Directive::UiOrder(n) => Some(*n),
            _ => None,
        })
    }

    pub fn has_description(&self) -> bool {
        self.directives
            .iter()
            .any(|d| matches!(d, Directive::Description(_)))
    }
}

/// Split `+key=value`; None when the line is not a directive
fn directive_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('+')?;
    let (key, value) = rest.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value.trim()))
}

fn parse_number(value: &str) -> Option<Number> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(Number::from(n));
    }
    value.parse::<f64>().ok().and_then(Number::from_f64)
}
