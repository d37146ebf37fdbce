//! The `parameter:` declaration language
//!
//! Fields are declared one per line, nested by indentation:
//!
//! ```text
//! parameter:
//!   // +ui:order=1
//!   // +minimum=1
//!   replicas: *1 | int
//!   image?: string
//!   resources:
//!     cpu: *"0.5" | string
//!   ports: [...]
//!     name: string
//!     port: int
//! ```
//!
//! Comment lines (`#` or `//`) directly above a field become its
//! description. A trailing `?` marks a field optional, `*` marks the default
//! alternative of a disjunction, and `[...]` followed by a nested block
//! declares a list of objects.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::template::{PARAMETER_KEY, TemplateParts, is_comment};

#[derive(Parser)]
#[grammar = "parameter.pest"]
struct TypeExprParser;

/// Declaration block parse failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParameterError {
    /// 1-based line in the original template
    pub line: usize,
    pub message: String,
}

impl ParameterError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParameterError>;

/// Built-in primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    String,
    Int,
    Number,
    Bool,
    /// `_`, any value
    Any,
}

impl Primitive {
    /// JSON Schema `type` keyword, None for `_`
    pub fn schema_type(&self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Int => Some("integer"),
            Self::Number => Some("number"),
            Self::Bool => Some("boolean"),
            Self::Any => None,
        }
    }
}

/// One alternative of a type expression
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Primitive(Primitive),
    Literal(JsonValue),
    List(Box<TypeExpr>),
    StringMap(Box<TypeExpr>),
    OpenStruct,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub is_default: bool,
    pub term: Term,
}

/// A disjunction of alternatives
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub alternatives: Vec<Alternative>,
}

impl TypeExpr {
    /// Parse a type expression (the part after `name:`)
    pub fn parse(input: &str) -> std::result::Result<Self, String> {
        let mut pairs =
            TypeExprParser::parse(Rule::type_expr, input).map_err(|e| e.to_string())?;
        let disjunction = pairs
            .next()
            .and_then(|p| p.into_inner().next())
            .ok_or_else(|| "empty type expression".to_string())?;
        let expr = build_disjunction(disjunction)?;

        if expr.alternatives.iter().filter(|a| a.is_default).count() > 1 {
            return Err("more than one default marked with '*'".to_string());
        }
        Ok(expr)
    }

    /// The literal marked as default, if any
    pub fn default_value(&self) -> Option<&JsonValue> {
        self.alternatives
            .iter()
            .find(|a| a.is_default)
            .and_then(|a| match &a.term {
                Term::Literal(value) => Some(value),
                _ => None,
            })
    }

    /// Literal values when every alternative is a literal
    pub fn enum_values(&self) -> Option<Vec<JsonValue>> {
        self.alternatives
            .iter()
            .map(|a| match &a.term {
                Term::Literal(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }
}

fn build_disjunction(pair: Pair<'_, Rule>) -> std::result::Result<TypeExpr, String> {
    let mut alternatives = Vec::new();
    for alternative in pair.into_inner() {
        let mut is_default = false;
        let mut term = None;
        for inner in alternative.into_inner() {
            match inner.as_rule() {
                Rule::default_marker => is_default = true,
                _ => term = Some(build_term(inner)?),
            }
        }
        let term = term.ok_or_else(|| "missing type".to_string())?;
        if is_default && !matches!(term, Term::Literal(_)) {
            return Err("only literal values can be marked as default".to_string());
        }
        alternatives.push(Alternative { is_default, term });
    }
    Ok(TypeExpr { alternatives })
}

fn build_term(pair: Pair<'_, Rule>) -> std::result::Result<Term, String> {
    match pair.as_rule() {
        Rule::primitive => Ok(Term::Primitive(match pair.as_str() {
            "string" => Primitive::String,
            "int" => Primitive::Int,
            "number" | "float" => Primitive::Number,
            "bool" => Primitive::Bool,
            _ => Primitive::Any,
        })),
        Rule::string_lit | Rule::number_lit => serde_json::from_str(pair.as_str())
            .map(Term::Literal)
            .map_err(|e| format!("invalid literal {}: {}", pair.as_str(), e)),
        Rule::bool_lit => Ok(Term::Literal(JsonValue::Bool(pair.as_str() == "true"))),
        Rule::null_lit => Ok(Term::Literal(JsonValue::Null)),
        Rule::list | Rule::string_map => {
            let rule = pair.as_rule();
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| "missing element type".to_string())?;
            let element = Box::new(build_disjunction(inner)?);
            Ok(if rule == Rule::list {
                Term::List(element)
            } else {
                Term::StringMap(element)
            })
        }
        Rule::open_struct => Ok(Term::OpenStruct),
        other => Err(format!("unexpected {:?}", other)),
    }
}

/// Shape of a declared field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// `name: <type-expr>`
    Expr(TypeExpr),
    /// `name:` followed by a nested block
    Struct(Vec<ParamField>),
    /// `name: [...]` followed by a nested block
    ListOf(Vec<ParamField>),
}

/// A field of the declaration block
#[derive(Debug, Clone, PartialEq)]
pub struct ParamField {
    pub name: String,
    pub optional: bool,
    /// Comment lines directly above the field, joined with newlines
    pub description: Option<String>,
    pub kind: FieldKind,
    /// 1-based line in the original template
    pub line: usize,
}

impl ParamField {
    /// Default value declared with `*`
    pub fn default_value(&self) -> Option<&JsonValue> {
        match &self.kind {
            FieldKind::Expr(expr) => expr.default_value(),
            _ => None,
        }
    }

    /// Whether the user has to supply the field
    pub fn is_required(&self) -> bool {
        !self.optional && self.default_value().is_none()
    }
}

struct Line<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
}

/// Parse the declaration block of a split template
///
/// A template without a block declares no fields.
pub fn parse_parameters(parts: &TemplateParts) -> Result<Vec<ParamField>> {
    match &parts.parameter_block {
        Some(block) => parse_block(block, parts.parameter_line),
        None => Ok(Vec::new()),
    }
}

/// Parse a `parameter:` block whose header sits on `first_line`
pub fn parse_block(block: &str, first_line: usize) -> Result<Vec<ParamField>> {
    let mut raw = block.split('\n');
    let header = raw.next().unwrap_or_default();
    let inline = header
        .trim()
        .strip_prefix(PARAMETER_KEY)
        .map(|rest| rest.trim_start().trim_start_matches(':').trim())
        .unwrap_or_default();
    if !inline.is_empty() && inline != "{}" {
        return Err(ParameterError::new(
            first_line,
            format!("unexpected '{}' after 'parameter:'", inline),
        ));
    }

    let lines: Vec<Line<'_>> = raw
        .enumerate()
        .map(|(i, text)| Line {
            number: first_line + i + 1,
            indent: text.len() - text.trim_start().len(),
            text: text.trim(),
        })
        .collect();

    if !inline.is_empty() && lines.iter().any(|l| !l.text.is_empty()) {
        return Err(ParameterError::new(
            first_line,
            "'parameter: {}' cannot be followed by fields",
        ));
    }

    let mut index = 0;
    let fields = parse_fields(&lines, &mut index, 0)?;
    while lines
        .get(index)
        .is_some_and(|l| l.text.is_empty() || is_comment(l.text))
    {
        index += 1;
    }
    if let Some(line) = lines.get(index) {
        return Err(ParameterError::new(line.number, "unexpected indentation"));
    }
    Ok(fields)
}

/// Parse sibling fields indented deeper than `parent_indent`
fn parse_fields(lines: &[Line<'_>], index: &mut usize, parent_indent: usize) -> Result<Vec<ParamField>> {
    let mut fields: Vec<ParamField> = Vec::new();
    let mut comments: Vec<&str> = Vec::new();
    let mut block_indent: Option<usize> = None;

    while let Some(line) = lines.get(*index) {
        if line.text.is_empty() {
            comments.clear();
            *index += 1;
            continue;
        }

        if is_comment(line.text) {
            // A comment belongs to the block of the field that follows it
            let next_indent = lines[*index..]
                .iter()
                .find(|l| !l.text.is_empty() && !is_comment(l.text))
                .map(|l| l.indent)
                .unwrap_or(0);
            if next_indent <= parent_indent || block_indent.is_some_and(|b| next_indent < b) {
                break;
            }
            comments.push(strip_comment(line.text));
            *index += 1;
            continue;
        }

        if line.indent <= parent_indent {
            break;
        }
        match block_indent {
            None => block_indent = Some(line.indent),
            Some(indent) if line.indent < indent => break,
            Some(indent) if line.indent > indent => {
                return Err(ParameterError::new(line.number, "unexpected indentation"));
            }
            Some(_) => {}
        }

        let (name, optional, rest) = split_field(line)?;
        if fields.iter().any(|f| f.name == name) {
            return Err(ParameterError::new(
                line.number,
                format!("field '{}' declared twice", name),
            ));
        }

        let description = if comments.is_empty() {
            None
        } else {
            Some(comments.join("\n"))
        };
        comments.clear();

        let number = line.number;
        let indent = line.indent;
        *index += 1;

        let kind = if rest.is_empty() || rest == "[...]" {
            let children = parse_fields(lines, index, indent)?;
            if rest.is_empty() {
                FieldKind::Struct(children)
            } else if children.is_empty() {
                FieldKind::Expr(TypeExpr {
                    alternatives: vec![Alternative {
                        is_default: false,
                        term: Term::List(Box::new(TypeExpr {
                            alternatives: vec![Alternative {
                                is_default: false,
                                term: Term::Primitive(Primitive::Any),
                            }],
                        })),
                    }],
                })
            } else {
                FieldKind::ListOf(children)
            }
        } else {
            FieldKind::Expr(
                TypeExpr::parse(rest)
                    .map_err(|e| ParameterError::new(number, format!("field '{}': {}", name, e)))?,
            )
        };

        fields.push(ParamField {
            name,
            optional,
            description,
            kind,
            line: number,
        });
    }

    Ok(fields)
}

fn strip_comment(text: &str) -> &str {
    text.strip_prefix("//")
        .or_else(|| text.strip_prefix('#'))
        .unwrap_or(text)
        .trim()
}

/// Split `name?: rest` into its parts
fn split_field<'a>(line: &Line<'a>) -> Result<(String, bool, &'a str)> {
    let text = line.text;

    let (name, after) = if let Some(quoted) = text.strip_prefix('"') {
        let end = quoted
            .find('"')
            .ok_or_else(|| ParameterError::new(line.number, "unterminated field name"))?;
        (quoted[..end].to_string(), &quoted[end + 1..])
    } else {
        let end = text
            .find([':', '?'])
            .ok_or_else(|| ParameterError::new(line.number, format!("expected 'name: type', got '{}'", text)))?;
        (text[..end].trim().to_string(), &text[end..])
    };

    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
    {
        return Err(ParameterError::new(
            line.number,
            format!("invalid field name '{}'", name),
        ));
    }

    let (optional, after) = match after.strip_prefix('?') {
        Some(rest) => (true, rest),
        None => (false, after),
    };
    let rest = after
        .strip_prefix(':')
        .ok_or_else(|| ParameterError::new(line.number, format!("expected ':' after '{}'", name)))?;

    Ok((name, optional, rest.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::split_template;
    use serde_json::json;

    fn parse(template: &str) -> Result<Vec<ParamField>> {
        parse_parameters(&split_template(template))
    }

    #[test]
    fn test_type_expressions() {
        let expr = TypeExpr::parse("*1 | int").unwrap();
        assert_eq!(expr.default_value(), Some(&json!(1)));
        assert!(expr.enum_values().is_none());

        let expr = TypeExpr::parse(r#"*"session" | "application""#).unwrap();
        assert_eq!(expr.default_value(), Some(&json!("session")));
        assert_eq!(expr.enum_values(), Some(vec![json!("session"), json!("application")]));

        let expr = TypeExpr::parse("[...string]").unwrap();
        assert!(matches!(&expr.alternatives[0].term, Term::List(_)));

        let expr = TypeExpr::parse("{[string]: int}").unwrap();
        assert!(matches!(&expr.alternatives[0].term, Term::StringMap(_)));

        let expr = TypeExpr::parse("{...}").unwrap();
        assert_eq!(expr.alternatives[0].term, Term::OpenStruct);

        let expr = TypeExpr::parse("_").unwrap();
        assert_eq!(expr.alternatives[0].term, Term::Primitive(Primitive::Any));
    }

    #[test]
    fn test_invalid_type_expressions() {
        assert!(TypeExpr::parse("strin").is_err());
        assert!(TypeExpr::parse("*1 | *2").is_err());
        assert!(TypeExpr::parse("*int").is_err());
        assert!(TypeExpr::parse("").is_err());
    }

    #[test]
    fn test_nested_fields_and_comments() {
        let fields = parse(
            "parameter:
  // Number of task managers
  // +minimum=1
  replicas: *1 | int
  image?: string

  resources:
    cpu: *\"0.5\" | string
  ports: [...]
    name: string
    port: int
output: {}
",
        )
        .unwrap();

        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["replicas", "image", "resources", "ports"]);

        assert_eq!(
            fields[0].description.as_deref(),
            Some("Number of task managers\n+minimum=1")
        );
        assert!(!fields[0].is_required());
        assert_eq!(fields[0].line, 4);
        assert!(fields[1].optional);
        assert!(fields[1].description.is_none());

        match &fields[2].kind {
            FieldKind::Struct(children) => assert_eq!(children[0].name, "cpu"),
            other => panic!("expected struct, got {:?}", other),
        }
        match &fields[3].kind {
            FieldKind::ListOf(children) => assert_eq!(children.len(), 2),
            other => panic!("expected list of objects, got {:?}", other),
        }
    }

    #[test]
    fn test_comment_before_outer_sibling() {
        let fields = parse(
            "parameter:
  resources:
    cpu: string
  # Memory limit
  memory: string
",
        )
        .unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].description.as_deref(), Some("Memory limit"));
    }

    #[test]
    fn test_empty_declarations() {
        assert!(parse("parameter: {}\noutput: {}").unwrap().is_empty());
        assert!(parse("output: {}").unwrap().is_empty());
    }

    #[test]
    fn test_errors_report_template_lines() {
        let err = parse("output: {}\nparameter:\n  host: strng\n").unwrap_err();
        assert_eq!(err.line, 3);

        let err = parse("parameter:\n  host: string\n  host: int\n").unwrap_err();
        assert!(err.message.contains("declared twice"));

        let err = parse("parameter:\n  a: string\n      b: int\n").unwrap_err();
        assert_eq!(err.line, 3);
    }
}
