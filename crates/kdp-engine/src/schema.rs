//! Schema derivation
//!
//! Turns the `parameter:` block of a template into a JSON Schema for the
//! input form and a companion UI schema. Generation runs in two passes:
//! a structural pass over the declared fields, then a breadth-first walk
//! over the generated schema that moves `+directive=value` annotations out
//! of the free-text descriptions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::VecDeque;

use crate::directives::Annotations;
use crate::error::SchemaError;
use crate::parameter::{FieldKind, ParamField, Term, TypeExpr, parse_parameters};
use crate::template::split_template;

/// Reserved UI schema key holding the field order of one object level
pub const UI_ORDER_KEY: &str = "ui:order";

/// Catch-all terminating every ordering list
pub const UI_ORDER_REST: &str = "*";

/// Input schema plus UI schema for one definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedSchema {
    /// JSON Schema of the user parameters
    pub schema: JsonValue,

    /// Presentation hints keyed by field name
    pub ui_schema: JsonValue,
}

impl DerivedSchema {
    /// Schema of a definition that declares no parameters
    pub fn empty() -> Self {
        SchemaDeriver::new().derive_fields(&[])
    }

    /// Fill declared defaults into user values
    ///
    /// Defaults only fill keys the user left unset. Objects that are present
    /// (or required) are filled recursively, list items per element.
    pub fn apply_defaults(&self, value: &mut JsonValue) {
        apply_defaults(&self.schema, value);
    }

    /// Compile the input schema for validation
    pub fn validator(&self) -> Result<jsonschema::Validator, SchemaError> {
        jsonschema::validator_for(&self.schema).map_err(|e| SchemaError::InvalidSchema {
            message: e.to_string(),
        })
    }

    /// Schema node at a dotted field path (e.g. "dependencies.zookeeper")
    pub fn field(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.schema, |node, name| node.get("properties")?.get(name))
    }
}

/// Derives [`DerivedSchema`]s from templates
#[derive(Debug, Clone, Default)]
pub struct SchemaDeriver;

impl SchemaDeriver {
    pub fn new() -> Self {
        Self
    }

    /// Derive the schemas of a template's `parameter:` block
    ///
    /// A template without the block yields an empty object schema.
    pub fn derive(&self, template: &str) -> Result<DerivedSchema, SchemaError> {
        let parts = split_template(template);
        let fields = parse_parameters(&parts)?;
        Ok(self.derive_fields(&fields))
    }

    /// Derive the schemas of already parsed fields
    pub fn derive_fields(&self, fields: &[ParamField]) -> DerivedSchema {
        let mut schema = object_schema(fields);
        let ui_schema = annotate(&mut schema);
        DerivedSchema { schema, ui_schema }
    }
}

fn object_schema(fields: &[ParamField]) -> JsonValue {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in fields {
        properties.insert(field.name.clone(), field_schema(field));
        if field.is_required() {
            required.push(JsonValue::from(field.name.as_str()));
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), "object".into());
    schema.insert("properties".to_string(), JsonValue::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), JsonValue::Array(required));
    }
    JsonValue::Object(schema)
}

fn field_schema(field: &ParamField) -> JsonValue {
    let mut schema = match &field.kind {
        FieldKind::Expr(expr) => expr_schema(expr),
        FieldKind::Struct(children) => object_schema(children),
        FieldKind::ListOf(children) => serde_json::json!({
            "type": "array",
            "items": object_schema(children),
        }),
    };

    if let (Some(description), JsonValue::Object(map)) = (&field.description, &mut schema) {
        map.insert("description".to_string(), description.as_str().into());
    }
    schema
}

fn expr_schema(expr: &TypeExpr) -> JsonValue {
    let mut types: Vec<&str> = Vec::new();
    let mut any = false;
    let mut schema = Map::new();

    for alternative in &expr.alternatives {
        let ty = match &alternative.term {
            Term::Primitive(primitive) => match primitive.schema_type() {
                Some(ty) => ty,
                None => {
                    any = true;
                    continue;
                }
            },
            Term::Literal(value) => literal_type(value),
            Term::List(element) => {
                schema
                    .entry("items")
                    .or_insert_with(|| expr_schema(element));
                "array"
            }
            Term::StringMap(element) => {
                schema
                    .entry("additionalProperties")
                    .or_insert_with(|| expr_schema(element));
                "object"
            }
            Term::OpenStruct => "object",
        };
        if !types.contains(&ty) {
            types.push(ty);
        }
    }

    if types.contains(&"number") {
        types.retain(|ty| *ty != "integer");
    }

    if !any {
        let ty = match types.as_slice() {
            [single] => JsonValue::from(*single),
            many => JsonValue::Array(many.iter().map(|t| JsonValue::from(*t)).collect()),
        };
        schema.insert("type".to_string(), ty);
    }

    if let Some(mut values) = expr.enum_values() {
        let mut seen = Vec::with_capacity(values.len());
        values.retain(|v| {
            let fresh = !seen.contains(v);
            if fresh {
                seen.push(v.clone());
            }
            fresh
        });
        schema.insert("enum".to_string(), JsonValue::Array(values));
    }

    if let Some(default) = expr.default_value() {
        schema.insert("default".to_string(), default.clone());
    }

    JsonValue::Object(schema)
}

fn literal_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::String(_) => "string",
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => "integer",
        JsonValue::Number(_) => "number",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Null => "null",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Breadth-first directive walk, returning the UI schema
fn annotate(schema: &mut JsonValue) -> JsonValue {
    let mut ui = JsonValue::Object(Map::new());
    let mut queue: VecDeque<(String, String)> = VecDeque::from([(String::new(), String::new())]);

    while let Some((schema_ptr, ui_ptr)) = queue.pop_front() {
        let names: Vec<String> = schema
            .pointer(&schema_ptr)
            .and_then(|node| node.get("properties"))
            .and_then(JsonValue::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();

        let mut ordered: Vec<(i64, String)> = Vec::new();
        let mut unordered: Vec<String> = Vec::new();
        let mut ui_nodes = Map::new();

        for name in names {
            let child_ptr = format!("{}/properties/{}", schema_ptr, escape_pointer(&name));
            let child_ui_ptr = format!("{}/{}", ui_ptr, escape_pointer(&name));
            let Some(child) = schema.pointer_mut(&child_ptr).and_then(JsonValue::as_object_mut) else {
                continue;
            };

            let mut ui_node = Map::new();
            let description = child
                .get("description")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            let annotations = description
                .map(|text| Annotations::parse(&name, &text))
                .unwrap_or_default();

            if annotations.found {
                child.remove("description");
                if !annotations.has_description() {
                    if let Some(text) = &annotations.text {
                        child.insert("description".to_string(), text.as_str().into());
                    }
                }
                for directive in &annotations.directives {
                    directive.apply_structural(child);
                    directive.apply_ui(&mut ui_node);
                }
            }

            match annotations.order() {
                Some(order) => ordered.push((order, name.clone())),
                None => unordered.push(name.clone()),
            }

            if child.contains_key("properties") {
                queue.push_back((child_ptr.clone(), child_ui_ptr.clone()));
            }
            if child
                .get("items")
                .is_some_and(|items| items.get("properties").is_some())
            {
                ui_node.insert("items".to_string(), JsonValue::Object(Map::new()));
                queue.push_back((format!("{}/items", child_ptr), format!("{}/items", child_ui_ptr)));
            }

            ui_nodes.insert(name, JsonValue::Object(ui_node));
        }

        // Stable sort keeps first-seen order among equal values
        ordered.sort_by_key(|(order, _)| *order);
        let order: Vec<JsonValue> = ordered
            .into_iter()
            .map(|(_, name)| name)
            .chain(unordered)
            .map(JsonValue::from)
            .chain(std::iter::once(JsonValue::from(UI_ORDER_REST)))
            .collect();
        ui_nodes.insert(UI_ORDER_KEY.to_string(), JsonValue::Array(order));

        if let Some(level) = ui.pointer_mut(&ui_ptr).and_then(JsonValue::as_object_mut) {
            level.extend(ui_nodes);
        }
    }

    ui
}

fn apply_defaults(schema: &JsonValue, value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            let Some(properties) = schema.get("properties").and_then(JsonValue::as_object) else {
                return;
            };
            let required: Vec<&str> = schema
                .get("required")
                .and_then(JsonValue::as_array)
                .map(|r| r.iter().filter_map(JsonValue::as_str).collect())
                .unwrap_or_default();

            for (name, property) in properties {
                match map.get_mut(name) {
                    Some(existing) => apply_defaults(property, existing),
                    None => {
                        if let Some(default) = property.get("default") {
                            map.insert(name.clone(), default.clone());
                        } else if property.get("properties").is_some()
                            && required.contains(&name.as_str())
                        {
                            let mut nested = JsonValue::Object(Map::new());
                            apply_defaults(property, &mut nested);
                            map.insert(name.clone(), nested);
                        }
                    }
                }
            }
        }
        JsonValue::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for item in items {
                    apply_defaults(item_schema, item);
                }
            }
        }
        _ => {}
    }
}

/// Escape a JSON pointer token
pub(crate) fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn derive(template: &str) -> DerivedSchema {
        SchemaDeriver::new().derive(template).unwrap()
    }

    #[test]
    fn test_missing_block_is_empty_object() {
        let derived = derive("output:\n  kind: ConfigMap\n");
        assert_eq!(derived.schema, json!({"type": "object", "properties": {}}));
        assert_eq!(derived.ui_schema, json!({"ui:order": ["*"]}));
        assert_eq!(derived, DerivedSchema::empty());
    }

    #[test]
    fn test_structural_schema() {
        let derived = derive(
            r#"parameter:
  host: string
  replicas: *1 | int
  mode: *"session" | "application"
  ratio?: number | int
  hosts: [...string]
  labels: {[string]: string}
  extra?: {...}
  anything?: _
  resources:
    cpu: *"0.5" | string
"#,
        );

        assert_eq!(
            derived.schema,
            json!({
                "type": "object",
                "properties": {
                    "host": {"type": "string"},
                    "replicas": {"type": "integer", "default": 1},
                    "mode": {"type": "string", "enum": ["session", "application"], "default": "session"},
                    "ratio": {"type": "number"},
                    "hosts": {"type": "array", "items": {"type": "string"}},
                    "labels": {"type": "object", "additionalProperties": {"type": "string"}},
                    "extra": {"type": "object"},
                    "anything": {},
                    "resources": {
                        "type": "object",
                        "properties": {"cpu": {"type": "string", "default": "0.5"}}
                    }
                },
                "required": ["host", "hosts", "labels", "resources"]
            })
        );
    }

    #[test]
    fn test_directives_move_out_of_descriptions() {
        let derived = derive(
            "parameter:
  // Number of task managers
  // +minimum=1
  // +ui:widget=updown
  replicas: *1 | int
  // +title=Image
  // +description=Container image
  // leftover text
  image: string
  // Plain description
  tag: string
",
        );

        let schema = &derived.schema["properties"];
        assert_eq!(
            schema["replicas"],
            json!({"type": "integer", "default": 1, "description": "Number of task managers", "minimum": 1})
        );
        assert_eq!(
            schema["image"],
            json!({"type": "string", "title": "Image", "description": "Container image"})
        );
        assert_eq!(schema["tag"]["description"], "Plain description");
        assert_eq!(derived.ui_schema["replicas"], json!({"ui:widget": "updown"}));
    }

    #[test]
    fn test_ordering_law() {
        let derived = derive(
            "parameter:
  // +ui:order=2
  a: string
  // +ui:order=1
  b: string
  c: string
",
        );
        assert_eq!(derived.ui_schema[UI_ORDER_KEY], json!(["b", "a", "c", "*"]));
    }

    #[test]
    fn test_ordering_ties_and_nested_levels() {
        let derived = derive(
            "parameter:
  z: string
  // +ui:order=1
  y: string
  // +ui:order=1
  x: string
  nested:
    // +ui:order=0
    second: string
    first: string
  ports: [...]
    // +ui:order=1
    port: int
    name: string
",
        );

        let ui = &derived.ui_schema;
        assert_eq!(ui[UI_ORDER_KEY], json!(["y", "x", "z", "nested", "ports", "*"]));
        assert_eq!(ui["nested"][UI_ORDER_KEY], json!(["second", "first", "*"]));
        assert_eq!(ui["ports"]["items"][UI_ORDER_KEY], json!(["port", "name", "*"]));
    }

    #[test]
    fn test_malformed_directive_does_not_fail() {
        let derived = derive(
            "parameter:
  // +maximum=many
  // +maxLength=8
  name: string
",
        );
        assert_eq!(
            derived.schema["properties"]["name"],
            json!({"type": "string", "maxLength": 8})
        );
    }

    #[test]
    fn test_defaults() {
        let derived = derive(
            r#"parameter:
  replicas: *1 | int
  host: string
  resources:
    cpu: *"0.5" | string
  tuning?:
    buffer: *64 | int
  ports?: [...]
    protocol: *"TCP" | string
    port: int
"#,
        );

        let mut empty = json!({});
        derived.apply_defaults(&mut empty);
        assert_eq!(empty, json!({"replicas": 1, "resources": {"cpu": "0.5"}}));

        let mut user = json!({
            "host": "zk",
            "tuning": {},
            "ports": [{"port": 80}, {"port": 53, "protocol": "UDP"}]
        });
        derived.apply_defaults(&mut user);
        assert_eq!(user["tuning"], json!({"buffer": 64}));
        assert_eq!(user["ports"][0]["protocol"], "TCP");
        assert_eq!(user["ports"][1]["protocol"], "UDP");
        assert_eq!(user["resources"]["cpu"], "0.5");
    }

    #[test]
    fn test_field_lookup() {
        let derived = derive("parameter:\n  dependencies:\n    zookeeper: string\n");
        assert_eq!(
            derived.field("dependencies.zookeeper"),
            Some(&json!({"type": "string"}))
        );
        assert!(derived.field("dependencies.hdfs").is_none());
    }

    #[test]
    fn test_parse_errors_surface() {
        let err = SchemaDeriver::new()
            .derive("parameter:\n  host: strng\n")
            .unwrap_err();
        assert!(matches!(err, SchemaError::Parameter(_)));
    }
}
