//! Render engine based on MiniJinja
//!
//! A render binds the user parameters (declared defaults filled in, then
//! validated against the derived schema) to `parameter` and the render
//! context to `context`, evaluates the template body, parses the result as
//! YAML and extracts the `output` field followed by the entries of the
//! `outputs` map.
//!
//! Every `{{ }}` expression is JSON-escaped, so it always yields a data
//! literal: `name: {{ context.name }}` renders as `name: "app-config"`.
//! Build composite strings inside the expression
//! (`{{ context.name ~ "-svc" }}`) rather than around it.

use jsonschema::error::ValidationErrorKind;
use kdp_core::{Context, Definition, Parameters};
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::RenderError;
use crate::filters;
use crate::parameter::parse_parameters;
use crate::schema::{DerivedSchema, SchemaDeriver};
use crate::template::split_template;

/// Name used in diagnostics when the template has none
const ANONYMOUS: &str = "<template>";

/// One rendered cluster object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedManifest {
    /// Key in the `outputs` map, None for `output`
    pub output_name: Option<String>,

    /// The object itself
    pub object: JsonValue,
}

impl RenderedManifest {
    fn str_field(&self, pointer: &str) -> Option<&str> {
        self.object.pointer(pointer).and_then(JsonValue::as_str)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.str_field("/apiVersion")
    }

    pub fn kind(&self) -> Option<&str> {
        self.str_field("/kind")
    }

    pub fn name(&self) -> Option<&str> {
        self.str_field("/metadata/name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.str_field("/metadata/namespace")
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.object)
    }
}

/// Ordered result of one render: `output` first, then each `outputs` entry
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RenderedManifests {
    items: Vec<RenderedManifest>,
}

impl RenderedManifests {
    pub fn iter(&self) -> std::slice::Iter<'_, RenderedManifest> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Serialize as a multi-document YAML stream
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let docs = self
            .items
            .iter()
            .map(RenderedManifest::to_yaml)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(docs.join("---\n"))
    }
}

impl IntoIterator for RenderedManifests {
    type Item = RenderedManifest;
    type IntoIter = std::vec::IntoIter<RenderedManifest>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl FromIterator<RenderedManifest> for RenderedManifests {
    fn from_iter<I: IntoIterator<Item = RenderedManifest>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RenderedManifests {
    type Item = &'a RenderedManifest;
    type IntoIter = std::slice::Iter<'a, RenderedManifest>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Render engine builder
pub struct EngineBuilder {
    strict_mode: bool,
    validate_parameters: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            strict_mode: true,
            validate_parameters: true,
        }
    }

    /// Fail on undefined references (on by default)
    ///
    /// When off, undefined values render as `null` and are reported by the
    /// concreteness check instead.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Validate parameters against the derived schema (on by default)
    pub fn validate_parameters(mut self, validate: bool) -> Self {
        self.validate_parameters = validate;
        self
    }

    pub fn build(self) -> Engine {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(UndefinedBehavior::Lenient);
        }
        env.set_auto_escape_callback(|_| AutoEscape::Json);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        filters::register(&mut env);

        Engine {
            env,
            validate_parameters: self.validate_parameters,
        }
    }
}

/// The render engine
///
/// Stateless between calls and safe to share across threads.
pub struct Engine {
    env: Environment<'static>,
    validate_parameters: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Render a template
    pub fn render(
        &self,
        template: &str,
        context: &Context,
        parameters: &Parameters,
    ) -> Result<RenderedManifests, RenderError> {
        self.render_named(ANONYMOUS, template, context, parameters)
    }

    /// Render a definition's template, naming it in diagnostics
    pub fn render_definition(
        &self,
        definition: &Definition,
        context: &Context,
        parameters: &Parameters,
    ) -> Result<RenderedManifests, RenderError> {
        self.render_named(&definition.name, &definition.template, context, parameters)
    }

    fn render_named(
        &self,
        name: &str,
        template: &str,
        context: &Context,
        parameters: &Parameters,
    ) -> Result<RenderedManifests, RenderError> {
        let parts = split_template(template);
        let fields = parse_parameters(&parts).map_err(|e| {
            let line = e.line;
            RenderError::from(e).with_source(name, template, Some(line))
        })?;
        let derived = SchemaDeriver::new().derive_fields(&fields);
        let parameter = self
            .resolve_parameters(&derived, parameters)
            .map_err(|e| e.with_source(name, template, None))?;

        let ctx = minijinja::context! {
            parameter => &parameter,
            context => context.to_json(),
        };
        let rendered = self
            .env
            .render_named_str(name, &parts.body, ctx)
            .map_err(|e| RenderError::from_minijinja(&e, name, template))?;

        let document: JsonValue = serde_yaml::from_str(&rendered).map_err(|e| {
            RenderError::compile(format!("rendered template is not valid YAML: {}", e))
                .with_source(name, &rendered, e.location().map(|l| l.line()))
        })?;

        let manifests = extract(document).map_err(|e| e.with_source(name, template, None))?;
        tracing::debug!(template = name, count = manifests.len(), "rendered template");
        Ok(manifests)
    }

    /// Fill declared defaults and check the result against the schema
    fn resolve_parameters(
        &self,
        derived: &DerivedSchema,
        parameters: &Parameters,
    ) -> Result<JsonValue, RenderError> {
        let mut value = if parameters.is_empty() {
            JsonValue::Object(serde_json::Map::new())
        } else {
            parameters.inner().clone()
        };
        derived.apply_defaults(&mut value);

        if !self.validate_parameters {
            return Ok(value);
        }

        let validator = derived
            .validator()
            .map_err(|e| RenderError::compile(e.to_string()))?;
        if let Some(error) = validator.iter_errors(&value).next() {
            let path = pointer_to_path("parameter", &error.instance_path.to_string());
            return Err(match &error.kind {
                ValidationErrorKind::Required { property } => {
                    let property = property
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| property.to_string());
                    RenderError::not_concrete(
                        format!("{}.{}", path, property),
                        "required parameter is missing",
                    )
                }
                _ => RenderError::evaluation(format!("{}: {}", path, error)),
            });
        }
        Ok(value)
    }
}

/// Pull `output` and `outputs` out of the rendered document
fn extract(document: JsonValue) -> Result<RenderedManifests, RenderError> {
    let mut items = Vec::new();
    let mut root = match document {
        JsonValue::Object(root) => root,
        JsonValue::Null => return Ok(RenderedManifests::default()),
        _ => return Err(RenderError::evaluation("rendered template must be a mapping")),
    };

    if let Some(output) = root.remove("output") {
        items.push(manifest(None, output, "output")?);
    }

    match root.remove("outputs") {
        None | Some(JsonValue::Null) => {}
        Some(JsonValue::Object(outputs)) => {
            for (key, object) in outputs {
                let path = format!("outputs.{}", key);
                items.push(manifest(Some(key), object, &path)?);
            }
        }
        Some(_) => return Err(RenderError::evaluation("outputs must be a mapping")),
    }

    Ok(RenderedManifests { items })
}

fn manifest(output_name: Option<String>, object: JsonValue, path: &str) -> Result<RenderedManifest, RenderError> {
    check_concrete(&object, path)?;
    if !object.is_object() {
        return Err(RenderError::evaluation(format!("{} must be a mapping", path)));
    }
    Ok(RenderedManifest {
        output_name,
        object,
    })
}

/// Reject any `null` left in a rendered object
fn check_concrete(value: &JsonValue, path: &str) -> Result<(), RenderError> {
    match value {
        JsonValue::Null => Err(RenderError::not_concrete(path, "value is not concrete")),
        JsonValue::Object(map) => map
            .iter()
            .try_for_each(|(key, child)| check_concrete(child, &format!("{}.{}", path, key))),
        JsonValue::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, child)| check_concrete(child, &format!("{}[{}]", path, i))),
        _ => Ok(()),
    }
}

/// `/a/0/b` under `parameter` becomes `parameter.a[0].b`
fn pointer_to_path(root: &str, pointer: &str) -> String {
    let mut path = root.to_string();
    for token in pointer.split('/').skip(1) {
        let token = token.replace("~1", "/").replace("~0", "~");
        if token.parse::<usize>().is_ok() {
            path.push_str(&format!("[{}]", token));
        } else {
            path.push('.');
            path.push_str(&token);
        }
    }
    path
}
