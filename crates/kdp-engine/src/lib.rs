//! KDP Engine - renders definitions into manifests and input schemas
//!
//! This crate provides:
//! - A MiniJinja-based render engine binding `parameter` and `context`,
//!   with concreteness checks on every extracted output
//! - A small typed language for the `parameter:` declaration block
//! - Schema derivation: JSON Schema plus a companion UI schema built from
//!   `+directive=value` annotations
//! - Evaluation of custom status and health policies

pub mod directives;
pub mod engine;
pub mod error;
pub mod filters;
pub mod parameter;
pub mod schema;
pub mod status;
pub mod template;

pub use directives::{Annotations, Directive};
pub use engine::{Engine, EngineBuilder, RenderedManifest, RenderedManifests};
pub use error::{DirectiveError, EngineError, RenderError, RenderErrorKind, Result, SchemaError};
pub use parameter::{ParamField, ParameterError};
pub use schema::{DerivedSchema, SchemaDeriver, UI_ORDER_KEY, UI_ORDER_REST};
pub use status::{PolicyEvaluator, StatusReport};
pub use template::{TemplateParts, split_template};
