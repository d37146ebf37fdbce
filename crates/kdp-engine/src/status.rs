//! Health policies and custom status messages
//!
//! A definition may carry a `healthPolicy` expression deciding whether the
//! live object is healthy and a `customStatus` template producing a message
//! for users. Both see the live object as `output` and the render context
//! as `context`. Missing fields of the live object are falsy rather than
//! errors, so `output.status.readyReplicas == 1` simply evaluates to false
//! before the object reports any status.

use kdp_core::{Context, Definition};
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{EngineError, Result};
use crate::filters;

/// Outcome of evaluating a definition's status rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Evaluates status rules against live objects
pub struct PolicyEvaluator {
    env: Environment<'static>,
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        filters::register(&mut env);
        Self { env }
    }

    /// Evaluate a health policy expression
    pub fn is_healthy(&self, policy: &str, live: &JsonValue, context: &Context) -> Result<bool> {
        let source = format!("{{% if {} %}}true{{% else %}}false{{% endif %}}", policy.trim());
        let rendered = self.render(&source, live, context)?;
        Ok(rendered == "true")
    }

    /// Render a custom status message
    pub fn custom_status(&self, template: &str, live: &JsonValue, context: &Context) -> Result<String> {
        Ok(self.render(template, live, context)?.trim().to_string())
    }

    /// Apply both rules of a definition
    ///
    /// A definition without a health policy is always healthy.
    pub fn evaluate(&self, definition: &Definition, live: &JsonValue, context: &Context) -> Result<StatusReport> {
        let healthy = match &definition.health_policy {
            Some(policy) if !policy.trim().is_empty() => self.is_healthy(policy, live, context)?,
            _ => true,
        };
        let message = match &definition.custom_status {
            Some(template) => Some(self.custom_status(template, live, context)?).filter(|m| !m.is_empty()),
            None => None,
        };
        Ok(StatusReport { healthy, message })
    }

    fn render(&self, source: &str, live: &JsonValue, context: &Context) -> Result<String> {
        let ctx = minijinja::context! {
            output => live,
            context => context.to_json(),
        };
        self.env
            .render_str(source, ctx)
            .map_err(|e| EngineError::Policy {
                message: e.to_string(),
            })
    }
}
