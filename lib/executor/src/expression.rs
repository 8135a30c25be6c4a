//! Boolean expressions over the execution context, evaluated with rhai.
//!
//! Scope layout:
//! - `vars`, `params` and `outputs`: maps of context variables, run
//!   parameters and node outputs keyed by node name. Every entry is reachable
//!   here, including names that are not identifiers (`outputs["fetch users"]`).
//! - shorthands: each variable and node output whose name is an identifier
//!   also appears as a top-level name, so `fetch.status` works. A node output
//!   hides a variable of the same name. The three map names are never hidden.
//! - assertions additionally see `status`, `body`, `json` and `headers`,
//!   which hide any shorthand of the same name.

use crate::context::ExecutionContext;
use crate::error::NodeExecutionError;
use rhai::{Dynamic, Engine, Scope};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::debug;

const RESERVED: [&str; 3] = ["vars", "params", "outputs"];

/// The response an assertion is checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseView {
    pub status: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

/// Evaluates condition, guard and assertion expressions.
pub struct ExpressionEngine {
    engine: Engine,
}

impl std::fmt::Debug for ExpressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionEngine").finish_non_exhaustive()
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEngine {
    #[must_use]
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(100_000);
        Self { engine }
    }

    /// Evaluates a boolean expression against the context.
    ///
    /// # Errors
    ///
    /// Returns `Expression` if the expression fails to parse or run, or does
    /// not produce a boolean.
    pub fn evaluate(
        &self,
        expression: &str,
        ctx: &ExecutionContext,
    ) -> Result<bool, NodeExecutionError> {
        let mut scope = context_scope(expression, ctx)?;
        self.eval(&mut scope, expression)
    }

    /// Evaluates an assertion against an HTTP response.
    ///
    /// # Errors
    ///
    /// As for [`evaluate`](Self::evaluate).
    pub fn evaluate_assertion(
        &self,
        expression: &str,
        ctx: &ExecutionContext,
        response: &ResponseView,
    ) -> Result<bool, NodeExecutionError> {
        let mut scope = context_scope(expression, ctx)?;
        let json: JsonValue = serde_json::from_str(&response.body).unwrap_or(JsonValue::Null);

        scope.push("status", i64::from(response.status));
        scope.push("body", response.body.clone());
        scope.push_dynamic("json", dynamic(expression, &json)?);
        scope.push_dynamic("headers", dynamic(expression, &response.headers)?);
        self.eval(&mut scope, expression)
    }

    fn eval(&self, scope: &mut Scope<'_>, expression: &str) -> Result<bool, NodeExecutionError> {
        self.engine
            .eval_with_scope::<bool>(scope, expression)
            .map_err(|e| NodeExecutionError::Expression {
                expression: expression.to_string(),
                message: e.to_string(),
            })
    }
}

fn dynamic(expression: &str, value: &impl serde::Serialize) -> Result<Dynamic, NodeExecutionError> {
    rhai::serde::to_dynamic(value).map_err(|e| NodeExecutionError::Expression {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

fn context_scope(
    expression: &str,
    ctx: &ExecutionContext,
) -> Result<Scope<'static>, NodeExecutionError> {
    let mut scope = Scope::new();
    for (name, value) in ctx.variables() {
        if is_shorthand(name) && !ctx.outputs().contains_key(name) {
            scope.push_dynamic(name.clone(), dynamic(expression, value)?);
        }
    }
    for (name, value) in ctx.outputs() {
        if is_shorthand(name) {
            if ctx.variables().contains_key(name) {
                debug!(name = %name, "node output hides variable of the same name");
            }
            scope.push_dynamic(name.clone(), dynamic(expression, value)?);
        }
    }
    scope.push_dynamic("vars", dynamic(expression, ctx.variables())?);
    scope.push_dynamic("params", dynamic(expression, ctx.parameters())?);
    scope.push_dynamic("outputs", dynamic(expression, ctx.outputs())?);
    Ok(scope)
}

fn is_shorthand(name: &str) -> bool {
    is_identifier(name) && !RESERVED.contains(&name)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
