//! Per-run execution context shared by expressions and HTTP bodies.

use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use taskgraph_workflow::Node;

/// What a node produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeOutput {
    /// Output visible to later expressions as `node_name`.
    pub value: JsonValue,
    /// Branch chosen by a Condition node.
    pub branch: Option<bool>,
    /// Variables merged into the context (Start nodes).
    pub variables: Map<String, JsonValue>,
}

impl NodeOutput {
    #[must_use]
    pub fn value(value: JsonValue) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn branch(outcome: bool) -> Self {
        Self {
            value: serde_json::json!({ "result": outcome }),
            branch: Some(outcome),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn seed(variables: Map<String, JsonValue>) -> Self {
        Self {
            value: JsonValue::Object(variables.clone()),
            variables,
            ..Self::default()
        }
    }
}

/// Variables, run parameters and node outputs accumulated during a run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    variables: Map<String, JsonValue>,
    parameters: Map<String, JsonValue>,
    outputs: BTreeMap<String, JsonValue>,
}

impl ExecutionContext {
    /// Creates a context holding the run's parameters.
    #[must_use]
    pub fn new(parameters: Map<String, JsonValue>) -> Self {
        Self {
            parameters,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn variables(&self) -> &Map<String, JsonValue> {
        &self.variables
    }

    #[must_use]
    pub fn parameters(&self) -> &Map<String, JsonValue> {
        &self.parameters
    }

    /// Returns node outputs keyed by node name.
    #[must_use]
    pub fn outputs(&self) -> &BTreeMap<String, JsonValue> {
        &self.outputs
    }

    /// Records a completed node's output.
    pub fn apply(&mut self, node: &Node, output: &NodeOutput) {
        self.variables.extend(output.variables.clone());
        self.outputs.insert(node.name.clone(), output.value.clone());
    }
}
