//! Workflow node types and configurations.
//!
//! Each node has:
//! - A unique ID minted at creation
//! - A type from a closed set, grouped into input, process and terminate categories
//! - One strongly-typed configuration record for that type, checked when saved
//! - Canvas coordinates carried through for the editor

use crate::curl::parse_curl;
use crate::error::{ConfigurationError, GraphError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use taskgraph_core::{NodeId, WorkflowId};

/// HTTP methods accepted by HTTP nodes.
pub const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// The type of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    /// Seeds the execution context.
    Start,
    /// Cron-scheduled entry point.
    Trigger,
    /// Event-topic entry point.
    Event,
    /// HTTP call that authenticates against a service.
    HttpAuth,
    /// HTTP call.
    HttpAction,
    /// Shell command.
    CommandLine,
    /// Boolean branch with `true` and `false` outputs.
    Condition,
    /// Terminal marker.
    End,
}

impl NodeType {
    /// Every node type, in palette order.
    pub const ALL: [Self; 8] = [
        Self::Start,
        Self::Trigger,
        Self::Event,
        Self::HttpAuth,
        Self::HttpAction,
        Self::CommandLine,
        Self::Condition,
        Self::End,
    ];

    /// Returns the canonical name used in interchange documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Trigger => "Trigger",
            Self::Event => "Event",
            Self::HttpAuth => "HttpAuth",
            Self::HttpAction => "HttpAction",
            Self::CommandLine => "CommandLine",
            Self::Condition => "Condition",
            Self::End => "End",
        }
    }

    /// Returns the category of this node type.
    #[must_use]
    pub const fn category(&self) -> NodeCategory {
        match self {
            Self::Start | Self::Trigger | Self::Event => NodeCategory::Input,
            Self::HttpAuth | Self::HttpAction | Self::CommandLine | Self::Condition => {
                NodeCategory::Process
            }
            Self::End => NodeCategory::Terminate,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = GraphError;

    /// Accepts the canonical name as well as the editor's camelCase and
    /// snake_case spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| GraphError::UnknownNodeType {
                node_type: s.to_string(),
            })
    }
}

/// The category of a node type, which determines where it may sit in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Entry points: no incoming edges expected.
    Input,
    /// Processing steps: incoming and outgoing edges.
    Process,
    /// Terminal steps: no outgoing edges expected.
    Terminate,
}

/// Configuration for Start nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConfig {
    /// Optional label for the seeded context.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Variables copied into the execution context.
    #[serde(default, deserialize_with = "null_as_default")]
    pub variables: Map<String, JsonValue>,
}

/// Configuration for Trigger nodes.
///
/// The cron expression is canonical; the helper fields only mirror the
/// editor's form inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    #[serde(default)]
    pub cron_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_minute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_hour: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_week: Option<String>,
}

/// Configuration for Event nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    #[serde(default)]
    pub event_topic: String,
}

/// Authentication scheme for HTTP nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    #[default]
    #[serde(alias = "none")]
    None,
    #[serde(alias = "basic")]
    Basic,
    #[serde(alias = "bearer")]
    Bearer,
    #[serde(alias = "apiKey", alias = "apikey")]
    ApiKey,
}

/// Authentication settings and credentials for HTTP nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl AuthSettings {
    fn check(&self, node_type: NodeType) -> Result<(), ConfigurationError> {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        let missing = |field| ConfigurationError::MissingField { node_type, field };

        match self.auth_type {
            AuthType::None => Ok(()),
            AuthType::Basic if !present(&self.username) => Err(missing("username")),
            AuthType::Bearer if !present(&self.token) => Err(missing("token")),
            AuthType::ApiKey if !present(&self.header_name) => Err(missing("headerName")),
            AuthType::ApiKey if !present(&self.api_key) => Err(missing("apiKey")),
            _ => Ok(()),
        }
    }
}

/// Configuration shared by HttpAuth and HttpAction nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestConfig {
    #[serde(default, alias = "authUrl")]
    pub url: String,
    /// Defaults to the curl method, then POST.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curl_command: Option<String>,
    #[serde(default, deserialize_with = "header_map")]
    pub headers: BTreeMap<String, String>,
    #[serde(
        default,
        deserialize_with = "body_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_parameters: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion_expression: Option<String>,
    #[serde(flatten)]
    pub auth: AuthSettings,
}

/// An HTTP request with curl-derived values merged under explicit fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Node-configured body (explicit or curl-derived).
    pub body: Option<String>,
}

impl HttpRequestConfig {
    /// Creates a configuration for the given method and URL.
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http_method: Some(method.into()),
            ..Self::default()
        }
    }

    /// Resolves the effective request.
    ///
    /// # Errors
    ///
    /// Returns an error if the curl command is invalid, no URL is available,
    /// or the method is not supported.
    pub fn resolve(&self, node_type: NodeType) -> Result<ResolvedRequest, ConfigurationError> {
        let curl = match self.curl_command.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => Some(parse_curl(command)?),
            _ => None,
        };

        let url = match self.url.trim() {
            "" => curl.as_ref().map(|c| c.url.clone()).unwrap_or_default(),
            url => url.to_string(),
        };
        if url.is_empty() {
            return Err(ConfigurationError::MissingField {
                node_type,
                field: "url",
            });
        }

        let method = self
            .http_method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| curl.as_ref().map(|c| c.method.clone()))
            .unwrap_or_else(|| "POST".to_string())
            .to_ascii_uppercase();
        if !HTTP_METHODS.contains(&method.as_str()) {
            return Err(ConfigurationError::UnsupportedMethod { method });
        }

        let mut headers = curl.as_ref().map(|c| c.headers.clone()).unwrap_or_default();
        headers.extend(self.headers.clone());

        let body = self
            .request_body
            .clone()
            .filter(|b| !b.is_empty())
            .or_else(|| curl.and_then(|c| c.body));

        Ok(ResolvedRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

/// Configuration for CommandLine nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandLineConfig {
    #[serde(default)]
    pub command: String,
    /// Overrides the executor's default command timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Configuration for Condition nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    #[serde(default)]
    pub condition_expression: String,
}

/// Configuration for End nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndConfig {}

/// Typed node configuration, one record per node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "configuration", rename_all = "camelCase")]
pub enum NodeConfig {
    Start(StartConfig),
    Trigger(TriggerConfig),
    Event(EventConfig),
    HttpAuth(HttpRequestConfig),
    HttpAction(HttpRequestConfig),
    CommandLine(CommandLineConfig),
    Condition(ConditionConfig),
    End(EndConfig),
}

impl NodeConfig {
    /// Returns the node type this configuration belongs to.
    #[must_use]
    pub const fn node_type(&self) -> NodeType {
        match self {
            Self::Start(_) => NodeType::Start,
            Self::Trigger(_) => NodeType::Trigger,
            Self::Event(_) => NodeType::Event,
            Self::HttpAuth(_) => NodeType::HttpAuth,
            Self::HttpAction(_) => NodeType::HttpAction,
            Self::CommandLine(_) => NodeType::CommandLine,
            Self::Condition(_) => NodeType::Condition,
            Self::End(_) => NodeType::End,
        }
    }

    /// Parses a raw JSON payload for the given node type.
    ///
    /// A `null` payload is read as an empty object, so types whose fields all
    /// have defaults accept it.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match the type's record.
    pub fn from_json(node_type: NodeType, value: JsonValue) -> Result<Self, ConfigurationError> {
        let value = match value {
            JsonValue::Null => JsonValue::Object(Map::new()),
            value => value,
        };
        let invalid = |e: serde_json::Error| ConfigurationError::InvalidPayload {
            node_type,
            reason: e.to_string(),
        };

        Ok(match node_type {
            NodeType::Start => Self::Start(serde_json::from_value(value).map_err(invalid)?),
            NodeType::Trigger => Self::Trigger(serde_json::from_value(value).map_err(invalid)?),
            NodeType::Event => Self::Event(serde_json::from_value(value).map_err(invalid)?),
            NodeType::HttpAuth => Self::HttpAuth(serde_json::from_value(value).map_err(invalid)?),
            NodeType::HttpAction => {
                Self::HttpAction(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeType::CommandLine => {
                Self::CommandLine(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeType::Condition => {
                Self::Condition(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeType::End => Self::End(serde_json::from_value(value).map_err(invalid)?),
        })
    }

    /// Returns the configuration payload without the type tag.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Start(c) => serde_json::to_value(c),
            Self::Trigger(c) => serde_json::to_value(c),
            Self::Event(c) => serde_json::to_value(c),
            Self::HttpAuth(c) | Self::HttpAction(c) => serde_json::to_value(c),
            Self::CommandLine(c) => serde_json::to_value(c),
            Self::Condition(c) => serde_json::to_value(c),
            Self::End(c) => serde_json::to_value(c),
        }
        .unwrap_or_default()
    }

    /// Checks the content rules for the node type.
    ///
    /// # Errors
    ///
    /// Returns the first missing or invalid field.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let node_type = self.node_type();
        let require = |value: &str, field| {
            if value.trim().is_empty() {
                Err(ConfigurationError::MissingField { node_type, field })
            } else {
                Ok(())
            }
        };

        match self {
            Self::Start(_) | Self::End(_) => Ok(()),
            Self::Trigger(c) => require(&c.cron_expression, "cronExpression"),
            Self::Event(c) => require(&c.event_topic, "eventTopic"),
            Self::HttpAuth(c) | Self::HttpAction(c) => {
                c.resolve(node_type)?;
                c.auth.check(node_type)
            }
            Self::CommandLine(c) => require(&c.command, "command"),
            Self::Condition(c) => require(&c.condition_expression, "conditionExpression"),
        }
    }
}

/// Canvas coordinates. Carried through but not interpreted by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: NodeId,
    /// The owning workflow, stamped when the node joins one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    /// Display name, referenced by expressions as `name.field`.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Type-specific configuration.
    pub config: NodeConfig,
    /// Canvas position.
    #[serde(default)]
    pub position: Position,
    /// Opaque editor styling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Creates a new node with a fresh ID.
    #[must_use]
    pub fn new(name: impl Into<String>, config: NodeConfig) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::new(),
            workflow_id: None,
            name: name.into(),
            description: None,
            config,
            position: Position::default(),
            style: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the canvas position.
    #[must_use]
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    /// Returns the node type.
    #[must_use]
    pub const fn node_type(&self) -> NodeType {
        self.config.node_type()
    }

    /// Returns the node category.
    #[must_use]
    pub const fn category(&self) -> NodeCategory {
        self.config.node_type().category()
    }

    /// Checks the name invariants: non-empty and free of `.`.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violated invariant.
    pub fn check_name(&self) -> Result<(), GraphError> {
        if self.name.trim().is_empty() {
            return Err(GraphError::EmptyNodeName { node_id: self.id });
        }
        if self.name.contains('.') {
            return Err(GraphError::InvalidNodeName {
                node_id: self.id,
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reads headers from an object, from a JSON-encoded object string, or from
/// `Name: value` lines.
fn header_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let object_to_map = |map: Map<String, JsonValue>| {
        map.into_iter()
            .map(|(name, value)| match value {
                JsonValue::String(s) => (name, s),
                other => (name, other.to_string()),
            })
            .collect()
    };

    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(BTreeMap::new()),
        Some(JsonValue::Object(map)) => Ok(object_to_map(map)),
        Some(JsonValue::String(text)) => {
            let text = text.trim();
            if text.starts_with('{') {
                serde_json::from_str::<Map<String, JsonValue>>(text)
                    .map(object_to_map)
                    .map_err(D::Error::custom)
            } else {
                Ok(text
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                    .filter(|(name, _)| !name.is_empty())
                    .collect())
            }
        }
        Some(other) => Err(D::Error::custom(format!(
            "expected a header object, found {other}"
        ))),
    }
}

/// Reads a body given either as text or as inline JSON.
fn body_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
