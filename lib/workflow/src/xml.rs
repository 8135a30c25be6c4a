//! XML interchange documents.
//!
//! A document has a single `Workflow` root carrying the metadata, followed by
//! `Nodes` and `Edges` in graph enumeration order:
//!
//! ```xml
//! <Workflow Id="wf_..." Version="3">
//!   <Name>Nightly sync</Name>
//!   <IsActive>true</IsActive>
//!   <EnableSchedule>false</EnableSchedule>
//!   <Nodes>
//!     <Node Id="node_..." Type="HttpAction">
//!       <Name>fetch</Name>
//!       <Configuration><![CDATA[{"url":"https://example/ok"}]]></Configuration>
//!       <Position><X>120</X><Y>40</Y></Position>
//!     </Node>
//!   </Nodes>
//!   <Edges>
//!     <Edge Id="edge_..." SourceNodeId="node_..." TargetNodeId="node_...">
//!       <Label>true</Label>
//!       <Priority>0</Priority>
//!     </Edge>
//!   </Edges>
//! </Workflow>
//! ```
//!
//! Optional values are omitted when absent. Timestamps are RFC 3339.

use crate::definition::{Workflow, WorkflowMetadata};
use crate::edge::Edge;
use crate::error::{ExportError, ImportError};
use crate::node::{Node, NodeConfig, NodeType, Position};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::str::FromStr;
use taskgraph_core::{EdgeId, NodeId, WorkflowId};

const ROOT: &str = "Workflow";

/// Renders a workflow as an interchange document.
///
/// # Errors
///
/// Returns an error if the document cannot be written.
pub fn to_document(workflow: &Workflow) -> Result<String, ExportError> {
    let mut out = DocumentWriter::new();
    let meta = &workflow.metadata;

    out.decl()?;
    let (id, version) = (workflow.id.to_string(), meta.version.to_string());
    out.start(ROOT, &[("Id", id.as_str()), ("Version", version.as_str())])?;
    out.leaf("Name", &meta.name)?;
    out.optional("Description", meta.description.as_deref())?;
    out.leaf("IsActive", &meta.active.to_string())?;
    out.optional("CronExpression", meta.cron_expression.as_deref())?;
    out.leaf("EnableSchedule", &meta.enable_schedule.to_string())?;
    out.optional(
        "LastExecutionTime",
        meta.last_execution_at.map(timestamp).as_deref(),
    )?;
    out.optional(
        "NextExecutionTime",
        meta.next_execution_at.map(timestamp).as_deref(),
    )?;
    out.leaf("CreatedAt", &timestamp(meta.created_at))?;
    out.leaf("UpdatedAt", &timestamp(meta.updated_at))?;

    out.start("Nodes", &[])?;
    for node in workflow.graph.nodes() {
        write_node(&mut out, node)?;
    }
    out.end("Nodes")?;

    out.start("Edges", &[])?;
    for edge in workflow.graph.edges() {
        write_edge(&mut out, edge)?;
    }
    out.end("Edges")?;

    out.end(ROOT)?;
    out.finish()
}

fn write_node(out: &mut DocumentWriter, node: &Node) -> Result<(), ExportError> {
    let id = node.id.to_string();
    out.start("Node", &[("Id", id.as_str()), ("Type", node.node_type().as_str())])?;
    out.leaf("Name", &node.name)?;
    out.optional("Description", node.description.as_deref())?;

    let configuration = serde_json::to_string(&node.config.to_json()).map_err(write_error)?;
    out.verbatim("Configuration", &configuration)?;

    out.start("Position", &[])?;
    out.leaf("X", &node.position.x.to_string())?;
    out.leaf("Y", &node.position.y.to_string())?;
    out.end("Position")?;

    out.optional("StyleConfig", node.style.as_deref())?;
    out.leaf("CreatedAt", &timestamp(node.created_at))?;
    out.leaf("UpdatedAt", &timestamp(node.updated_at))?;
    out.end("Node")
}

fn write_edge(out: &mut DocumentWriter, edge: &Edge) -> Result<(), ExportError> {
    let (id, source, target) = (
        edge.id.to_string(),
        edge.source.to_string(),
        edge.target.to_string(),
    );
    out.start(
        "Edge",
        &[
            ("Id", id.as_str()),
            ("SourceNodeId", source.as_str()),
            ("TargetNodeId", target.as_str()),
        ],
    )?;
    out.optional("Label", edge.port.as_deref())?;
    out.optional("Condition", edge.condition.as_deref())?;
    out.leaf("Priority", &edge.priority.to_string())?;
    out.optional("StyleConfig", edge.style.as_deref())?;
    out.leaf("CreatedAt", &timestamp(edge.created_at))?;
    out.leaf("UpdatedAt", &timestamp(edge.updated_at))?;
    out.end("Edge")
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn write_error(e: impl Display) -> ExportError {
    ExportError::Write {
        reason: e.to_string(),
    }
}

struct DocumentWriter {
    writer: Writer<Vec<u8>>,
}

impl DocumentWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), ExportError> {
        self.writer.write_event(event).map_err(write_error)
    }

    fn decl(&mut self) -> Result<(), ExportError> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), ExportError> {
        let element = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.event(Event::Start(element))
    }

    fn end(&mut self, name: &str) -> Result<(), ExportError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn leaf(&mut self, name: &str, text: &str) -> Result<(), ExportError> {
        if text.is_empty() {
            return self.event(Event::Empty(BytesStart::new(name)));
        }
        self.start(name, &[])?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn optional(&mut self, name: &str, text: Option<&str>) -> Result<(), ExportError> {
        match text {
            Some(text) => self.leaf(name, text),
            None => Ok(()),
        }
    }

    /// Writes text as CDATA, falling back to escaped text when the content
    /// would terminate the CDATA section.
    fn verbatim(&mut self, name: &str, text: &str) -> Result<(), ExportError> {
        if text.is_empty() || text.contains("]]>") {
            return self.leaf(name, text);
        }
        self.start(name, &[])?;
        self.event(Event::CData(BytesCData::new(text)))?;
        self.end(name)
    }

    fn finish(self) -> Result<String, ExportError> {
        String::from_utf8(self.writer.into_inner()).map_err(write_error)
    }
}

/// A parsed element. Text is the concatenation of its text and CDATA
/// children; whitespace between child elements is kept but unused.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    fn items<'a>(&'a self, list: &str, item: &'a str) -> impl Iterator<Item = &'a Element> {
        self.child(list)
            .into_iter()
            .flat_map(move |l| l.children.iter().filter(move |c| c.name == item))
    }
}

fn malformed(e: impl Display) -> ImportError {
    ImportError::Malformed {
        reason: e.to_string(),
    }
}

fn open_element(start: &BytesStart<'_>) -> Result<Element, ImportError> {
    let mut element = Element {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Element::default()
    };
    for attribute in start.attributes() {
        let attribute = attribute.map_err(malformed)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(malformed)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn parse_tree(document: &str) -> Result<Element, ImportError> {
    if document.trim().is_empty() {
        return Err(ImportError::Empty);
    }

    let mut reader = Reader::from_str(document);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    let mut attach = |stack: &mut Vec<Element>, element: Element| -> Result<(), ImportError> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_none() => root = Some(element),
            None => return Err(malformed("multiple root elements")),
        }
        Ok(())
    };

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => stack.push(open_element(&start)?),
            Event::Empty(start) => {
                let element = open_element(&start)?;
                attach(&mut stack, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed("unexpected closing tag"))?;
                attach(&mut stack, element)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(malformed)?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unexpected end of document"));
    }
    root.ok_or_else(|| malformed("no root element"))
}

/// Checks a document's shape without building a workflow: root element,
/// workflow name, node ID uniqueness and edge endpoint resolution.
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate_document(document: &str) -> Result<(), ImportError> {
    check_tree(&parse_tree(document)?)
}

fn check_tree(root: &Element) -> Result<(), ImportError> {
    if root.name != ROOT {
        return Err(ImportError::UnexpectedRoot {
            found: root.name.clone(),
        });
    }
    if root.child_text("Name").is_none_or(|n| n.trim().is_empty()) {
        return Err(ImportError::MissingWorkflowName);
    }

    let mut declared: HashSet<&str> = HashSet::new();
    for node in root.items("Nodes", "Node") {
        let id = node.attribute("Id").map(str::trim).unwrap_or_default();
        if id.is_empty() {
            return Err(ImportError::InvalidNodeId {
                value: id.to_string(),
            });
        }
        if !declared.insert(id) {
            return Err(ImportError::DuplicateNodeId {
                value: id.to_string(),
            });
        }
    }

    for edge in root.items("Edges", "Edge") {
        let label = edge.attribute("Id").unwrap_or_default();
        for (end, attribute) in [("source", "SourceNodeId"), ("target", "TargetNodeId")] {
            let node = edge.attribute(attribute).map(str::trim).unwrap_or_default();
            if !declared.contains(node) {
                return Err(ImportError::UnknownEdgeEndpoint {
                    edge: label.to_string(),
                    end,
                    node: node.to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Parses a document, keeping the identities it declares.
///
/// # Errors
///
/// Returns an error if the document fails [`validate_document`], an ID or
/// value cannot be parsed, a node configuration is rejected, or the graph
/// violates a structural invariant.
pub fn from_document(document: &str) -> Result<Workflow, ImportError> {
    let root = parse_tree(document)?;
    check_tree(&root)?;
    build(&root, Identities::Keep)
}

/// Parses a document for import into a store that may already hold it.
///
/// Every workflow, node and edge receives a fresh identity and edge endpoints
/// are rewritten through the old-to-new node map. Declared IDs only need to
/// be unique, so documents from systems with other ID schemes import too.
/// The imported workflow starts at version 1.
///
/// # Errors
///
/// As for [`from_document`].
pub fn import_document(document: &str) -> Result<Workflow, ImportError> {
    let root = parse_tree(document)?;
    check_tree(&root)?;
    build(&root, Identities::Remint)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Identities {
    Keep,
    Remint,
}

fn invalid(element: &str, field: &str, value: &str) -> ImportError {
    ImportError::InvalidValue {
        element: element.to_string(),
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn parse_field<T: FromStr>(element: &str, field: &str, value: &str) -> Result<T, ImportError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(element, field, value))
}

fn parse_bool(element: &Element, field: &str, default: bool) -> Result<bool, ImportError> {
    match element.child_text(field).map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(invalid(&element.name, field, v)),
    }
}

fn parse_time(element: &Element, field: &str) -> Result<Option<DateTime<Utc>>, ImportError> {
    match element.child_text(field).map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => DateTime::parse_from_rfc3339(v)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| invalid(&element.name, field, v)),
    }
}

fn optional_text(element: &Element, field: &str) -> Option<String> {
    element.child_text(field).map(str::to_string)
}

fn build(root: &Element, identities: Identities) -> Result<Workflow, ImportError> {
    let remint = identities == Identities::Remint;
    let now = Utc::now();

    let id = match root.attribute("Id").map(str::trim) {
        Some(value) if !remint && !value.is_empty() => {
            parse_field::<WorkflowId>(ROOT, "Id", value)?
        }
        _ => WorkflowId::new(),
    };
    let version = match root.attribute("Version").map(str::trim) {
        Some(value) if !remint && !value.is_empty() => parse_field(ROOT, "Version", value)?,
        _ => 1,
    };

    let name = root.child_text("Name").unwrap_or_default().trim().to_string();
    let mut workflow = Workflow::with_id(id, name.clone());
    workflow.metadata = WorkflowMetadata {
        name,
        description: optional_text(root, "Description"),
        version,
        active: parse_bool(root, "IsActive", true)?,
        cron_expression: optional_text(root, "CronExpression"),
        enable_schedule: parse_bool(root, "EnableSchedule", false)?,
        last_execution_at: parse_time(root, "LastExecutionTime")?,
        next_execution_at: parse_time(root, "NextExecutionTime")?,
        created_at: now,
        updated_at: now,
    };
    if !remint {
        workflow.metadata.created_at = parse_time(root, "CreatedAt")?.unwrap_or(now);
        workflow.metadata.updated_at = parse_time(root, "UpdatedAt")?.unwrap_or(now);
    }

    let mut node_ids: HashMap<&str, NodeId> = HashMap::new();
    for element in root.items("Nodes", "Node") {
        let declared = element.attribute("Id").map(str::trim).unwrap_or_default();
        let node_id = if remint {
            NodeId::new()
        } else {
            declared.parse().map_err(|_| ImportError::InvalidNodeId {
                value: declared.to_string(),
            })?
        };
        node_ids.insert(declared, node_id);
        workflow.add_node(build_node(element, node_id, now)?)?;
    }

    for element in root.items("Edges", "Edge") {
        let edge_id = match element.attribute("Id").map(str::trim) {
            Some(value) if !remint && !value.is_empty() => {
                parse_field::<EdgeId>("Edge", "Id", value)?
            }
            _ => EdgeId::new(),
        };
        let endpoint = |attribute: &str, end: &'static str| {
            let declared = element.attribute(attribute).map(str::trim).unwrap_or_default();
            node_ids
                .get(declared)
                .copied()
                .ok_or_else(|| ImportError::UnknownEdgeEndpoint {
                    edge: element.attribute("Id").unwrap_or_default().to_string(),
                    end,
                    node: declared.to_string(),
                })
        };

        let mut edge = Edge::new(
            endpoint("SourceNodeId", "source")?,
            endpoint("TargetNodeId", "target")?,
        );
        edge.id = edge_id;
        edge.port = optional_text(element, "Label");
        edge.condition = optional_text(element, "Condition");
        edge.priority = match element.child_text("Priority").map(str::trim) {
            None | Some("") => 0,
            Some(value) => parse_field("Edge", "Priority", value)?,
        };
        edge.style = optional_text(element, "StyleConfig");
        edge.created_at = parse_time(element, "CreatedAt")?.unwrap_or(now);
        edge.updated_at = parse_time(element, "UpdatedAt")?.unwrap_or(now);
        workflow.add_edge(edge)?;
    }

    workflow.validate()?;
    Ok(workflow)
}

fn build_node(element: &Element, node_id: NodeId, now: DateTime<Utc>) -> Result<Node, ImportError> {
    let type_name = element.attribute("Type").unwrap_or_default();
    let node_type: NodeType = type_name
        .parse()
        .map_err(|_| ImportError::UnknownNodeType {
            value: type_name.to_string(),
        })?;
    let name = element.child_text("Name").unwrap_or_default().to_string();

    let raw = element.child_text("Configuration").unwrap_or_default().trim();
    let payload = if raw.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(raw).map_err(|e| ImportError::Configuration {
            node: name.clone(),
            error: crate::error::ConfigurationError::InvalidPayload {
                node_type,
                reason: e.to_string(),
            },
        })?
    };
    let config = NodeConfig::from_json(node_type, payload)
        .and_then(|config| config.validate().map(|()| config))
        .map_err(|error| ImportError::Configuration {
            node: name.clone(),
            error,
        })?;

    let position = match element.child("Position") {
        Some(position) => Position {
            x: coordinate(position, "X")?,
            y: coordinate(position, "Y")?,
        },
        None => Position::default(),
    };

    let mut node = Node::new(name, config);
    node.id = node_id;
    node.description = optional_text(element, "Description");
    node.position = position;
    node.style = optional_text(element, "StyleConfig");
    node.created_at = parse_time(element, "CreatedAt")?.unwrap_or(now);
    node.updated_at = parse_time(element, "UpdatedAt")?.unwrap_or(now);
    Ok(node)
}

fn coordinate(position: &Element, axis: &str) -> Result<f64, ImportError> {
    match position.child_text(axis).map(str::trim) {
        None | Some("") => Ok(0.0),
        Some(value) => parse_field("Position", axis, value),
    }
}
