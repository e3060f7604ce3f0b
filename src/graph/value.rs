//! Graph protocol values.
//!
//! [`Value`] is the element type of every [`Record`](crate::graph::Record)
//! and of statement parameters. Values are immutable once constructed and
//! own all of their data, so they can be shared freely across threads.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::DriverError;

/// Parameters bound to a statement.
pub type Params = HashMap<String, Value>;

/// A value exchanged with the graph server.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Bytes(Bytes),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Node(Node),
    Relationship(Relationship),
    Path(Path),
}

/// A node as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: i64,
    pub labels: BTreeSet<String>,
    pub properties: HashMap<String, Value>,
}

impl Node {
    pub fn new(
        id: i64,
        labels: impl IntoIterator<Item = impl Into<String>>,
        properties: HashMap<String, Value>,
    ) -> Self {
        Self {
            id,
            labels: labels.into_iter().map(Into::into).collect(),
            properties,
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A relationship as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relationship {
    pub id: i64,
    pub start_id: i64,
    pub end_id: i64,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub properties: HashMap<String, Value>,
}

impl Relationship {
    pub fn new(
        id: i64,
        start_id: i64,
        end_id: i64,
        rel_type: impl Into<String>,
        properties: HashMap<String, Value>,
    ) -> Self {
        Self {
            id,
            start_id,
            end_id,
            rel_type: rel_type.into(),
            properties,
        }
    }

    /// True if this relationship joins the two nodes, in either direction.
    fn connects(&self, a: &Node, b: &Node) -> bool {
        (self.start_id == a.id && self.end_id == b.id)
            || (self.start_id == b.id && self.end_id == a.id)
    }
}

/// An alternating sequence `node, rel, node, rel, ..., node`.
///
/// A path always holds exactly one more node than relationships, and each
/// relationship joins the nodes on either side of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Path {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
}

/// One hop of a [`Path`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment<'a> {
    pub start: &'a Node,
    pub relationship: &'a Relationship,
    pub end: &'a Node,
}

impl Path {
    /// Builds a path, checking that nodes and relationships alternate.
    pub fn new(nodes: Vec<Node>, relationships: Vec<Relationship>) -> Result<Self, DriverError> {
        if nodes.len() != relationships.len() + 1 {
            return Err(DriverError::Client(format!(
                "path needs one more node than relationships, got {} nodes and {} relationships",
                nodes.len(),
                relationships.len()
            )));
        }
        for (i, rel) in relationships.iter().enumerate() {
            if !rel.connects(&nodes[i], &nodes[i + 1]) {
                return Err(DriverError::Client(format!(
                    "relationship {} does not join nodes {} and {}",
                    rel.id,
                    nodes[i].id,
                    nodes[i + 1].id
                )));
            }
        }
        Ok(Self {
            nodes,
            relationships,
        })
    }

    pub fn start(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn end(&self) -> &Node {
        &self.nodes[self.nodes.len() - 1]
    }

    /// Number of relationships in the path.
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn segments(&self) -> impl Iterator<Item = Segment<'_>> {
        self.relationships
            .iter()
            .enumerate()
            .map(|(i, relationship)| Segment {
                start: &self.nodes[i],
                relationship,
                end: &self.nodes[i + 1],
            })
    }
}

impl Value {
    /// Name of the value's type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Bytes(_) => "BYTES",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Node(_) => "NODE",
            Value::Relationship(_) => "RELATIONSHIP",
            Value::Path(_) => "PATH",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Value::Relationship(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Value::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Converts to JSON. Graph shapes become objects; bytes become arrays of numbers.
    pub fn to_json(&self) -> Result<JsonValue, DriverError> {
        serde_json::to_value(self)
            .map_err(|e| DriverError::Client(format!("failed to convert {}: {}", self.type_name(), e)))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "#{}", b.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                // Sorted for stable output
                let mut keys: Vec<_> = map.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, map[key])?;
                }
                write!(f, "}}")
            }
            Value::Node(n) => write!(f, "node<{}>", n.id),
            Value::Relationship(r) => write!(f, "relationship<{}>", r.id),
            Value::Path(p) => write!(f, "path[{}]", p.len()),
        }
    }
}

// --- Conversions into Value ---

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<Node> for Value {
    fn from(value: Node) -> Self {
        Value::Node(value)
    }
}

impl From<Relationship> for Value {
    fn from(value: Relationship) -> Self {
        Value::Relationship(value)
    }
}

impl From<Path> for Value {
    fn from(value: Path) -> Self {
        Value::Path(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(value: HashMap<String, T>) -> Self {
        Value::Map(value.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<JsonValue> for Value {
    /// Numbers that fit in `i64` become integers; all others become floats.
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
