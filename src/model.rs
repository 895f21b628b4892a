use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type SpaceId = u32;
pub type PartitionId = u32;
pub type TagId = u32;
pub type EdgeTypeId = i32;
pub type Ranking = i64;

/// Property record attached to a vertex tag or an edge.
pub type PropertyMap = BTreeMap<String, Value>;

/// Vertex identifier as it appears in graph requests and encoded keys.
///
/// The key codec serializes integers and booleans canonically and strings
/// verbatim. Decoding recovers numeric, then boolean, then string form, so a
/// string whose text is also a numeric literal does not round-trip as a
/// string. Callers that need exact identity must avoid such ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Vid {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Vid {
    /// Canonical textual form used inside encoded keys.
    pub fn to_key_string(&self) -> String {
        match self {
            Vid::Int(v) => v.to_string(),
            Vid::Float(v) => v.to_string(),
            Vid::Bool(v) => if *v { "true" } else { "false" }.to_string(),
            Vid::Str(v) => v.clone(),
        }
    }

    /// Recovers a vertex id from its key form: integer, then float, then
    /// boolean, then string.
    pub fn parse(s: &str) -> Vid {
        if let Ok(v) = s.parse::<i64>() {
            return Vid::Int(v);
        }
        if let Ok(v) = s.parse::<f64>() {
            return Vid::Float(v);
        }
        match s {
            "true" => Vid::Bool(true),
            "false" => Vid::Bool(false),
            _ => Vid::Str(s.to_owned()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Vid::Int(v) => Value::Int(*v),
            Vid::Float(v) => Value::Float(*v),
            Vid::Bool(v) => Value::Bool(*v),
            Vid::Str(v) => Value::Str(v.clone()),
        }
    }

    pub fn from_value(value: &Value) -> Option<Vid> {
        match value {
            Value::Int(v) => Some(Vid::Int(*v)),
            Value::Float(v) => Some(Vid::Float(*v)),
            Value::Bool(v) => Some(Vid::Bool(*v)),
            Value::Str(v) => Some(Vid::Str(v.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Vid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key_string())
    }
}

impl From<i64> for Vid {
    fn from(v: i64) -> Self {
        Vid::Int(v)
    }
}

impl From<&str> for Vid {
    fn from(v: &str) -> Self {
        Vid::Str(v.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Date {
    pub year: i16,
    pub month: i8,
    pub day: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Time {
    pub hour: i8,
    pub minute: i8,
    pub sec: i8,
    pub microsec: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateTime {
    pub year: i16,
    pub month: i8,
    pub day: i8,
    pub hour: i8,
    pub minute: i8,
    pub sec: i8,
    pub microsec: i32,
}

/// Typed property value.
///
/// `Set` keeps its elements sorted and unique; the value codec restores that
/// canonical form on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(Date),
    Time(Time),
    DateTime(DateTime),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Str(_) => 4,
            Value::Date(_) => 5,
            Value::Time(_) => 6,
            Value::DateTime(_) => 7,
            Value::List(_) => 8,
            Value::Set(_) => 9,
            Value::Map(_) => 10,
        }
    }
}

// Total order so result rows can be sorted and deduplicated. Floats compare
// by total_cmp, which also makes equality reflexive for NaN.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) | (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.iter().cmp(b.iter()),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

/// Identifies one edge: source, type, ranking, destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeKey {
    pub src: Vid,
    pub edge_type: EdgeTypeId,
    pub ranking: Ranking,
    pub dst: Vid,
}

/// One tag of a new vertex: positional values aligned against the caller's
/// property-name list for that tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTag {
    pub tag_id: TagId,
    pub props: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVertex {
    pub id: Vid,
    pub tags: Vec<NewTag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEdge {
    pub key: EdgeKey,
    pub props: Vec<Value>,
}

/// Tag rows to remove from a vertex without touching its edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelTags {
    pub id: Vid,
    pub tags: Vec<TagId>,
}

/// Vertex property selector: which props of which tag to return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexProp {
    pub tag: TagId,
    pub props: Vec<String>,
}

/// Edge property selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeProp {
    pub edge_type: EdgeTypeId,
    pub props: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeDirection {
    Out,
    In,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataSet {
    pub col_names: Vec<String>,
    pub rows: Vec<Row>,
}

impl DataSet {
    pub fn with_columns(col_names: Vec<String>) -> Self {
        Self {
            col_names,
            rows: Vec::new(),
        }
    }

    /// Sorts and uniques rows, then truncates to `limit` when positive.
    /// Dedup compares whole rows, so it must run after all columns are
    /// attached.
    pub fn dedup_and_limit(&mut self, dedup: bool, limit: i64) {
        if dedup && !self.rows.is_empty() {
            self.rows.sort();
            self.rows.dedup();
        }
        if limit > 0 && self.rows.len() > limit as usize {
            self.rows.truncate(limit as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vid_key_string_roundtrip() {
        assert_eq!(Vid::parse(&Vid::Int(42).to_key_string()), Vid::Int(42));
        assert_eq!(
            Vid::parse(&Vid::Bool(true).to_key_string()),
            Vid::Bool(true)
        );
        assert_eq!(
            Vid::parse(&Vid::Str("player_1".into()).to_key_string()),
            Vid::Str("player_1".into())
        );
        assert_eq!(
            Vid::parse(&Vid::Float(2.5).to_key_string()),
            Vid::Float(2.5)
        );
    }

    #[test]
    fn vid_numeric_string_is_lossy() {
        // "42" decodes as an integer; documented codec ambiguity.
        assert_eq!(
            Vid::parse(&Vid::Str("42".into()).to_key_string()),
            Vid::Int(42)
        );
    }

    #[test]
    fn value_total_order_sorts_mixed_rows() {
        let mut rows = vec![
            Row::new(vec![Value::Str("b".into())]),
            Row::new(vec![Value::Int(1)]),
            Row::new(vec![Value::Str("a".into())]),
            Row::new(vec![Value::Int(1)]),
        ];
        rows.sort();
        rows.dedup();
        assert_eq!(
            rows,
            vec![
                Row::new(vec![Value::Int(1)]),
                Row::new(vec![Value::Str("a".into())]),
                Row::new(vec![Value::Str("b".into())]),
            ]
        );
    }
}
