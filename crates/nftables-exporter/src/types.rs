//! Typed model of the `nft --json` output.
//!
//! Only the attributes the exporter reads are modelled. A record missing a
//! required attribute fails to decode; attributes added by newer `nft`
//! releases are ignored so any schema v1 output decodes.
//!
//! Document shape:
//!
//! ```json
//! {"nftables": [
//!   {"metainfo": {"version": "1.0.9", "json_schema_version": 1}},
//!   {"table": {"family": "ip", "name": "filter", "handle": 1}},
//!   {"rule": {"family": "ip", "table": "filter", "chain": "input", "handle": 4,
//!             "comment": "ssh-in",
//!             "expr": [{"match": {}}, {"counter": {"packets": 10, "bytes": 640}}]}}
//! ]}
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

/// The only `json_schema_version` this crate understands.
pub const SUPPORTED_SCHEMA_VERSION: u64 = 1;

/// Element types whose values are IP addresses.
pub const ADDRESS_TYPES: [&str; 2] = ["ipv4_addr", "ipv6_addr"];

/// Address family of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Ip,
    Ip6,
    Inet,
    Arp,
    Bridge,
    Netdev,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Ip => "ip",
            Family::Ip6 => "ip6",
            Family::Inet => "inet",
            Family::Arp => "arp",
            Family::Bridge => "bridge",
            Family::Netdev => "netdev",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object type tag as it appears in the document (`{"<tag>": {...}}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Rule,
    Chain,
    Counter,
    Map,
    Meter,
    Set,
}

impl ObjectKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ObjectKind::Rule => "rule",
            ObjectKind::Chain => "chain",
            ObjectKind::Counter => "counter",
            ObjectKind::Map => "map",
            ObjectKind::Meter => "meter",
            ObjectKind::Set => "set",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Scope argument of `nft list <scope>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryScope {
    Ruleset,
    Counters,
    Maps,
    Meters,
    Sets,
}

impl QueryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryScope::Ruleset => "ruleset",
            QueryScope::Counters => "counters",
            QueryScope::Maps => "maps",
            QueryScope::Meters => "meters",
            QueryScope::Sets => "sets",
        }
    }
}

impl fmt::Display for QueryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object families that carry an element collection.
///
/// Their bulk listing omits the elements, so each object needs a second
/// `nft list <kind> <family> <table> <name>` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Map,
    Meter,
    Set,
}

impl CollectionKind {
    /// Collection families in collection order.
    pub const ALL: [CollectionKind; 3] = [CollectionKind::Map, CollectionKind::Meter, CollectionKind::Set];

    pub fn object_kind(&self) -> ObjectKind {
        match self {
            CollectionKind::Map => ObjectKind::Map,
            CollectionKind::Meter => ObjectKind::Meter,
            CollectionKind::Set => ObjectKind::Set,
        }
    }

    pub fn scope(&self) -> QueryScope {
        match self {
            CollectionKind::Map => QueryScope::Maps,
            CollectionKind::Meter => QueryScope::Meters,
            CollectionKind::Set => QueryScope::Sets,
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.object_kind().fmt(f)
    }
}

/// Top-level document. Every entry is a single-key object keyed by its tag.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub nftables: Vec<Map<String, Value>>,
}

/// Version envelope, always the first entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Metainfo {
    pub json_schema_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Chain {
    pub family: Family,
    pub table: String,
    pub name: String,
}

/// A rule. Rules have no name; a comment is the only human-readable handle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rule {
    pub family: Family,
    pub table: String,
    pub chain: String,
    #[serde(default)]
    pub handle: Option<u64>,
    #[serde(default)]
    pub comment: Option<String>,
    pub expr: Vec<Expression>,
}

/// One statement of a rule's expression list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    /// Anonymous counter statement, `{"counter": {"packets": n, "bytes": n}}`.
    Counter { counter: CounterValues },
    /// Anything else, including references to named counters.
    Other(Value),
}

impl Expression {
    pub fn counter(&self) -> Option<&CounterValues> {
        match self {
            Expression::Counter { counter } => Some(counter),
            Expression::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CounterValues {
    pub packets: u64,
    pub bytes: u64,
}

/// A named counter object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CounterObject {
    pub family: Family,
    pub table: String,
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub packets: u64,
    pub bytes: u64,
}

/// Declared element type of a set, map or meter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum KeyType {
    Single(String),
    /// Concatenated key, e.g. `ipv4_addr . inet_service`.
    Concat(Vec<String>),
}

impl KeyType {
    /// True for `ipv4_addr` and `ipv6_addr`.
    pub fn is_address(&self) -> bool {
        match self {
            KeyType::Single(name) => ADDRESS_TYPES.contains(&name.as_str()),
            KeyType::Concat(_) => false,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Single(name) => f.write_str(name),
            KeyType::Concat(parts) => f.write_str(&parts.join(" . ")),
        }
    }
}

/// A set, map or meter together with its elements.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Collection {
    pub family: Family,
    pub table: String,
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    #[serde(default)]
    pub elem: Vec<Element>,
}

/// One member of an element collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Element {
    /// Bare value, e.g. `"192.0.2.1"`.
    Value(String),
    /// Element with attached data (timeout, counter, ...), `{"elem": {"val": ...}}`.
    Wrapped { elem: WrappedElement },
    /// Prefixes, ranges, map key/value pairs and other shapes.
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WrappedElement {
    pub val: Value,
}
