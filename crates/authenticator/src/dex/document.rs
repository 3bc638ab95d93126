//! Tagged-variant tree the Dex configuration is assembled in, and its YAML rendering.
//!
//! Dex reads its configuration as YAML 1.1, where scalars such as `yes`, `on` or `n` are
//! booleans. Strings are therefore rendered double-quoted whenever either YAML version could
//! read them as anything but a string.
use std::collections::BTreeMap;

use serde_yaml::Value;
use snafu::Snafu;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("mapping key {key} is not a scalar"))]
    NonScalarKey { key: String },
}

/// A node of a YAML document.
///
/// Maps are ordered by key, which keeps the serialized document stable no matter in which
/// order keys appear in the input.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(serde_yaml::Number),
    String(String),
    List(Vec<Node>),
    Map(BTreeMap<String, Node>),
}

impl Node {
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Self>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Self>> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Renders the node as a block style YAML document.
    pub fn to_yaml(&self) -> String {
        let mut out = String::new();
        write_block(&mut out, self, 0);
        out
    }
}

/// Scalars YAML 1.1 or 1.2 resolve to booleans or null, compared case-insensitively.
const RESERVED_WORDS: [&str; 9] = ["y", "n", "yes", "no", "on", "off", "true", "false", "null"];

/// Characters a plain scalar must not start with. Digits and signs are included because of
/// the numeric forms YAML 1.1 knows (`0x1f`, `1_000`, `1:30`).
const UNSAFE_FIRST_CHARS: &str = "-?:,[]{}#&*!|>'\"%@`.+=<~ ";

/// Writes `node` at the start of a line indented by `indent`.
fn write_block(out: &mut String, node: &Node, indent: usize) {
    match node {
        Node::Map(map) if !map.is_empty() => {
            for (key, value) in map {
                pad(out, indent);
                write_entry(out, key, value, indent);
            }
        }
        Node::List(list) if !list.is_empty() => {
            for item in list {
                pad(out, indent);
                write_item(out, item, indent);
            }
        }
        scalar => {
            pad(out, indent);
            write_inline(out, scalar);
            out.push('\n');
        }
    }
}

fn write_entry(out: &mut String, key: &str, value: &Node, indent: usize) {
    write_string(out, key);
    out.push(':');

    match value {
        Node::Map(map) if !map.is_empty() => {
            out.push('\n');
            write_block(out, value, indent + 2);
        }
        // Sequences stay at the indentation of their key
        Node::List(list) if !list.is_empty() => {
            out.push('\n');
            write_block(out, value, indent);
        }
        scalar => {
            out.push(' ');
            write_inline(out, scalar);
            out.push('\n');
        }
    }
}

/// Writes a sequence item, the `-` indicator has already been written at `indent`.
fn write_item(out: &mut String, item: &Node, indent: usize) {
    out.push('-');

    match item {
        Node::Map(map) if !map.is_empty() => {
            for (index, (key, value)) in map.iter().enumerate() {
                if index == 0 {
                    out.push(' ');
                } else {
                    pad(out, indent + 2);
                }
                write_entry(out, key, value, indent + 2);
            }
        }
        Node::List(list) if !list.is_empty() => {
            out.push('\n');
            write_block(out, item, indent + 2);
        }
        scalar => {
            out.push(' ');
            write_inline(out, scalar);
            out.push('\n');
        }
    }
}

/// Writes scalars and empty collections.
fn write_inline(out: &mut String, node: &Node) {
    match node {
        Node::Null => out.push_str("null"),
        Node::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
        Node::Number(value) => out.push_str(&value.to_string()),
        Node::String(value) => write_string(out, value),
        Node::List(_) => out.push_str("[]"),
        Node::Map(_) => out.push_str("{}"),
    }
}

fn write_string(out: &mut String, value: &str) {
    if !needs_quotes(value) {
        out.push_str(value);
        return;
    }

    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Whether `value` must be quoted to be read back as the same string.
fn needs_quotes(value: &str) -> bool {
    let Some(first) = value.chars().next() else {
        return true;
    };

    RESERVED_WORDS.contains(&value.to_ascii_lowercase().as_str())
        || first.is_ascii_digit()
        || UNSAFE_FIRST_CHARS.contains(first)
        || value.ends_with([' ', ':'])
        || value.contains(": ")
        || value.contains(" #")
        || value.chars().any(char::is_control)
}

fn pad(out: &mut String, indent: usize) {
    out.extend(std::iter::repeat_n(' ', indent));
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<const N: usize> From<[(&str, Node); N]> for Node {
    fn from(entries: [(&str, Self); N]) -> Self {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_owned(), value))
                .collect(),
        )
    }
}

impl TryFrom<Value> for Node {
    type Error = Error;

    /// Converts a parsed YAML value. Scalar keys are stringified, YAML tags are dropped.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::Number(value) => Self::Number(value),
            Value::String(value) => Self::String(value),
            Value::Sequence(values) => Self::List(
                values
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Mapping(mapping) => Self::Map(
                mapping
                    .into_iter()
                    .map(|(key, value)| -> Result<_, Error> {
                        Ok((scalar_key(key)?, Self::try_from(value)?))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Value::Tagged(tagged) => Self::try_from(tagged.value)?,
        })
    }
}

fn scalar_key(key: Value) -> Result<String, Error> {
    match key {
        Value::String(key) => Ok(key),
        Value::Bool(key) => Ok(key.to_string()),
        Value::Number(key) => Ok(key.to_string()),
        Value::Null => Ok("null".to_owned()),
        other => NonScalarKeySnafu {
            key: format!("{other:?}"),
        }
        .fail(),
    }
}
