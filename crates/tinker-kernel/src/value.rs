//! Script values and argument helpers.
//!
//! [`Value`] is the host-side view of anything a program can pass to, or
//! receive from, a capability: numbers, strings, tables and callable objects.
//! [`Arguments`] wraps the positional argument list of one call and provides
//! typed accessors whose error messages match what scripts expect
//! (`bad argument #1 (string expected, got nil)`).

use std::fmt;
use std::sync::Arc;

use crate::api::ScriptObject;
use crate::error::CapabilityError;

/// The values returned from a capability call.
pub type MethodResult = Vec<Value>;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A value that can cross the boundary between the host and a script.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    /// A string with arbitrary (non UTF-8) contents, e.g. a binary body.
    Bytes(Vec<u8>),
    Table(Table),
    /// A host object whose methods the script may call.
    Object(Arc<dyn ScriptObject>),
}

impl Value {
    /// The script-facing type name, as used in argument error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) | Self::Bytes(_) => "string",
            Self::Table(_) | Self::Object(_) => "table",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// The value as text.  Binary strings qualify when they are valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<dyn ScriptObject>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The raw bytes of a string value, regardless of its encoding.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(s) => Some(s.as_bytes()),
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Table(t) => f.debug_map().entries(t.iter().map(|(k, v)| (k, v))).finish(),
            Self::Object(o) => write!(f, "<object {:p}>", Arc::as_ptr(o)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::String(a), Self::Bytes(b)) | (Self::Bytes(b), Self::String(a)) => {
                a.as_bytes() == b.as_slice()
            }
            (Self::Table(a), Self::Table(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Self::Table(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Nil, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// A script table: an ordered collection of key/value pairs.
///
/// Keys can be any value, which is why this is not a `HashMap<String, _>`;
/// callers that only care about string keys use [`Table::get_str`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    entries: Vec<(Value, Value)>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`.  Setting a key to nil removes it.
    pub fn insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let existing = self.entries.iter().position(|(k, _)| *k == key);
        match (existing, value.is_nil()) {
            (Some(idx), true) => {
                self.entries.remove(idx);
            }
            (Some(idx), false) => self.entries[idx].1 = value,
            (None, true) => {}
            (None, false) => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up a value stored under a string key.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<Value>, V: Into<Value>> FromIterator<(K, V)> for Table {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Table::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

static NIL: Value = Value::Nil;

/// The positional arguments of a single capability call.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: Vec<Value>,
}

impl Arguments {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The argument at `index`, or nil when absent.
    pub fn get(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&NIL)
    }

    pub fn get_string(&self, index: usize) -> Result<&str, CapabilityError> {
        let value = self.get(index);
        value.as_str().ok_or_else(|| bad_argument(index, "string", value))
    }

    pub fn opt_string(&self, index: usize) -> Result<Option<&str>, CapabilityError> {
        match self.get(index) {
            Value::Nil => Ok(None),
            other => other
                .as_str()
                .map(Some)
                .ok_or_else(|| bad_argument(index, "string", other)),
        }
    }

    /// A string argument as raw bytes; binary strings are accepted too.
    pub fn get_bytes(&self, index: usize) -> Result<&[u8], CapabilityError> {
        let value = self.get(index);
        value
            .as_bytes()
            .ok_or_else(|| bad_argument(index, "string", value))
    }

    pub fn get_table(&self, index: usize) -> Result<&Table, CapabilityError> {
        let value = self.get(index);
        value.as_table().ok_or_else(|| bad_argument(index, "table", value))
    }

    pub fn opt_table(&self, index: usize) -> Result<Option<&Table>, CapabilityError> {
        match self.get(index) {
            Value::Nil => Ok(None),
            Value::Table(t) => Ok(Some(t)),
            other => Err(bad_argument(index, "table", other)),
        }
    }

    pub fn opt_bool(&self, index: usize, default: bool) -> Result<bool, CapabilityError> {
        match self.get(index) {
            Value::Nil => Ok(default),
            Value::Boolean(b) => Ok(*b),
            other => Err(bad_argument(index, "boolean", other)),
        }
    }

    pub fn opt_integer(&self, index: usize) -> Result<Option<i64>, CapabilityError> {
        match self.get(index) {
            Value::Nil => Ok(None),
            Value::Number(n) if n.is_finite() => Ok(Some(n.floor() as i64)),
            Value::Number(_) => Err(CapabilityError::new(format!(
                "bad argument #{} (number has no integer representation)",
                index + 1
            ))),
            other => Err(bad_argument(index, "number", other)),
        }
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

fn bad_argument(index: usize, expected: &str, actual: &Value) -> CapabilityError {
    CapabilityError::new(format!(
        "bad argument #{} ({})",
        index + 1,
        mismatch(expected, actual)
    ))
}

/// `string expected, got number`, or a note about the encoding when a binary
/// string was passed where text is needed.
fn mismatch(expected: &str, actual: &Value) -> String {
    match actual {
        Value::Bytes(_) if expected == "string" => "string is not valid UTF-8".into(),
        _ => format!("{expected} expected, got {}", actual.type_name()),
    }
}

// ---------------------------------------------------------------------------
// Table field helpers
// ---------------------------------------------------------------------------

fn bad_field(key: &str, expected: &str, actual: &Value) -> CapabilityError {
    CapabilityError::new(format!(
        "bad field '{key}' ({})",
        mismatch(expected, actual)
    ))
}

/// A required string field of an options table.
pub fn get_string_field<'a>(table: &'a Table, key: &str) -> Result<&'a str, CapabilityError> {
    let value = table.get_str(key).unwrap_or(&NIL);
    value.as_str().ok_or_else(|| bad_field(key, "string", value))
}

pub fn opt_string_field<'a>(
    table: &'a Table,
    key: &str,
) -> Result<Option<&'a str>, CapabilityError> {
    match table.get_str(key) {
        None | Some(Value::Nil) => Ok(None),
        Some(other) => other
            .as_str()
            .map(Some)
            .ok_or_else(|| bad_field(key, "string", other)),
    }
}

pub fn opt_table_field<'a>(
    table: &'a Table,
    key: &str,
) -> Result<Option<&'a Table>, CapabilityError> {
    match table.get_str(key) {
        None | Some(Value::Nil) => Ok(None),
        Some(Value::Table(t)) => Ok(Some(t)),
        Some(other) => Err(bad_field(key, "table", other)),
    }
}

pub fn opt_bool_field(table: &Table, key: &str, default: bool) -> Result<bool, CapabilityError> {
    match table.get_str(key) {
        None | Some(Value::Nil) => Ok(default),
        Some(Value::Boolean(b)) => Ok(*b),
        Some(other) => Err(bad_field(key, "boolean", other)),
    }
}
