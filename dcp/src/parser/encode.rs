//! Writer for property documents, used to feed simulated firmware data to the parser.
use alloc::{string::String, vec::Vec};

use super::{pad_end_4b, TagType, HEADER_MAGIC};

/// An owned property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Dict(Vec<(String, Value)>),
    Array(Vec<Value>),
    Int(i64),
    String(String),
    Blob(Vec<u8>),
    Bool(bool),
}

/// Builds a property document.
///
/// Container methods only write the container tag; the caller then writes exactly the declared
/// number of children (two per dictionary entry: key string, then value).
pub struct Encoder {
    buf: Vec<u8>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder {
            buf: Vec::from(HEADER_MAGIC.to_le_bytes()),
        }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    fn tag(&mut self, kind: TagType, size: u32) {
        debug_assert!(size < (1 << 24));
        self.buf.resize(pad_end_4b(self.buf.len()), 0);
        let raw = (size & 0xff_ffff) | ((kind as u32) << 24);
        self.buf.extend_from_slice(&raw.to_le_bytes());
    }

    pub fn dict(&mut self, entries: u32) {
        self.tag(TagType::Dictionary, entries);
    }

    pub fn array(&mut self, elements: u32) {
        self.tag(TagType::Array, elements);
    }

    pub fn int(&mut self, v: i64) {
        self.tag(TagType::Int64, 0);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bool(&mut self, v: bool) {
        self.tag(TagType::Bool, v as u32);
    }

    pub fn string(&mut self, s: &str) {
        self.tag(TagType::String, s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn blob(&mut self, b: &[u8]) {
        self.tag(TagType::Blob, b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    /// Write a whole value tree.
    pub fn value(&mut self, v: &Value) {
        match v {
            Value::Dict(entries) => {
                self.dict(entries.len() as u32);
                for (k, v) in entries {
                    self.string(k);
                    self.value(v);
                }
            }
            Value::Array(elements) => {
                self.array(elements.len() as u32);
                for e in elements {
                    self.value(e);
                }
            }
            Value::Int(i) => self.int(*i),
            Value::String(s) => self.string(s),
            Value::Blob(b) => self.blob(b),
            Value::Bool(b) => self.bool(*b),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl Value {
    /// Encode this value as a complete document.
    pub fn to_document(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.value(self);
        enc.finish()
    }

    /// Shorthand for building a dictionary from borrowed keys.
    pub fn dict<'k>(entries: impl IntoIterator<Item = (&'k str, Value)>) -> Value {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (String::from(k), v))
                .collect(),
        )
    }
}
