//! Metadata codec: a small JSON encoder and recursive-descent decoder.
//!
//! Archive metadata is a tree of [`Value`]s. Objects keep their members in
//! insertion order and keys are unique within an object.
//!
//! The grammar is a strict JSON subset:
//!
//! - strings are delimited by `"`; a backslash takes the next byte literally
//!   (`\n` decodes to `n`, there is no `\uXXXX` expansion)
//! - numbers are plain decimals with an optional leading `-` and at most one
//!   `.`; exponents are not accepted
//! - `true`, `false` and `null` are fixed keywords
//!
//! The encoder escapes only `"` and `\`, which is exactly what the decoder
//! undoes, so every finite tree survives an encode/decode cycle.

use crate::error::CodecError;
use std::fmt::Write as _;

type CodecResult<T> = std::result::Result<T, CodecError>;

/// Deepest array/object nesting the decoder accepts.
const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Map),
}

/// Insertion-ordered object with unique keys.
///
/// Equality ignores member order.
#[derive(Debug, Clone, Default)]
pub struct Map {
    entries: Vec<(String, Value)>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or replaces. A replaced member keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Map::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Member lookup on an object; `None` for any other variant.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()?.get(key)
    }

    /// Walk nested objects, e.g. `["project", "name"]`.
    pub fn pointer(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    pub fn pointer_mut(&mut self, path: &[&str]) -> Option<&mut Value> {
        let mut node = self;
        for key in path {
            node = node.as_object_mut()?.get_mut(key)?;
        }
        Some(node)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Object(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

// --- encoding ---------------------------------------------------------------

/// Compact encoding, depth first, members in insertion order.
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    encode_into(value, &mut out, None, 0);
    out
}

/// Indented encoding for display. Decodes to the same tree as [`encode`].
pub fn encode_pretty(value: &Value) -> String {
    let mut out = String::new();
    encode_into(value, &mut out, Some(2), 0);
    out
}

fn newline(out: &mut String, indent: Option<usize>, level: usize) {
    if let Some(width) = indent {
        out.push('\n');
        out.extend(std::iter::repeat(' ').take(width * level));
    }
}

fn encode_into(value: &Value, out: &mut String, indent: Option<usize>, level: usize) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        // Display for f64 is the shortest round-trip form and never uses an exponent
        Value::Number(n) if n.is_finite() => {
            let _ = write!(out, "{}", n);
        }
        Value::Number(_) => out.push_str("null"),
        Value::String(s) => encode_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                newline(out, indent, level + 1);
                encode_into(item, out, indent, level + 1);
            }
            if !items.is_empty() {
                newline(out, indent, level);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                newline(out, indent, level + 1);
                encode_string(key, out);
                out.push(':');
                if indent.is_some() {
                    out.push(' ');
                }
                encode_into(item, out, indent, level + 1);
            }
            if !map.is_empty() {
                newline(out, indent, level);
            }
            out.push('}');
        }
    }
}

fn encode_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}

// --- decoding ---------------------------------------------------------------

/// Decodes one value. Anything but whitespace after it is an error.
pub fn decode(input: &str) -> CodecResult<Value> {
    let mut decoder = Decoder {
        bytes: input.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = decoder.value()?;
    decoder.skip_whitespace();
    if decoder.peek().is_some() {
        return Err(decoder.unexpected("end of input"));
    }
    Ok(value)
}

/// Single forward cursor over the input bytes.
struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)) {
            self.pos += 1;
        }
    }

    fn current_char(&self) -> char {
        let rest = &self.bytes[self.pos.min(self.bytes.len())..];
        match std::str::from_utf8(rest) {
            Ok(s) => s.chars().next().unwrap_or('\0'),
            Err(e) => std::str::from_utf8(&rest[..e.valid_up_to()])
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or(char::from(rest.first().copied().unwrap_or(0))),
        }
    }

    fn unexpected(&self, expected: &'static str) -> CodecError {
        CodecError::UnexpectedToken {
            position: self.pos,
            expected,
            found: self.current_char(),
        }
    }

    fn end_of_input(&self, expected: &'static str) -> CodecError {
        CodecError::UnexpectedEndOfInput {
            position: self.pos,
            expected,
        }
    }

    fn expect(&mut self, byte: u8, expected: &'static str) -> CodecResult<()> {
        self.skip_whitespace();
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.unexpected(expected)),
            None => Err(self.end_of_input(expected)),
        }
    }

    fn value(&mut self) -> CodecResult<Value> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.end_of_input("a value")),
            Some(b'{') => self.nested(Self::object),
            Some(b'[') => self.nested(Self::array),
            Some(b'"') => self.string().map(Value::String),
            Some(b't') => self.keyword("true", Value::Bool(true)),
            Some(b'f') => self.keyword("false", Value::Bool(false)),
            Some(b'n') => self.keyword("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(self.unexpected("a value")),
        }
    }

    fn nested(&mut self, production: fn(&mut Self) -> CodecResult<Value>) -> CodecResult<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(self.unexpected("shallower nesting"));
        }
        self.depth += 1;
        let result = production(self);
        self.depth -= 1;
        result
    }

    fn object(&mut self) -> CodecResult<Value> {
        self.pos += 1; // '{'
        let mut map = Map::new();

        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(Value::Object(map));
        }

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'"') => {}
                Some(_) => return Err(self.unexpected("an object key")),
                None => return Err(self.end_of_input("an object key")),
            }
            let key = self.string()?;
            self.expect(b':', "':'")?;
            let value = self.value()?;
            map.insert(key, value);

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                Some(_) => return Err(self.unexpected("',' or '}'")),
                None => return Err(self.end_of_input("',' or '}'")),
            }
        }
    }

    fn array(&mut self) -> CodecResult<Value> {
        self.pos += 1; // '['
        let mut items = Vec::new();

        self.skip_whitespace();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(Value::Array(items));
        }

        loop {
            items.push(self.value()?);

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                Some(_) => return Err(self.unexpected("',' or ']'")),
                None => return Err(self.end_of_input("',' or ']'")),
            }
        }
    }

    fn string(&mut self) -> CodecResult<String> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let mut buf = Vec::new();

        loop {
            match self.peek() {
                None => return Err(self.end_of_input("closing '\"'")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b) => {
                            buf.push(b);
                            self.pos += 1;
                        }
                        None => return Err(self.end_of_input("an escaped character")),
                    }
                }
                Some(b) => {
                    buf.push(b);
                    self.pos += 1;
                }
            }
        }

        // Only ASCII backslashes are dropped, so the bytes stay valid UTF-8.
        String::from_utf8(buf).map_err(|_| CodecError::UnexpectedToken {
            position: start,
            expected: "UTF-8 text",
            found: '"',
        })
    }

    fn digits(&mut self) -> CodecResult<()> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == start {
            return match self.peek() {
                Some(_) => Err(self.unexpected("a digit")),
                None => Err(self.end_of_input("a digit")),
            };
        }
        Ok(())
    }

    fn number(&mut self) -> CodecResult<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        self.digits()?;
        if self.peek() == Some(b'.') {
            self.pos += 1;
            self.digits()?;
        }

        // The token is ASCII digits, '-' and '.', so both conversions hold.
        let token = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or_default();
        token
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| CodecError::UnexpectedToken {
                position: start,
                expected: "a number",
                found: self.bytes[start] as char,
            })
    }

    fn keyword(&mut self, word: &'static str, value: Value) -> CodecResult<Value> {
        let end = self.pos + word.len();
        if end > self.bytes.len() {
            let rest = &self.bytes[self.pos..];
            return if word.as_bytes().starts_with(rest) {
                Err(self.end_of_input(word))
            } else {
                Err(self.unexpected(word))
            };
        }
        if &self.bytes[self.pos..end] != word.as_bytes() {
            return Err(self.unexpected(word));
        }
        self.pos = end;
        Ok(value)
    }
}
