//! JSON paths used by schema mappings.
//!
//! Supported subset: `$`, `.key`, `["quoted key"]`, `[index]`.
//! Paths address a single location; there are no wildcards or filters.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlexError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parsed JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Root path `$`.
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Path of a top-level key.
    pub fn key(name: &str) -> Self {
        Self { segments: vec![Segment::Key(name.to_string())] }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let err = |reason: &str| FlexError::InvalidJsonPath {
            path: text.to_string(),
            reason: reason.to_string(),
        };

        let rest = text.strip_prefix('$').ok_or_else(|| err("must start with '$'"))?;
        let chars: Vec<char> = rest.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
                        end += 1;
                    }
                    if end == start {
                        return Err(err("empty key segment"));
                    }
                    segments.push(Segment::Key(chars[start..end].iter().collect()));
                    i = end;
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|&c| c == ']')
                        .map(|p| p + i)
                        .ok_or_else(|| err("unterminated '['"))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    if let Some(quoted) = inner
                        .strip_prefix('"')
                        .and_then(|s| s.strip_suffix('"'))
                    {
                        segments.push(Segment::Key(quoted.to_string()));
                    } else {
                        let index = inner
                            .parse::<usize>()
                            .map_err(|_| err("index must be a non-negative integer"))?;
                        segments.push(Segment::Index(index));
                    }
                    i = close + 1;
                }
                _ => return Err(err("expected '.' or '['")),
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a key segment.
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.to_string()));
        Self { segments }
    }

    /// Append an index segment.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Self { segments }
    }

    /// Concatenate `other` below `self`.
    pub fn join(&self, other: &JsonPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Parent path and last segment. `None` for the root.
    pub fn split_last(&self) -> Option<(JsonPath, &Segment)> {
        let (last, parent) = self.segments.split_last()?;
        Some((Self { segments: parent.to_vec() }, last))
    }

    /// Whether `self` equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &JsonPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut current = doc;
        for segment in &self.segments {
            current = match segment {
                Segment::Key(k) => current.as_object()?.get(k)?,
                Segment::Index(i) => current.as_array()?.get(*i)?,
            };
        }
        Some(current)
    }

    /// Set the value at this path, creating intermediate objects/arrays.
    /// Array gaps are padded with `null`.
    pub fn set(&self, doc: &mut Value, value: Value) {
        let mut current = doc;
        for segment in &self.segments {
            let node = current;
            current = match segment {
                Segment::Key(k) => {
                    if !node.is_object() {
                        *node = Value::Object(Map::new());
                    }
                    match node {
                        Value::Object(map) => map.entry(k.clone()).or_insert(Value::Null),
                        _ => unreachable!("converted to object above"),
                    }
                }
                Segment::Index(i) => {
                    if !node.is_array() {
                        *node = Value::Array(Vec::new());
                    }
                    match node {
                        Value::Array(items) => {
                            if items.len() <= *i {
                                items.resize(*i + 1, Value::Null);
                            }
                            &mut items[*i]
                        }
                        _ => unreachable!("converted to array above"),
                    }
                }
            };
        }
        *current = value;
    }

    /// Remove the value at this path. Returns the removed value.
    pub fn remove(&self, doc: &mut Value) -> Option<Value> {
        let (last, parent_segments) = self.segments.split_last()?;
        let mut current = doc;
        for segment in parent_segments {
            let node = current;
            current = match segment {
                Segment::Key(k) => node.as_object_mut()?.get_mut(k)?,
                Segment::Index(i) => node.as_array_mut()?.get_mut(*i)?,
            };
        }
        match last {
            Segment::Key(k) => current.as_object_mut()?.remove(k),
            Segment::Index(i) => {
                let items = current.as_array_mut()?;
                if *i < items.len() {
                    Some(std::mem::replace(&mut items[*i], Value::Null))
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            match segment {
                Segment::Key(k) if is_plain_key(k) => write!(f, ".{}", k)?,
                Segment::Key(k) => write!(f, "[\"{}\"]", k)?,
                Segment::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

fn is_plain_key(k: &str) -> bool {
    !k.is_empty() && k.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

impl TryFrom<String> for JsonPath {
    type Error = FlexError;

    fn try_from(value: String) -> Result<Self> {
        JsonPath::parse(&value)
    }
}

impl From<JsonPath> for String {
    fn from(path: JsonPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        for text in ["$", "$.name", "$.address.city", "$.items[2].sku", "$[\"first name\"]"] {
            let path = JsonPath::parse(text).unwrap();
            assert_eq!(path.to_string(), text);
        }
    }

    #[test]
    fn test_parse_malformed() {
        for text in ["name", "$.", "$..a", "$[x]", "$[1", "$a"] {
            let err = JsonPath::parse(text).unwrap_err();
            assert_eq!(err.code(), "INVALID_JSON_PATH", "path {}", text);
        }
    }

    #[test]
    fn test_get() {
        let doc = json!({"a": {"b": [10, 20, {"c": true}]}});
        assert_eq!(JsonPath::parse("$.a.b[1]").unwrap().get(&doc), Some(&json!(20)));
        assert_eq!(JsonPath::parse("$.a.b[2].c").unwrap().get(&doc), Some(&json!(true)));
        assert_eq!(JsonPath::parse("$.a.x").unwrap().get(&doc), None);
        assert_eq!(JsonPath::root().get(&doc), Some(&doc));
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut doc = json!({});
        JsonPath::parse("$.a.b[1]").unwrap().set(&mut doc, json!("x"));
        assert_eq!(doc, json!({"a": {"b": [null, "x"]}}));
    }

    #[test]
    fn test_remove() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        let removed = JsonPath::parse("$.a.b").unwrap().remove(&mut doc);
        assert_eq!(removed, Some(json!(1)));
        assert_eq!(doc, json!({"a": {"c": 2}}));
        assert_eq!(JsonPath::parse("$.zz").unwrap().remove(&mut doc), None);
    }

    #[test]
    fn test_starts_with() {
        let host = JsonPath::parse("$.address").unwrap();
        assert!(JsonPath::parse("$.address.geo").unwrap().starts_with(&host));
        assert!(!JsonPath::parse("$.addresses").unwrap().starts_with(&host));
    }

    #[test]
    fn test_serde_as_string() {
        let path = JsonPath::parse("$.a[0]").unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"$.a[0]\"");
        let back: JsonPath = serde_json::from_str("\"$.a[0]\"").unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<JsonPath>("\"a\"").is_err());
    }
}
