//! Property values and cross-references

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Reference to an attribute another resource publishes once realized
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeRef {
    /// Logical id of the producing resource
    pub resource: String,
    /// Attribute name (e.g. "Endpoint.Address")
    pub attribute: String,
}

impl AttributeRef {
    /// Create a reference
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

impl std::fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

impl Serialize for AttributeRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("Fn::GetAtt", &[&self.resource, &self.attribute])?;
        map.end()
    }
}

/// A declared property: a literal, a reference, or a join over both
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// String literal
    String(String),
    /// Integer literal
    Number(i64),
    /// Boolean literal
    Bool(bool),
    /// Ordered list
    List(Vec<PropertyValue>),
    /// Nested map
    Map(BTreeMap<String, PropertyValue>),
    /// Attribute of another resource
    GetAtt(AttributeRef),
    /// Concatenation of scalar parts
    Join(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Concatenate parts into a single string at realization time
    pub fn join(parts: impl IntoIterator<Item = PropertyValue>) -> Self {
        Self::Join(parts.into_iter().collect())
    }

    /// Build a list
    pub fn list<T: Into<PropertyValue>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// The string literal, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The integer literal, if this is one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The reference, if this is one
    pub fn as_ref_attr(&self) -> Option<&AttributeRef> {
        match self {
            Self::GetAtt(r) => Some(r),
            _ => None,
        }
    }

    /// Look up a key in a nested map
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        match self {
            Self::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Items of a list
    pub fn items(&self) -> &[PropertyValue] {
        match self {
            Self::List(items) => items,
            _ => &[],
        }
    }

    pub(crate) fn collect_references<'a>(&'a self, out: &mut Vec<&'a AttributeRef>) {
        match self {
            Self::GetAtt(r) => out.push(r),
            Self::List(items) | Self::Join(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(m) => {
                for value in m.values() {
                    value.collect_references(out);
                }
            }
            Self::String(_) | Self::Number(_) | Self::Bool(_) => {}
        }
    }

    /// Replace every reference using `lookup`, producing plain JSON
    ///
    /// Returns the first reference `lookup` cannot answer.
    pub fn resolve<F>(&self, lookup: &F) -> Result<serde_json::Value, AttributeRef>
    where
        F: Fn(&AttributeRef) -> Option<String>,
    {
        use serde_json::Value;

        Ok(match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Number(n) => Value::from(*n),
            Self::Bool(b) => Value::Bool(*b),
            Self::List(items) => Value::Array(
                items
                    .iter()
                    .map(|i| i.resolve(lookup))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| Ok((k.clone(), v.resolve(lookup)?)))
                    .collect::<Result<_, AttributeRef>>()?,
            ),
            Self::GetAtt(r) => Value::String(lookup(r).ok_or_else(|| r.clone())?),
            Self::Join(parts) => {
                let mut joined = String::new();
                for part in parts {
                    match part.resolve(lookup)? {
                        Value::String(s) => joined.push_str(&s),
                        other => joined.push_str(&other.to_string()),
                    }
                }
                Value::String(joined)
            }
        })
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::Number(n) => serializer.serialize_i64(*n),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(m) => m.serialize(serializer),
            Self::GetAtt(r) => r.serialize(serializer),
            Self::Join(parts) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::Join", &("", parts))?;
                map.end()
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for PropertyValue {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<u8> for PropertyValue {
    fn from(n: u8) -> Self {
        Self::Number(n.into())
    }
}

impl From<u16> for PropertyValue {
    fn from(n: u16) -> Self {
        Self::Number(n.into())
    }
}

impl From<u32> for PropertyValue {
    fn from(n: u32) -> Self {
        Self::Number(n.into())
    }
}

impl From<AttributeRef> for PropertyValue {
    fn from(r: AttributeRef) -> Self {
        Self::GetAtt(r)
    }
}

impl From<&AttributeRef> for PropertyValue {
    fn from(r: &AttributeRef) -> Self {
        Self::GetAtt(r.clone())
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(items: Vec<PropertyValue>) -> Self {
        Self::List(items)
    }
}

impl From<PropertyMap> for PropertyValue {
    fn from(map: PropertyMap) -> Self {
        Self::Map(map.0)
    }
}

/// Builder for nested property maps
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyMap(BTreeMap<String, PropertyValue>);

impl PropertyMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}
