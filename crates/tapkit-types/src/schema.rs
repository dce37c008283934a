//! JSON-schema subset used to declare stream properties.
//!
//! Only the keywords the engine interprets are typed (`type`, `format`,
//! `properties`). Every other keyword is preserved verbatim so a schema
//! reaches the loader exactly as it was declared.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Primitive JSON-schema type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Object,
    Array,
}

impl JsonType {
    /// Type of a concrete JSON value. Whole numbers report `Integer`.
    #[must_use]
    pub fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(_) => Self::Boolean,
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            serde_json::Value::Number(_) => Self::Number,
            serde_json::Value::String(_) => Self::String,
            serde_json::Value::Array(_) => Self::Array,
            serde_json::Value::Object(_) => Self::Object,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl std::fmt::Display for JsonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `type` keyword: either a single type or a union (`["string", "null"]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSet {
    Single(JsonType),
    Many(Vec<JsonType>),
}

impl TypeSet {
    /// Build the most compact representation of a set of types.
    #[must_use]
    pub fn from_types(types: BTreeSet<JsonType>) -> Self {
        if types.len() == 1 {
            if let Some(only) = types.iter().next() {
                return Self::Single(*only);
            }
        }
        Self::Many(types.into_iter().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = JsonType> + '_ {
        match self {
            Self::Single(t) => std::slice::from_ref(t).iter().copied(),
            Self::Many(ts) => ts.iter().copied(),
        }
    }

    #[must_use]
    pub fn contains(&self, ty: JsonType) -> bool {
        self.iter().any(|t| t == ty)
    }

    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.contains(JsonType::Null)
    }

    /// Declared types excluding `null`.
    #[must_use]
    pub fn non_null(&self) -> Vec<JsonType> {
        self.iter().filter(|t| *t != JsonType::Null).collect()
    }
}

/// Type descriptor for one stream property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Declared types. `None` accepts any value.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub types: Option<TypeSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Keywords the engine does not interpret (`items`, `properties`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PropertySchema {
    #[must_use]
    pub fn of_type(ty: JsonType) -> Self {
        Self {
            types: Some(TypeSet::Single(ty)),
            ..Self::default()
        }
    }

    /// `[ty, "null"]`.
    #[must_use]
    pub fn nullable(ty: JsonType) -> Self {
        Self {
            types: Some(TypeSet::Many(vec![ty, JsonType::Null])),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Whether a value of type `ty` is allowed without coercion.
    #[must_use]
    pub fn allows(&self, ty: JsonType) -> bool {
        match &self.types {
            None => true,
            Some(types) => {
                types.contains(ty) || (ty == JsonType::Integer && types.contains(JsonType::Number))
            }
        }
    }

    /// String property carrying a `date-time` or `date` format.
    #[must_use]
    pub fn is_temporal(&self) -> bool {
        matches!(self.format.as_deref(), Some("date-time" | "date"))
    }
}

fn object_type() -> TypeSet {
    TypeSet::Single(JsonType::Object)
}

/// Top-level object schema of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSchema {
    #[serde(rename = "type", default = "object_type")]
    pub types: TypeSet,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for StreamSchema {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl StreamSchema {
    #[must_use]
    pub fn new(properties: BTreeMap<String, PropertySchema>) -> Self {
        Self {
            types: object_type(),
            properties,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }
}

impl FromIterator<(String, PropertySchema)> for StreamSchema {
    fn from_iter<I: IntoIterator<Item = (String, PropertySchema)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
