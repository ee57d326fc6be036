//! Typed setting values and their text encoding.
//!
//! Settings are persisted as a `(type tag, text)` pair. Scalars are stored in
//! their natural text form; arrays and objects are stored as JSON with a tag
//! that records which composite they were, so decoding always reproduces the
//! runtime type that was written.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AppError;
use crate::result::AppResult;

/// A dynamically typed module setting value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SettingValue {
    /// Absent value. Writing it removes the setting.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    String(String),
    /// Ordered list of values.
    Array(Vec<SettingValue>),
    /// String-keyed structured object.
    Object(BTreeMap<String, SettingValue>),
}

/// Type tag persisted next to the encoded text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// `"true"` / `"false"`.
    Boolean,
    /// Decimal integer text.
    Integer,
    /// Float text.
    Float,
    /// Raw text.
    String,
    /// Empty text.
    Null,
    /// Legacy composite tag: JSON array or object.
    Json,
    /// JSON encoded array.
    JsonArray,
    /// JSON encoded object.
    JsonObject,
}

impl TypeTag {
    /// Returns the persisted name of this tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Null => "null",
            Self::Json => "json",
            Self::JsonArray => "json-array",
            Self::JsonObject => "json-object",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boolean" => Ok(Self::Boolean),
            "integer" => Ok(Self::Integer),
            // Rows written by older hosts use the name "double".
            "float" | "double" => Ok(Self::Float),
            "string" => Ok(Self::String),
            "null" | "NULL" => Ok(Self::Null),
            "json" | "array" => Ok(Self::Json),
            "json-array" => Ok(Self::JsonArray),
            "json-object" => Ok(Self::JsonObject),
            other => Err(AppError::inconsistent_type(format!(
                "Unknown setting type tag '{other}'"
            ))),
        }
    }
}

impl SettingValue {
    /// Returns whether the value is [`SettingValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Int`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float if this is a `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the text if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the tag this value is stored under.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Null => TypeTag::Null,
            Self::Bool(_) => TypeTag::Boolean,
            Self::Int(_) => TypeTag::Integer,
            Self::Float(_) => TypeTag::Float,
            Self::String(_) => TypeTag::String,
            Self::Array(_) => TypeTag::JsonArray,
            Self::Object(_) => TypeTag::JsonObject,
        }
    }

    /// Encodes the value into its persisted `(tag, text)` form.
    ///
    /// Fails when a composite contains a non-finite float, which JSON cannot
    /// represent.
    pub fn encode(&self) -> AppResult<(TypeTag, String)> {
        let text = match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::Array(_) | Self::Object(_) => serde_json::to_string(&self.to_json()?)?,
        };
        Ok((self.type_tag(), text))
    }

    /// Decodes a persisted `(tag, text)` pair.
    ///
    /// Returns an `InconsistentType` error when the text cannot produce the
    /// tagged type, which only happens if the stored row is corrupt.
    pub fn decode(tag: TypeTag, text: &str) -> AppResult<Self> {
        let mismatch = || {
            AppError::inconsistent_type(format!(
                "Stored value '{}' cannot be read as type '{tag}'",
                preview(text)
            ))
        };

        match tag {
            TypeTag::Null => Ok(Self::Null),
            TypeTag::String => Ok(Self::String(text.to_string())),
            TypeTag::Boolean => match text {
                "true" => Ok(Self::Bool(true)),
                "false" => Ok(Self::Bool(false)),
                _ => Err(mismatch()),
            },
            TypeTag::Integer => text.parse().map(Self::Int).map_err(|_| mismatch()),
            TypeTag::Float => text.parse().map(Self::Float).map_err(|_| mismatch()),
            TypeTag::Json | TypeTag::JsonArray | TypeTag::JsonObject => {
                let json: serde_json::Value =
                    serde_json::from_str(text).map_err(|_| mismatch())?;
                match (tag, &json) {
                    (TypeTag::JsonArray, serde_json::Value::Array(_))
                    | (TypeTag::JsonObject, serde_json::Value::Object(_))
                    | (TypeTag::Json, serde_json::Value::Array(_))
                    | (TypeTag::Json, serde_json::Value::Object(_)) => Ok(Self::from(json)),
                    _ => Err(mismatch()),
                }
            }
        }
    }

    /// Converts into a JSON value.
    pub fn to_json(&self) -> AppResult<serde_json::Value> {
        Ok(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    AppError::validation(format!(
                        "Non-finite float {f} cannot be stored inside an array or object"
                    ))
                })?,
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(SettingValue::to_json)
                    .collect::<AppResult<_>>()?,
            ),
            Self::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), value.to_json()?);
                }
                serde_json::Value::Object(out)
            }
        })
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 64;
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

impl From<serde_json::Value> for SettingValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<SettingValue>> From<Vec<T>> for SettingValue {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<SettingValue>> From<Option<T>> for SettingValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

impl Serialize for SettingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettingValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}
