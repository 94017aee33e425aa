use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Read access to an object-like record whose shape is only known at runtime.
pub trait FieldAccessible: fmt::Debug + Send + Sync {
    /// Value stored under `key`, or `None` when the record has no such field.
    fn field(&self, key: &str) -> Option<ExportValue>;

    /// Name used in logs and diagnostics.
    fn type_name(&self) -> &str;

    /// String form of the whole record, if it has one.
    fn display(&self) -> Option<String> {
        None
    }
}

/// A value produced by the query engine, or reached while walking a record.
#[derive(Debug, Clone)]
pub enum ExportValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    DateTime(NaiveDateTime),
    Enum { value: String, label: Option<String> },
    List(Vec<ExportValue>),
    /// Ordered key/value mapping.
    Map(Vec<(String, ExportValue)>),
    Object(Arc<dyn FieldAccessible>),
}

impl ExportValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ExportValue::Null)
    }

    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ExportValue)>,
    {
        ExportValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn object(record: impl FieldAccessible + 'static) -> Self {
        ExportValue::Object(Arc::new(record))
    }

    /// Direct child lookup. `None` means the key is absent or this value
    /// cannot have children.
    pub fn child(&self, key: &str) -> Option<ExportValue> {
        match self {
            ExportValue::Map(entries) => entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            ExportValue::Object(record) => record.field(key),
            _ => None,
        }
    }
}

impl PartialEq for ExportValue {
    fn eq(&self, other: &Self) -> bool {
        use ExportValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Decimal(a), Decimal(b)) => a == b,
            (Text(a), Text(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Enum { value: va, label: la }, Enum { value: vb, label: lb }) => va == vb && la == lb,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Object(a), Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Compact JSON form used when a list, map or object is rendered as text.
/// Keys keep their order; decimals serialize as strings, objects as their
/// display form.
impl Serialize for ExportValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExportValue::Null => serializer.serialize_none(),
            ExportValue::Bool(b) => serializer.serialize_bool(*b),
            ExportValue::Int(i) => serializer.serialize_i64(*i),
            ExportValue::Float(f) => serializer.serialize_f64(*f),
            ExportValue::Decimal(d) => serializer.serialize_str(&d.to_string()),
            ExportValue::Text(s) => serializer.serialize_str(s),
            ExportValue::DateTime(dt) => serializer.serialize_str(&dt.format(DATETIME_FORMAT).to_string()),
            ExportValue::Enum { value, label } => {
                serializer.serialize_str(label.as_deref().unwrap_or(value))
            }
            ExportValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            ExportValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            ExportValue::Object(record) => match record.display() {
                Some(text) => serializer.serialize_str(&text),
                None => serializer.serialize_none(),
            },
        }
    }
}

impl From<bool> for ExportValue {
    fn from(value: bool) -> Self {
        ExportValue::Bool(value)
    }
}

impl From<i64> for ExportValue {
    fn from(value: i64) -> Self {
        ExportValue::Int(value)
    }
}

impl From<i32> for ExportValue {
    fn from(value: i32) -> Self {
        ExportValue::Int(value.into())
    }
}

impl From<u32> for ExportValue {
    fn from(value: u32) -> Self {
        ExportValue::Int(value.into())
    }
}

impl From<f64> for ExportValue {
    fn from(value: f64) -> Self {
        ExportValue::Float(value)
    }
}

impl From<Decimal> for ExportValue {
    fn from(value: Decimal) -> Self {
        ExportValue::Decimal(value)
    }
}

impl From<&str> for ExportValue {
    fn from(value: &str) -> Self {
        ExportValue::Text(value.to_string())
    }
}

impl From<String> for ExportValue {
    fn from(value: String) -> Self {
        ExportValue::Text(value)
    }
}

impl From<NaiveDateTime> for ExportValue {
    fn from(value: NaiveDateTime) -> Self {
        ExportValue::DateTime(value)
    }
}

impl From<NaiveDate> for ExportValue {
    fn from(value: NaiveDate) -> Self {
        ExportValue::DateTime(value.and_time(chrono::NaiveTime::MIN))
    }
}

impl From<DateTime<Utc>> for ExportValue {
    fn from(value: DateTime<Utc>) -> Self {
        ExportValue::DateTime(value.naive_utc())
    }
}

impl From<uuid::Uuid> for ExportValue {
    fn from(value: uuid::Uuid) -> Self {
        ExportValue::Text(value.to_string())
    }
}

impl<T: Into<ExportValue>> From<Option<T>> for ExportValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ExportValue::Null)
    }
}

impl<T: Into<ExportValue>> From<Vec<T>> for ExportValue {
    fn from(value: Vec<T>) -> Self {
        ExportValue::List(value.into_iter().map(Into::into).collect())
    }
}

impl From<JsonValue> for ExportValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => ExportValue::Null,
            JsonValue::Bool(b) => ExportValue::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => ExportValue::Int(i),
                None => n.as_f64().map(ExportValue::Float).unwrap_or(ExportValue::Null),
            },
            JsonValue::String(s) => ExportValue::Text(s),
            JsonValue::Array(items) => ExportValue::List(items.into_iter().map(Into::into).collect()),
            JsonValue::Object(entries) => {
                ExportValue::Map(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

type Accessor = Arc<dyn Fn(&SchemaRecord) -> ExportValue + Send + Sync>;

/// An object-like record described by a declared schema: stored fields plus
/// computed accessors. Accessors take precedence over stored fields with the
/// same key.
#[derive(Clone)]
pub struct SchemaRecord {
    type_name: String,
    fields: Vec<(String, ExportValue)>,
    accessors: Vec<(String, Accessor)>,
    display: Option<String>,
}

impl SchemaRecord {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
            accessors: Vec::new(),
            display: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<ExportValue>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn with_accessor<F>(mut self, key: impl Into<String>, accessor: F) -> Self
    where
        F: Fn(&SchemaRecord) -> ExportValue + Send + Sync + 'static,
    {
        self.accessors.push((key.into(), Arc::new(accessor)));
        self
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Stored field only, bypassing accessors.
    pub fn stored(&self, key: &str) -> Option<&ExportValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl fmt::Debug for SchemaRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRecord")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .field("accessors", &self.accessors.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

impl FieldAccessible for SchemaRecord {
    fn field(&self, key: &str) -> Option<ExportValue> {
        if let Some((_, accessor)) = self.accessors.iter().find(|(k, _)| k == key) {
            return Some(accessor(self));
        }
        self.stored(key).cloned()
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn display(&self) -> Option<String> {
        self.display.clone()
    }
}

/// Implements `FieldAccessible` for a plain struct by exposing the listed
/// fields under their own names.
#[macro_export]
macro_rules! impl_field_accessible {
    ($type:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::domains::export::value::FieldAccessible for $type {
            fn field(&self, key: &str) -> Option<$crate::domains::export::value::ExportValue> {
                match key {
                    $(
                        stringify!($field) => Some($crate::domains::export::value::ExportValue::from(
                            self.$field.clone(),
                        )),
                    )+
                    _ => None,
                }
            }

            fn type_name(&self) -> &str {
                stringify!($type)
            }
        }
    };
}
