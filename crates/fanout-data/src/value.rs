//! Value model
//!
//! [`Value`] is what flows through the data manager. [`TypeTag`] names the
//! seven declared kinds and [`TypeSpec`] carries the full checked shape
//! (element types of lists and dicts, dataframe columns).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt::{self, Display, Formatter};

/// Declared kind of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    /// 64-bit float
    Float,
    /// 64-bit signed integer
    Int,
    /// Boolean
    Bool,
    /// Ordered mapping string -> value
    Dict,
    /// Named columns of equal length
    #[serde(rename = "dataframe")]
    DataFrame,
    /// Ordered sequence
    List,
    /// UTF-8 string
    String,
}

impl TypeTag {
    /// Scalar kinds (no sub-structure)
    #[inline]
    #[must_use]
    pub fn is_scalar(self) -> bool {
        matches!(self, Self::Float | Self::Int | Self::Bool | Self::String)
    }

    /// Lowercase name as used in descriptors
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Dict => "dict",
            Self::DataFrame => "dataframe",
            Self::List => "list",
            Self::String => "string",
        }
    }
}

impl Display for TypeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column-oriented table
///
/// All columns hold the same number of rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct DataFrame {
    columns: IndexMap<String, Vec<Value>>,
}

impl DataFrame {
    /// Empty dataframe
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column
    ///
    /// # Errors
    /// Returns the offending column name if its length differs from the
    /// existing columns.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<Self, String> {
        let name = name.into();
        if !self.columns.is_empty() && values.len() != self.n_rows() {
            return Err(name);
        }
        self.columns.insert(name, values);
        Ok(self)
    }

    /// Column by name
    #[inline]
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Iterate columns
    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of rows
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.columns.values().next().map_or(0, Vec::len)
    }

    /// Number of columns
    #[inline]
    #[must_use]
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }
}

/// Runtime value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Float value
    Float(f64),
    /// Integer value
    Int(i64),
    /// Boolean value
    Bool(bool),
    /// String value
    String(String),
    /// List value
    List(Vec<Value>),
    /// Ordered mapping
    Dict(IndexMap<String, Value>),
    /// Dataframe
    DataFrame(DataFrame),
}

impl Value {
    /// Kind of this value
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Float(_) => TypeTag::Float,
            Self::Int(_) => TypeTag::Int,
            Self::Bool(_) => TypeTag::Bool,
            Self::String(_) => TypeTag::String,
            Self::List(_) => TypeTag::List,
            Self::Dict(_) => TypeTag::Dict,
            Self::DataFrame(_) => TypeTag::DataFrame,
        }
    }

    /// Float payload
    #[inline]
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer payload
    #[inline]
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean payload
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// List payload
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Dict payload
    #[inline]
    #[must_use]
    pub fn as_dict(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Dict(v) => Some(v),
            _ => None,
        }
    }

    /// Dataframe payload
    #[inline]
    #[must_use]
    pub fn as_dataframe(&self) -> Option<&DataFrame> {
        match self {
            Self::DataFrame(v) => Some(v),
            _ => None,
        }
    }

    /// Convenience list of strings
    #[must_use]
    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    /// Plain JSON rendering
    ///
    /// Dataframes render as `{column: [cells]}`. Non-finite floats render
    /// as `null`.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DataFrame> for Value {
    fn from(v: DataFrame) -> Self {
        Self::DataFrame(v)
    }
}

/// Checked type shape of a declared variable
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    /// float / int / bool / string
    Scalar(TypeTag),
    /// List; `None` element spec accepts scalar elements only
    List(Option<Box<TypeSpec>>),
    /// Dict with homogeneous value spec
    Dict(Box<TypeSpec>),
    /// Dataframe with declared column kinds
    DataFrame(IndexMap<String, TypeTag>),
}

impl TypeSpec {
    /// Top-level kind
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::Scalar(tag) => *tag,
            Self::List(_) => TypeTag::List,
            Self::Dict(_) => TypeTag::Dict,
            Self::DataFrame(_) => TypeTag::DataFrame,
        }
    }

    /// Check `value` against this shape
    ///
    /// # Errors
    /// Human-readable description of the first mismatch.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (Self::Scalar(tag), v) if v.type_tag() == *tag => Ok(()),
            (Self::List(elem), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    match elem {
                        Some(spec) => spec.check(item).map_err(|e| format!("[{i}]: {e}"))?,
                        None if item.type_tag().is_scalar() => {}
                        None => {
                            return Err(format!(
                                "[{i}]: composite element {} needs a subtype descriptor",
                                item.type_tag()
                            ))
                        }
                    }
                }
                Ok(())
            }
            (Self::Dict(spec), Value::Dict(map)) => {
                for (k, v) in map {
                    spec.check(v).map_err(|e| format!("['{k}']: {e}"))?;
                }
                Ok(())
            }
            (Self::DataFrame(columns), Value::DataFrame(df)) => {
                for (name, tag) in columns {
                    let cells = df
                        .column(name)
                        .ok_or_else(|| format!("missing column '{name}'"))?;
                    if let Some(bad) = cells.iter().find(|c| c.type_tag() != *tag) {
                        return Err(format!(
                            "column '{name}' expects {tag}, found {}",
                            bad.type_tag()
                        ));
                    }
                }
                Ok(())
            }
            (spec, v) => Err(format!("expected {}, found {}", spec.tag(), v.type_tag())),
        }
    }

    /// Decode plain JSON into a [`Value`] of this shape
    ///
    /// Integers are accepted where a float is declared only when they are
    /// written as JSON numbers (`3` decodes as `3.0`); the reverse is
    /// rejected.
    ///
    /// # Errors
    /// Human-readable description of the first mismatch.
    pub fn decode(&self, json: &JsonValue) -> Result<Value, String> {
        match self {
            Self::Scalar(TypeTag::Float) => json
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| format!("expected float, found {json}")),
            Self::Scalar(TypeTag::Int) => json
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| format!("expected int, found {json}")),
            Self::Scalar(TypeTag::Bool) => json
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| format!("expected bool, found {json}")),
            Self::Scalar(TypeTag::String) => json
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| format!("expected string, found {json}")),
            Self::Scalar(other) => Err(format!("{other} is not a scalar kind")),
            Self::List(elem) => {
                let items = json
                    .as_array()
                    .ok_or_else(|| format!("expected list, found {json}"))?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| match elem {
                        Some(spec) => spec.decode(item).map_err(|e| format!("[{i}]: {e}")),
                        None => decode_scalar(item).map_err(|e| format!("[{i}]: {e}")),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            Self::Dict(spec) => {
                let map = json
                    .as_object()
                    .ok_or_else(|| format!("expected dict, found {json}"))?;
                map.iter()
                    .map(|(k, v)| {
                        spec.decode(v)
                            .map(|v| (k.clone(), v))
                            .map_err(|e| format!("['{k}']: {e}"))
                    })
                    .collect::<Result<IndexMap<_, _>, _>>()
                    .map(Value::Dict)
            }
            Self::DataFrame(columns) => {
                let map = json
                    .as_object()
                    .ok_or_else(|| format!("expected dataframe object, found {json}"))?;
                let mut df = DataFrame::new();
                for (name, cells) in map {
                    let cells = cells
                        .as_array()
                        .ok_or_else(|| format!("column '{name}' is not an array"))?;
                    let decoded = match columns.get(name) {
                        Some(tag) => cells
                            .iter()
                            .map(|c| Self::Scalar(*tag).decode(c))
                            .collect::<Result<Vec<_>, _>>(),
                        None => cells.iter().map(decode_scalar).collect(),
                    }
                    .map_err(|e| format!("column '{name}': {e}"))?;
                    df = df
                        .with_column(name.clone(), decoded)
                        .map_err(|c| format!("column '{c}' has a different length"))?;
                }
                let value = Value::DataFrame(df);
                self.check(&value)?;
                Ok(value)
            }
        }
    }
}

/// Best-effort decoding of an undeclared scalar
fn decode_scalar(json: &JsonValue) -> Result<Value, String> {
    match json {
        JsonValue::Bool(b) => Ok(Value::Bool(*b)),
        JsonValue::String(s) => Ok(Value::String(s.clone())),
        JsonValue::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .ok_or_else(|| format!("unrepresentable number {n}")),
        other => Err(format!("expected scalar, found {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario_df() -> DataFrame {
        DataFrame::new()
            .with_column("scenario_name", vec!["a".into(), "b".into()])
            .unwrap()
            .with_column("selected_scenario", vec![true.into(), false.into()])
            .unwrap()
    }

    #[test]
    fn type_tag_serde_names() {
        assert_eq!(serde_json::to_string(&TypeTag::DataFrame).unwrap(), "\"dataframe\"");
        let tag: TypeTag = serde_json::from_str("\"float\"").unwrap();
        assert_eq!(tag, TypeTag::Float);
    }

    #[test]
    fn dataframe_rejects_ragged_columns() {
        let err = DataFrame::new()
            .with_column("a", vec![1i64.into()])
            .unwrap()
            .with_column("b", vec![])
            .unwrap_err();
        assert_eq!(err, "b");
    }

    #[test]
    fn scalar_check_is_strict() {
        let spec = TypeSpec::Scalar(TypeTag::Float);
        assert!(spec.check(&Value::Float(1.0)).is_ok());
        assert!(spec.check(&Value::Int(1)).is_err());
    }

    #[test]
    fn dict_check_walks_values() {
        let spec = TypeSpec::Dict(Box::new(TypeSpec::Scalar(TypeTag::Float)));
        let mut ok = IndexMap::new();
        ok.insert("a".to_string(), Value::Float(1.0));
        assert!(spec.check(&Value::Dict(ok.clone())).is_ok());

        ok.insert("b".to_string(), Value::from("x"));
        let err = spec.check(&Value::Dict(ok)).unwrap_err();
        assert!(err.contains("'b'"));
    }

    #[test]
    fn untyped_list_refuses_composites() {
        let spec = TypeSpec::List(None);
        assert!(spec.check(&Value::string_list(["a", "b"])).is_ok());
        let nested = Value::List(vec![Value::List(vec![])]);
        assert!(spec.check(&nested).is_err());
    }

    #[test]
    fn dataframe_check_columns() {
        let mut cols = IndexMap::new();
        cols.insert("scenario_name".to_string(), TypeTag::String);
        cols.insert("selected_scenario".to_string(), TypeTag::Bool);
        let spec = TypeSpec::DataFrame(cols);
        assert!(spec.check(&scenario_df().into()).is_ok());

        let mut wrong = IndexMap::new();
        wrong.insert("selected_scenario".to_string(), TypeTag::String);
        assert!(TypeSpec::DataFrame(wrong).check(&scenario_df().into()).is_err());
    }

    #[test]
    fn decode_float_accepts_integer_literal() {
        let v = TypeSpec::Scalar(TypeTag::Float).decode(&json!(3)).unwrap();
        assert_eq!(v, Value::Float(3.0));
        assert!(TypeSpec::Scalar(TypeTag::Int).decode(&json!(3.5)).is_err());
    }

    #[test]
    fn decode_nested_dict_of_lists() {
        let spec = TypeSpec::Dict(Box::new(TypeSpec::List(Some(Box::new(TypeSpec::Scalar(
            TypeTag::String,
        ))))));
        let v = spec.decode(&json!({"k": ["a", "b"]})).unwrap();
        assert_eq!(v.as_dict().unwrap()["k"], Value::string_list(["a", "b"]));
    }

    #[test]
    fn decode_dataframe_roundtrips_json() {
        let mut cols = IndexMap::new();
        cols.insert("scenario_name".to_string(), TypeTag::String);
        let spec = TypeSpec::DataFrame(cols);
        let json = Value::from(scenario_df()).to_json();
        let back = spec.decode(&json).unwrap();
        assert_eq!(back, Value::from(scenario_df()));
    }
}
