//! Variable descriptors
//!
//! [`VariableDescriptor`] is the configuration object a discipline uses to
//! declare one input or output. It deserializes from the same keys the
//! process configuration files use and rejects anything else.
//! [`VariableDescriptor::validate`] turns it into a checked [`VariableSpec`].

use fanout_namespace::NamespaceId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DataError;
use crate::value::{TypeSpec, TypeTag, Value};

/// Who may write a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Private to the declaring discipline instance
    #[default]
    Local,
    /// Addressable by any discipline bound to the namespace
    Shared,
}

/// Nested element description for `list` and `dict` variables
///
/// Either a leaf kind (`"float"`) or a single-entry map naming a container
/// and its own element description (`{"dict": {"list": "string"}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubtypeDescriptor {
    /// Leaf kind
    Leaf(TypeTag),
    /// Container with nested description
    Nested(IndexMap<TypeTag, SubtypeDescriptor>),
}

impl SubtypeDescriptor {
    /// Build the element spec of a container of kind `outer`
    ///
    /// The descriptor for a container names that container first, so a
    /// `dict` of floats is `{"dict": "float"}`.
    fn element_spec(&self, outer: TypeTag) -> Result<TypeSpec, String> {
        match self {
            Self::Nested(map) if map.len() == 1 => {
                let (tag, inner) = map.iter().next().ok_or("empty subtype descriptor")?;
                if *tag != outer {
                    return Err(format!("subtype descriptor names {tag}, variable is {outer}"));
                }
                inner.to_spec()
            }
            Self::Nested(_) => Err("subtype descriptor must have exactly one entry".to_string()),
            Self::Leaf(tag) => Err(format!(
                "subtype descriptor for {outer} must be {{\"{outer}\": ...}}, found \"{tag}\""
            )),
        }
    }

    fn to_spec(&self) -> Result<TypeSpec, String> {
        match self {
            Self::Leaf(tag) if tag.is_scalar() => Ok(TypeSpec::Scalar(*tag)),
            Self::Leaf(TypeTag::List) => Ok(TypeSpec::List(None)),
            Self::Leaf(tag) => Err(format!("{tag} leaf needs its own descriptor")),
            Self::Nested(map) => {
                let (tag, _) = map.iter().next().ok_or("empty subtype descriptor")?;
                match tag {
                    TypeTag::List => Ok(TypeSpec::List(Some(Box::new(self.element_spec(*tag)?)))),
                    TypeTag::Dict => Ok(TypeSpec::Dict(Box::new(self.element_spec(*tag)?))),
                    other => Err(format!("{other} cannot nest")),
                }
            }
        }
    }
}

/// Column kinds of a `dataframe` variable
pub type DataframeDescriptor = IndexMap<String, TypeTag>;

/// Declaration of one discipline input or output
///
/// # Example
/// ```
/// use fanout_data::{TypeTag, VariableDescriptor, Visibility};
///
/// let desc: VariableDescriptor = serde_json::from_str(
///     r#"{"type": "float", "unit": "kg", "visibility": "shared", "namespace": "ns_ac"}"#,
/// ).unwrap();
/// assert_eq!(desc.type_tag, TypeTag::Float);
/// assert_eq!(desc.visibility, Visibility::Shared);
/// assert!(desc.validate("mass").is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableDescriptor {
    /// Declared kind
    #[serde(rename = "type")]
    pub type_tag: TypeTag,

    /// Element description for list/dict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype_descriptor: Option<SubtypeDescriptor>,

    /// Column kinds for dataframe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataframe_descriptor: Option<DataframeDescriptor>,

    /// Initial value, decoded with the declared shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,

    /// Physical unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Write visibility
    #[serde(default)]
    pub visibility: Visibility,

    /// Namespace binding (required for shared visibility)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<NamespaceId>,

    /// Input may stay unset without blocking readiness
    #[serde(default)]
    pub optional: bool,
}

impl VariableDescriptor {
    /// Descriptor of the given kind with defaults for everything else
    #[must_use]
    pub fn new(type_tag: TypeTag) -> Self {
        Self {
            type_tag,
            subtype_descriptor: None,
            dataframe_descriptor: None,
            default: None,
            unit: None,
            visibility: Visibility::Local,
            namespace: None,
            optional: false,
        }
    }

    /// `float` descriptor
    #[inline]
    #[must_use]
    pub fn float() -> Self {
        Self::new(TypeTag::Float)
    }

    /// `int` descriptor
    #[inline]
    #[must_use]
    pub fn int() -> Self {
        Self::new(TypeTag::Int)
    }

    /// `bool` descriptor
    #[inline]
    #[must_use]
    pub fn bool() -> Self {
        Self::new(TypeTag::Bool)
    }

    /// `string` descriptor
    #[inline]
    #[must_use]
    pub fn string() -> Self {
        Self::new(TypeTag::String)
    }

    /// `list` descriptor (scalar elements)
    #[inline]
    #[must_use]
    pub fn list() -> Self {
        Self::new(TypeTag::List)
    }

    /// `list` of `elem` scalars
    #[must_use]
    pub fn list_of(elem: TypeTag) -> Self {
        Self::list().with_subtype(nested(TypeTag::List, SubtypeDescriptor::Leaf(elem)))
    }

    /// `dict` of `elem` scalars
    #[must_use]
    pub fn dict_of(elem: TypeTag) -> Self {
        Self::new(TypeTag::Dict).with_subtype(nested(TypeTag::Dict, SubtypeDescriptor::Leaf(elem)))
    }

    /// `dataframe` with the given columns
    #[must_use]
    pub fn dataframe<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, TypeTag)>,
        S: Into<String>,
    {
        let mut desc = Self::new(TypeTag::DataFrame);
        desc.dataframe_descriptor = Some(columns.into_iter().map(|(k, v)| (k.into(), v)).collect());
        desc
    }

    /// Set subtype descriptor
    #[inline]
    #[must_use]
    pub fn with_subtype(mut self, subtype: SubtypeDescriptor) -> Self {
        self.subtype_descriptor = Some(subtype);
        self
    }

    /// Set unit
    #[inline]
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set default value
    #[inline]
    #[must_use]
    pub fn with_default(mut self, value: &Value) -> Self {
        self.default = Some(value.to_json());
        self
    }

    /// Shared visibility in `namespace`
    #[inline]
    #[must_use]
    pub fn shared(mut self, namespace: impl Into<NamespaceId>) -> Self {
        self.visibility = Visibility::Shared;
        self.namespace = Some(namespace.into());
        self
    }

    /// Local visibility bound to `namespace` instead of the discipline's own
    #[inline]
    #[must_use]
    pub fn local_in(mut self, namespace: impl Into<NamespaceId>) -> Self {
        self.visibility = Visibility::Local;
        self.namespace = Some(namespace.into());
        self
    }

    /// Mark as optional input
    #[inline]
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Check required fields and build the [`VariableSpec`]
    ///
    /// # Errors
    /// [`DataError::Configuration`] when:
    /// - `dict` lacks a `subtype_descriptor`
    /// - `dataframe` lacks a `dataframe_descriptor`
    /// - `shared` lacks a `namespace`
    /// - the `default` does not decode with the declared shape
    pub fn validate(&self, name: &str) -> Result<VariableSpec, DataError> {
        let config = |reason: String| DataError::Configuration(format!("'{name}': {reason}"));

        let type_spec = match self.type_tag {
            TypeTag::Float | TypeTag::Int | TypeTag::Bool | TypeTag::String => {
                TypeSpec::Scalar(self.type_tag)
            }
            TypeTag::List => match &self.subtype_descriptor {
                Some(sub) => TypeSpec::List(Some(Box::new(
                    sub.element_spec(TypeTag::List).map_err(config)?,
                ))),
                None => TypeSpec::List(None),
            },
            TypeTag::Dict => {
                let sub = self
                    .subtype_descriptor
                    .as_ref()
                    .ok_or_else(|| config("dict requires subtype_descriptor".to_string()))?;
                TypeSpec::Dict(Box::new(sub.element_spec(TypeTag::Dict).map_err(config)?))
            }
            TypeTag::DataFrame => {
                let cols = self
                    .dataframe_descriptor
                    .as_ref()
                    .ok_or_else(|| config("dataframe requires dataframe_descriptor".to_string()))?;
                if let Some((col, tag)) = cols.iter().find(|(_, t)| !t.is_scalar()) {
                    return Err(config(format!("column '{col}' must be scalar, found {tag}")));
                }
                TypeSpec::DataFrame(cols.clone())
            }
        };

        if self.visibility == Visibility::Shared && self.namespace.is_none() {
            return Err(config("shared visibility requires namespace".to_string()));
        }

        let default = self
            .default
            .as_ref()
            .map(|json| type_spec.decode(json).map_err(|e| config(format!("default: {e}"))))
            .transpose()?;

        Ok(VariableSpec {
            type_spec,
            unit: self.unit.clone(),
            visibility: self.visibility,
            default,
            optional: self.optional,
        })
    }
}

fn nested(outer: TypeTag, inner: SubtypeDescriptor) -> SubtypeDescriptor {
    let mut map = IndexMap::new();
    map.insert(outer, inner);
    SubtypeDescriptor::Nested(map)
}

/// Validated declaration, ready for [`crate::DataManager::declare`]
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    /// Checked shape
    pub type_spec: TypeSpec,
    /// Physical unit
    pub unit: Option<String>,
    /// Write visibility
    pub visibility: Visibility,
    /// Initial value
    pub default: Option<Value>,
    /// May stay unset
    pub optional: bool,
}

impl VariableSpec {
    /// Top-level kind
    #[inline]
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        self.type_spec.tag()
    }

    /// Spec with only a shape (local, no unit, no default)
    #[must_use]
    pub fn of(type_spec: TypeSpec) -> Self {
        Self {
            type_spec,
            unit: None,
            visibility: Visibility::Local,
            default: None,
            optional: false,
        }
    }

    /// Same spec with shared visibility
    #[inline]
    #[must_use]
    pub fn into_shared(mut self) -> Self {
        self.visibility = Visibility::Shared;
        self
    }
}
