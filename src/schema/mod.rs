//! Output shapes and their compilation into structured-output contracts.
//!
//! A [`TypeSpec`] is the closed description of what the model must produce.
//! [`compile_contract`] turns it into the single forced tool offered with a
//! request, and [`validate`] checks a tool invocation's arguments against it.
//! Rust types can be lifted into a spec with [`TypeSpec::of`], which reads the
//! JSON schema `schemars` derives for the type.

mod compile;
mod json_schema;
mod validate;

pub use compile::*;
pub use validate::validate;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Integer,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub description: Option<String>,
    pub spec: TypeSpec,
}

impl Field {
    pub fn new(name: impl Into<String>, spec: TypeSpec) -> Self {
        Self {
            name: name.into(),
            description: None,
            spec,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: Option<String>,
    pub description: Option<String>,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeSpec {
    Scalar(ScalarKind),
    Enum(Vec<String>),
    Record(Record),
    List(Box<TypeSpec>),
    Map(Box<TypeSpec>),
    Optional(Box<TypeSpec>),
}

impl TypeSpec {
    pub fn string() -> Self {
        TypeSpec::Scalar(ScalarKind::String)
    }

    pub fn integer() -> Self {
        TypeSpec::Scalar(ScalarKind::Integer)
    }

    pub fn number() -> Self {
        TypeSpec::Scalar(ScalarKind::Number)
    }

    pub fn boolean() -> Self {
        TypeSpec::Scalar(ScalarKind::Boolean)
    }

    pub fn list(element: TypeSpec) -> Self {
        TypeSpec::List(Box::new(element))
    }

    pub fn map(value: TypeSpec) -> Self {
        TypeSpec::Map(Box::new(value))
    }

    pub fn optional(inner: TypeSpec) -> Self {
        match inner {
            TypeSpec::Optional(_) => inner,
            other => TypeSpec::Optional(Box::new(other)),
        }
    }

    pub fn enumeration<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        TypeSpec::Enum(labels.into_iter().map(Into::into).collect())
    }

    pub fn record(fields: impl IntoIterator<Item = Field>) -> Self {
        TypeSpec::Record(Record {
            name: None,
            description: None,
            fields: fields.into_iter().collect(),
        })
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, TypeSpec::Optional(_))
    }

    /// Derive the spec of a Rust type from its `schemars` schema.
    pub fn of<T: JsonSchema>() -> Result<Self> {
        let schema = schemars::schema_for!(T);
        Self::from_json_schema(schema.as_value())
    }

    /// Convert a JSON schema into a spec, rejecting shapes a spec cannot express.
    pub fn from_json_schema(schema: &serde_json::Value) -> Result<Self> {
        json_schema::convert(schema)
    }

    /// Short human readable rendering, used in prompts.
    pub fn describe(&self) -> String {
        match self {
            TypeSpec::Scalar(kind) => match kind {
                ScalarKind::String => "string".into(),
                ScalarKind::Integer => "integer".into(),
                ScalarKind::Number => "number".into(),
                ScalarKind::Boolean => "boolean".into(),
            },
            TypeSpec::Enum(labels) => format!("one of [{}]", labels.join(", ")),
            TypeSpec::Record(record) => {
                let fields: Vec<String> = record
                    .fields
                    .iter()
                    .map(|f| format!("{}: {}", f.name, f.spec.describe()))
                    .collect();
                match &record.name {
                    Some(name) => format!("{name} {{{}}}", fields.join(", ")),
                    None => format!("{{{}}}", fields.join(", ")),
                }
            }
            TypeSpec::List(inner) => format!("list of {}", inner.describe()),
            TypeSpec::Map(inner) => format!("map of string to {}", inner.describe()),
            TypeSpec::Optional(inner) => format!("optional {}", inner.describe()),
        }
    }
}
