use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::OnceLock;

use super::{Record, ScalarKind, TypeSpec};
use crate::error::{Error, Result};
use crate::llm::types::{ToolChoice, ToolDef, ToolFunctionDef};

/// Names used for the forced tool and its single output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractNaming {
    pub name: String,
    pub description: String,
    pub field_name: String,
    pub field_description: String,
}

impl Default for ContractNaming {
    fn default() -> Self {
        Self {
            name: "FormatResponse".into(),
            description: "Formats the response.".into(),
            field_name: "data".into(),
            field_description: "The data to format.".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContract {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolContract {
    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef {
            kind: "function".into(),
            function: ToolFunctionDef {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.parameters.clone(),
            },
        }
    }

    pub fn forced_choice(&self) -> ToolChoice {
        ToolChoice::function(self.name.clone())
    }
}

fn tool_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static regex"))
}

/// Compile `spec` into a contract whose parameters hold one field mirroring it.
pub fn compile_contract(spec: &TypeSpec, naming: &ContractNaming) -> Result<ToolContract> {
    if !tool_name_pattern().is_match(&naming.name) {
        return Err(Error::schema(format!(
            "tool name {:?} must match [A-Za-z0-9_-]{{1,64}}",
            naming.name
        )));
    }
    if naming.field_name.is_empty() {
        return Err(Error::schema("field name must not be empty"));
    }

    let mut field = schema_for_spec(spec)?;
    let field_description = Value::String(naming.field_description.clone());
    if field.get("description").is_some() {
        // keep the type's own description, describe the field around it
        field = json!({ "allOf": [field], "description": field_description });
    } else if let Value::Object(obj) = &mut field {
        obj.insert("description".into(), field_description);
    }

    let mut properties = Map::new();
    properties.insert(naming.field_name.clone(), field);
    Ok(ToolContract {
        name: naming.name.clone(),
        description: naming.description.clone(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": [naming.field_name],
        }),
    })
}

/// JSON schema for one spec node.
pub fn schema_for_spec(spec: &TypeSpec) -> Result<Value> {
    match spec {
        TypeSpec::Scalar(kind) => Ok(json!({ "type": scalar_type(*kind) })),
        TypeSpec::Enum(labels) => {
            if labels.is_empty() {
                return Err(Error::schema("enum without labels"));
            }
            let mut seen = HashSet::new();
            if let Some(dup) = labels.iter().find(|l| !seen.insert(l.as_str())) {
                return Err(Error::schema(format!("duplicate enum label {dup:?}")));
            }
            Ok(json!({ "type": "string", "enum": labels }))
        }
        TypeSpec::Record(record) => record_schema(record),
        TypeSpec::List(inner) => Ok(json!({ "type": "array", "items": schema_for_spec(inner)? })),
        TypeSpec::Map(inner) => Ok(json!({
            "type": "object",
            "additionalProperties": schema_for_spec(inner)?,
        })),
        TypeSpec::Optional(inner) => Ok(json!({
            "anyOf": [schema_for_spec(inner)?, { "type": "null" }],
        })),
    }
}

fn scalar_type(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::String => "string",
        ScalarKind::Integer => "integer",
        ScalarKind::Number => "number",
        ScalarKind::Boolean => "boolean",
    }
}

fn record_schema(record: &Record) -> Result<Value> {
    let mut seen = HashSet::new();
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in &record.fields {
        if field.name.is_empty() {
            return Err(Error::schema("record field without a name"));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(Error::schema(format!("duplicate record field {:?}", field.name)));
        }
        let mut schema = schema_for_spec(&field.spec)?;
        if let (Some(desc), Value::Object(obj)) = (&field.description, &mut schema) {
            obj.insert("description".into(), Value::String(desc.clone()));
        }
        properties.insert(field.name.clone(), schema);
        if !field.spec.is_optional() {
            required.push(Value::String(field.name.clone()));
        }
    }

    let mut obj = Map::new();
    obj.insert("type".into(), Value::String("object".into()));
    if let Some(name) = &record.name {
        obj.insert("title".into(), Value::String(name.clone()));
    }
    if let Some(desc) = &record.description {
        obj.insert("description".into(), Value::String(desc.clone()));
    }
    obj.insert("properties".into(), Value::Object(properties));
    obj.insert("required".into(), Value::Array(required));
    Ok(Value::Object(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn point() -> TypeSpec {
        TypeSpec::record([
            Field::new("a", TypeSpec::integer()),
            Field::new("b", TypeSpec::string()).describe("label"),
            Field::new("note", TypeSpec::optional(TypeSpec::string())),
        ])
    }

    #[test]
    fn scalar_contract_wraps_single_field() {
        let contract = compile_contract(&TypeSpec::integer(), &ContractNaming::default()).unwrap();
        assert_eq!(contract.name, "FormatResponse");
        assert_eq!(
            contract.parameters,
            json!({
                "type": "object",
                "properties": {
                    "data": {"type": "integer", "description": "The data to format."}
                },
                "required": ["data"]
            })
        );
    }

    #[test]
    fn record_description_survives_field_description() {
        let spec = match point() {
            TypeSpec::Record(record) => TypeSpec::Record(Record {
                description: Some("A labelled point.".into()),
                ..record
            }),
            other => other,
        };
        let contract = compile_contract(&spec, &ContractNaming::default()).unwrap();
        let field = &contract.parameters["properties"]["data"];
        assert_eq!(field["description"], json!("The data to format."));
        assert_eq!(field["allOf"][0]["description"], json!("A labelled point."));
        let offered = TypeSpec::from_json_schema(&contract.parameters).unwrap();
        let TypeSpec::Record(wrapper) = offered else {
            panic!("expected record");
        };
        assert_eq!(wrapper.fields[0].spec, spec);
    }

    #[test]
    fn record_schema_required_in_declaration_order() {
        let schema = schema_for_spec(&point()).unwrap();
        assert_eq!(
            schema.to_string(),
            r#"{"type":"object","properties":{"a":{"type":"integer"},"b":{"type":"string","description":"label"},"note":{"anyOf":[{"type":"string"},{"type":"null"}]}},"required":["a","b"]}"#
        );
    }

    #[test]
    fn compilation_is_deterministic() {
        let spec = TypeSpec::list(point());
        let naming = ContractNaming {
            name: "Points".into(),
            field_name: "points".into(),
            ..Default::default()
        };
        let first = compile_contract(&spec, &naming).unwrap();
        let second = compile_contract(&spec, &naming).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn compiled_schema_converts_back() {
        let spec = TypeSpec::list(point());
        let schema = schema_for_spec(&spec).unwrap();
        assert_eq!(TypeSpec::from_json_schema(&schema).unwrap(), spec);
    }

    #[test]
    fn invalid_shapes_fail() {
        let naming = ContractNaming::default();
        assert!(compile_contract(&TypeSpec::Enum(vec![]), &naming).is_err());
        assert!(compile_contract(&TypeSpec::enumeration(["a", "a"]), &naming).is_err());
        let dup = TypeSpec::record([
            Field::new("x", TypeSpec::integer()),
            Field::new("x", TypeSpec::string()),
        ]);
        assert!(compile_contract(&dup, &naming).is_err());
        let bad_name = ContractNaming {
            name: "has spaces".into(),
            ..Default::default()
        };
        assert!(matches!(
            compile_contract(&TypeSpec::string(), &bad_name),
            Err(Error::SchemaCompilation(_))
        ));
    }
}
