use serde_json::{Map, Value};

use super::{Field, Record, TypeSpec};
use crate::error::{Error, Result};

pub(super) fn convert(root: &Value) -> Result<TypeSpec> {
    let mut resolver = Resolver {
        root,
        stack: Vec::new(),
    };
    resolver.convert(root, "#")
}

struct Resolver<'a> {
    root: &'a Value,
    // refs currently being expanded, to reject recursive types
    stack: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn convert(&mut self, schema: &'a Value, at: &str) -> Result<TypeSpec> {
        let obj = match schema {
            Value::Object(obj) => obj,
            Value::Bool(true) => {
                return Err(Error::schema(format!("{at}: unconstrained schema")));
            }
            _ => return Err(Error::schema(format!("{at}: unsupported schema {schema}"))),
        };

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            return self.follow(reference, at);
        }

        if let Some(Value::Array(parts)) = obj.get("allOf") {
            if let [single] = parts.as_slice() {
                return self.convert(single, at);
            }
            return Err(Error::schema(format!("{at}: allOf with several parts is unsupported")));
        }

        for key in ["anyOf", "oneOf"] {
            if let Some(Value::Array(variants)) = obj.get(key) {
                return self.union(variants, at);
            }
        }

        if let Some(Value::Array(values)) = obj.get("enum") {
            return string_labels(values, at).map(TypeSpec::Enum);
        }
        if let Some(value) = obj.get("const") {
            return string_labels(std::slice::from_ref(value), at).map(TypeSpec::Enum);
        }

        match obj.get("type") {
            Some(Value::String(kind)) => self.typed(kind, obj, at),
            Some(Value::Array(kinds)) => {
                let names: Vec<&str> = kinds.iter().filter_map(Value::as_str).collect();
                let non_null: Vec<&str> = names.iter().copied().filter(|k| *k != "null").collect();
                match non_null.as_slice() {
                    [kind] if names.len() == 2 => {
                        Ok(TypeSpec::optional(self.typed(kind, obj, at)?))
                    }
                    [kind] => self.typed(kind, obj, at),
                    _ => Err(Error::schema(format!("{at}: union of types {names:?} is unsupported"))),
                }
            }
            Some(other) => Err(Error::schema(format!("{at}: invalid type {other}"))),
            None => Err(Error::schema(format!("{at}: unconstrained schema"))),
        }
    }

    fn typed(&mut self, kind: &str, obj: &'a Map<String, Value>, at: &str) -> Result<TypeSpec> {
        match kind {
            "string" => Ok(TypeSpec::string()),
            "integer" => Ok(TypeSpec::integer()),
            "number" => Ok(TypeSpec::number()),
            "boolean" => Ok(TypeSpec::boolean()),
            "array" => {
                if obj.contains_key("prefixItems") {
                    return Err(Error::schema(format!("{at}: tuples are unsupported")));
                }
                match obj.get("items") {
                    Some(items @ Value::Object(_)) => {
                        Ok(TypeSpec::list(self.convert(items, &format!("{at}/items"))?))
                    }
                    _ => Err(Error::schema(format!("{at}: array without item schema"))),
                }
            }
            "object" => self.object(obj, at),
            other => Err(Error::schema(format!("{at}: unsupported type {other:?}"))),
        }
    }

    fn object(&mut self, obj: &'a Map<String, Value>, at: &str) -> Result<TypeSpec> {
        if let Some(Value::Object(props)) = obj.get("properties") {
            let required: Vec<&str> = obj
                .get("required")
                .and_then(Value::as_array)
                .map(|r| r.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let mut fields = Vec::with_capacity(props.len());
            for (name, prop) in props {
                let mut spec = self.convert(prop, &format!("{at}/properties/{name}"))?;
                if !required.contains(&name.as_str()) {
                    spec = TypeSpec::optional(spec);
                }
                fields.push(Field {
                    name: name.clone(),
                    description: description(prop),
                    spec,
                });
            }
            return Ok(TypeSpec::Record(Record {
                name: obj.get("title").and_then(Value::as_str).map(String::from),
                description: obj.get("description").and_then(Value::as_str).map(String::from),
                fields,
            }));
        }
        match obj.get("additionalProperties") {
            Some(values @ Value::Object(_)) => Ok(TypeSpec::map(
                self.convert(values, &format!("{at}/additionalProperties"))?,
            )),
            _ => Err(Error::schema(format!("{at}: object without properties"))),
        }
    }

    fn union(&mut self, variants: &'a [Value], at: &str) -> Result<TypeSpec> {
        let (nulls, rest): (Vec<&Value>, Vec<&Value>) = variants.iter().partition(|v| is_null(v));
        if rest.is_empty() {
            return Err(Error::schema(format!("{at}: null-only union")));
        }

        // a union of string constants is a closed label set
        let mut labels = Vec::new();
        let all_labels = rest.iter().all(|v| match v.get("const").or_else(|| v.get("enum")) {
            Some(Value::String(s)) => {
                labels.push(s.clone());
                true
            }
            Some(Value::Array(values)) => values.iter().all(|x| match x {
                Value::String(s) => {
                    labels.push(s.clone());
                    true
                }
                _ => false,
            }),
            _ => false,
        });

        let inner = if all_labels {
            TypeSpec::Enum(labels)
        } else if let [single] = rest.as_slice() {
            self.convert(*single, at)?
        } else {
            return Err(Error::schema(format!("{at}: untagged unions are unsupported")));
        };

        if nulls.is_empty() {
            Ok(inner)
        } else {
            Ok(TypeSpec::optional(inner))
        }
    }

    fn follow(&mut self, reference: &str, at: &str) -> Result<TypeSpec> {
        if self.stack.iter().any(|r| r == reference) {
            return Err(Error::schema(format!("{at}: recursive type via {reference}")));
        }
        let root = self.root;
        let target = reference
            .strip_prefix('#')
            .and_then(|pointer| root.pointer(pointer))
            .ok_or_else(|| Error::schema(format!("{at}: unresolvable reference {reference}")))?;
        self.stack.push(reference.to_string());
        let spec = self.convert(target, reference);
        self.stack.pop();
        spec
    }
}

fn is_null(v: &Value) -> bool {
    v.get("type").and_then(Value::as_str) == Some("null")
}

fn description(schema: &Value) -> Option<String> {
    schema
        .get("description")
        .and_then(Value::as_str)
        .map(String::from)
}

fn string_labels(values: &[Value], at: &str) -> Result<Vec<String>> {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            Value::Null => Err(Error::schema(format!("{at}: nullable enums are unsupported"))),
            other => Err(Error::schema(format!("{at}: non-string enum value {other}"))),
        })
        .collect()
}
