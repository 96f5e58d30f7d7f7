use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::io::{self, Read};
use std::path::Path;
use typed_llm::TypeSpec;

/// Parse a `--schema` argument: a scalar keyword, `@file` with a JSON schema,
/// or an inline JSON schema.
pub fn parse_schema(arg: &str) -> Result<TypeSpec> {
    let arg = arg.trim();
    match arg {
        "string" | "str" => return Ok(TypeSpec::string()),
        "integer" | "int" => return Ok(TypeSpec::integer()),
        "number" | "float" => return Ok(TypeSpec::number()),
        "boolean" | "bool" => return Ok(TypeSpec::boolean()),
        _ => {}
    }
    let source = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("read schema file: {path}"))?,
        None => arg.to_string(),
    };
    if source.trim().is_empty() {
        bail!("empty schema");
    }
    let schema: Value = serde_json::from_str(&source).context("parse schema JSON")?;
    TypeSpec::from_json_schema(&schema).context("unsupported schema")
}

/// The positional data argument, read from stdin when it is `-`.
pub fn read_data(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("read data from stdin")?;
    Ok(buf)
}
