use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::engine::{Engine, from_value};
use crate::error::{Error, Result};
use crate::llm::ModelParams;
use crate::schema::TypeSpec;

/// Records that can be built from natural language.
///
/// The text is cast into the record's shape, then `overrides` are laid over
/// the inferred fields. Overrides always win.
pub trait FromText: Sized {
    fn from_text<'a>(
        engine: &'a Engine,
        text: &'a str,
        overrides: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Self>>;

    fn from_text_blocking(
        engine: &Engine,
        text: &str,
        overrides: Map<String, Value>,
    ) -> Result<Self>;
}

impl<T> FromText for T
where
    T: JsonSchema + DeserializeOwned + Send,
{
    fn from_text<'a>(
        engine: &'a Engine,
        text: &'a str,
        overrides: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Self>> {
        Box::pin(async move {
            let spec = record_spec::<T>()?;
            let inferred = engine
                .cast_value(&Value::String(text.to_string()), &spec, None, &ModelParams::default())
                .await?;
            from_value(apply_overrides(inferred, overrides)?)
        })
    }

    fn from_text_blocking(
        engine: &Engine,
        text: &str,
        overrides: Map<String, Value>,
    ) -> Result<Self> {
        let spec = record_spec::<T>()?;
        let inferred = engine.cast_value_blocking(
            &Value::String(text.to_string()),
            &spec,
            None,
            &ModelParams::default(),
        )?;
        from_value(apply_overrides(inferred, overrides)?)
    }
}

fn record_spec<T: JsonSchema>() -> Result<TypeSpec> {
    match TypeSpec::of::<T>()? {
        spec @ TypeSpec::Record(_) => Ok(spec),
        other => Err(Error::schema(format!(
            "from_text needs a record type, got {}",
            other.describe()
        ))),
    }
}

fn apply_overrides(inferred: Value, overrides: Map<String, Value>) -> Result<Value> {
    match inferred {
        Value::Object(mut fields) => {
            fields.extend(overrides);
            Ok(Value::Object(fields))
        }
        other => Err(Error::validation("$", format!("expected object, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::test_utils::{ScriptedBackend, data};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Deserialize, JsonSchema)]
    struct Location {
        city: String,
        state: String,
    }

    fn overrides(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn overrides_win() {
        let backend = Arc::new(ScriptedBackend::with_tool_args([data(
            json!({"city": "Portland", "state": "OR"}),
        )]));
        let engine = Engine::new(backend, EngineSettings::default());
        let location = Location::from_text(
            &engine,
            "the city of roses",
            overrides(json!({"state": "Oregon"})),
        )
        .await
        .unwrap();
        assert_eq!(
            location,
            Location {
                city: "Portland".into(),
                state: "Oregon".into()
            }
        );
    }

    #[test]
    fn blocking_constructor() {
        let backend = Arc::new(ScriptedBackend::with_tool_args([data(
            json!({"city": "Austin", "state": "TX"}),
        )]));
        let engine = Engine::new(backend, EngineSettings::default());
        let location = Location::from_text_blocking(&engine, "ATX", Map::new()).unwrap();
        assert_eq!(location.city, "Austin");
    }

    #[tokio::test]
    async fn scalar_types_are_rejected() {
        let backend = Arc::new(ScriptedBackend::default());
        let engine = Engine::new(backend.clone(), EngineSettings::default());
        let err = String::from_text(&engine, "x", Map::new()).await.unwrap_err();
        assert!(matches!(err, Error::SchemaCompilation(_)));
        assert!(backend.requests().is_empty());
    }
}
