use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{Engine, from_value};
use crate::error::{Error, Result};
use crate::llm::ModelParams;
use crate::prompt::Transcript;
use crate::schema::{ContractNaming, TypeSpec};

impl Engine {
    /// Generate exactly `n` values shaped like `item`.
    ///
    /// Surplus items are truncated. A short list triggers a fresh request with
    /// the same contract; nothing is carried over between attempts.
    pub async fn generate_value(
        &self,
        item: &TypeSpec,
        n: usize,
        instructions: Option<&str>,
        params: &ModelParams,
    ) -> Result<Vec<Value>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut bindings = Map::new();
        bindings.insert("n".into(), json!(n));
        bindings.insert("type_description".into(), json!(item.describe()));
        bindings.insert("instructions".into(), json!(instructions));
        let params = ModelParams::default()
            .temperature(self.settings.generate_temperature)
            .merged(params);
        let plan = self.plan_tool(
            &Transcript::bundled("generate")?,
            None,
            bindings,
            &TypeSpec::list(item.clone()),
            &ContractNaming::default(),
            &params,
        )?;

        let attempts = self.settings.max_generate_attempts.max(1);
        let mut received = 0;
        for attempt in 1..=attempts {
            let mut items = match self.run_tool(&plan).await? {
                Value::Array(items) => items,
                other => return Err(Error::validation("$", format!("expected list, got {other}"))),
            };
            if items.len() >= n {
                debug!(attempt, requested = n, received = items.len(), "generated");
                items.truncate(n);
                return Ok(items);
            }
            received = items.len();
            warn!(attempt, requested = n, received, "generated too few items, retrying");
        }
        Err(Error::GenerationExhausted {
            requested: n,
            received,
            attempts,
        })
    }

    pub async fn generate<T: JsonSchema + DeserializeOwned>(
        &self,
        n: usize,
        instructions: Option<&str>,
    ) -> Result<Vec<T>> {
        let items = self
            .generate_value(&TypeSpec::of::<T>()?, n, instructions, &ModelParams::default())
            .await?;
        items.into_iter().map(from_value).collect()
    }
}
