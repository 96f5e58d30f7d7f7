//! The typed generation engine: render, dispatch, decode.

mod generate;

use std::sync::Arc;

use anyhow::Context;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::{AppConfig, DEFAULT_MAX_GENERATE_ATTEMPTS, DEFAULT_MODEL};
use crate::decode::{decode_field, decode_label, decode_tool_outputs};
use crate::error::{Error, Result};
use crate::labels::{Labels, TokenEncoder};
use crate::llm::{ChatBackend, ChatRequest, ChatResponse, Dispatcher, ModelParams, OpenAIClient};
use crate::prompt::{PromptEnvironment, Transcript};
use crate::schema::{ContractNaming, TypeSpec, compile_contract};

/// Engine-wide settings, fixed when the engine is built.
#[derive(Clone)]
pub struct EngineSettings {
    pub model: String,
    pub verbose: bool,
    pub max_generate_attempts: usize,
    pub generate_temperature: f32,
    pub label_max_tokens: u32,
    /// Tokenizer of the backend model. Without one, label grammars fall back to digits.
    pub encoder: Option<Arc<dyn TokenEncoder>>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            verbose: false,
            max_generate_attempts: DEFAULT_MAX_GENERATE_ATTEMPTS,
            generate_temperature: 1.0,
            label_max_tokens: 1,
            encoder: None,
        }
    }
}

impl std::fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSettings")
            .field("model", &self.model)
            .field("verbose", &self.verbose)
            .field("max_generate_attempts", &self.max_generate_attempts)
            .field("generate_temperature", &self.generate_temperature)
            .field("label_max_tokens", &self.label_max_tokens)
            .field("encoder", &self.encoder.is_some())
            .finish()
    }
}

impl EngineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            model: cfg.model.clone(),
            verbose: cfg.log_verbose,
            max_generate_attempts: cfg.max_generate_attempts,
            ..Self::default()
        }
    }

    pub fn with_encoder(mut self, encoder: impl TokenEncoder + 'static) -> Self {
        self.encoder = Some(Arc::new(encoder));
        self
    }
}

/// A raw exchange: what was sent, what came back, and the decoded tool outputs.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub request: ChatRequest,
    pub response: ChatResponse,
    pub tool_outputs: Vec<Value>,
}

impl LlmResponse {
    pub fn text(&self) -> Option<&str> {
        self.response.first_message()?.content.as_deref()
    }
}

/// A structured-output request ready to dispatch, plus the field to read back.
#[derive(Debug, Clone)]
pub(crate) struct ToolPlan {
    pub(crate) request: ChatRequest,
    pub(crate) field: String,
}

/// A label-constrained request ready to dispatch.
#[derive(Debug, Clone)]
pub(crate) struct LabelPlan {
    request: ChatRequest,
    labels: Labels,
    grammar: crate::labels::LabelGrammar,
}

#[derive(Debug, Clone)]
pub struct Engine {
    dispatcher: Dispatcher,
    settings: EngineSettings,
    environment: Arc<PromptEnvironment>,
}

impl Engine {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: EngineSettings) -> Self {
        Self {
            dispatcher: Dispatcher::new(backend, settings.verbose),
            settings,
            environment: Arc::new(PromptEnvironment::default()),
        }
    }

    /// Engine backed by an [`OpenAIClient`] built from `cfg`.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .context("OPENAI_API_KEY is not set (environment, CLI or config file)")?;
        let client = OpenAIClient::new(cfg.base_url.clone(), api_key)
            .context("build http client")?
            .with_llm_config(cfg.llm.clone());
        Ok(Self::new(Arc::new(client), EngineSettings::from_config(cfg)))
    }

    pub fn with_environment(mut self, environment: PromptEnvironment) -> Self {
        self.environment = Arc::new(environment);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn environment(&self) -> &PromptEnvironment {
        &self.environment
    }

    fn base_request(
        &self,
        transcript: &Transcript,
        env: Option<&PromptEnvironment>,
        bindings: &Value,
        params: &ModelParams,
    ) -> Result<ChatRequest> {
        let env = env.unwrap_or(&self.environment);
        let messages = transcript.render_to_messages(env, bindings)?;
        let mut request = ChatRequest::new(self.settings.model.clone(), messages);
        params.apply(&mut request);
        Ok(request)
    }

    /// Render `transcript` and send it as is, decoding any tool invocations.
    pub async fn respond(
        &self,
        transcript: &Transcript,
        bindings: &Value,
        params: &ModelParams,
    ) -> Result<LlmResponse> {
        let request = self.base_request(transcript, None, bindings, params)?;
        let response = self.dispatcher.send(&request).await?;
        let tool_outputs = decode_tool_outputs(&request, &response)?;
        Ok(LlmResponse {
            request,
            response,
            tool_outputs,
        })
    }

    pub fn respond_blocking(
        &self,
        transcript: &Transcript,
        bindings: &Value,
        params: &ModelParams,
    ) -> Result<LlmResponse> {
        let request = self.base_request(transcript, None, bindings, params)?;
        let response = self.dispatcher.send_blocking(&request)?;
        let tool_outputs = decode_tool_outputs(&request, &response)?;
        Ok(LlmResponse {
            request,
            response,
            tool_outputs,
        })
    }

    /// Build a request that forces one structured-output tool shaped like `spec`.
    ///
    /// `bindings` also receives `response_format` (the pretty printed parameter
    /// schema) and `tool_name`.
    pub(crate) fn plan_tool(
        &self,
        transcript: &Transcript,
        env: Option<&PromptEnvironment>,
        mut bindings: Map<String, Value>,
        spec: &TypeSpec,
        naming: &ContractNaming,
        params: &ModelParams,
    ) -> Result<ToolPlan> {
        let contract = compile_contract(spec, naming)?;
        let format = serde_json::to_string_pretty(&contract.parameters)
            .map_err(|e| Error::schema(format!("serialize parameters: {e}")))?;
        bindings.insert("response_format".into(), Value::String(format));
        bindings.insert("tool_name".into(), Value::String(contract.name.clone()));

        let mut request = self.base_request(transcript, env, &Value::Object(bindings), params)?;
        request.tool_choice = Some(contract.forced_choice());
        request.tools = Some(vec![contract.to_tool_def()]);
        Ok(ToolPlan {
            request,
            field: naming.field_name.clone(),
        })
    }

    fn finish_tool(plan: &ToolPlan, response: &ChatResponse) -> Result<Value> {
        let outputs = decode_tool_outputs(&plan.request, response)?;
        decode_field(outputs, &plan.field)
    }

    pub(crate) async fn run_tool(&self, plan: &ToolPlan) -> Result<Value> {
        let response = self.dispatcher.send(&plan.request).await?;
        Self::finish_tool(plan, &response)
    }

    pub(crate) fn run_tool_blocking(&self, plan: &ToolPlan) -> Result<Value> {
        let response = self.dispatcher.send_blocking(&plan.request)?;
        Self::finish_tool(plan, &response)
    }

    fn plan_labels(
        &self,
        data: &Value,
        labels: Labels,
        instructions: Option<&str>,
        params: &ModelParams,
    ) -> Result<LabelPlan> {
        let grammar = labels.grammar(
            self.settings.encoder.as_ref(),
            self.settings.label_max_tokens,
        )?;
        let bindings = json!({
            "data": prompt_data(data)?,
            "labels": labels.as_slice(),
            "instructions": instructions,
        });
        let params = ModelParams::default().temperature(0.0).merged(params);
        let mut request =
            self.base_request(&Transcript::bundled("classify")?, None, &bindings, &params)?;
        grammar.apply(&mut request);
        Ok(LabelPlan {
            request,
            labels,
            grammar,
        })
    }

    fn finish_labels(plan: &LabelPlan, response: &ChatResponse) -> Result<Value> {
        let label = decode_label(&plan.grammar, response)?;
        debug!(label, "classified");
        plan.labels.coerce(label)
    }

    /// Convert `data` into a value shaped like `spec`.
    pub async fn cast_value(
        &self,
        data: &Value,
        spec: &TypeSpec,
        instructions: Option<&str>,
        params: &ModelParams,
    ) -> Result<Value> {
        let plan = self.plan_data_tool("cast", data, spec, instructions, params)?;
        self.run_tool(&plan).await
    }

    pub fn cast_value_blocking(
        &self,
        data: &Value,
        spec: &TypeSpec,
        instructions: Option<&str>,
        params: &ModelParams,
    ) -> Result<Value> {
        let plan = self.plan_data_tool("cast", data, spec, instructions, params)?;
        self.run_tool_blocking(&plan)
    }

    pub async fn cast<T: JsonSchema + DeserializeOwned>(
        &self,
        data: impl Serialize,
        instructions: Option<&str>,
    ) -> Result<T> {
        let value = self
            .cast_value(
                &to_value(data)?,
                &TypeSpec::of::<T>()?,
                instructions,
                &ModelParams::default(),
            )
            .await?;
        from_value(value)
    }

    /// Pull every entity shaped like `item` out of `data`.
    pub async fn extract_value(
        &self,
        data: &Value,
        item: &TypeSpec,
        instructions: Option<&str>,
        params: &ModelParams,
    ) -> Result<Vec<Value>> {
        let spec = TypeSpec::list(item.clone());
        let plan = self.plan_data_tool("extract", data, &spec, instructions, params)?;
        into_items(self.run_tool(&plan).await?)
    }

    pub async fn extract<T: JsonSchema + DeserializeOwned>(
        &self,
        data: impl Serialize,
        instructions: Option<&str>,
    ) -> Result<Vec<T>> {
        let items = self
            .extract_value(
                &to_value(data)?,
                &TypeSpec::of::<T>()?,
                instructions,
                &ModelParams::default(),
            )
            .await?;
        items.into_iter().map(from_value).collect()
    }

    fn plan_data_tool(
        &self,
        template: &str,
        data: &Value,
        spec: &TypeSpec,
        instructions: Option<&str>,
        params: &ModelParams,
    ) -> Result<ToolPlan> {
        let mut bindings = Map::new();
        bindings.insert("data".into(), Value::String(prompt_data(data)?));
        bindings.insert("instructions".into(), json!(instructions));
        let params = ModelParams::default().temperature(0.0).merged(params);
        self.plan_tool(
            &Transcript::bundled(template)?,
            None,
            bindings,
            spec,
            &ContractNaming::default(),
            &params,
        )
    }

    /// Pick the label that best describes `data`, answered by index.
    pub async fn classify_value(
        &self,
        data: &Value,
        labels: Labels,
        instructions: Option<&str>,
        params: &ModelParams,
    ) -> Result<Value> {
        let plan = self.plan_labels(data, labels, instructions, params)?;
        let response = self.dispatcher.send(&plan.request).await?;
        Self::finish_labels(&plan, &response)
    }

    pub fn classify_value_blocking(
        &self,
        data: &Value,
        labels: Labels,
        instructions: Option<&str>,
        params: &ModelParams,
    ) -> Result<Value> {
        let plan = self.plan_labels(data, labels, instructions, params)?;
        let response = self.dispatcher.send_blocking(&plan.request)?;
        Self::finish_labels(&plan, &response)
    }

    pub async fn classify<S: Into<String>>(
        &self,
        data: impl Serialize,
        labels: impl IntoIterator<Item = S>,
        instructions: Option<&str>,
    ) -> Result<String> {
        let labels = Labels::from_strings(labels)?;
        let value = self
            .classify_value(&to_value(data)?, labels, instructions, &ModelParams::default())
            .await?;
        from_value(value)
    }

    /// Classify into a closed enum or `bool`.
    pub async fn classify_as<T: JsonSchema + DeserializeOwned>(
        &self,
        data: impl Serialize,
        instructions: Option<&str>,
    ) -> Result<T> {
        let labels = Labels::from_spec(&TypeSpec::of::<T>()?)?;
        let value = self
            .classify_value(&to_value(data)?, labels, instructions, &ModelParams::default())
            .await?;
        from_value(value)
    }
}

/// Text placed into prompts: strings verbatim, anything else as pretty JSON.
pub(crate) fn prompt_data(data: &Value) -> Result<String> {
    match data {
        Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string_pretty(other)
            .map_err(|e| Error::InvalidArguments(format!("data is not serializable: {e}"))),
    }
}

pub(crate) fn to_value(data: impl Serialize) -> Result<Value> {
    serde_json::to_value(data)
        .map_err(|e| Error::InvalidArguments(format!("data is not serializable: {e}")))
}

pub(crate) fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::validation("$", e.to_string()))
}

fn into_items(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(Error::validation("$", format!("expected list, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{DispatchError, LlmErrorKind, Role};
    use crate::test_utils::{Scripted, ScriptedBackend, data, text_response};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize, JsonSchema)]
    struct Location {
        city: String,
        state: String,
    }

    #[derive(Debug, PartialEq, Deserialize, JsonSchema)]
    enum Sentiment {
        Positive,
        Negative,
    }

    fn engine(backend: Arc<ScriptedBackend>) -> Engine {
        Engine::new(backend, EngineSettings::default())
    }

    #[tokio::test]
    async fn cast_forces_the_format_tool() {
        let backend = Arc::new(ScriptedBackend::with_tool_args([data(
            json!({"city": "New York", "state": "NY"}),
        )]));
        let location: Location = engine(backend.clone()).cast("the big apple", None).await.unwrap();
        assert_eq!(
            location,
            Location {
                city: "New York".into(),
                state: "NY".into()
            }
        );

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.forced_tool(), Some("FormatResponse"));
        assert_eq!(request.temperature, Some(0.0));
        let tools = request.tools.as_ref().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function.parameters["required"], json!(["data"]));
        // the parameter schema is also shown to the model
        assert!(request.messages[0].content.contains("\"city\""));
        assert_eq!(request.messages.last().unwrap().role, Role::User);
        assert!(request.messages.last().unwrap().content.contains("the big apple"));
    }

    #[tokio::test]
    async fn extract_reads_a_list() {
        let backend = Arc::new(ScriptedBackend::with_tool_args([data(json!([
            {"city": "Boston", "state": "MA"},
            {"city": "Austin", "state": "TX"}
        ]))]));
        let found: Vec<Location> = engine(backend)
            .extract("I flew from Boston to Austin", None)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].city, "Austin");
    }

    #[tokio::test]
    async fn classify_constrains_the_answer() {
        let backend = Arc::new(ScriptedBackend::with_text(["1"]));
        let label = engine(backend.clone())
            .classify("grass", ["red", "green", "blue"], None)
            .await
            .unwrap();
        assert_eq!(label, "green");

        let request = &backend.requests()[0];
        assert_eq!(request.max_tokens, Some(1));
        assert_eq!(request.temperature, Some(0.0));
        assert!(request.tools.is_none());
        assert!(request.messages[0].content.contains("2: blue"));
    }

    #[tokio::test]
    async fn classify_into_enum_and_bool() {
        let backend = Arc::new(ScriptedBackend::with_text(["0", "1"]));
        let engine = engine(backend);
        let sentiment: Sentiment = engine.classify_as("I love it", None).await.unwrap();
        assert_eq!(sentiment, Sentiment::Positive);
        let truthy: bool = engine.classify_as("the sky is blue", None).await.unwrap();
        assert!(truthy);
    }

    #[tokio::test]
    async fn out_of_range_label_fails() {
        let backend = Arc::new(ScriptedBackend::with_text(["9"]));
        let err = engine(backend)
            .classify("x", ["a", "b", "c"], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LabelIndex { count: 3, .. }));
    }

    #[tokio::test]
    async fn encoder_adds_logit_bias() {
        let backend = Arc::new(ScriptedBackend::with_text(["0"]));
        let settings =
            EngineSettings::default().with_encoder(|text: &str| vec![text.len() as u32 + 1000]);
        let engine = Engine::new(backend.clone(), settings);
        engine.classify("x", ["a", "b"], None).await.unwrap();
        let bias = backend.requests()[0].logit_bias.clone().unwrap();
        assert_eq!(bias.get("1001"), Some(&100));
    }

    #[tokio::test]
    async fn render_failure_skips_dispatch() {
        let backend = Arc::new(ScriptedBackend::with_text(["unused"]));
        let err = engine(backend.clone())
            .respond(
                &Transcript::new("user: {{ missing }}"),
                &json!({}),
                &ModelParams::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PromptRender(_)));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn dispatch_errors_surface() {
        let backend = Arc::new(ScriptedBackend::new([Scripted::Fail(DispatchError::new(
            LlmErrorKind::RateLimited,
            "slow down",
        ))]));
        let err = engine(backend)
            .cast_value(&json!("x"), &TypeSpec::string(), None, &ModelParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dispatch(e) if e.kind == LlmErrorKind::RateLimited));
    }

    #[tokio::test]
    async fn respond_returns_raw_exchange() {
        let backend = Arc::new(ScriptedBackend::new([Scripted::Respond(text_response("hello"))]));
        let params = ModelParams {
            model: Some("other-model".into()),
            ..Default::default()
        };
        let response = engine(backend)
            .respond(&Transcript::new("user: hi {{ name }}"), &json!({"name": "bob"}), &params)
            .await
            .unwrap();
        assert_eq!(response.text(), Some("hello"));
        assert_eq!(response.request.model, "other-model");
        assert!(response.tool_outputs.is_empty());
    }

    #[test]
    fn blocking_paths_work_outside_a_runtime() {
        let backend = Arc::new(ScriptedBackend::with_tool_args([data(json!(42))]));
        let value = engine(backend)
            .cast_value_blocking(&json!("forty two"), &TypeSpec::integer(), None, &ModelParams::default())
            .unwrap();
        assert_eq!(value, json!(42));
    }
}
