//! Functions without a body, evaluated by the model.
//!
//! A [`FunctionSignature`] describes the function the caller would have
//! written: its name, documentation, parameters and return type. An
//! [`AiFunction`] binds call arguments against that signature, shows the
//! model the definition and the bound arguments, and decodes the forced tool
//! output into the Rust return type `R`.
//!
//! ```ignore
//! let sig = typed_llm::signature!(
//!     /// Generates a list of `n` fruit.
//!     fn list_fruit(n: u32) -> Vec<String>
//! )?;
//! let list_fruit = AiFunction::<Vec<String>>::new(engine, sig)?;
//! let fruit = list_fruit.acall(CallArgs::new().arg(3)).await?;
//! ```

use std::future::IntoFuture;
use std::marker::PhantomData;

use futures::future::{BoxFuture, try_join_all};
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{Engine, ToolPlan, from_value, prompt_data};
use crate::error::{Error, Result};
use crate::llm::{DispatchError, LlmErrorKind, ModelParams};
use crate::prompt::{PromptEnvironment, Transcript};
use crate::schema::{ContractNaming, TypeSpec};

/// Whether the wrapped function is called synchronously or awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    Sync,
    Async,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<String>,
    pub default: Option<Value>,
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
            default: None,
        }
    }

    pub fn typed(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn or_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub name: String,
    pub convention: CallingConvention,
    pub doc: Option<String>,
    pub params: Vec<Param>,
    pub return_annotation: Option<String>,
    /// Shape of the return value. `None` means `String`.
    pub return_spec: Option<TypeSpec>,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>, convention: CallingConvention) -> Self {
        Self {
            name: name.into(),
            convention,
            doc: None,
            params: Vec::new(),
            return_annotation: None,
            return_spec: None,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        let doc = doc.into();
        self.doc = if doc.trim().is_empty() { None } else { Some(doc) };
        self
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn param(self, name: impl Into<String>, annotation: impl Into<String>) -> Self {
        self.with_param(Param::new(name).typed(annotation))
    }

    pub fn param_default(
        self,
        name: impl Into<String>,
        annotation: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        self.with_param(Param::new(name).typed(annotation).or_default(default))
    }

    pub fn returns(mut self, annotation: impl Into<String>, spec: TypeSpec) -> Self {
        self.return_annotation = Some(annotation.into());
        self.return_spec = Some(spec);
        self
    }

    /// The declared return shape, `String` when no return type was given.
    pub fn return_type(&self) -> TypeSpec {
        self.return_spec.clone().unwrap_or_else(TypeSpec::string)
    }

    /// Rust-like source of the declaration, shown to the model.
    pub fn definition(&self) -> String {
        let mut out = String::new();
        if let Some(doc) = &self.doc {
            for line in doc.lines() {
                out.push_str("///");
                if !line.is_empty() {
                    out.push(' ');
                    out.push_str(line);
                }
                out.push('\n');
            }
        }
        if self.convention == CallingConvention::Async {
            out.push_str("async ");
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let mut s = p.name.clone();
                if let Some(annotation) = &p.annotation {
                    s.push_str(": ");
                    s.push_str(annotation);
                }
                if let Some(default) = &p.default {
                    s.push_str(" = ");
                    s.push_str(&default.to_string());
                }
                s
            })
            .collect();
        out.push_str(&format!("fn {}({})", self.name, params.join(", ")));
        if let Some(ret) = &self.return_annotation {
            out.push_str(" -> ");
            out.push_str(ret);
        }
        out
    }

    /// Match `args` to the parameters, applying defaults. Result is in parameter order.
    pub fn bind(&self, args: CallArgs) -> Result<Vec<(String, Value)>> {
        if args.positional.len() > self.params.len() {
            return Err(Error::InvalidArguments(format!(
                "{}() takes {} arguments but {} were given",
                self.name,
                self.params.len(),
                args.positional.len()
            )));
        }
        let mut slots: Vec<Option<Value>> = vec![None; self.params.len()];
        for (slot, value) in slots.iter_mut().zip(args.positional) {
            *slot = Some(value);
        }
        for (name, value) in args.keyword {
            let index = self
                .params
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| {
                    Error::InvalidArguments(format!(
                        "{}() got an unexpected keyword argument `{name}`",
                        self.name
                    ))
                })?;
            if slots[index].is_some() {
                return Err(Error::InvalidArguments(format!(
                    "{}() got multiple values for argument `{name}`",
                    self.name
                )));
            }
            slots[index] = Some(value);
        }
        self.params
            .iter()
            .zip(slots)
            .map(|(param, slot)| match slot.or_else(|| param.default.clone()) {
                Some(value) => Ok((param.name.clone(), value)),
                None => Err(Error::InvalidArguments(format!(
                    "{}() missing required argument `{}`",
                    self.name, param.name
                ))),
            })
            .collect()
    }
}

/// Serialize a default value given to [`signature!`].
#[doc(hidden)]
pub fn default_value(param: &str, value: impl Serialize) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        Error::InvalidArguments(format!("default for `{param}` is not serializable: {e}"))
    })
}

/// Build a [`FunctionSignature`] from a Rust-like declaration.
///
/// Doc comments become the function documentation, `= expr` after a
/// parameter type gives it a default, and a missing return type means
/// `String`. The return type must implement `schemars::JsonSchema`.
///
/// Evaluates to `Result<FunctionSignature>`: a default that does not
/// serialize or a return type without a supported schema fails here.
#[macro_export]
macro_rules! signature {
    (@build $conv:ident, [$($doc:expr),*], $name:ident,
        [$($pname:ident : $pty:ty $(= $default:expr)?),* $(,)?], [$($ret:ty)?]) => {{
        #[allow(clippy::redundant_closure_call)]
        let sig = (|| -> $crate::Result<$crate::function::FunctionSignature> {
            let docs: &[&str] = &[$($doc),*];
            let doc = docs
                .iter()
                .copied()
                .map(|line| line.strip_prefix(' ').unwrap_or(line))
                .collect::<::std::vec::Vec<_>>()
                .join("\n");
            let sig = $crate::function::FunctionSignature::new(
                stringify!($name),
                $crate::function::CallingConvention::$conv,
            )
            .with_doc(doc);
            $(
                let param = $crate::function::Param::new(stringify!($pname)).typed(stringify!($pty));
                $(
                    let param = param.or_default(
                        $crate::function::default_value(stringify!($pname), $default)?,
                    );
                )?
                let sig = sig.with_param(param);
            )*
            $(
                let sig = sig.returns(stringify!($ret), $crate::schema::TypeSpec::of::<$ret>()?);
            )?
            Ok(sig)
        })();
        sig
    }};
    ($(#[doc = $doc:expr])* async fn $name:ident ( $($params:tt)* ) $(-> $ret:ty)?) => {
        $crate::signature!(@build Async, [$($doc),*], $name, [$($params)*], [$($ret)?])
    };
    ($(#[doc = $doc:expr])* fn $name:ident ( $($params:tt)* ) $(-> $ret:ty)?) => {
        $crate::signature!(@build Sync, [$($doc),*], $name, [$($params)*], [$($ret)?])
    };
}

/// Arguments of one call, positional first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }
}

/// Column-wise arguments for a batch: entry `i` of every column forms call `i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchArgs {
    positional: Vec<Vec<Value>>,
    keyword: Vec<(String, Vec<Value>)>,
}

impl BatchArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.positional
            .push(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn kw_column<V: Into<Value>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.keyword
            .push((name.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn into_calls(self) -> Result<Vec<CallArgs>> {
        let mut lengths = self
            .positional
            .iter()
            .map(Vec::len)
            .chain(self.keyword.iter().map(|(_, v)| v.len()));
        let Some(len) = lengths.next() else {
            return Ok(Vec::new());
        };
        if lengths.any(|l| l != len) {
            return Err(Error::InvalidArguments(
                "batch columns must all have the same length".into(),
            ));
        }

        let mut calls = vec![CallArgs::new(); len];
        for column in self.positional {
            for (call, value) in calls.iter_mut().zip(column) {
                call.positional.push(value);
            }
        }
        for (name, column) in self.keyword {
            for (call, value) in calls.iter_mut().zip(column) {
                call.keyword.push((name.clone(), value));
            }
        }
        Ok(calls)
    }
}

/// Outcome of [`AiFunction::invoke`]: already computed, or still to be awaited.
pub enum Invocation<'a, R> {
    Ready(Result<R>),
    Pending(BoxFuture<'a, Result<R>>),
}

impl<R> Invocation<'_, R> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Invocation::Ready(_))
    }

    pub fn into_ready(self) -> Option<Result<R>> {
        match self {
            Invocation::Ready(result) => Some(result),
            Invocation::Pending(_) => None,
        }
    }
}

impl<'a, R: Send + 'a> IntoFuture for Invocation<'a, R> {
    type Output = Result<R>;
    type IntoFuture = BoxFuture<'a, Result<R>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Invocation::Ready(result) => Box::pin(async move { result }),
            Invocation::Pending(future) => future,
        }
    }
}

/// A function evaluated by the model, returning `R`.
pub struct AiFunction<R = String> {
    engine: Engine,
    signature: FunctionSignature,
    returns: TypeSpec,
    template: Option<Transcript>,
    naming: ContractNaming,
    environment: Option<PromptEnvironment>,
    params: ModelParams,
    _returns: PhantomData<fn() -> R>,
}

impl<R> std::fmt::Debug for AiFunction<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiFunction")
            .field("signature", &self.signature)
            .field("naming", &self.naming)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<R> AiFunction<R>
where
    R: JsonSchema + DeserializeOwned + Send,
{
    /// Wrap `signature`, whose declared return type must have the same
    /// shape as `R`.
    pub fn new(engine: Engine, signature: FunctionSignature) -> Result<Self> {
        let returns = TypeSpec::of::<R>()?;
        let declared = signature.return_type();
        if declared != returns {
            return Err(Error::schema(format!(
                "{}() is declared to return {} but is wrapped as {}",
                signature.name,
                declared.describe(),
                returns.describe()
            )));
        }
        Ok(Self {
            engine,
            signature,
            returns,
            template: None,
            naming: ContractNaming::default(),
            environment: None,
            params: ModelParams::default(),
            _returns: PhantomData,
        })
    }

    pub fn with_template(mut self, template: Transcript) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_naming(mut self, naming: ContractNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_environment(mut self, environment: PromptEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn convention(&self) -> CallingConvention {
        self.signature.convention
    }

    fn plan(&self, args: CallArgs) -> Result<ToolPlan> {
        let bound = self.signature.bind(args)?;
        let mut arguments = Vec::with_capacity(bound.len());
        for (name, value) in &bound {
            arguments.push(json!({ "name": name, "value": prompt_data(value)? }));
        }

        let mut bindings = Map::new();
        bindings.insert("fn_definition".into(), Value::String(self.signature.definition()));
        bindings.insert("arguments".into(), Value::Array(arguments));

        let template = match &self.template {
            Some(template) => template.clone(),
            None => Transcript::bundled("function")?,
        };
        debug!(function = %self.signature.name, "invoking model function");
        self.engine.plan_tool(
            &template,
            self.environment.as_ref(),
            bindings,
            &self.returns,
            &self.naming,
            &self.params,
        )
    }

    /// Evaluate on the blocking path. Fails inside an async runtime.
    pub fn call(&self, args: CallArgs) -> Result<R> {
        let plan = self.plan(args)?;
        from_value(self.engine.run_tool_blocking(&plan)?)
    }

    pub async fn acall(&self, args: CallArgs) -> Result<R> {
        let plan = self.plan(args)?;
        from_value(self.engine.run_tool(&plan).await?)
    }

    /// Call the way the signature was declared: sync functions complete now,
    /// async ones return a future.
    pub fn invoke(&self, args: CallArgs) -> Invocation<'_, R> {
        match self.signature.convention {
            CallingConvention::Sync => Invocation::Ready(self.call(args)),
            CallingConvention::Async => Invocation::Pending(Box::pin(self.acall(args))),
        }
    }

    /// One blocking call per batch entry, in order, stopping at the first failure.
    pub fn map(&self, batch: BatchArgs) -> Result<Vec<R>> {
        batch
            .into_calls()?
            .into_iter()
            .map(|args| self.call(args))
            .collect()
    }

    /// All batch entries concurrently in the calling task, results in input order.
    ///
    /// The first failure fails the batch and drops the calls still in flight.
    pub async fn amap(&self, batch: BatchArgs) -> Result<Vec<R>> {
        let calls = batch.into_calls()?;
        try_join_all(calls.into_iter().map(|args| self.acall(args))).await
    }

    pub async fn amap_with_cancel(
        &self,
        batch: BatchArgs,
        token: &CancellationToken,
    ) -> Result<Vec<R>> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Dispatch(DispatchError::new(
                LlmErrorKind::Cancelled,
                "batch cancelled",
            ))),
            result = self.amap(batch) => result,
        }
    }
}
