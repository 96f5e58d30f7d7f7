//! Typed generation on top of OpenAI-compatible chat completion backends.
//!
//! Ask for a value of a known shape and get back exactly that shape:
//!
//! * [`Engine::cast`], [`Engine::extract`] and [`Engine::generate`] force the
//!   model to answer through a single structured-output tool whose parameters
//!   mirror the requested type, then validate what comes back.
//! * [`Engine::classify`] numbers the labels and constrains the model to emit
//!   one index.
//! * [`AiFunction`] evaluates a body-less function declared with
//!   [`signature!`], and [`FromText`] builds records from free text.

pub mod assets;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod function;
pub mod kv;
pub mod labels;
pub mod llm;
pub mod logging;
pub mod model;
pub mod prompt;
pub mod schema;

#[cfg(test)]
mod test_utils;

pub use engine::{Engine, EngineSettings, LlmResponse};
pub use error::{Error, Result};
pub use function::{AiFunction, BatchArgs, CallArgs, CallingConvention, FunctionSignature, Invocation};
pub use labels::{LabelGrammar, Labels, TokenEncoder};
pub use llm::{ChatBackend, DispatchError, LlmErrorKind, ModelParams, OpenAIClient};
pub use model::FromText;
pub use prompt::{PromptEnvironment, Transcript};
pub use schema::{ContractNaming, ToolContract, TypeSpec};
