use thiserror::Error;

use crate::llm::DispatchError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema compilation failed: {0}")]
    SchemaCompilation(String),

    #[error("Prompt rendering failed: {0}")]
    PromptRender(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Response invoked unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid output at `{path}`: {message}")]
    Validation { path: String, message: String },

    #[error("Response carried no {expected}")]
    EmptyOutput { expected: String },

    #[error("Label index {raw:?} is not one of the {count} offered labels")]
    LabelIndex { raw: String, count: usize },

    #[error("Expected {requested} items but got {received} after {attempts} attempts")]
    GenerationExhausted {
        requested: usize,
        received: usize,
        attempts: usize,
    },

    #[error("Invalid labels: {0}")]
    InvalidLabels(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl Error {
    pub(crate) fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Error::SchemaCompilation(message.into())
    }
}

impl From<tera::Error> for Error {
    fn from(error: tera::Error) -> Self {
        // tera nests the useful detail (e.g. the missing variable) in the source chain
        let mut message = error.to_string();
        let mut source = std::error::Error::source(&error);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        Error::PromptRender(message)
    }
}
