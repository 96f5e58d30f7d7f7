//! Label grammars: a closed set of choices the model answers by index.
//!
//! Classification never asks the model to spell a label. The labels are
//! numbered, the model emits the index, and the request is constrained so the
//! index is the only thing it can reasonably emit: through logit bias on the
//! index tokens when a tokenizer is available, or through a short digit-only
//! completion otherwise.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::llm::types::ChatRequest;
use crate::schema::{ScalarKind, TypeSpec};

/// Bias applied to every token of an admissible index.
pub const LABEL_TOKEN_BIAS: i32 = 100;

/// Maps text to the backend model's token ids.
pub trait TokenEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
}

impl<F> TokenEncoder for F
where
    F: Fn(&str) -> Vec<u32> + Send + Sync,
{
    fn encode(&self, text: &str) -> Vec<u32> {
        self(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenConstraint {
    LogitBias(BTreeMap<String, i32>),
    /// No tokenizer: accept only a decimal index of at most `width` digits.
    Digits { width: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelGrammar {
    labels: Vec<String>,
    constraint: TokenConstraint,
    max_tokens: u32,
}

impl LabelGrammar {
    pub fn build(
        labels: Vec<String>,
        encoder: Option<&dyn TokenEncoder>,
        max_tokens: u32,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::InvalidLabels("at least one label is required".into()));
        }
        let (constraint, needed) = match encoder {
            Some(encoder) => {
                let mut bias = BTreeMap::new();
                let mut longest = 0;
                for index in 0..labels.len() {
                    let tokens = encoder.encode(&index.to_string());
                    longest = longest.max(tokens.len());
                    for token in tokens {
                        bias.insert(token.to_string(), LABEL_TOKEN_BIAS);
                    }
                }
                (TokenConstraint::LogitBias(bias), longest)
            }
            None => {
                let width = digits(labels.len() - 1);
                (TokenConstraint::Digits { width }, width)
            }
        };
        let needed = u32::try_from(needed).unwrap_or(u32::MAX);
        Ok(Self {
            labels,
            constraint,
            max_tokens: max_tokens.max(needed),
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn constraint(&self) -> &TokenConstraint {
        &self.constraint
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Attach the constraint to an outgoing request.
    pub fn apply(&self, request: &mut ChatRequest) {
        request.max_tokens = Some(self.max_tokens);
        if let TokenConstraint::LogitBias(bias) = &self.constraint {
            request.logit_bias = Some(bias.clone());
        }
    }

    /// Every string the grammar admits, in label order.
    pub fn decodings(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.labels.len()).map(|i| i.to_string())
    }

    pub fn decode_index(&self, text: &str) -> Result<usize> {
        let raw = text.trim();
        let invalid = || Error::LabelIndex {
            raw: raw.to_string(),
            count: self.labels.len(),
        };
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if raw.len() > 1 && raw.starts_with('0') {
            return Err(invalid());
        }
        if let TokenConstraint::Digits { width } = self.constraint {
            if raw.len() > width {
                return Err(invalid());
            }
        }
        match raw.parse::<usize>() {
            Ok(index) if index < self.labels.len() => Ok(index),
            _ => Err(invalid()),
        }
    }

    pub fn decode(&self, text: &str) -> Result<&str> {
        let index = self.decode_index(text)?;
        Ok(&self.labels[index])
    }
}

fn digits(mut n: usize) -> usize {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Text,
    Enum,
    Boolean,
}

/// Ordered label strings plus how a chosen label maps back to a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
    labels: Vec<String>,
    coercion: Coercion,
}

impl Labels {
    /// Duplicates are dropped, first occurrence wins.
    pub fn from_strings<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Result<Self> {
        let mut seen = HashSet::new();
        let labels: Vec<String> = labels
            .into_iter()
            .map(Into::into)
            .filter(|l| seen.insert(l.clone()))
            .collect();
        if labels.is_empty() {
            return Err(Error::InvalidLabels("at least one label is required".into()));
        }
        Ok(Self {
            labels,
            coercion: Coercion::Text,
        })
    }

    pub fn from_spec(spec: &TypeSpec) -> Result<Self> {
        match spec {
            TypeSpec::Enum(labels) => Ok(Self {
                coercion: Coercion::Enum,
                ..Self::from_strings(labels.iter().cloned())?
            }),
            TypeSpec::Scalar(ScalarKind::Boolean) => Ok(Self {
                labels: vec!["false".into(), "true".into()],
                coercion: Coercion::Boolean,
            }),
            other => Err(Error::InvalidLabels(format!(
                "cannot classify into {}",
                other.describe()
            ))),
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    pub fn coercion(&self) -> Coercion {
        self.coercion
    }

    pub fn grammar(
        &self,
        encoder: Option<&Arc<dyn TokenEncoder>>,
        max_tokens: u32,
    ) -> Result<LabelGrammar> {
        LabelGrammar::build(self.labels.clone(), encoder.map(|e| &**e), max_tokens)
    }

    /// JSON value of the chosen label, ready to deserialize.
    pub fn coerce(&self, label: &str) -> Result<Value> {
        if !self.labels.iter().any(|l| l == label) {
            return Err(Error::LabelIndex {
                raw: label.to_string(),
                count: self.labels.len(),
            });
        }
        Ok(match self.coercion {
            Coercion::Text | Coercion::Enum => Value::String(label.to_string()),
            Coercion::Boolean => Value::Bool(label == "true"),
        })
    }
}
