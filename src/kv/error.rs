use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("Failed to access store file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse store data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store data must be a JSON object, got {0}")]
    NotAnObject(String),
}
