use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown column '{name}' on table '{table}'")]
    UnknownColumn { table: &'static str, name: String },

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Id generation error: {0}")]
    IdGeneration(String),
}
