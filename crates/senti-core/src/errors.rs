use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Input text was empty or whitespace-only. Raised before any cache or
    /// backend interaction.
    #[error("input text is empty")]
    EmptyInput,

    /// A backend returned a sentiment label outside its documented vocabulary.
    #[error("backend {backend} returned unmappable sentiment label {label:?}")]
    UnmappableSentiment { backend: String, label: String },

    /// Every stage of the fallback chain failed, including the local analyzer.
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Parse(e.to_string())
    }
}
