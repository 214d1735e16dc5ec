use thiserror::Error;

pub type Result<T> = std::result::Result<T, FoldError>;

#[derive(Error, Debug)]
pub enum FoldError {
    /// Bad user input: missing argument, unknown filter column, invalid selector, ...
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input data that cannot be interpreted (missing XML fields, bad numbers, bad CSV layout).
    #[error("Data error: {0}")]
    Data(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` returned non-zero exit status {code}")]
    ToolFailed { program: String, code: i32 },
}

impl FoldError {
    pub fn config(msg: impl Into<String>) -> Self {
        FoldError::Config(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        FoldError::Data(msg.into())
    }
}
