#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("invalid block: {reason}")]
    InvalidBlock { reason: String },

    #[error("importer endpoint: {0}")]
    Endpoint(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ImportError {
    pub fn invalid_block(reason: impl Into<String>) -> Self {
        Self::InvalidBlock {
            reason: reason.into(),
        }
    }
}
