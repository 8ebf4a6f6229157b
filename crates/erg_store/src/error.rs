/// A user-facing search failure: bad query syntax or a bad parameter.
///
/// The messages are written for end users; raw engine errors never pass
/// through here verbatim.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("{message}")]
    InvalidQuery { query: String, message: String },

    #[error("invalid {param} parameter: {message}")]
    InvalidParam { param: String, message: String },
}

impl QueryError {
    pub fn invalid_param(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParam {
            param: param.into(),
            message: message.into(),
        }
    }

    /// Translate an FTS engine failure into a friendly message.
    pub fn from_fts_failure(query: &str, raw: &str) -> Self {
        let message = if query.contains('/') {
            "Forward slashes (/) are not allowed in search queries. \
             Quote the term (\"a/b\") or drop the slash."
                .to_owned()
        } else if query.matches('"').count() % 2 == 1 {
            "Unmatched quote in search query.".to_owned()
        } else if query.trim().is_empty() {
            "Empty search query.".to_owned()
        } else {
            "Invalid search query syntax. \
             Check for unbalanced quotes, parentheses, or special characters."
                .to_owned()
        };
        erg_log::debug!(query, raw, "rejected search query");
        Self::InvalidQuery {
            query: query.to_owned(),
            message,
        }
    }

    /// The message safe to show to an end user.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// The store needs migrations before it may be opened normally.
    ///
    /// Fatal for the storage manager; the migration tooling bypasses it via
    /// [`crate::GenericStorage::open_and_migrate`].
    #[error("datasource {datasource} has {count} pending migration(s); run migrations first")]
    PendingMigrations { datasource: String, count: usize },

    #[error("unknown datasource {name:?}")]
    UnknownDatasource { name: String },

    #[error("invalid schema column {column:?} declared by datasource {datasource}")]
    InvalidSchemaColumn { datasource: String, column: String },

    #[error("corrupt row in {datasource}: {reason}")]
    Corrupt { datasource: String, reason: String },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// `true` iff this is the pending-migrations gate (possibly nested).
    pub fn is_pending_migrations(&self) -> bool {
        matches!(self, Self::PendingMigrations { .. })
    }
}
