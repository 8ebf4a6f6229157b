use std::collections::BTreeMap;

/// Columns every store carries; a schema may not redeclare them.
pub const RESERVED_COLUMNS: &[&str] = &[
    "id",
    "text",
    "created_at",
    "source",
    "datasource",
    "metadata",
    "hostname",
    "updated_at",
    "rowid",
];

/// The storage type of a schema-declared metadata column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Datetime,
    Blob,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Datetime => "TIMESTAMP",
            Self::Blob => "BLOB",
        }
    }

    /// Only text columns are mirrored into the full-text index.
    pub fn is_searchable(self) -> bool {
        matches!(self, Self::Text)
    }
}

/// The metadata columns a datasource declares for its store.
///
/// Ordered by column name so generated SQL is deterministic.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BlockSchema {
    columns: BTreeMap<String, ColumnType>,
}

impl BlockSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column declaration.
    ///
    /// Column names must be valid identifiers and must not shadow one of the
    /// [`RESERVED_COLUMNS`]; the storage layer re-validates before any DDL is
    /// generated.
    pub fn with_column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        let name = name.into();
        debug_assert!(
            Self::is_valid_column_name(&name),
            "invalid schema column name {name:?}"
        );
        self.columns.insert(name, ty);
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    /// The schema columns that are mirrored into the full-text index.
    pub fn text_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|(_, ty)| ty.is_searchable())
            .map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `[a-z_][a-z0-9_]*`, and not one of the fixed store columns.
    pub fn is_valid_column_name(name: &str) -> bool {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        if !(first.is_ascii_lowercase() || first == '_') {
            return false;
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return false;
        }
        !RESERVED_COLUMNS.contains(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_name_validation() {
        assert!(BlockSchema::is_valid_column_name("repo_name"));
        assert!(BlockSchema::is_valid_column_name("_private"));
        assert!(!BlockSchema::is_valid_column_name(""));
        assert!(!BlockSchema::is_valid_column_name("0day"));
        assert!(!BlockSchema::is_valid_column_name("drop table"));
        assert!(!BlockSchema::is_valid_column_name("Name"));
        assert!(!BlockSchema::is_valid_column_name("id"));
        assert!(!BlockSchema::is_valid_column_name("rowid"));
    }

    #[test]
    fn text_columns_only_searchable() {
        let schema = BlockSchema::new()
            .with_column("title", ColumnType::Text)
            .with_column("stars", ColumnType::Integer)
            .with_column("url", ColumnType::Text);

        let text: Vec<_> = schema.text_columns().collect();
        assert_eq!(text, vec!["title", "url"]);
    }
}
