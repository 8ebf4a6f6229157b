use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::Value;

/// A single unit of harvested content.
///
/// Blocks are value objects: created once by a datasource, persisted by the
/// warehouse, and reconstructed from their stored form on the way out.
///
/// Identity is `(source, id)` — `id` is datasource-supplied and must be stable
/// across refetches so refetched content upserts instead of duplicating.
pub trait Block: Send + Sync + std::fmt::Debug {
    /// Unique within one datasource instance.
    fn id(&self) -> &str;

    /// The searchable content.
    fn text(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    /// The datasource *instance* that produced this block — the routing key.
    fn source(&self) -> &str;

    /// The datasource *type* (e.g. `"github"`), distinct from the instance.
    fn kind(&self) -> &str;

    fn hostname(&self) -> Option<&str> {
        None
    }

    fn metadata(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    /// A short one-line description, suitable for list views.
    fn summary(&self) -> String {
        let first_line = self.text().lines().next().unwrap_or_default();
        let mut summary: String = first_line.chars().take(120).collect();
        if summary.len() < first_line.len() {
            summary.push('…');
        }
        summary
    }

    /// A human-readable multi-line rendering.
    fn pretty_text(&self) -> String {
        format!(
            "[{}] {} ({})\n{}",
            self.kind(),
            self.source(),
            self.created_at().to_rfc3339(),
            self.text()
        )
    }
}

/// The persisted form of a block: what every store row decodes into.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenericBlock {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,

    /// The datasource type, `"type"` on the wire.
    #[serde(rename = "type")]
    pub kind: String,

    /// The datasource instance name.
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Block for GenericBlock {
    fn id(&self) -> &str {
        &self.id
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    fn metadata(&self) -> BTreeMap<String, Value> {
        self.metadata.clone()
    }
}

/// Rebuilds a concrete block from its persisted generic form.
///
/// Implementations must be total (never fail) and must set the block's source
/// to the passed-in instance name — reconstruction preserves routing.
pub trait BlockFactory: Send + Sync {
    fn from_generic(&self, generic: &GenericBlock, source: &str) -> Arc<dyn Block>;
}

/// The identity factory: hands the generic block back as-is.
///
/// Used for stores whose datasource registered no richer prototype.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericBlockFactory;

impl BlockFactory for GenericBlockFactory {
    fn from_generic(&self, generic: &GenericBlock, source: &str) -> Arc<dyn Block> {
        let mut block = generic.clone();
        block.source = source.to_owned();
        Arc::new(block)
    }
}
