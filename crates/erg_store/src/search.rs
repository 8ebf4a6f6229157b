//! The distributed search planner.
//!
//! A query fans out across many isolated stores and comes back as one
//! deterministically-ordered page: `created_at` descending, ties broken by
//! source ascending, then id ascending. The planner never computes a global
//! match count — `has_more` comes from a cheap one-row probe past the current
//! window, and `total_pages` is a lower bound.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools as _;

use erg_types::Block;

use crate::{QueryError, StorageManager, StoreQuery};

pub const DEFAULT_PAGE_LIMIT: usize = 30;

#[derive(Clone, Debug, PartialEq)]
pub struct SearchParams {
    /// FTS query; empty means "everything, newest first".
    pub query: String,

    /// Instance names to search; empty means all configured.
    pub datasources: Vec<String>,

    /// 1-based.
    pub page: usize,
    pub limit: usize,

    /// Inclusive `created_at` window.
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            datasources: Vec::new(),
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            start: None,
            end: None,
        }
    }
}

impl SearchParams {
    fn validate(&self) -> Result<(), QueryError> {
        if self.page < 1 {
            return Err(QueryError::invalid_param("page", "must be at least 1"));
        }
        if self.limit < 1 {
            return Err(QueryError::invalid_param("limit", "must be at least 1"));
        }
        Ok(())
    }
}

/// Parse the transport-level parameter surface: `q`, repeated `datasource`,
/// `page`, `limit`, `start_date`/`end_date` as `YYYY-MM-DD`.
///
/// Unknown keys are ignored; invalid values are typed errors, never
/// interpreted as SQL.
pub fn parse_search_params<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<SearchParams, QueryError> {
    let mut params = SearchParams::default();

    for (key, value) in pairs {
        match key {
            "q" => params.query = value.to_owned(),
            "datasource" => {
                if !value.is_empty() {
                    params.datasources.push(value.to_owned());
                }
            }
            "page" => {
                params.page = value
                    .parse::<usize>()
                    .ok()
                    .filter(|p| *p >= 1)
                    .ok_or_else(|| {
                        QueryError::invalid_param("page", "expected a positive integer")
                    })?;
            }
            "limit" => {
                params.limit = value
                    .parse::<usize>()
                    .ok()
                    .filter(|l| *l >= 1)
                    .ok_or_else(|| {
                        QueryError::invalid_param("limit", "expected a positive integer")
                    })?;
            }
            "start_date" => {
                let date = parse_date("start_date", value)?;
                params.start = Some(
                    date.and_hms_opt(0, 0, 0)
                        .expect("midnight is always valid")
                        .and_utc(),
                );
            }
            "end_date" => {
                let date = parse_date("end_date", value)?;
                // Inclusive end: snap to the last representable instant of the day.
                params.end = Some(
                    date.and_hms_nano_opt(23, 59, 59, 999_999_999)
                        .expect("end of day is always valid")
                        .and_utc(),
                );
            }
            _ => {}
        }
    }

    Ok(params)
}

fn parse_date(param: &str, value: &str) -> Result<NaiveDate, QueryError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| QueryError::invalid_param(param, format!("expected YYYY-MM-DD, got {value:?}")))
}

/// One merged page of results.
#[derive(Debug)]
pub struct SearchResults {
    /// The page, grouped by datasource instance.
    pub hits: BTreeMap<String, Vec<Arc<dyn Block>>>,

    /// The page as one flat, deterministically-ordered slice.
    pub ordered: Vec<Arc<dyn Block>>,

    /// Number of blocks on this page (not a global count).
    pub total_count: usize,

    pub has_more: bool,

    /// Lower bound: `page` if this is the last page, else `page + 1`.
    pub total_pages: usize,

    pub page: usize,
    pub limit: usize,
    pub query: String,
}

/// Fans queries out across the manager's stores.
pub struct SearchService {
    manager: Arc<StorageManager>,
}

impl SearchService {
    pub fn new(manager: Arc<StorageManager>) -> Self {
        Self { manager }
    }

    pub fn search(&self, params: &SearchParams) -> Result<SearchResults, QueryError> {
        params.validate()?;

        let targets = self.resolve_targets(params);
        let offset = (params.page - 1) * params.limit;

        let store_query = StoreQuery {
            text: (!params.query.is_empty()).then(|| params.query.clone()),
            start: params.start,
            end: params.end,
            limit: params.limit,
            offset,
        };

        let mut merged = self.fan_out(&targets, &store_query)?;
        merged.sort_by(compare_blocks);

        // Leftovers beyond this page prove there is more without a probe.
        let overflow = merged.len() > params.limit;
        merged.truncate(params.limit);

        let has_more = overflow || self.probe_has_more(&targets, params);
        let total_pages = if has_more {
            params.page + 1
        } else {
            params.page
        };

        let mut hits: BTreeMap<String, Vec<Arc<dyn Block>>> = BTreeMap::new();
        for block in &merged {
            hits.entry(block.source().to_owned())
                .or_default()
                .push(block.clone());
        }

        Ok(SearchResults {
            hits,
            total_count: merged.len(),
            has_more,
            total_pages,
            page: params.page,
            limit: params.limit,
            query: params.query.clone(),
            ordered: merged,
        })
    }

    fn resolve_targets(&self, params: &SearchParams) -> Vec<String> {
        if params.datasources.is_empty() {
            return self.manager.configured_names();
        }
        let (known, unknown): (Vec<String>, Vec<String>) = params
            .datasources
            .iter()
            .cloned()
            .unique()
            .partition(|name| self.manager.is_configured(name));
        for name in unknown {
            erg_log::warn!(datasource = %name, "ignoring unknown datasource filter");
        }
        known
    }

    /// Query every target concurrently; a failing store contributes an empty
    /// slice (with a warning), but a bad query fails the whole search.
    fn fan_out(
        &self,
        targets: &[String],
        query: &StoreQuery,
    ) -> Result<Vec<Arc<dyn Block>>, QueryError> {
        let results: Vec<(String, Result<Vec<Arc<dyn Block>>, crate::StorageError>)> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = targets
                    .iter()
                    .map(|name| {
                        let manager = &self.manager;
                        scope.spawn(move || {
                            let result = manager
                                .get_store(name)
                                .and_then(|store| store.search(query));
                            (name.clone(), result)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("search worker panicked"))
                    .collect()
            });

        let mut merged = Vec::new();
        for (name, result) in results {
            match result {
                Ok(blocks) => merged.extend(blocks),
                Err(crate::StorageError::Query(err)) => return Err(err),
                Err(err) => {
                    erg_log::warn!(datasource = %name, %err, "store failed during search fan-out");
                }
            }
        }
        Ok(merged)
    }

    /// One-row probe past the current window: does any store still have a
    /// match at offset `page * limit`?
    fn probe_has_more(&self, targets: &[String], params: &SearchParams) -> bool {
        let probe = StoreQuery {
            text: (!params.query.is_empty()).then(|| params.query.clone()),
            start: params.start,
            end: params.end,
            limit: 1,
            offset: params.page * params.limit,
        };

        targets.iter().any(|name| {
            match self
                .manager
                .get_store(name)
                .and_then(|store| store.search(&probe))
            {
                Ok(blocks) => !blocks.is_empty(),
                Err(err) => {
                    erg_log::warn!(datasource = %name, %err, "store failed during has-more probe");
                    false
                }
            }
        })
    }
}

/// The global result order: newest first, ties by source then id, both
/// ascending — stable pagination requires equal timestamps not to reshuffle.
fn compare_blocks(a: &Arc<dyn Block>, b: &Arc<dyn Block>) -> std::cmp::Ordering {
    b.created_at()
        .cmp(&a.created_at())
        .then_with(|| a.source().cmp(b.source()))
        .then_with(|| a.id().cmp(b.id()))
}
