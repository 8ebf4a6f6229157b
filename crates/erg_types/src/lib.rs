//! The basic building blocks of the ergs data-hoarding engine.
//!
//! This crate defines the vocabulary shared by every other ergs crate:
//!
//! * [`Block`] — a timestamped, typed, sourced unit of harvested content,
//!   with [`GenericBlock`] as its persisted form.
//! * [`Value`] — the JSON-scalar metadata values a block may carry.
//! * [`BlockSchema`] — the per-datasource metadata columns, materialized by
//!   the storage layer.
//! * [`Datasource`] — the contract every adapter implements: a lazy,
//!   cancellable stream of blocks.
//! * [`Registry`] — the process-wide map of live datasource instances.
//! * [`WireEvent`] — the newline-framed JSON events of the live firehose.

mod block;
mod cancel;
mod datasource;
mod event;
mod registry;
mod schema;
mod value;

#[cfg(feature = "testkit")]
#[doc(hidden)]
pub mod testkit;

pub use self::block::{Block, BlockFactory, GenericBlock, GenericBlockFactory};
pub use self::cancel::CancelToken;
pub use self::datasource::{send_block, BlockSender, Datasource, FetchError};
pub use self::event::{
    BlockEvent, EventSink, HeartbeatEvent, MessageEvent, SinkSet, WireEvent, MAX_EVENT_LINE_LEN,
};
pub use self::registry::{
    default_registry, register_datasource_kind, registered_kinds, DatasourceFactory, Registry,
    RegistryError,
};
pub use self::schema::{BlockSchema, ColumnType, RESERVED_COLUMNS};
pub use self::value::Value;
